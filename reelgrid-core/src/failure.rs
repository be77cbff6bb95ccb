//! Failure injection: abort a handler before its delivery is acked so
//! the broker redelivers, exercising the at-least-once + idempotence
//! design under churn.

use crate::error::{CoreError, Result};

pub fn fail_with_probability(probability: f64, site: &str) -> Result<()> {
    if probability > 0.0 && rand::random::<f64>() < probability {
        return Err(CoreError::InjectedFailure(site.to_string()));
    }
    Ok(())
}
