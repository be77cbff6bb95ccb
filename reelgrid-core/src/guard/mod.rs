//! Health-guard ring: each guard probes a deterministic slice of the
//! fleet and asks the supervisor to restart whatever stops answering.
//!
//! Guards protect each other along the ring (`id % cluster_size + 1`);
//! every other container is assigned by a stable hash of its name, so
//! all guards agree on the partition without coordinating.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use reelgrid_config::GuardSettings;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, Result};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// The container runtime, as far as the guard is concerned.
#[async_trait]
pub trait ContainerSupervisor: Send + Sync {
    /// Names of all containers in the compose project, running or not.
    async fn list_containers(&self, project: &str) -> Result<Vec<String>>;

    async fn restart(&self, name: &str) -> Result<()>;
}

/// Supervisor over the docker CLI.
#[derive(Debug, Default)]
pub struct DockerCliSupervisor;

#[async_trait]
impl ContainerSupervisor for DockerCliSupervisor {
    async fn list_containers(&self, project: &str) -> Result<Vec<String>> {
        let output = Command::new("docker")
            .args([
                "ps",
                "-a",
                "--filter",
                &format!("label=com.docker.compose.project={project}"),
                "--format",
                "{{.Names}}",
            ])
            .output()
            .await?;
        if !output.status.success() {
            return Err(CoreError::Internal(format!(
                "docker ps failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        let output = Command::new("docker").args(["restart", name]).output().await?;
        if !output.status.success() {
            return Err(CoreError::Internal(format!(
                "docker restart {name} failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }
}

/// Stable across processes: every guard computes the same assignment.
fn stable_hash(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

pub struct HealthGuard<S> {
    settings: GuardSettings,
    supervisor: S,
}

impl<S: ContainerSupervisor> HealthGuard<S> {
    pub fn new(settings: GuardSettings, supervisor: S) -> Self {
        Self {
            settings,
            supervisor,
        }
    }

    fn guard_id_of(&self, container: &str) -> Option<u32> {
        container
            .rsplit('_')
            .next()
            .and_then(|raw| raw.parse().ok())
    }

    pub fn should_guard(&self, container: &str) -> bool {
        if container.starts_with(&self.settings.service_prefix) {
            // Guards protect the next guard in the ring.
            return self
                .guard_id_of(container)
                .is_some_and(|id| id == self.settings.id % self.settings.cluster_size + 1);
        }
        if self
            .settings
            .dont_guard_containers
            .iter()
            .any(|prefix| container.starts_with(prefix))
        {
            return false;
        }
        stable_hash(container) % u64::from(self.settings.cluster_size) + 1
            == u64::from(self.settings.id)
    }

    async fn probe(&self, container: &str) -> bool {
        let connect = TcpStream::connect((container, self.settings.health_check_port));
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, connect).await {
            Ok(Ok(stream)) => {
                drop(stream);
                debug!(container = %container, "health check ok");
                true
            }
            Ok(Err(e)) => {
                error!(container = %container, error = %e, "health check failed");
                false
            }
            Err(_) => {
                error!(container = %container, "health check timed out");
                false
            }
        }
    }

    async fn guard(&self, container: &str) {
        if self.probe(container).await {
            return;
        }
        info!(container = %container, "reviving container");
        match self.supervisor.restart(container).await {
            Ok(()) => info!(container = %container, "container revived"),
            Err(e) => error!(container = %container, error = %e, "revive failed"),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let interval = Duration::from_secs(self.settings.seconds_between_health_checks);
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let containers = match self
                .supervisor
                .list_containers(&self.settings.compose_project_name)
                .await
            {
                Ok(containers) => containers,
                Err(e) => {
                    warn!(error = %e, "could not list containers");
                    Vec::new()
                }
            };
            for container in containers {
                if shutdown.is_cancelled() {
                    return Ok(());
                }
                if !self.should_guard(&container) {
                    continue;
                }
                self.guard(&container).await;
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            // An empty pass still waits before asking the supervisor again.
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StaticSupervisor {
        containers: Vec<String>,
        restarted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContainerSupervisor for StaticSupervisor {
        async fn list_containers(&self, _project: &str) -> Result<Vec<String>> {
            Ok(self.containers.clone())
        }

        async fn restart(&self, name: &str) -> Result<()> {
            self.restarted.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    fn guard(id: u32, cluster_size: u32) -> HealthGuard<StaticSupervisor> {
        HealthGuard::new(
            GuardSettings {
                health_check_port: 1,
                seconds_between_health_checks: 1,
                compose_project_name: "tp".to_string(),
                service_prefix: "health_guard".to_string(),
                dont_guard_containers: vec!["rabbitmq".to_string(), "client".to_string()],
                cluster_size,
                id,
            },
            StaticSupervisor {
                containers: Vec::new(),
                restarted: Mutex::new(Vec::new()),
            },
        )
    }

    #[test]
    fn allow_listed_containers_are_never_guarded() {
        let guard = guard(1, 3);
        assert!(!guard.should_guard("rabbitmq"));
        assert!(!guard.should_guard("client_2"));
    }

    #[test]
    fn every_worker_has_exactly_one_guard() {
        let cluster_size = 3;
        let guards: Vec<_> = (1..=cluster_size).map(|id| guard(id, cluster_size)).collect();
        for container in [
            "movies_filter_produced_in_argentina_1",
            "movies_filter_produced_in_argentina_2",
            "router_by_id_1",
            "data_cleaner",
            "results_handler",
            "top_investor_countries_calculator",
        ] {
            let responsible: Vec<u32> = guards
                .iter()
                .filter(|g| g.should_guard(container))
                .map(|g| g.settings.id)
                .collect();
            assert_eq!(responsible.len(), 1, "container {container} guards: {responsible:?}");
        }
    }

    #[test]
    fn guards_protect_the_next_guard_in_the_ring() {
        let guard_one = guard(1, 3);
        assert!(guard_one.should_guard("health_guard_2"));
        assert!(!guard_one.should_guard("health_guard_3"));
        assert!(!guard_one.should_guard("health_guard_1"));

        let guard_three = guard(3, 3);
        assert!(guard_three.should_guard("health_guard_1"));
    }
}
