//! Length-prefixed field framing for bus packets.
//!
//! Every field is `len(2 BE) || bytes`. Numbers and dates travel as
//! decimal / ISO-8601 strings; an absent value is a zero-length field.
//! String lists encode the total byte length of the concatenated
//! encoded elements first.

use std::fmt::Display;
use std::str::FromStr;

use bytes::{Buf, BufMut};
use chrono::NaiveDate;

use crate::error::{ModelError, Result};

pub const LENGTH_PACKET_TYPE: usize = 1;
pub const LENGTH_FIELD: usize = 2;

fn field_len(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| ModelError::Codec(format!("field of {len} bytes too long")))
}

pub fn put_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    buf.put_u16(field_len(s.len())?);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub fn put_opt_str(buf: &mut Vec<u8>, s: Option<&str>) -> Result<()> {
    match s {
        Some(s) => put_str(buf, s),
        None => {
            buf.put_u16(0);
            Ok(())
        }
    }
}

pub fn put_num<T: Display>(buf: &mut Vec<u8>, n: T) -> Result<()> {
    put_str(buf, &n.to_string())
}

pub fn put_opt_num<T: Display>(buf: &mut Vec<u8>, n: Option<T>) -> Result<()> {
    match n {
        Some(n) => put_num(buf, n),
        None => {
            buf.put_u16(0);
            Ok(())
        }
    }
}

pub fn put_opt_date(buf: &mut Vec<u8>, d: Option<NaiveDate>) -> Result<()> {
    match d {
        Some(d) => put_str(buf, &d.to_string()),
        None => {
            buf.put_u16(0);
            Ok(())
        }
    }
}

pub fn put_str_list(buf: &mut Vec<u8>, items: &[String]) -> Result<()> {
    let mut inner = Vec::new();
    for item in items {
        put_str(&mut inner, item)?;
    }
    buf.put_u16(field_len(inner.len())?);
    buf.put_slice(&inner);
    Ok(())
}

fn take(buf: &mut &[u8], len: usize) -> Result<Vec<u8>> {
    if buf.remaining() < len {
        return Err(ModelError::Codec(format!(
            "truncated field: need {len} bytes, have {}",
            buf.remaining()
        )));
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

fn get_raw(buf: &mut &[u8]) -> Result<Vec<u8>> {
    if buf.remaining() < LENGTH_FIELD {
        return Err(ModelError::Codec("truncated field length".to_string()));
    }
    let len = buf.get_u16() as usize;
    take(buf, len)
}

pub fn get_str(buf: &mut &[u8]) -> Result<String> {
    let raw = get_raw(buf)?;
    String::from_utf8(raw).map_err(|e| ModelError::Codec(format!("invalid utf-8 field: {e}")))
}

pub fn get_opt_str(buf: &mut &[u8]) -> Result<Option<String>> {
    let s = get_str(buf)?;
    Ok(if s.is_empty() { None } else { Some(s) })
}

pub fn get_opt_num<T: FromStr>(buf: &mut &[u8]) -> Result<Option<T>> {
    let s = get_str(buf)?;
    if s.is_empty() {
        return Ok(None);
    }
    s.parse()
        .map(Some)
        .map_err(|_| ModelError::Codec(format!("invalid number: {s}")))
}

pub fn get_num<T: FromStr>(buf: &mut &[u8]) -> Result<T> {
    get_opt_num(buf)?.ok_or_else(|| ModelError::Codec("missing required number".to_string()))
}

pub fn get_opt_date(buf: &mut &[u8]) -> Result<Option<NaiveDate>> {
    let s = get_str(buf)?;
    if s.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| ModelError::Codec(format!("invalid date: {s}")))
}

pub fn get_str_list(buf: &mut &[u8]) -> Result<Vec<String>> {
    let raw = get_raw(buf)?;
    let mut inner: &[u8] = &raw;
    let mut out = Vec::new();
    while inner.has_remaining() {
        out.push(get_str(&mut inner)?);
    }
    Ok(out)
}
