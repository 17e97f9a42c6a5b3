//! Parser for the acme.sh per-domain bookkeeping file (`<domain>.conf`).
//!
//! The file is a flat list of `Key='value'` assignments. Only three keys
//! matter here: issue time, planned renewal time, and the certificate link
//! whose last path segment is the serial.

use crate::types::{CertError, CertResult, RenewalState};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub const CREATE_TIME_KEY: &str = "Le_CertCreateTime";
pub const NEXT_RENEW_KEY: &str = "Le_NextRenewTime";
pub const LINK_CERT_KEY: &str = "Le_LinkCert";

/// Parse a bookkeeping record. Every field must be present and valid;
/// no partially filled state is ever returned.
pub fn parse(content: &[u8]) -> CertResult<RenewalState> {
    let text = std::str::from_utf8(content)
        .map_err(|_| CertError::MalformedRenewalState("not valid UTF-8".to_string()))?;
    let fields = parse_assignments(text);

    let created = parse_time(&fields, CREATE_TIME_KEY)?;
    let next_renewal = parse_time(&fields, NEXT_RENEW_KEY)?;
    let serial = parse_serial(&fields, LINK_CERT_KEY)?;

    Ok(RenewalState {
        created,
        next_renewal,
        serial,
    })
}

fn parse_assignments(text: &str) -> HashMap<&str, &str> {
    assignments(text).collect()
}

/// `KEY=VALUE` lines of a shell-style assignment file. Blank lines and
/// `#` comments are skipped; one matching pair of quotes around the value
/// is removed.
pub fn assignments(text: &str) -> impl Iterator<Item = (&str, &str)> {
    text.lines().filter_map(|line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let (key, value) = line.split_once('=')?;
        Some((key.trim(), unquote(value.trim())))
    })
}

fn unquote(value: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

fn required<'a>(fields: &HashMap<&str, &'a str>, name: &str) -> CertResult<&'a str> {
    fields
        .get(name)
        .copied()
        .ok_or_else(|| CertError::MalformedRenewalState(format!("missing {}", name)))
}

fn parse_time(fields: &HashMap<&str, &str>, name: &str) -> CertResult<DateTime<Utc>> {
    let raw = required(fields, name)?;
    let secs: i64 = raw
        .parse()
        .map_err(|_| CertError::MalformedRenewalState(format!("{} is not an integer", name)))?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| CertError::MalformedRenewalState(format!("{} is out of range", name)))
}

fn parse_serial(fields: &HashMap<&str, &str>, name: &str) -> CertResult<String> {
    let link = required(fields, name)?;
    let serial = match link.rfind('/') {
        Some(idx) => &link[idx + 1..],
        None => link,
    };
    if serial.is_empty() {
        return Err(CertError::MalformedRenewalState(format!("{} has no serial", name)));
    }
    Ok(serial.to_string())
}
