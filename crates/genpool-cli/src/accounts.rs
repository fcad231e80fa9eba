//! Inspection and maintenance of persisted account records.

use genpool_accounts::{AccountPatch, AccountRecord, AccountStore};
use genpool_core::{Error, Result};
use serde_json::Value;
use tracing::info;

const REDACTED: &str = "***";

/// One summary line per record, sorted by id.
pub fn list(store: &dyn AccountStore, now: i64) -> Vec<String> {
    let mut records = store.list();
    records.sort_by(|a, b| a.id.cmp(&b.id));
    records.iter().map(|r| summary(r, now)).collect()
}

fn summary(record: &AccountRecord, now: i64) -> String {
    let status = if record.destroyed {
        "destroyed".to_string()
    } else if let Some(until) = record.suspended_until.filter(|u| *u > now) {
        format!("suspended until {}", format_time(until))
    } else if record.email.is_empty() {
        "no email".to_string()
    } else {
        "eligible".to_string()
    };
    format!(
        "{}\t{}\tuses={}\tcookies={}\t{}",
        record.id,
        record.email,
        record.use_count,
        record.cookies.len(),
        status
    )
}

fn format_time(unix: i64) -> String {
    chrono::DateTime::from_timestamp(unix, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| unix.to_string())
}

/// Pretty JSON of a record with credentials and cookie values masked.
pub fn show(store: &dyn AccountStore, id: &str) -> Result<String> {
    let record = store
        .get(id)
        .ok_or_else(|| Error::NotFound(format!("account {}", id)))?;
    let mut value = serde_json::to_value(&record)?;
    redact(&mut value);
    Ok(serde_json::to_string_pretty(&value)?)
}

fn redact(value: &mut Value) {
    let Some(fields) = value.as_object_mut() else {
        return;
    };
    for key in ["password", "recovery", "token"] {
        if let Some(field) = fields.get_mut(key) {
            *field = Value::String(REDACTED.into());
        }
    }
    for key in ["cookies", "sessionCookies"] {
        if let Some(Value::Array(cookies)) = fields.get_mut(key) {
            for cookie in cookies {
                if let Some(v) = cookie.get_mut("value") {
                    *v = Value::String(REDACTED.into());
                }
            }
        }
    }
}

/// Clear a quota suspension so the account becomes eligible again.
pub fn unsuspend(store: &dyn AccountStore, id: &str) -> Result<AccountRecord> {
    let record = store.update(
        id,
        AccountPatch {
            suspended_until: Some(None),
            ..Default::default()
        },
    )?;
    info!("Suspension cleared for {}", id);
    Ok(record)
}
