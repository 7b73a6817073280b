//! Webhook payload fields shown to the operator

use serde_json::Value;
use std::fmt;

/// Fields pulled from a delivery for logging. None of them are required;
/// anything absent or of an unexpected shape is reported as missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushSummary {
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub pusher: Option<String>,
}

impl PushSummary {
    pub fn from_payload(payload: &Value) -> Self {
        let branch = payload
            .get("ref")
            .and_then(Value::as_str)
            .map(|r| r.strip_prefix("refs/heads/").unwrap_or(r).to_string());

        Self {
            repository: payload
                .get("repository")
                .and_then(|r| display_field(r, &["full_name", "name"])),
            branch,
            commit_sha: payload
                .get("sha")
                .or_else(|| payload.get("after"))
                .and_then(Value::as_str)
                .map(String::from),
            pusher: payload
                .get("pusher")
                .and_then(|p| display_field(p, &["name", "login", "email"])),
        }
    }
}

/// Accept either a plain string or an object carrying one of `keys`.
fn display_field(value: &Value, keys: &[&str]) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => keys
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(String::from),
        _ => None,
    }
}

fn or_none(field: &Option<String>) -> &str {
    field.as_deref().unwrap_or("(none)")
}

impl fmt::Display for PushSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "repository={} branch={} commit={} pusher={}",
            or_none(&self.repository),
            or_none(&self.branch),
            or_none(&self.commit_sha),
            or_none(&self.pusher),
        )
    }
}
