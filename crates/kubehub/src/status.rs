use std::sync::OnceLock;

use kwait_core::{ClusterError, Conflict};
use regex::Regex;

/// Map an API status response onto the error taxonomy.
pub fn classify_status(code: u16, reason: &str, message: &str) -> ClusterError {
    let detail = if message.is_empty() { format!("{} ({})", reason, code) } else { message.to_string() };
    match code {
        404 => ClusterError::NotFound(detail),
        409 => ClusterError::Conflict(parse_conflict(message)),
        408 | 429 | 500..=599 => ClusterError::Transient(detail),
        _ => ClusterError::Fatal(detail),
    }
}

pub(crate) fn from_kube(err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(ae) => classify_status(ae.code, &ae.reason, &ae.message),
        kube::Error::HyperError(e) => ClusterError::Transient(e.to_string()),
        kube::Error::Service(e) => ClusterError::Transient(e.to_string()),
        other => ClusterError::Fatal(other.to_string()),
    }
}

fn manager_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"conflicts? with "([^"]+)""#).expect("static regex"))
}

fn field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)(?:^\s*-\s*|using [^\s:]+:[ \t]*)(\.\S+)").expect("static regex"))
}

/// Extract owning managers and contested fields from an SSA conflict message:
///
/// ```text
/// Apply failed with 2 conflicts: conflicts with "helm" using apps/v1:
/// - .spec.replicas
/// - .spec.template.spec.containers[name="web"].image
/// ```
pub fn parse_conflict(message: &str) -> Conflict {
    let mut managers: Vec<String> = Vec::new();
    for cap in manager_re().captures_iter(message) {
        let m = cap[1].to_string();
        if !managers.contains(&m) {
            managers.push(m);
        }
    }
    let mut fields: Vec<String> = Vec::new();
    for cap in field_re().captures_iter(message) {
        let f = cap[1].to_string();
        if !fields.contains(&f) {
            fields.push(f);
        }
    }
    Conflict { managers, fields, message: message.to_string() }
}
