use std::fmt;

/// Coarse classification shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Transient,
    Fatal,
    WaitTimeout,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
            ErrorKind::WaitTimeout => "wait_timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field-ownership conflict reported by server-side apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conflict {
    /// Field managers currently owning the contested fields.
    pub managers: Vec<String>,
    /// Contested field paths, as reported by the API server (e.g. `.spec.replicas`).
    pub fields: Vec<String>,
    pub message: String,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() && self.managers.is_empty() {
            return f.write_str(&self.message);
        }
        write!(f, "fields [{}] owned by [{}]", self.fields.join(", "), self.managers.join(", "))
    }
}

/// Errors surfaced by a cluster adapter call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("apply conflict: {0}")]
    Conflict(Conflict),
    /// Network failures, 5xx and throttling.
    #[error("transient: {0}")]
    Transient(String),
    /// Authorization, validation and any other non-retryable failure.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ClusterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClusterError::NotFound(_) => ErrorKind::NotFound,
            ClusterError::Conflict(_) => ErrorKind::Conflict,
            ClusterError::Transient(_) => ErrorKind::Transient,
            ClusterError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterError::Transient(_))
    }
}

/// Invalid user-facing configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid duration `{value}` for {field}: {reason}")]
    Duration { field: &'static str, value: String, reason: String },
    #[error("invalid jsonpath `{path}`: {source}")]
    Path {
        path: String,
        #[source]
        source: kwait_path::PathError,
    },
    #[error("invalid resource key `{0}` (expect version/resource or group/version/resource)")]
    ResourceKey(String),
    #[error("invalid import id `{0}` (expect name or namespace/name)")]
    ImportId(String),
    #[error("invalid value `{value}` for {var}")]
    Env { var: &'static str, value: String },
}
