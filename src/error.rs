//! Error kinds for port assignment and their JSON error reports

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Stage of an assignment at which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    /// Reading a registry to find an existing mapping
    Lookup,
    /// Computing a free backend port
    Allocate,
    /// Appending the new mapping to the backend registry
    Persist,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Lookup => "lookup",
            Step::Allocate => "allocate",
            Step::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Errors raised by the registry, allocator and orchestrator
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// Subdomain was empty or could not be normalized
    #[error("invalid subdomain: {0}")]
    InvalidArgument(String),

    /// A registry file could not be read, written or locked
    #[error("{step} failed on {}: {source}", path.display())]
    Io {
        step: Step,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Probing walked past the highest usable port
    #[error("allocate failed: no free port between {start} and {max}")]
    RangeExhausted { start: u32, max: u16 },

    /// Configuration was rejected
    #[error("configuration error: {0}")]
    Config(String),
}

impl PortError {
    pub fn io(step: Step, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PortError::Io {
            step,
            path: path.into(),
            source,
        }
    }

    /// Re-attribute an I/O failure to the step that triggered the read
    pub fn at_step(self, step: Step) -> Self {
        match self {
            PortError::Io { path, source, .. } => PortError::Io { step, path, source },
            other => other,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            PortError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            PortError::Io { .. } => ErrorCode::IoError,
            PortError::RangeExhausted { .. } => ErrorCode::RangeExhausted,
            PortError::Config(_) => ErrorCode::ConfigError,
        }
    }

    /// The step that failed, when the error is tied to one
    pub fn step(&self) -> Option<Step> {
        match self {
            PortError::Io { step, .. } => Some(*step),
            PortError::RangeExhausted { .. } => Some(Step::Allocate),
            PortError::InvalidArgument(_) | PortError::Config(_) => None,
        }
    }
}

/// Stable error codes reported by the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Empty or unnormalizable subdomain
    InvalidArgument,
    /// Registry unreadable or unwritable
    IoError,
    /// No port left below the configured maximum
    RangeExhausted,
    /// Bad configuration file
    ConfigError,
    /// Failure outside the registry (vhost, process descriptor, reload)
    ProvisionFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::RangeExhausted => "RANGE_EXHAUSTED",
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::ProvisionFailed => "PROVISION_FAILED",
        }
    }
}

/// JSON error body printed by `--json`
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
}

impl ErrorReport {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            step: None,
        }
    }

    /// Build a report from any error chain, keeping the registry error code if present
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        match err.chain().find_map(|e| e.downcast_ref::<PortError>()) {
            Some(port_err) => Self {
                code: port_err.code(),
                message,
                step: port_err.step(),
            },
            None => Self::new(ErrorCode::ProvisionFailed, message),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}"}}"#,
                self.code.as_str(),
                self.message.replace('\"', "\\\"")
            )
        })
    }
}
