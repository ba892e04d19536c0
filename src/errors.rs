//! Error taxonomy for the engine and its public surface.
//!
//! One enum covers configuration, lifecycle, scanning, and masking failures
//! so callers can match on a single type. The enum is `#[non_exhaustive]`;
//! consumers should include a fallback arm.
//!
//! # Design Notes
//! - `NotConfigured` is the only critical variant: using an unconfigured
//!   engine is a programming error, so the engine's panic-recovery wrapper
//!   must never downgrade it. See [`DlpError::is_critical`].
//! - Wrapped I/O / YAML / JSON errors keep their source for diagnostics.

use std::fmt;
use std::io;

/// Errors returned by every public engine operation.
#[derive(Debug)]
#[non_exhaustive]
pub enum DlpError {
    /// The engine has not been configured; call an `apply_config*` API first.
    NotConfigured,
    /// The engine has been closed and rejects all operations.
    ProcessAfterClose,
    /// `new_log_processor` was called; the engine only accepts log input now.
    OnlyForLog,
    /// Input text exceeds the hard byte cap.
    MaxInputLimit { len: usize, limit: usize },
    /// Input map exceeds the hard entry cap.
    MaxInputItems { count: usize, limit: usize },
    /// An ALGO mask rule selects an unknown algorithm.
    MaskNotSupport { rule: String, value: String },
    /// `mask` was called with a name no worker is registered under.
    MaskWorkerNotfound { name: String },
    /// A DIY mask name collides with an existing worker.
    MaskNameConflict { name: String },
    /// A detection rule is bound to a mask rule that was never loaded.
    MaskRuleNotfound { name: String },
    /// Struct masking input is not a maskable composite.
    ///
    /// Unreachable through the [`MaskTagged`](crate::MaskTagged) trait;
    /// retained for dynamically-typed frontends that cannot prove their
    /// input shape at compile time.
    MaskStructInput,
    /// Internal failure while traversing a composite value.
    MaskStructOutput,
    /// A rule pattern failed to compile. Reported at load time; the pattern
    /// is skipped and the rest of the rule stays active.
    RegexCompileFailed { pattern: String, detail: String },
    /// The configuration document is empty.
    ConfEmpty,
    /// The configuration document parsed but failed validation.
    ConfVerifyFailed { detail: String },
    /// A result carries byte offsets that do not fit the referenced input.
    PositionError {
        start: usize,
        end: usize,
        len: usize,
    },
    /// A panic inside an engine call, caught at the boundary.
    Panic { detail: String },
    /// JSON parse or serialize failure.
    Json(serde_json::Error),
    /// YAML parse failure.
    Yaml(serde_yaml::Error),
    /// I/O failure while reading a configuration file.
    Io(io::Error),
}

impl DlpError {
    /// Returns true for errors that must propagate even through the
    /// panic-recovery wrapper.
    #[inline]
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::NotConfigured)
    }
}

impl fmt::Display for DlpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => {
                write!(f, "engine has not been configured; call apply_config first")
            }
            Self::ProcessAfterClose => write!(f, "engine has been closed"),
            Self::OnlyForLog => write!(
                f,
                "new_log_processor has been called; engine only accepts log input"
            ),
            Self::MaxInputLimit { len, limit } => {
                write!(f, "input length {len} exceeds the limit of {limit} bytes")
            }
            Self::MaxInputItems { count, limit } => {
                write!(f, "input has {count} entries, more than the limit of {limit}")
            }
            Self::MaskNotSupport { rule, value } => {
                write!(f, "mask rule {rule}: algorithm {value:?} is not supported")
            }
            Self::MaskWorkerNotfound { name } => write!(f, "mask worker {name:?} not found"),
            Self::MaskNameConflict { name } => {
                write!(f, "mask name {name:?} conflicts with an existing worker")
            }
            Self::MaskRuleNotfound { name } => write!(f, "mask rule {name:?} not found"),
            Self::MaskStructInput => write!(f, "struct masking input is not a maskable composite"),
            Self::MaskStructOutput => write!(f, "internal failure during struct traversal"),
            Self::RegexCompileFailed { pattern, detail } => {
                write!(f, "regex {pattern:?} failed to compile: {detail}")
            }
            Self::ConfEmpty => write!(f, "configuration document is empty"),
            Self::ConfVerifyFailed { detail } => {
                write!(f, "configuration verification failed: {detail}")
            }
            Self::PositionError { start, end, len } => write!(
                f,
                "malformed match bounds [{start}, {end}) for input of {len} bytes"
            ),
            Self::Panic { detail } => write!(f, "panic inside engine call: {detail}"),
            Self::Json(err) => write!(f, "JSON error: {err}"),
            Self::Yaml(err) => write!(f, "YAML error: {err}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for DlpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::Yaml(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DlpError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<serde_yaml::Error> for DlpError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err)
    }
}

impl From<io::Error> for DlpError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
