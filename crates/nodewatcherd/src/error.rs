//! Error types for nodewatcherd
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-11: Error Handling - Structured error types with contextual information
//! - AU-3: Content of Audit Records - Errors carry the failing phase and resource

use std::io;
use thiserror::Error;

/// Errors that can occur in nodewatcherd
///
/// # NIST Controls
/// - SI-11(a): Generate error messages providing information necessary for corrective actions
#[derive(Debug, Error)]
pub enum NodewatcherError {
    /// Netlink socket or message error
    /// NIST: SC-7 (Boundary Protection) - Kernel interface errors
    #[error("Netlink error: {0}")]
    Netlink(String),

    /// Interface lookup failed
    #[error("Interface not found: index {0}")]
    InterfaceNotFound(u32),

    /// Raw socket syscall failed
    #[error("Socket {op} failed: {source}")]
    Socket {
        /// The operation that failed (e.g. "socket", "sendmmsg").
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// One or more owned resources failed to close
    #[error("Close failed: {}", join_errors(.0))]
    Close(Vec<io::Error>),

    /// A /proc file could not be read or parsed
    #[error("Failed to read {path}: {reason}")]
    Proc { path: String, reason: String },

    /// HTTP delivery failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Report payload encoding failed
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Report document encoding failed
    #[error("XML encode error: {0}")]
    Xml(#[from] quick_xml::se::SeError),

    /// Configuration error
    /// NIST: CM-6 (Configuration Settings) - Configuration validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Node information could not be gathered
    #[error("Gather error: {0}")]
    Gather(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl NodewatcherError {
    /// Wrap the last OS error for a socket operation
    pub(crate) fn last_os(op: &'static str) -> Self {
        Self::Socket {
            op,
            source: io::Error::last_os_error(),
        }
    }
}

fn join_errors(errors: &[io::Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for nodewatcherd operations
pub type Result<T> = std::result::Result<T, NodewatcherError>;
