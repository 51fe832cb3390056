//! Error types for the interactive client.

use std::fmt;

/// Main error type for parsing, compiling and streaming operations.
#[derive(Debug, Clone, PartialEq)]
pub enum CliError {
    /// The first token of a command line is not a known verb.
    UnknownVerb {
        verb: String,
    },
    /// A command line did not match its verb grammar.
    Parse {
        verb: String,
        reason: String,
    },
    /// A parsed command carries a field combination the wire model cannot express.
    InvalidCommand {
        reason: String,
    },
    /// gRPC transport or stream failure.
    Transport {
        context: String,
        reason: String,
    },
    /// Local file could not be read or written.
    File {
        path: String,
        reason: String,
    },
    /// Session cookie is present but unusable.
    Cookie {
        reason: String,
    },
    /// A transaction id was registered twice while still pending.
    DuplicateTransaction {
        id: String,
    },
    /// JSON encoding or decoding failed.
    Encoding {
        context: String,
        reason: String,
    },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::UnknownVerb { verb } => write!(f, "Unrecognized: {verb}"),
            CliError::Parse { verb, reason } => write!(f, "Invalid '{verb}' command: {reason}"),
            CliError::InvalidCommand { reason } => write!(f, "Invalid command: {reason}"),
            CliError::Transport { context, reason } => {
                write!(f, "Transport error in {context}: {reason}")
            }
            CliError::File { path, reason } => write!(f, "Error accessing '{path}': {reason}"),
            CliError::Cookie { reason } => write!(f, "Invalid cookie: {reason}"),
            CliError::DuplicateTransaction { id } => {
                write!(f, "Transaction '{id}' is already pending")
            }
            CliError::Encoding { context, reason } => {
                write!(f, "Encoding error in {context}: {reason}")
            }
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Errors the session reports and then carries on from.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CliError::UnknownVerb { .. }
                | CliError::Parse { .. }
                | CliError::InvalidCommand { .. }
                | CliError::File { .. }
                | CliError::Cookie { .. }
                | CliError::Encoding { .. }
        )
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, CliError::Transport { .. })
    }

    pub fn parse(verb: &str, reason: impl fmt::Display) -> Self {
        CliError::Parse {
            verb: verb.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_command(reason: impl fmt::Display) -> Self {
        CliError::InvalidCommand {
            reason: reason.to_string(),
        }
    }

    pub fn from_io_error(e: std::io::Error, path: &str) -> Self {
        CliError::File {
            path: path.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn from_transport_error(e: impl fmt::Display, context: &str) -> Self {
        CliError::Transport {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn from_json_error(e: serde_json::Error, context: &str) -> Self {
        CliError::Encoding {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }
}

impl From<tonic::Status> for CliError {
    fn from(status: tonic::Status) -> Self {
        CliError::Transport {
            context: "message loop".to_string(),
            reason: format!("{:?}: {}", status.code(), status.message()),
        }
    }
}

impl From<tonic::transport::Error> for CliError {
    fn from(e: tonic::transport::Error) -> Self {
        CliError::from_transport_error(e, "connect")
    }
}
