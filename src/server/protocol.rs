//! Protocol message definitions
//!
//! Defines the JSON shapes exchanged with the browser extension. Requests
//! arrive as a single flat object discriminated by an integer
//! `functionType`; responses are either an empty object or an object with
//! a single `errorMessage` string. Absence of `errorMessage` means
//! success — there are no other fields on the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Literal error message for unrecognized command tags
pub const UNKNOWN_FUNCTION_TYPE: &str = "Unknown functionType.";

// ============================================================================
// Error Types
// ============================================================================

/// Errors from decoding a frame payload into a request
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{0}")]
    Decode(#[from] serde_json::Error),
}

// ============================================================================
// Requests
// ============================================================================

/// Command discriminant carried in the `functionType` field
///
/// Any integer outside the known range — negative tags included — decodes
/// to `Unknown` rather than failing, so an unrecognized tag can be
/// answered with an explicit error instead of a decode failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "i64")]
pub enum FunctionType {
    #[default]
    Unknown,
    Initialize,
    Apply,
}

impl From<i64> for FunctionType {
    fn from(value: i64) -> Self {
        match value {
            1 => FunctionType::Initialize,
            2 => FunctionType::Apply,
            _ => FunctionType::Unknown,
        }
    }
}

/// One CSV file to materialize: a relative path without extension and
/// the literal file content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvEntry {
    pub path: String,
    pub value: String,
}

/// The flat request envelope as sent by the extension
///
/// Every field except `functionType` is meaningful only to some
/// commands; absent fields decode to their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default)]
    pub function_type: FunctionType,
    #[serde(default)]
    pub repository_url: String,
    #[serde(default)]
    pub target_branch_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    /// HTTPS access token, sent by the extension alongside Initialize
    #[serde(default, rename = "gitHubAccessToken")]
    pub github_access_token: String,
    #[serde(default)]
    pub csvs: Vec<CsvEntry>,
}

/// Credentials for HTTPS remotes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

/// Committer identity for Apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committer {
    pub name: String,
    pub email: String,
}

/// A decoded, typed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Initialize {
        repository_url: String,
        credentials: Option<Credentials>,
    },
    Apply {
        target_branch: String,
        committer: Committer,
        entries: Vec<CsvEntry>,
    },
    Unknown,
}

impl Request {
    /// Parse a request from a raw frame payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Convert the flat wire shape into a typed command
    pub fn into_command(self) -> Command {
        match self.function_type {
            FunctionType::Initialize => {
                let credentials = if self.github_access_token.is_empty() {
                    None
                } else {
                    Some(Credentials {
                        username: self.username,
                        token: self.github_access_token,
                    })
                };
                Command::Initialize {
                    repository_url: self.repository_url,
                    credentials,
                }
            }
            FunctionType::Apply => Command::Apply {
                target_branch: self.target_branch_name,
                committer: Committer {
                    name: self.username,
                    email: self.email,
                },
                entries: self.csvs,
            },
            FunctionType::Unknown => Command::Unknown,
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Response envelope: `{}` on success, `{"errorMessage": ...}` on failure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Response {
    /// Create a success response
    pub fn ok() -> Self {
        Self::default()
    }

    /// Create an error response carrying a human-readable message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
        }
    }

    /// Serialize to the frame payload
    pub fn to_payload(&self) -> Vec<u8> {
        // A struct of one optional string cannot fail to serialize
        serde_json::to_vec(self).unwrap_or_else(|_| b"{}".to_vec())
    }
}
