//! Session cookie persistence.
//!
//! After a successful login the reply parameters are stored as a JSON object
//! so the next run can authenticate with the saved token.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use serde_json::{Map, Value};

use crate::error::CliError;

pub const DEFAULT_COOKIE_FILE: &str = ".tn-cookie";

/// Parameters of a successful login reply.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCookie {
    params: Map<String, Value>,
}

impl SessionCookie {
    /// Decode reply parameters, each of which is itself a JSON document.
    pub fn from_params(params: &HashMap<String, Vec<u8>>) -> Self {
        let params = params
            .iter()
            .map(|(key, raw)| (key.clone(), decode_param(key, raw)))
            .collect();
        Self { params }
    }

    pub fn from_json(value: Value) -> Result<Self, CliError> {
        match value {
            Value::Object(params) => Ok(Self { params }),
            other => Err(CliError::Cookie {
                reason: format!("expected a JSON object, found {other}"),
            }),
        }
    }

    pub fn user(&self) -> Option<&str> {
        self.params.get("user").and_then(Value::as_str)
    }

    pub fn token(&self) -> Option<&str> {
        self.params.get("token").and_then(Value::as_str)
    }

    /// Raw token bytes, ready to use as a `token` scheme secret.
    pub fn token_secret(&self) -> Result<Vec<u8>, CliError> {
        let token = self.token().ok_or_else(|| CliError::Cookie {
            reason: "missing 'token'".to_string(),
        })?;
        base64::engine::general_purpose::STANDARD
            .decode(token)
            .map_err(|e| CliError::Cookie {
                reason: format!("token is not valid base64: {e}"),
            })
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.params.clone())
    }
}

/// Decode one reply parameter; values that are not JSON are kept as text.
pub fn decode_param(key: &str, raw: &[u8]) -> Value {
    serde_json::from_slice(raw).unwrap_or_else(|e| {
        tracing::warn!(key, error = %e, "Reply parameter is not JSON");
        Value::String(String::from_utf8_lossy(raw).into_owned())
    })
}

/// Reads and writes the cookie file.
#[derive(Debug, Clone)]
pub struct CookieStore {
    path: PathBuf,
}

impl Default for CookieStore {
    fn default() -> Self {
        Self::new(DEFAULT_COOKIE_FILE)
    }
}

impl CookieStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cookie; a cookie without a token is unusable.
    pub fn load(&self) -> Result<SessionCookie, CliError> {
        let shown = self.path.display().to_string();
        let bytes = std::fs::read(&self.path).map_err(|e| CliError::from_io_error(e, &shown))?;
        let value = serde_json::from_slice(&bytes)
            .map_err(|e| CliError::from_json_error(e, "cookie file"))?;
        let cookie = SessionCookie::from_json(value)?;
        if cookie.token().is_none() {
            return Err(CliError::Cookie {
                reason: format!("'{shown}' has no token"),
            });
        }
        Ok(cookie)
    }

    pub fn save(&self, cookie: &SessionCookie) -> Result<(), CliError> {
        let shown = self.path.display().to_string();
        let bytes = serde_json::to_vec(&cookie.to_json())
            .map_err(|e| CliError::from_json_error(e, "cookie file"))?;
        std::fs::write(&self.path, bytes).map_err(|e| CliError::from_io_error(e, &shown))?;
        tracing::debug!(path = %shown, "Saved session cookie");
        Ok(())
    }

    /// Persist the parameters of a login reply.
    pub fn save_params(
        &self,
        params: &HashMap<String, Vec<u8>>,
    ) -> Result<SessionCookie, CliError> {
        let cookie = SessionCookie::from_params(params);
        self.save(&cookie)?;
        Ok(cookie)
    }
}
