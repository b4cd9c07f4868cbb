//! Configuration types for pipes and REST authentication.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;

/// Settings for one `RestRunner`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PipeConfig {
    /// Name the pipe is known by (used in logs).
    pub name: String,

    /// Collection URL, e.g. `http://host/todos`.
    pub base_url: Url,

    /// Field holding the record id (default: "id")
    #[serde(default = "default_record_id")]
    pub record_id: String,

    /// Field of the read response that holds the records, if they are nested
    #[serde(default)]
    pub data_root: Option<String>,

    /// Per-request timeout in milliseconds; 0 disables it (default: 30000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Registry name of the authentication module guarding this resource
    #[serde(default)]
    pub auth_module: Option<String>,
}

impl PipeConfig {
    pub fn new(name: &str, base_url: Url) -> Self {
        Self {
            name: name.to_string(),
            base_url,
            record_id: default_record_id(),
            data_root: None,
            timeout_ms: default_timeout_ms(),
            auth_module: None,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Endpoints and timeout of a `RestAuthenticationModule`.
///
/// Endpoints are relative to the module's base URL.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestAuthConfig {
    #[serde(default = "default_login_endpoint")]
    pub login_endpoint: String,

    #[serde(default = "default_logout_endpoint")]
    pub logout_endpoint: String,

    #[serde(default = "default_enroll_endpoint")]
    pub enroll_endpoint: String,

    /// Per-request timeout in milliseconds; 0 disables it (default: 30000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RestAuthConfig {
    fn default() -> Self {
        Self {
            login_endpoint: default_login_endpoint(),
            logout_endpoint: default_logout_endpoint(),
            enroll_endpoint: default_enroll_endpoint(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl RestAuthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_record_id() -> String {
    "id".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Whole milliseconds, rounding a sub-millisecond remainder up so a non-zero
/// duration never turns into "no timeout".
pub(crate) fn duration_to_millis(timeout: Duration) -> u64 {
    let millis = timeout.as_micros().div_ceil(1000);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

fn default_login_endpoint() -> String {
    "auth/login".to_string()
}

fn default_logout_endpoint() -> String {
    "auth/logout".to_string()
}

fn default_enroll_endpoint() -> String {
    "auth/enroll".to_string()
}
