use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ActionError;

/// Settings supplied by the host when the helper is installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HelperConfig {
    /// `api-version` sent with replica deletion.
    pub api_version: String,
    /// `api-version` sent with rollback from the menu; `api_version` applies when unset.
    pub rollback_api_version: Option<String>,
    /// Passed through as the rollback `timeout` query parameter.
    pub rollback_timeout_secs: Option<u64>,
    pub toast_duration_ms: u64,
    /// Selector of the element toasts are appended to.
    pub toast_container: String,
    /// How many recent statuses the notifier keeps.
    pub status_history: usize,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            api_version: crate::client::DEFAULT_DELETE_API_VERSION.to_string(),
            rollback_api_version: None,
            rollback_timeout_secs: None,
            toast_duration_ms: 6000,
            toast_container: "app-toast-container".to_string(),
            status_history: 64,
        }
    }
}

impl HelperConfig {
    pub fn from_json(json: &str) -> Result<Self, ActionError> {
        serde_json::from_str(json).map_err(|e| ActionError::Config(e.to_string()))
    }

    pub fn toast_duration(&self) -> Duration {
        Duration::from_millis(self.toast_duration_ms)
    }
}
