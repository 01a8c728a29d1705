//! Same-origin calls to the cluster management REST API.

use std::sync::Arc;

use reqwest::{header, Client, Url};
use serde::Serialize;
use tracing::{instrument, warn};

use crate::credentials::CredentialLocator;
use crate::document::Document;
use crate::errors::ActionError;
use crate::ids::normalize_application_id;
use crate::notify::{Notifier, StatusLevel};
use crate::utils::encode_uri_component;

pub const DEFAULT_DELETE_API_VERSION: &str = "6.5";
pub const DEFAULT_ROLLBACK_API_VERSION: &str = "6.0";

/// Everything a replica deletion needs, assembled per click. Only obtainable through
/// [`OperationContext::validate`], so partition, replica and node are never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationContext {
    pub partition_id: String,
    pub replica_id: String,
    pub node_name: String,
    pub api_version: String,
    pub force_remove: bool,
}

impl OperationContext {
    pub fn validate(
        partition_id: Option<String>,
        replica_id: Option<String>,
        node_name: Option<String>,
        api_version: &str,
        force_remove: bool,
    ) -> Result<Self, ActionError> {
        fn required(value: Option<String>, what: &str) -> Result<String, ActionError> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ActionError::Resolution(format!("{what} is required.")))
        }

        Ok(Self {
            partition_id: required(partition_id, "Partition id")?,
            replica_id: required(replica_id, "Replica id")?,
            node_name: required(node_name, "Node name")?,
            api_version: if api_version.is_empty() {
                DEFAULT_DELETE_API_VERSION.to_string()
            } else {
                api_version.to_string()
            },
            force_remove,
        })
    }

    /// Summary shown by the confirmation gate.
    pub fn confirmation_message(&self) -> String {
        let operation = if self.force_remove {
            "Force Delete Replica"
        } else {
            "Delete Replica"
        };
        format!(
            "{operation}\nReplica: {}\nPartition: {}\nNode: {}\napi-version: {}",
            self.replica_id, self.partition_id, self.node_name, self.api_version
        )
    }

    pub fn delete_options(&self) -> DeleteReplicaOptions {
        DeleteReplicaOptions {
            node_name: self.node_name.clone(),
            api_version: Some(self.api_version.clone()),
            force_remove: self.force_remove,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteReplicaOptions {
    pub node_name: String,
    pub api_version: Option<String>,
    pub force_remove: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    pub api_version: Option<String>,
    /// Seconds, forwarded as the `timeout` query parameter. Not a client-side abort.
    pub timeout: Option<u64>,
}

#[derive(Clone)]
enum Origin {
    Fixed(Url),
    /// Read from the page location on every call.
    Page(Document),
}

/// Issues the two management operations. Failures are returned once and never retried.
#[derive(Clone)]
pub struct ManagementClient {
    http: Client,
    origin: Origin,
    credentials: Arc<CredentialLocator>,
    notifier: Notifier,
}

impl ManagementClient {
    /// Client addressing the origin of whatever page `document` currently shows.
    pub fn for_document(
        document: Document,
        credentials: Arc<CredentialLocator>,
        notifier: Notifier,
    ) -> Result<Self, ActionError> {
        Ok(Self {
            http: Self::build_http()?,
            origin: Origin::Page(document),
            credentials,
            notifier,
        })
    }

    pub fn with_base_url(
        base_url: &str,
        credentials: Arc<CredentialLocator>,
        notifier: Notifier,
    ) -> Result<Self, ActionError> {
        let base = Url::parse(base_url).map_err(|e| {
            ActionError::InvalidArgument(format!("Invalid base URL {base_url:?}: {e}"))
        })?;
        Ok(Self {
            http: Self::build_http()?,
            origin: Origin::Fixed(base),
            credentials,
            notifier,
        })
    }

    fn build_http() -> Result<Client, ActionError> {
        // The cookie store stands in for "credentials: include".
        Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| ActionError::Transport(format!("Failed to build HTTP client: {e}")))
    }

    fn resolve(&self, path: &str) -> Result<Url, ActionError> {
        let base = match &self.origin {
            Origin::Fixed(url) => url.clone(),
            Origin::Page(document) => document.location(),
        };
        base.join(path).map_err(|e| {
            ActionError::InvalidArgument(format!("Cannot build request URL {path:?}: {e}"))
        })
    }

    pub fn delete_replica_url(
        &self,
        partition_id: &str,
        replica_id: &str,
        options: &DeleteReplicaOptions,
    ) -> Result<Url, ActionError> {
        for (value, what) in [
            (partition_id, "partition id"),
            (replica_id, "replica id"),
            (options.node_name.as_str(), "node name"),
        ] {
            if value.trim().is_empty() {
                return Err(ActionError::InvalidArgument(format!("Missing {what} for delete.")));
            }
        }

        let path = format!(
            "/Nodes/{}/$/GetPartitions/{}/$/GetReplicas/{}/$/Delete",
            encode_uri_component(&options.node_name),
            encode_uri_component(partition_id),
            encode_uri_component(replica_id)
        );
        let mut url = self.resolve(&path)?;
        url.query_pairs_mut()
            .append_pair(
                "api-version",
                options
                    .api_version
                    .as_deref()
                    .filter(|v| !v.is_empty())
                    .unwrap_or(DEFAULT_DELETE_API_VERSION),
            )
            .append_pair("ForceRemove", if options.force_remove { "true" } else { "false" });
        Ok(url)
    }

    pub fn rollback_url(
        &self,
        application_id: &str,
        options: &RollbackOptions,
    ) -> Result<Url, ActionError> {
        let normalized = normalize_application_id(application_id);
        if normalized.is_empty() {
            return Err(ActionError::InvalidArgument(
                "Missing application id for rollback.".to_string(),
            ));
        }

        let path = format!(
            "/Applications/{}/$/RollbackUpgrade",
            encode_uri_component(&normalized)
        );
        let mut url = self.resolve(&path)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(
                "api-version",
                options
                    .api_version
                    .as_deref()
                    .filter(|v| !v.is_empty())
                    .unwrap_or(DEFAULT_ROLLBACK_API_VERSION),
            );
            if let Some(timeout) = options.timeout {
                query.append_pair("timeout", &timeout.to_string());
            }
        }
        Ok(url)
    }

    #[instrument(
        skip(self, options),
        fields(node_name = %options.node_name, force_remove = options.force_remove)
    )]
    pub async fn delete_replica(
        &self,
        partition_id: &str,
        replica_id: &str,
        options: &DeleteReplicaOptions,
    ) -> Result<(), ActionError> {
        let url = self.delete_replica_url(partition_id, replica_id, options)?;
        self.notifier.set_status(
            format!("Deleting replica {replica_id} on {}...", options.node_name),
            StatusLevel::Plain,
        );
        self.post(url, "Request").await?;
        self.notifier.set_status(
            format!("Replica {replica_id} delete requested."),
            StatusLevel::Success,
        );
        Ok(())
    }

    #[instrument(skip(self, options))]
    pub async fn rollback_application(
        &self,
        application_id: &str,
        options: &RollbackOptions,
    ) -> Result<(), ActionError> {
        let url = self.rollback_url(application_id, options)?;
        self.notifier.set_status(
            format!(
                "Rolling back application {}...",
                normalize_application_id(application_id)
            ),
            StatusLevel::Plain,
        );
        self.post(url, "Rollback").await?;
        self.notifier.set_status(
            format!("Rollback requested for {application_id}."),
            StatusLevel::Success,
        );
        Ok(())
    }

    async fn post(&self, url: Url, action: &str) -> Result<(), ActionError> {
        let mut request = self
            .http
            .post(url.clone())
            .header(header::ACCEPT, "application/json");
        if let Some(token) = self.credentials.find_bearer_token() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ActionError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let reason = status.canonical_reason().unwrap_or_default().to_string();
        let body = match response.text().await {
            Ok(body) if !body.is_empty() => body,
            _ => reason,
        };
        warn!(url = %url, status = status.as_u16(), "Management call failed");
        Err(ActionError::Http {
            action: action.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}
