//! Inline replica and application controls for Service Fabric Explorer
//!
//! This crate watches an Explorer page for replica tables and action menus and injects
//! "Delete" / "Force Delete" / "Rollback Application" controls into them. Clicking one
//! recovers the partition, replica, node and application ids the page only shows as
//! text and links, asks for confirmation, and calls the cluster management API on the
//! page's own origin.

use std::sync::Arc;

use tracing::{info, instrument};

pub mod client;
pub mod config;
pub mod credentials;
pub mod document;
pub mod element;
pub mod engine;
pub mod errors;
pub mod ids;
pub mod notify;
pub mod selector;
#[cfg(test)]
mod tests;
pub mod utils;

pub use client::{DeleteReplicaOptions, ManagementClient, OperationContext, RollbackOptions};
pub use config::HelperConfig;
pub use credentials::{CredentialLocator, KeyValueStorage, MemoryStorage};
pub use document::{Document, MutationObserver, MutationRecord};
pub use element::{ClickEvent, Element, NodeSpec};
pub use engine::{ActionOutcome, AugmentationEngine, EngineHandle};
pub use errors::{ActionError, StorageError};
pub use notify::{AutoConfirm, ConfirmationPort, Notifier, StatusLevel};
pub use selector::Selector;

/// Set on `<html>` once the helper is installed, so a second injection is refused.
pub const LOADED_MARKER: &str = "data-sfx-replica-helper-loaded";

/// The main entry point: wires storage, confirmation and the page into an engine.
pub struct SfxHelper {
    engine: AugmentationEngine,
    credentials: Arc<CredentialLocator>,
    notifier: Notifier,
}

impl SfxHelper {
    /// Installs the helper into `document`. Fails with
    /// [`ActionError::AlreadyInstalled`] if the page already carries it.
    #[instrument(skip_all)]
    pub fn install(
        document: Document,
        persistent: Arc<dyn KeyValueStorage>,
        session: Arc<dyn KeyValueStorage>,
        confirm: Arc<dyn ConfirmationPort>,
        config: HelperConfig,
    ) -> Result<Self, ActionError> {
        Selector::parse(&config.toast_container)?;
        let root = document.root();
        if root.has_attribute(LOADED_MARKER) {
            return Err(ActionError::AlreadyInstalled);
        }

        let notifier = Notifier::new(Some(document.clone()))
            .with_toast_container(config.toast_container.clone())
            .with_toast_duration(config.toast_duration())
            .with_history_capacity(config.status_history);
        let credentials = Arc::new(CredentialLocator::new(persistent, session));
        let client = ManagementClient::for_document(
            document.clone(),
            credentials.clone(),
            notifier.clone(),
        )?;
        let engine = AugmentationEngine::new(document, client, confirm, notifier.clone(), config);

        root.set_attribute(LOADED_MARKER, "1");
        info!(location = %engine.document().href(), "Replica helper installed");
        Ok(Self {
            engine,
            credentials,
            notifier,
        })
    }

    /// Runs the first scan and starts watching the page.
    pub fn start(&self) -> Result<EngineHandle, ActionError> {
        self.engine.start()
    }

    pub fn engine(&self) -> &AugmentationEngine {
        &self.engine
    }

    pub fn credentials(&self) -> &CredentialLocator {
        &self.credentials
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}
