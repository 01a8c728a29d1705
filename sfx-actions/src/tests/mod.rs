mod credentials_tests;
mod document_tests;
mod notify_tests;

use std::sync::Arc;

use crate::{
    AugmentationEngine, ConfirmationPort, CredentialLocator, Document, HelperConfig,
    ManagementClient, MemoryStorage, Notifier,
};

pub const PARTITION: &str = "0a1b2c3d-4e5f-6a7b-8c9d-0e1f2a3b4c5d";

// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_target(true)
        .with_test_writer()
        .try_init();
}

/// Engine over `document` with empty storages and default settings.
pub fn engine_for(document: &Document, confirm: Arc<dyn ConfirmationPort>) -> AugmentationEngine {
    engine_with_config(document, confirm, HelperConfig::default())
}

pub fn engine_with_config(
    document: &Document,
    confirm: Arc<dyn ConfirmationPort>,
    config: HelperConfig,
) -> AugmentationEngine {
    let notifier = Notifier::new(Some(document.clone()));
    let credentials = Arc::new(CredentialLocator::new(
        Arc::new(MemoryStorage::new()),
        Arc::new(MemoryStorage::new()),
    ));
    let client = ManagementClient::for_document(document.clone(), credentials, notifier.clone())
        .expect("client should build");
    AugmentationEngine::new(
        document.clone(),
        client,
        confirm,
        notifier,
        config,
    )
}
