use std::time::Duration;

use crate::notify::StatusEntry;
use crate::{ActionError, Document, HelperConfig, NodeSpec, Notifier, StatusLevel};

#[test]
fn test_history_is_bounded() {
    let notifier = Notifier::new(None).with_history_capacity(2);
    notifier.set_status("one", StatusLevel::Plain);
    notifier.set_status("", StatusLevel::Info);
    notifier.set_status("two", StatusLevel::Info);
    notifier.set_status("three", StatusLevel::Success);

    assert_eq!(
        notifier.history(),
        vec![
            StatusEntry {
                level: StatusLevel::Info,
                message: "two".to_string(),
            },
            StatusEntry {
                level: StatusLevel::Success,
                message: "three".to_string(),
            },
        ]
    );
    // Clones share the history.
    assert_eq!(notifier.clone().last_status(), notifier.last_status());
}

#[test]
fn test_only_errors_raise_toasts() {
    let document = Document::new("https://cluster/Explorer/index.html").unwrap();
    let notifier = Notifier::new(Some(document.clone()));

    notifier.set_status("Replica 7 delete requested.", StatusLevel::Success);
    notifier.set_status("Careful", StatusLevel::Warning);
    assert!(document.query_selector(".toast").is_none());

    notifier.set_status("Request failed (500): boom", StatusLevel::Error);
    let toasts = document.query_selector_all(".toast");
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].attribute("role").as_deref(), Some("alert"));
    assert_eq!(
        toasts[0].query_selector("strong").unwrap().text_content(),
        "Error"
    );
}

#[test]
fn test_toast_goes_to_container_and_closes() {
    let document = Document::new("https://cluster/Explorer/index.html").unwrap();
    let container = document
        .body()
        .append(NodeSpec::new("app-toast-container"))
        .unwrap();
    let notifier = Notifier::new(Some(document.clone()));

    notifier.show_toast("Heads up", StatusLevel::Warning, "");
    let toast = container.query_selector(".toast").unwrap();
    assert!(toast.class_name().contains("bg-warning"));
    assert_eq!(toast.query_selector("strong").unwrap().text_content(), "warning");

    toast.query_selector(".btn-close").unwrap().click();
    assert!(container.query_selector(".toast").is_none());
    assert!(!toast.is_connected());
}

#[tokio::test]
async fn test_toast_dismisses_itself() {
    let document = Document::new("https://cluster/Explorer/index.html").unwrap();
    let notifier =
        Notifier::new(Some(document.clone())).with_toast_duration(Duration::from_millis(20));

    notifier.set_status("Rollback failed (409): conflict", StatusLevel::Error);
    assert!(document.query_selector(".toast").is_some());

    let mut attempts = 0;
    while document.query_selector(".toast").is_some() && attempts < 50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        attempts += 1;
    }
    assert!(document.query_selector(".toast").is_none());
}

#[test]
fn test_config_defaults_and_overrides() {
    let config = HelperConfig::default();
    assert_eq!(config.api_version, "6.5");
    assert_eq!(config.rollback_api_version, None);
    assert_eq!(config.toast_duration(), Duration::from_secs(6));

    let json = r#"{"rollbackApiVersion":"6.5","rollbackTimeoutSecs":120}"#;
    let config = HelperConfig::from_json(json).unwrap();
    assert_eq!(config.api_version, "6.5");
    assert_eq!(config.rollback_api_version.as_deref(), Some("6.5"));
    assert_eq!(config.rollback_timeout_secs, Some(120));
    assert_eq!(config.toast_container, "app-toast-container");

    assert!(matches!(
        HelperConfig::from_json(r#"{"statusHistory":"many"}"#),
        Err(ActionError::Config(_))
    ));
}

#[test]
fn test_init_logging_can_run_twice() {
    crate::utils::init_logging();
    crate::utils::init_logging();
    tracing::info!("logging initialised");
}
