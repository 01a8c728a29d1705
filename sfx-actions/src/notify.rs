//! Confirmation gate and status reporting.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::element::NodeSpec;

/// Blocking yes/no decision taken before any mutating call.
pub trait ConfirmationPort: Send + Sync {
    fn confirm(&self, message: &str) -> bool;
}

impl<F> ConfirmationPort for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn confirm(&self, message: &str) -> bool {
        self(message)
    }
}

/// Answers every prompt the same way.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

impl ConfirmationPort for AutoConfirm {
    fn confirm(&self, _message: &str) -> bool {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    /// Progress messages without a level tag.
    Plain,
    Info,
    Success,
    Warning,
    Error,
}

impl StatusLevel {
    fn tag(self) -> Option<&'static str> {
        match self {
            StatusLevel::Plain => None,
            StatusLevel::Info => Some("info"),
            StatusLevel::Success => Some("success"),
            StatusLevel::Warning => Some("warning"),
            StatusLevel::Error => Some("error"),
        }
    }

    fn toast_variant(self) -> &'static str {
        match self {
            StatusLevel::Error => "bg-danger",
            StatusLevel::Success => "bg-success",
            StatusLevel::Warning => "bg-warning",
            StatusLevel::Plain | StatusLevel::Info => "bg-info",
        }
    }
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag().unwrap_or("plain"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub level: StatusLevel,
    pub message: String,
}

/// Writes statuses to the log channel and raises a self-dismissing toast for errors.
#[derive(Clone)]
pub struct Notifier {
    document: Option<Document>,
    toast_container: String,
    toast_duration: Duration,
    history: Arc<Mutex<VecDeque<StatusEntry>>>,
    capacity: usize,
}

impl Notifier {
    pub fn new(document: Option<Document>) -> Self {
        Self {
            document,
            toast_container: "app-toast-container".to_string(),
            toast_duration: Duration::from_secs(6),
            history: Arc::new(Mutex::new(VecDeque::new())),
            capacity: 64,
        }
    }

    pub fn with_toast_container(mut self, selector: impl Into<String>) -> Self {
        self.toast_container = selector.into();
        self
    }

    pub fn with_toast_duration(mut self, duration: Duration) -> Self {
        self.toast_duration = duration;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn set_status(&self, message: impl Into<String>, level: StatusLevel) {
        let message = message.into();
        if message.is_empty() {
            return;
        }
        let prefix = match level.tag() {
            Some(tag) => format!("[SFX:{tag}]"),
            None => "[SFX]".to_string(),
        };
        match level {
            StatusLevel::Error | StatusLevel::Warning => warn!("{} {}", prefix, message),
            StatusLevel::Success => info!("{} {}", prefix, message),
            StatusLevel::Plain | StatusLevel::Info => debug!("{} {}", prefix, message),
        }

        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            history.push_back(StatusEntry {
                level,
                message: message.clone(),
            });
            while history.len() > self.capacity {
                history.pop_front();
            }
        }

        if level == StatusLevel::Error {
            self.show_toast(&message, level, "Error");
        }
    }

    /// Recent statuses, oldest first.
    pub fn history(&self) -> Vec<StatusEntry> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn last_status(&self) -> Option<StatusEntry> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }

    /// Appends a toast to the configured container (the body when there is none). It
    /// removes itself after the toast duration, or earlier via its close button.
    pub fn show_toast(&self, message: &str, level: StatusLevel, title: &str) {
        let Some(document) = &self.document else {
            return;
        };
        let container = document
            .query_selector(self.toast_container.as_str())
            .unwrap_or_else(|| document.body());
        let title = if title.is_empty() {
            level.to_string()
        } else {
            title.to_string()
        };

        let spec = NodeSpec::new("div")
            .class(format!("toast show {}", level.toast_variant()))
            .attr("role", "alert")
            .attr("style", "margin: 0.25rem; min-width: 260px")
            .child(
                NodeSpec::new("div")
                    .class("toast-header")
                    .child(NodeSpec::new("strong").class("me-auto").text(title))
                    .child(
                        NodeSpec::new("button")
                            .attr("type", "button")
                            .class("btn-close")
                            .attr("aria-label", "Close"),
                    ),
            )
            .child(NodeSpec::new("div").class("toast-body").text(message));

        let toast = match container.append(spec) {
            Ok(toast) => toast,
            Err(e) => {
                warn!("Could not show toast: {}", e);
                return;
            }
        };

        if let Some(close) = toast.query_selector(".btn-close") {
            let weak = toast.downgrade();
            close.add_click_listener(move |_| {
                if let Some(toast) = weak.upgrade() {
                    toast.remove();
                }
            });
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let weak = toast.downgrade();
                let duration = self.toast_duration;
                handle.spawn(async move {
                    tokio::time::sleep(duration).await;
                    if let Some(toast) = weak.upgrade() {
                        toast.remove();
                    }
                });
            }
            Err(_) => debug!("No runtime for toast auto-dismiss; toast stays until closed"),
        }
    }
}
