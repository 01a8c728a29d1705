//! DOM augmentation.
//!
//! Two reconciliation passes, one over replica tables and one over dropdown action
//! menus. Each pass is idempotent: an element is marked as augmented *before* any
//! control is appended to it, and the mark is a single test-and-set, so a pass woken by
//! the mutations of a previous pass (or running alongside another one) never injects a
//! second set of controls.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::client::{ManagementClient, OperationContext, RollbackOptions};
use crate::config::HelperConfig;
use crate::document::Document;
use crate::element::{Element, NodeSpec};
use crate::errors::ActionError;
use crate::ids::{
    extract_ids_from_element, extract_replica_id, normalize_application_id, parse_ids_from_href,
    parse_route_ids, IdCandidates, RouteIds, ID_PRIORITY,
};
use crate::notify::{ConfirmationPort, Notifier, StatusLevel};
use crate::selector::Selector;

pub const TABLE_MARKER: &str = "data-sfx-replica-augmented";
pub const REPLICA_MENU_MARKER: &str = "data-sfx-replica-menu-augmented";
pub const APP_MENU_MARKER: &str = "data-sfx-app-menu-augmented";
/// Class carried by every injected table button; a row holding one is skipped.
pub const DELETE_BUTTON_CLASS: &str = "sfx-replica-delete-btn";
/// Carried by every node the engine injects.
pub const CONTROL_ATTRIBUTE: &str = "data-sfx-control";

const DELETE_HEADER: &str = "Delete";
const TABLE_DELETE_LABEL: &str = "Delete";
const TABLE_FORCE_DELETE_LABEL: &str = "Force Delete";
const MENU_DELETE_LABEL: &str = "Delete Replica";
const MENU_FORCE_DELETE_LABEL: &str = "Force Delete Replica";
const ROLLBACK_LABEL: &str = "Rollback Application";

static UPGRADE_TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)upgrade state|rollingforward|upgrading|rollback").expect("upgrade regex")
});
static VMSS_NODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_vmss-[\w-]+_\d+").expect("node name regex"));

type CallHandle = JoinHandle<Result<(), ActionError>>;

/// What a click on an injected control led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The management call was started; its result is reported when it completes.
    Dispatched,
    /// The user answered "no".
    Declined,
    /// Ids were incomplete, so the replica's own link was clicked to let the host page
    /// fill in the route. The user has to click again once it has navigated.
    Navigating,
    /// Required ids are missing after every fallback. Reported; nothing was sent.
    Unresolved(ActionError),
    /// The call could not be started at all.
    Failed(ActionError),
}

struct EngineInner {
    document: Document,
    client: ManagementClient,
    confirm: Arc<dyn ConfirmationPort>,
    notifier: Notifier,
    config: HelperConfig,
    inflight: Mutex<Vec<CallHandle>>,
}

/// Scans the page for replica tables and action menus and wires controls into them.
#[derive(Clone)]
pub struct AugmentationEngine {
    inner: Arc<EngineInner>,
}

/// Keeps the two mutation watchers alive. Dropping it unregisters them.
pub struct EngineHandle {
    watchers: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn is_running(&self) -> bool {
        self.watchers.iter().any(|w| !w.is_finished())
    }

    /// Stops both watchers. Controls already injected stay on the page.
    pub fn stop(self) {}
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        for watcher in &self.watchers {
            watcher.abort();
        }
    }
}

impl AugmentationEngine {
    pub fn new(
        document: Document,
        client: ManagementClient,
        confirm: Arc<dyn ConfirmationPort>,
        notifier: Notifier,
        config: HelperConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                document,
                client,
                confirm,
                notifier,
                config,
                inflight: Mutex::new(Vec::new()),
            }),
        }
    }

    fn from_weak(weak: &Weak<EngineInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn document(&self) -> &Document {
        &self.inner.document
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    /// Ids of the current location, read fresh on every call.
    pub fn route_ids(&self) -> RouteIds {
        parse_route_ids(&self.inner.document.href())
    }

    /// Registers one watcher per pass on child-list mutations below `<body>`, then runs
    /// both passes once. Content added in between is seen by the watchers.
    pub fn start(&self) -> Result<EngineHandle, ActionError> {
        let runtime = Handle::try_current().map_err(|e| ActionError::Runtime(e.to_string()))?;

        let body = self.inner.document.body();
        let watchers = vec![
            self.spawn_watcher(&runtime, &body, "tables", Self::scan_tables),
            self.spawn_watcher(&runtime, &body, "menus", Self::scan_menus),
        ];

        self.scan_tables();
        self.scan_menus();
        info!("Watching page for replica tables and action menus");
        Ok(EngineHandle { watchers })
    }

    fn spawn_watcher(
        &self,
        runtime: &Handle,
        target: &Element,
        family: &'static str,
        scan: fn(&AugmentationEngine) -> usize,
    ) -> JoinHandle<()> {
        let mut observer = self.inner.document.observe(target);
        let weak = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            while let Some(records) = observer.changed().await {
                let Some(engine) = Self::from_weak(&weak) else {
                    break;
                };
                let augmented = scan(&engine);
                trace!(family, records = records.len(), augmented, "Mutation pass finished");
            }
        })
    }

    /// Waits for every management call not yet collected and returns their results.
    pub async fn settle(&self) -> Vec<Result<(), ActionError>> {
        let calls = std::mem::take(
            &mut *self
                .inner
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        futures::future::join_all(calls)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or_else(|e| Err(ActionError::Runtime(e.to_string()))))
            .collect()
    }

    /// Table pass. Returns how many tables were augmented.
    pub fn scan_tables(&self) -> usize {
        // Without a partition in the route there is nothing to reconcile rows against.
        let Some(route_partition) = self.route_ids().partition_id else {
            trace!("No partition id in route, table pass skipped");
            return 0;
        };

        let mut augmented = 0;
        for table in self.inner.document.query_selector_all("table") {
            if table.has_attribute(TABLE_MARKER) {
                continue;
            }
            let headers: Vec<String> = table
                .query_selector_all("th")
                .iter()
                .map(|h| h.text_content().trim().to_lowercase())
                .collect();
            let looks_like_replicas = headers.iter().any(|h| h.contains("replica"))
                && headers.iter().any(|h| h.contains("id"));
            if !looks_like_replicas {
                continue;
            }
            let node_column = headers.iter().position(|h| h.contains("node"));

            if !table.mark_once(TABLE_MARKER) {
                continue;
            }
            match self.inject_table_controls(&table, node_column, &route_partition) {
                Ok(rows) => {
                    debug!(rows, partition_id = %route_partition, "Replica table augmented")
                }
                Err(e) => warn!("Replica table only partly augmented: {}", e),
            }
            augmented += 1;
        }
        augmented
    }

    fn inject_table_controls(
        &self,
        table: &Element,
        node_column: Option<usize>,
        captured_partition: &str,
    ) -> Result<usize, ActionError> {
        if let Some(header_row) = table.query_selector("tr") {
            header_row.append(
                NodeSpec::new("th")
                    .attr(CONTROL_ATTRIBUTE, "header")
                    .text(DELETE_HEADER),
            )?;
        }

        let marker = Selector::ClassName(DELETE_BUTTON_CLASS.to_string());
        let mut injected = 0;
        for row in table.query_selector_all("tr").into_iter().skip(1) {
            if row.query_selector(marker.clone()).is_some() {
                continue;
            }
            let cells = row.query_selector_all("td");
            let Some(first) = cells.first() else {
                continue;
            };
            let Some(replica_id) = extract_replica_id(&first.text_content()) else {
                continue;
            };
            let node_name = node_column
                .and_then(|i| cells.get(i))
                .map(|cell| cell.text_content().trim().to_string())
                .unwrap_or_default();

            let cell = row.append(
                NodeSpec::new("td")
                    .attr(CONTROL_ATTRIBUTE, "cell")
                    .child(table_button(TABLE_DELETE_LABEL, &replica_id, &node_name))
                    .child(table_button(TABLE_FORCE_DELETE_LABEL, &replica_id, &node_name)),
            )?;
            for (button, force_remove) in cell.children().iter().zip([false, true]) {
                self.bind_table_button(button, force_remove, captured_partition);
            }
            injected += 1;
        }
        Ok(injected)
    }

    fn bind_table_button(&self, button: &Element, force_remove: bool, captured_partition: &str) {
        let weak = Arc::downgrade(&self.inner);
        let captured_partition = captured_partition.to_string();
        button.add_click_listener(move |event| {
            // Keep the host page's row-selection handlers out of it.
            event.stop_propagation();
            if let Some(engine) = Self::from_weak(&weak) {
                let button = event.current_target().clone();
                engine.delete_from_table(&button, force_remove, Some(captured_partition.as_str()));
            }
        });
    }

    /// Click handling for a table button. The partition comes from the route, then
    /// from links in the button's row, then from what was captured at injection.
    pub fn delete_from_table(
        &self,
        button: &Element,
        force_remove: bool,
        captured_partition: Option<&str>,
    ) -> ActionOutcome {
        let route = self.route_ids();
        let row_ids = button
            .closest("tr")
            .map(|row| extract_ids_from_element(&row))
            .unwrap_or_default();

        let partition = IdCandidates {
            route: route.partition_id,
            hyperlink: row_ids.partition_id,
            captured: captured_partition.map(str::to_string),
        }
        .resolve(&ID_PRIORITY);
        if let Some((source, partition_id)) = &partition {
            debug!(?source, %partition_id, "Partition id resolved");
        }

        let replica_id = button
            .attribute("data-replica-id")
            .filter(|r| !r.is_empty())
            .or(row_ids.replica_id);
        let node_name = button
            .attribute("data-node-name")
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.guess_node_name());

        self.confirm_and_delete(
            partition.map(|(_, id)| id),
            replica_id,
            node_name,
            force_remove,
        )
    }

    /// Menu pass. Returns how many menus received controls.
    pub fn scan_menus(&self) -> usize {
        let mut augmented = 0;
        for menu in self.inner.document.query_selector_all(".dropdown-menu") {
            let replica_done = menu.has_attribute(REPLICA_MENU_MARKER);
            let app_done = menu.has_attribute(APP_MENU_MARKER);
            if replica_done && app_done {
                continue;
            }

            // The host's own entries only serve as styling and placement anchors.
            let controls = menu.query_selector_all("button, a");
            let anchor = |needle: &str| {
                controls
                    .iter()
                    .find(|c| c.text_content().to_lowercase().contains(needle))
                    .cloned()
            };
            let restart_anchor = anchor("restart replica");
            let delete_app_anchor = anchor("delete application");

            let mut touched = false;
            if let (false, Some(restart)) = (replica_done, &restart_anchor) {
                if menu.mark_once(REPLICA_MENU_MARKER) {
                    if let Err(e) = self.inject_replica_menu(&menu, restart) {
                        warn!("Replica menu only partly augmented: {}", e);
                    }
                    touched = true;
                }
            }

            if let (false, Some(delete_app)) = (app_done, &delete_app_anchor) {
                if self.is_upgrade_context() && menu.mark_once(APP_MENU_MARKER) {
                    if let Err(e) = self.inject_rollback_menu(&menu, delete_app) {
                        warn!("Rollback entry not added: {}", e);
                    }
                    touched = true;
                }
            }
            if touched {
                augmented += 1;
            }
        }
        if augmented > 0 {
            debug!(menus = augmented, "Action menus augmented");
        }
        augmented
    }

    fn inject_replica_menu(&self, menu: &Element, anchor: &Element) -> Result<(), ActionError> {
        let class = non_empty_or(anchor.class_name(), "dropdown-item simple-button");
        for (label, force_remove) in [(MENU_DELETE_LABEL, false), (MENU_FORCE_DELETE_LABEL, true)] {
            let button = menu.append(
                NodeSpec::new("button")
                    .attr("type", "button")
                    .attr(CONTROL_ATTRIBUTE, "menu")
                    .class(class.clone())
                    .text(label),
            )?;
            let weak = Arc::downgrade(&self.inner);
            button.add_click_listener(move |event| {
                event.stop_propagation();
                if let Some(engine) = Self::from_weak(&weak) {
                    engine.delete_from_menu(force_remove);
                }
            });
        }
        Ok(())
    }

    fn inject_rollback_menu(&self, menu: &Element, anchor: &Element) -> Result<(), ActionError> {
        let class = non_empty_or(anchor.class_name(), "dropdown-item");
        let button = menu.append(
            NodeSpec::new("button")
                .attr("type", "button")
                .attr(CONTROL_ATTRIBUTE, "menu")
                .class(class)
                .text(ROLLBACK_LABEL),
        )?;
        let weak = Arc::downgrade(&self.inner);
        button.add_click_listener(move |event| {
            event.stop_propagation();
            if let Some(engine) = Self::from_weak(&weak) {
                let menu = event.current_target().closest(".dropdown-menu");
                engine.rollback_from_menu(menu.as_ref());
            }
        });
        Ok(())
    }

    /// Click handling for the menu delete entries: route ids first, then the page's
    /// link to the route's replica.
    pub fn delete_from_menu(&self, force_remove: bool) -> ActionOutcome {
        let route = self.route_ids();
        let mut partition_id = route.partition_id;
        let replica_id = route.replica_id;

        if partition_id.is_none() {
            if let Some(replica) = replica_id.as_deref() {
                let derived = self
                    .replica_link(replica)
                    .and_then(|link| link.attribute("href"))
                    .map(|href| parse_ids_from_href(&href))
                    .unwrap_or_default();
                partition_id = derived.partition_id;
            }
        }

        let node_name = self.guess_node_name();
        self.confirm_and_delete(partition_id, replica_id, node_name, force_remove)
    }

    fn confirm_and_delete(
        &self,
        partition_id: Option<String>,
        replica_id: Option<String>,
        node_name: Option<String>,
        force_remove: bool,
    ) -> ActionOutcome {
        if partition_id.is_none() || replica_id.is_none() {
            if let Some(replica) = replica_id.as_deref() {
                if self.attempt_select_replica(replica) {
                    return ActionOutcome::Navigating;
                }
            }
        }

        let context = match OperationContext::validate(
            partition_id,
            replica_id,
            node_name,
            &self.inner.config.api_version,
            force_remove,
        ) {
            Ok(context) => context,
            Err(e) => {
                self.inner.notifier.set_status(e.to_string(), StatusLevel::Error);
                return ActionOutcome::Unresolved(e);
            }
        };

        if !self.inner.confirm.confirm(&context.confirmation_message()) {
            debug!(replica_id = %context.replica_id, "Replica deletion declined");
            return ActionOutcome::Declined;
        }

        let client = self.inner.client.clone();
        self.spawn_call(async move {
            client
                .delete_replica(
                    &context.partition_id,
                    &context.replica_id,
                    &context.delete_options(),
                )
                .await
        })
    }

    /// Click handling for the rollback entry. The application id comes from the
    /// location, then the first `/app/` link on the page, then the closest link around
    /// the menu. Nothing found is a reported, terminal error.
    pub fn rollback_from_menu(&self, menu: Option<&Element>) -> ActionOutcome {
        let document = &self.inner.document;
        let app_from_link = |link: Option<Element>| {
            link.and_then(|l| l.attribute("href"))
                .and_then(|href| parse_ids_from_href(&href).application_id)
        };

        let first_app_link =
            || document.query_selector(Selector::link_with_href_containing("/app/"));
        let application_id = parse_ids_from_href(&document.href())
            .application_id
            .or_else(|| app_from_link(first_app_link()))
            .or_else(|| app_from_link(menu.and_then(|m| m.closest("[href]"))));

        let normalized = application_id
            .as_deref()
            .map(normalize_application_id)
            .filter(|id| !id.is_empty());
        let Some(normalized) = normalized else {
            let error = ActionError::Resolution(
                "Could not determine application id for rollback.".to_string(),
            );
            self.inner.notifier.set_status(error.to_string(), StatusLevel::Error);
            return ActionOutcome::Unresolved(error);
        };

        let config = &self.inner.config;
        let api_version = config
            .rollback_api_version
            .clone()
            .unwrap_or_else(|| config.api_version.clone());
        let message = format!(
            "Rollback application upgrade?\nApplication: {normalized}\napi-version: {api_version}"
        );
        if !self.inner.confirm.confirm(&message) {
            debug!(application_id = %normalized, "Rollback declined");
            return ActionOutcome::Declined;
        }

        let options = RollbackOptions {
            api_version: Some(api_version),
            timeout: config.rollback_timeout_secs,
        };
        let client = self.inner.client.clone();
        self.spawn_call(async move { client.rollback_application(&normalized, &options).await })
    }

    fn spawn_call<F>(&self, call: F) -> ActionOutcome
    where
        F: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                let error = ActionError::Runtime(e.to_string());
                self.inner.notifier.set_status(error.to_string(), StatusLevel::Error);
                return ActionOutcome::Failed(error);
            }
        };

        let notifier = self.inner.notifier.clone();
        let task = runtime.spawn(async move {
            let result = call.await;
            if let Err(e) = &result {
                notifier.set_status(e.to_string(), StatusLevel::Error);
            }
            result
        });

        let mut inflight = self
            .inner
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inflight.retain(|t| !t.is_finished());
        inflight.push(task);
        ActionOutcome::Dispatched
    }

    /// Upgrade context: the location mentions an upgrade, a link's text does, or the
    /// page shows upgrade-state vocabulary. Toasts and injected controls do not count.
    pub fn is_upgrade_context(&self) -> bool {
        let document = &self.inner.document;
        if document.href().to_lowercase().contains("upgrade") {
            return true;
        }
        if document
            .query_selector_all("a")
            .iter()
            .any(|a| a.text_content().to_lowercase().contains("upgrade"))
        {
            return true;
        }
        let own_output = Selector::Any(vec![
            Selector::ClassName("toast".to_string()),
            Selector::HasAttribute(CONTROL_ATTRIBUTE.to_string()),
        ]);
        UPGRADE_TEXT_RE.is_match(&document.body().text_content_excluding(&own_output))
    }

    /// Node name from the first node link on the page, else from a VM scale set node
    /// name anywhere in the page text.
    pub fn guess_node_name(&self) -> Option<String> {
        let document = &self.inner.document;
        let node_link = document.query_selector(Selector::link_with_href_containing("#/node/"));
        if let Some(link) = node_link {
            let text = link.text_content().trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
        VMSS_NODE_RE
            .find(&document.text_content())
            .map(|m| m.as_str().to_string())
    }

    fn replica_link(&self, replica_id: &str) -> Option<Element> {
        self.inner
            .document
            .query_selector(Selector::link_with_href_containing(format!("/replica/{replica_id}")))
    }

    /// Clicks the replica's own link so the host page can route to it.
    fn attempt_select_replica(&self, replica_id: &str) -> bool {
        let Some(link) = self.replica_link(replica_id) else {
            return false;
        };
        link.click();
        self.inner.notifier.set_status(
            format!("Navigating to replica {replica_id} to refresh context."),
            StatusLevel::Info,
        );
        true
    }
}

fn table_button(label: &str, replica_id: &str, node_name: &str) -> NodeSpec {
    let spec = NodeSpec::new("button")
        .attr("type", "button")
        .class(format!("simple-button {DELETE_BUTTON_CLASS}"))
        .attr("title", format!("{label} {replica_id}"))
        .attr("data-replica-id", replica_id)
        .text(label);
    if node_name.is_empty() {
        spec
    } else {
        spec.attr("data-node-name", node_name)
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}
