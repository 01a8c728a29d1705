use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{ActionError, Document, NodeSpec, Selector};

fn replica_page() -> Document {
    let document =
        Document::new("https://cluster:19080/Explorer/index.html#/node/_vmss_0").unwrap();
    document
        .body()
        .append(
            NodeSpec::new("table").child(
                NodeSpec::new("tbody")
                    .child(
                        NodeSpec::new("tr")
                            .child(NodeSpec::new("th").text("Replica Id"))
                            .child(NodeSpec::new("th").text("Node")),
                    )
                    .child(
                        NodeSpec::new("tr")
                            .child(NodeSpec::new("td").text("42"))
                            .child(
                                NodeSpec::new("td").child(
                                    NodeSpec::new("a")
                                        .attr("href", "#/node/_vmss_1")
                                        .class("node-link")
                                        .text("_vmss_1"),
                                ),
                            ),
                    ),
            ),
        )
        .unwrap();
    document
}

#[test]
fn test_query_and_text() {
    let document = replica_page();
    let cells = document.query_selector_all("td");
    assert_eq!(cells.len(), 2);
    assert_eq!(cells[0].text_content(), "42");
    assert_eq!(document.query_selector_all("th").len(), 2);
    assert_eq!(document.text_content(), "Replica IdNode42_vmss_1");

    let link = document.query_selector("a.node-link").unwrap();
    assert_eq!(link.tag_name(), "a");
    assert_eq!(link.attribute("HREF").as_deref(), Some("#/node/_vmss_1"));
    assert_eq!(link.closest("tr").unwrap(), cells[0].parent().unwrap());
    assert_eq!(link.closest("table").unwrap().tag_name(), "table");
    assert!(link.closest("thead").is_none());

    // Unsupported selectors match nothing instead of failing.
    assert!(document.query_selector_all("table td").is_empty());
    assert!(document.query_selector("tr > td").is_none());
}

#[test]
fn test_mark_once_and_filtered_text() {
    let document = replica_page();
    let table = document.query_selector("table").unwrap();
    assert!(table.mark_once("data-done"));
    assert!(!table.mark_once("DATA-DONE"));
    assert_eq!(table.attribute("data-done").as_deref(), Some("1"));

    let skip = Selector::from("th, a");
    assert_eq!(document.body().text_content_excluding(&skip), "42");
    assert_eq!(
        table.text_content_excluding(&Selector::from("td")),
        "Replica IdNode"
    );
}

#[test]
fn test_element_children_skip_text() {
    let document = replica_page();
    let row = document.query_selector_all("tr").remove(1);
    assert_eq!(row.children().len(), 2);
    assert_eq!(row.children()[0].children().len(), 0);
    assert_eq!(row.children()[0].tag_name(), "td");
}

#[test]
fn test_append_child_rejects_cycles_and_foreign_nodes() {
    let document = replica_page();
    let table = document.query_selector("table").unwrap();
    let cell = document.query_selector("td").unwrap();
    assert!(matches!(
        cell.append_child(&table),
        Err(ActionError::InvalidArgument(_))
    ));

    let other = Document::new("https://other/").unwrap();
    let stranger = other.create_element("span");
    assert!(matches!(
        cell.append_child(&stranger),
        Err(ActionError::InvalidArgument(_))
    ));
}

#[test]
fn test_remove_disconnects() {
    let document = replica_page();
    let link = document.query_selector("a").unwrap();
    assert!(link.is_connected());
    link.remove();
    assert!(!link.is_connected());
    assert!(document.query_selector("a").is_none());

    // Removing twice is a no-op.
    link.remove();

    let detached = document.create_element("div");
    assert!(!detached.is_connected());
}

#[tokio::test]
async fn test_observer_sees_child_list_changes_only() {
    let document = replica_page();
    let mut observer = document.observe(&document.body());

    let tbody = document.query_selector("tbody").unwrap();
    let row = tbody.append(NodeSpec::new("tr")).unwrap();
    row.set_attribute("data-marker", "1");

    let batch = tokio::time::timeout(Duration::from_secs(1), observer.changed())
        .await
        .expect("mutation expected")
        .expect("observer open");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].target, tbody);
    assert_eq!(batch[0].added, vec![row.clone()]);
    assert!(observer.take_records().is_empty());

    row.remove();
    let records = observer.take_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].removed, vec![row]);
}

#[tokio::test]
async fn test_observer_ignores_other_subtrees() {
    let document = replica_page();
    let table = document.query_selector("table").unwrap();
    let mut observer = document.observe(&table);

    document.body().append(NodeSpec::new("div")).unwrap();
    assert!(observer.take_records().is_empty());

    let cell = document.query_selector("td").unwrap();
    cell.set_text_content("43");
    assert_eq!(observer.take_records().len(), 1);
    assert_eq!(cell.text_content(), "43");
}

#[test]
fn test_click_bubbles_until_stopped() {
    let document = replica_page();
    let order = Arc::new(Mutex::new(Vec::new()));

    let row = document.query_selector_all("tr").remove(1);
    let cell = row.query_selector("td").unwrap();
    for (element, name) in [(&cell, "td"), (&row, "tr"), (&document.body(), "body")] {
        let order = order.clone();
        element.add_click_listener(move |event| {
            assert_eq!(event.target().tag_name(), "td");
            order.lock().unwrap().push(name);
        });
    }

    cell.click();
    assert_eq!(*order.lock().unwrap(), vec!["td", "tr", "body"]);

    order.lock().unwrap().clear();
    cell.add_click_listener(|event| event.stop_propagation());
    let event = cell.click();
    assert!(event.is_propagation_stopped());
    assert_eq!(*order.lock().unwrap(), vec!["td"]);
}

#[test]
fn test_link_click_navigates_unless_prevented() {
    let document = replica_page();
    let link = document.query_selector("a").unwrap();

    let event = link.click();
    assert!(!event.is_default_prevented());
    assert_eq!(
        document.href(),
        "https://cluster:19080/Explorer/index.html#/node/_vmss_1"
    );

    document.navigate("#/node/_vmss_0").unwrap();
    link.add_click_listener(|event| event.prevent_default());
    link.click();
    assert!(document.href().ends_with("#/node/_vmss_0"));
}

#[test]
fn test_listeners_may_mutate_the_page() {
    let document = replica_page();
    let button = document
        .body()
        .append(NodeSpec::new("button").text("Close"))
        .unwrap();
    let clicks = Arc::new(AtomicUsize::new(0));
    let counter = clicks.clone();
    let weak = button.downgrade();
    button.add_click_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(button) = weak.upgrade() {
            button.remove();
        }
    });

    button.click();
    assert_eq!(clicks.load(Ordering::SeqCst), 1);
    assert!(document.query_selector("button").is_none());
}

#[test]
fn test_navigate_resolves_relative_targets() {
    let document = Document::new("https://cluster:19080/Explorer/index.html#/").unwrap();
    document.navigate("#/app/App1").unwrap();
    assert_eq!(document.location().fragment(), Some("/app/App1"));
    document.navigate("/Explorer/other.html").unwrap();
    assert_eq!(document.location().path(), "/Explorer/other.html");
    assert!(Document::new("not a url").is_err());
    assert!(Selector::from("a").is_valid());
}
