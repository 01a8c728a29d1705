//! Identifier recovery.
//!
//! Service Fabric Explorer never exposes partition, replica or application ids as
//! structured data; they only show up inside route URLs, link targets and cell text. The
//! functions here pull them back out, best-effort: a missing match is `None`, never an
//! error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::element::Element;
use crate::selector::Selector;
use crate::utils::decode_uri_component;

static PARTITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)partition(?:id)?[=\\/](?P<pid>[0-9a-f-]{32,36})").expect("partition regex")
});
static REPLICA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)replica[=\\/](?P<rid>[0-9a-z-]+)").expect("replica regex"));
static APPLICATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)/app/(?P<app>[^/?#]+)").expect("application regex"));
static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").expect("numeric regex"));
static GUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("guid regex")
});

const FABRIC_SCHEME: &str = "fabric:/";

/// Ids recovered from the current page location. Recomputed on every use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteIds {
    pub partition_id: Option<String>,
    pub replica_id: Option<String>,
}

/// Ids recovered from a single link target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkIds {
    pub partition_id: Option<String>,
    pub replica_id: Option<String>,
    pub application_id: Option<String>,
}

impl LinkIds {
    /// Fills fields that are still empty from `other`; values already found are kept.
    pub fn merge_missing(&mut self, other: LinkIds) {
        if self.partition_id.is_none() {
            self.partition_id = other.partition_id;
        }
        if self.replica_id.is_none() {
            self.replica_id = other.replica_id;
        }
        if self.application_id.is_none() {
            self.application_id = other.application_id;
        }
    }

    pub fn has_partition_and_replica(&self) -> bool {
        self.partition_id.is_some() && self.replica_id.is_some()
    }
}

impl From<LinkIds> for RouteIds {
    fn from(ids: LinkIds) -> Self {
        RouteIds {
            partition_id: ids.partition_id,
            replica_id: ids.replica_id,
        }
    }
}

/// Parses partition, replica and application ids out of a URL-like string. The input is
/// percent-decoded first and markers match case-insensitively.
pub fn parse_ids_from_href(href: &str) -> LinkIds {
    if href.is_empty() {
        return LinkIds::default();
    }
    let decoded = decode_uri_component(href);
    LinkIds {
        partition_id: capture(&PARTITION_RE, &decoded, "pid"),
        replica_id: capture(&REPLICA_RE, &decoded, "rid"),
        application_id: capture(&APPLICATION_RE, &decoded, "app"),
    }
}

/// Partition and replica ids of the page location.
pub fn parse_route_ids(location: &str) -> RouteIds {
    parse_ids_from_href(location).into()
}

fn capture(re: &Regex, haystack: &str, group: &str) -> Option<String> {
    re.captures(haystack)
        .and_then(|c| c.name(group))
        .map(|m| m.as_str().to_string())
}

/// Scans every `a[href]` below `region` in document order. The first value found for
/// each field wins, and the scan stops once partition and replica are both known.
pub fn extract_ids_from_element(region: &Element) -> LinkIds {
    let links = region.query_selector_all(Selector::Compound(vec![
        Selector::Tag("a".to_string()),
        Selector::HasAttribute("href".to_string()),
    ]));

    let mut found = LinkIds::default();
    for link in links {
        if found.has_partition_and_replica() {
            break;
        }
        if let Some(href) = link.attribute("href") {
            found.merge_missing(parse_ids_from_href(&href));
        }
    }
    found
}

/// Turns an application name into the form the management API expects in a path:
/// `fabric:/App1/Svc` becomes `App1~Svc`. Idempotent.
pub fn normalize_application_id(raw: &str) -> String {
    let decoded = decode_fully(raw);
    let mut value = decoded.trim();
    if value.len() >= FABRIC_SCHEME.len()
        && value.is_char_boundary(FABRIC_SCHEME.len())
        && value[..FABRIC_SCHEME.len()].eq_ignore_ascii_case(FABRIC_SCHEME)
    {
        value = &value[FABRIC_SCHEME.len()..];
    }
    value.trim_start_matches('/').replace('/', "~").trim().to_string()
}

/// Decodes until the string stops changing, so a second normalization finds nothing
/// left to decode.
fn decode_fully(raw: &str) -> String {
    let mut current = raw.to_string();
    for _ in 0..8 {
        let next = decode_uri_component(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Replica id shown in a table cell: a bare number or a GUID somewhere in the text.
pub fn extract_replica_id(cell_text: &str) -> Option<String> {
    let text = cell_text.trim();
    if text.is_empty() {
        return None;
    }
    if NUMERIC_RE.is_match(text) {
        return Some(text.to_string());
    }
    GUID_RE.find(text).map(|m| m.as_str().to_string())
}

/// Where an identifier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdSource {
    /// The page location at the time of the click.
    Route,
    /// Links inside the element the control belongs to.
    Hyperlink,
    /// Values remembered when the control was injected.
    Captured,
}

/// Lookup order for identifiers at click time. The route is read fresh because the
/// host page may have navigated since the control was injected.
pub const ID_PRIORITY: [IdSource; 3] = [IdSource::Route, IdSource::Hyperlink, IdSource::Captured];

/// Competing values for one identifier, one slot per [`IdSource`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdCandidates {
    pub route: Option<String>,
    pub hyperlink: Option<String>,
    pub captured: Option<String>,
}

impl IdCandidates {
    pub fn get(&self, source: IdSource) -> Option<&str> {
        let slot = match source {
            IdSource::Route => &self.route,
            IdSource::Hyperlink => &self.hyperlink,
            IdSource::Captured => &self.captured,
        };
        slot.as_deref().filter(|v| !v.is_empty())
    }

    /// First non-empty candidate in `priority` order.
    pub fn resolve(&self, priority: &[IdSource]) -> Option<(IdSource, String)> {
        priority
            .iter()
            .find_map(|source| self.get(*source).map(|v| (*source, v.to_string())))
    }
}
