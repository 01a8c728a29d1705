use std::collections::BTreeMap;

use crate::errors::ActionError;

/// Represents ways to locate an element in the page.
///
/// Only the small CSS subset the engine needs is understood: a tag, `.class`, `#id`,
/// `[attr]`, `[attr="v"]`, `[attr*="v"]`, compound forms of those and comma lists.
/// Anything else parses to [`Selector::Invalid`] instead of panicking.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Select by tag name (case-insensitive)
    Tag(String),
    /// Select by one entry of the `class` attribute
    ClassName(String),
    /// Select by the `id` attribute
    Id(String),
    /// Element carries the attribute, whatever its value
    HasAttribute(String),
    /// Attribute value equals the given string
    AttributeEquals { name: String, value: String },
    /// Attribute value contains the given string
    AttributeContains { name: String, value: String },
    /// Every part must match the same element
    Compound(Vec<Selector>),
    /// Any of the alternatives may match
    Any(Vec<Selector>),
    /// Represents an invalid selector string, with a reason.
    Invalid(String),
}

impl Selector {
    /// `a[href*="{fragment}"]` built without going through the string parser, so the
    /// fragment never needs escaping.
    pub fn link_with_href_containing(fragment: impl Into<String>) -> Selector {
        Selector::Compound(vec![
            Selector::Tag("a".to_string()),
            Selector::AttributeContains {
                name: "href".to_string(),
                value: fragment.into(),
            },
        ])
    }

    /// Parses `input`, turning unsupported syntax into an error.
    pub fn parse(input: &str) -> Result<Selector, ActionError> {
        match Selector::from(input) {
            Selector::Invalid(reason) => Err(ActionError::InvalidSelector(reason)),
            selector => Ok(selector),
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            Selector::Invalid(_) => false,
            Selector::Compound(parts) | Selector::Any(parts) => parts.iter().all(Self::is_valid),
            _ => true,
        }
    }

    /// Tests an element given its lower-case tag name and attribute map.
    pub fn matches(&self, tag: &str, attributes: &BTreeMap<String, String>) -> bool {
        match self {
            Selector::Tag(name) => name == "*" || name.eq_ignore_ascii_case(tag),
            Selector::ClassName(class) => attributes
                .get("class")
                .is_some_and(|v| v.split_whitespace().any(|c| c == class)),
            Selector::Id(id) => attributes.get("id").is_some_and(|v| v == id),
            Selector::HasAttribute(name) => attributes.contains_key(name),
            Selector::AttributeEquals { name, value } => {
                attributes.get(name).is_some_and(|v| v == value)
            }
            // An empty substring matches nothing, as in CSS.
            Selector::AttributeContains { name, value } => {
                !value.is_empty() && attributes.get(name).is_some_and(|v| v.contains(value))
            }
            Selector::Compound(parts) => parts.iter().all(|p| p.matches(tag, attributes)),
            Selector::Any(parts) => parts.iter().any(|p| p.matches(tag, attributes)),
            Selector::Invalid(_) => false,
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        let alternatives = split_top_level(s);
        if alternatives.len() > 1 {
            let parsed: Vec<Selector> = alternatives.into_iter().map(Selector::from).collect();
            if let Some(invalid) = parsed.iter().find(|p| !p.is_valid()) {
                return invalid.clone();
            }
            return Selector::Any(parsed);
        }

        match parse_compound(s.trim()) {
            Ok(selector) => selector,
            Err(reason) => Selector::Invalid(reason),
        }
    }
}

impl From<String> for Selector {
    fn from(s: String) -> Self {
        Selector::from(s.as_str())
    }
}

/// Splits on commas that sit outside brackets and quotes.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn ident_len(s: &str) -> usize {
    s.find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(s.len())
}

fn parse_compound(s: &str) -> Result<Selector, String> {
    if s.is_empty() {
        return Err("Empty selector".to_string());
    }

    let mut parts = Vec::new();
    let mut rest = s;

    let tag_len = if rest.starts_with('*') {
        1
    } else {
        ident_len(rest)
    };
    if tag_len > 0 {
        parts.push(Selector::Tag(rest[..tag_len].to_ascii_lowercase()));
        rest = &rest[tag_len..];
    }

    while let Some(c) = rest.chars().next() {
        match c {
            '.' | '#' => {
                let body = &rest[1..];
                let len = ident_len(body);
                if len == 0 {
                    return Err(format!("Missing name after '{c}' in \"{s}\""));
                }
                let name = body[..len].to_string();
                parts.push(if c == '.' {
                    Selector::ClassName(name)
                } else {
                    Selector::Id(name)
                });
                rest = &body[len..];
            }
            '[' => {
                let end = closing_bracket(rest)
                    .ok_or_else(|| format!("Unterminated attribute selector in \"{s}\""))?;
                parts.push(parse_attribute(&rest[1..end])?);
                rest = &rest[end + 1..];
            }
            c if c.is_whitespace() || matches!(c, '>' | '+' | '~') => {
                return Err(format!("Combinators are not supported: \"{s}\""));
            }
            other => {
                return Err(format!("Unexpected character '{other}' in \"{s}\""));
            }
        }
    }

    Ok(if parts.len() == 1 {
        parts.remove(0)
    } else {
        Selector::Compound(parts)
    })
}

fn closing_bracket(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, ']') => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_attribute(inner: &str) -> Result<Selector, String> {
    let Some(eq) = inner.find('=') else {
        let name = inner.trim();
        if name.is_empty() {
            return Err("Empty attribute selector".to_string());
        }
        return Ok(Selector::HasAttribute(name.to_ascii_lowercase()));
    };

    let lhs = inner[..eq].trim();
    let value = unquote(inner[eq + 1..].trim()).to_string();
    let (name, contains) = match lhs.strip_suffix('*') {
        Some(name) => (name.trim(), true),
        None => (lhs, false),
    };
    let bad_char = |c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if name.is_empty() || name.contains(bad_char) {
        return Err(format!("Invalid attribute name in \"[{inner}]\""));
    }
    let name = name.to_ascii_lowercase();

    Ok(if contains {
        Selector::AttributeContains { name, value }
    } else {
        Selector::AttributeEquals { name, value }
    })
}

fn unquote(s: &str) -> &str {
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}
