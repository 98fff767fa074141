//! Stable element locators.
//!
//! Every element matched by a generic selector gets a CSS path that re-finds
//! exactly that element on a later load of the same page, plus an XPath for
//! diagnostics. Paths are built bottom-up from the element, stopping at the
//! first ancestor that can be addressed on its own (an id, or one of
//! `html`/`head`/`body`).

use crate::error::{Result, ScanError};
use crate::fingerprint::content_hash;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

/// Locator data for one matched element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpec {
    pub tag: String,
    pub css_path: String,
    pub xpath: String,
    /// Digest of the element's own serialized markup.
    pub content_hash: String,
}

struct Step {
    value: String,
    optimized: bool,
}

impl Step {
    fn new(value: impl Into<String>, optimized: bool) -> Self {
        Self {
            value: value.into(),
            optimized,
        }
    }
}

pub struct LocatorSynthesizer<'a> {
    document: &'a Html,
}

impl<'a> LocatorSynthesizer<'a> {
    pub fn new(document: &'a Html) -> Self {
        Self { document }
    }

    /// Locator data for every element matching `selector`, in document order.
    pub fn locate(&self, selector: &str) -> Result<Vec<PathSpec>> {
        Ok(self
            .matches(selector)?
            .into_iter()
            .map(|element| self.path_spec(element))
            .collect())
    }

    pub fn matches(&self, selector: &str) -> Result<Vec<ElementRef<'a>>> {
        let parsed = parse_selector(selector)?;
        Ok(self.document.select(&parsed).collect())
    }

    pub fn path_spec(&self, element: ElementRef<'_>) -> PathSpec {
        PathSpec {
            tag: element.value().name().to_string(),
            css_path: css_path(element),
            xpath: xpath(element),
            content_hash: content_hash(&element.html()),
        }
    }
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| ScanError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// CSS path from the nearest self-addressable ancestor down to `element`,
/// steps joined with `" > "`.
pub fn css_path(element: ElementRef<'_>) -> String {
    let target = element.id();
    let mut steps = Vec::new();
    let mut context = Some(element);

    while let Some(node) = context {
        let step = css_step(node, node.id() == target);
        let optimized = step.optimized;
        steps.push(step.value);
        if optimized {
            break;
        }
        // A non-element parent ends the walk with what we have
        context = node.parent().and_then(ElementRef::wrap);
    }

    steps.reverse();
    steps.join(" > ")
}

fn css_step(node: ElementRef<'_>, is_target: bool) -> Step {
    let element = node.value();
    let name = element.name();

    if let Some(id) = element.attr("id").filter(|id| !id.is_empty()) {
        return Step::new(format!("#{}", css_escape(id)), true);
    }
    if matches!(name, "html" | "head" | "body") {
        return Step::new(name, true);
    }

    let parent = match node.parent() {
        Some(parent) if !parent.value().is_document() => parent,
        _ => return Step::new(name, true),
    };

    let own_classes = class_names(node);
    let mut needs_class_names = false;
    let mut needs_nth_child = false;
    let mut own_index = None;

    for (index, sibling) in parent.children().filter_map(ElementRef::wrap).enumerate() {
        if own_index.is_some() && needs_nth_child {
            break;
        }
        if sibling.id() == node.id() {
            own_index = Some(index);
            continue;
        }
        if needs_nth_child || sibling.value().name() != name {
            continue;
        }

        needs_class_names = true;
        let mut remaining: HashSet<&str> = own_classes.iter().copied().collect();
        if remaining.is_empty() {
            needs_nth_child = true;
            continue;
        }
        for class in class_names(sibling) {
            if remaining.remove(class) && remaining.is_empty() {
                needs_nth_child = true;
                break;
            }
        }
    }

    let mut result = name.to_string();
    if is_target && name == "input" && element.attr("class").is_none_or(str::is_empty) {
        if let Some(kind) = element.attr("type").filter(|t| !t.is_empty()) {
            result.push_str(&format!("[type={}]", css_escape(kind)));
        }
    }
    if needs_nth_child {
        let position = own_index.unwrap_or(0) + 1;
        result.push_str(&format!(":nth-child({})", position));
    } else if needs_class_names {
        for class in &own_classes {
            result.push('.');
            result.push_str(&css_escape(class));
        }
    }

    Step::new(result, false)
}

fn class_names<'b>(element: ElementRef<'b>) -> Vec<&'b str> {
    element
        .value()
        .attr("class")
        .map(|classes| classes.split_whitespace().collect())
        .unwrap_or_default()
}

/// XPath for `element`, absolute from the document unless an ancestor with an
/// id shortcuts it.
pub fn xpath(element: ElementRef<'_>) -> String {
    let mut steps: Vec<Step> = Vec::new();
    let mut context = Some(element);

    while let Some(node) = context {
        let Some(step) = xpath_step(node) else {
            break;
        };
        let optimized = step.optimized;
        steps.push(step);
        if optimized {
            break;
        }
        match node.parent() {
            Some(parent) if parent.value().is_document() => {
                steps.push(Step::new("", true));
                break;
            }
            parent => context = parent.and_then(ElementRef::wrap),
        }
    }

    steps.reverse();
    let prefix = match steps.first() {
        Some(step) if step.optimized => "",
        _ => "/",
    };
    let joined = steps
        .iter()
        .map(|step| step.value.as_str())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}{}", prefix, joined)
}

fn xpath_step(node: ElementRef<'_>) -> Option<Step> {
    let index = xpath_index(node)?;
    let element = node.value();

    if let Some(id) = element.attr("id").filter(|id| !id.is_empty()) {
        return Some(Step::new(format!("//*[@id=\"{}\"]", id), true));
    }

    let mut value = element.name().to_string();
    if index > 0 {
        value.push_str(&format!("[{}]", index));
    }
    Some(Step::new(value, false))
}

/// 1-based position among similar siblings, 0 when the node has no similar
/// sibling, `None` if the node cannot be found under its own parent.
fn xpath_index(node: ElementRef<'_>) -> Option<usize> {
    let Some(parent) = node.parent() else {
        return Some(0);
    };
    let own = (*node).value();

    let has_similar = parent
        .children()
        .any(|sibling| sibling.id() != node.id() && nodes_similar(own, sibling.value()));
    if !has_similar {
        return Some(0);
    }

    let mut own_index = 1;
    for sibling in parent.children() {
        if sibling.id() == node.id() {
            return Some(own_index);
        }
        if nodes_similar(own, sibling.value()) {
            own_index += 1;
        }
    }
    None
}

#[derive(PartialEq, Eq)]
enum NodeCategory {
    Element,
    Text,
    Comment,
    ProcessingInstruction,
    Document,
    Other,
}

fn category(node: &Node) -> NodeCategory {
    match node {
        Node::Element(_) => NodeCategory::Element,
        // XPath has no separate CDATA node; the parser already folds it into text
        Node::Text(_) => NodeCategory::Text,
        Node::Comment(_) => NodeCategory::Comment,
        Node::ProcessingInstruction(_) => NodeCategory::ProcessingInstruction,
        Node::Document => NodeCategory::Document,
        _ => NodeCategory::Other,
    }
}

fn nodes_similar(left: &Node, right: &Node) -> bool {
    match (left, right) {
        (Node::Element(l), Node::Element(r)) => l.name() == r.name(),
        (l, r) => category(l) == category(r),
    }
}

/// Serializes `ident` as a CSS identifier (CSSOM `CSS.escape`).
pub fn css_escape(ident: &str) -> String {
    let chars: Vec<char> = ident.chars().collect();
    let mut out = String::with_capacity(ident.len());

    for (i, &c) in chars.iter().enumerate() {
        let code = c as u32;
        if c == '\0' {
            out.push('\u{FFFD}');
        } else if (0x1..=0x1f).contains(&code)
            || code == 0x7f
            || (i == 0 && c.is_ascii_digit())
            || (i == 1 && c.is_ascii_digit() && chars[0] == '-')
        {
            out.push_str(&format!("\\{:x} ", code));
        } else if i == 0 && c == '-' && chars.len() == 1 {
            out.push_str("\\-");
        } else if code >= 0x80 || c == '-' || c == '_' || c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>t</title></head>
<body>
  <nav id="main-nav">
    <a href="/one">One</a>
    <a href="/two">Two</a>
  </nav>
  <div class="content">
    <p>text</p>
    <a class="btn primary" href="/x">X</a>
    <a class="btn" href="/y">Y</a>
    <a href="/z">Z</a>
  </div>
  <div class="content">
    <form>
      <input type="text" name="q">
      <input type="submit" class="go">
    </form>
  </div>
</body>
</html>"#;

    fn paths(selector: &str) -> Vec<String> {
        let doc = Html::parse_document(PAGE);
        LocatorSynthesizer::new(&doc)
            .locate(selector)
            .unwrap()
            .into_iter()
            .map(|p| p.css_path)
            .collect()
    }

    #[test]
    fn test_id_ancestor_shortcuts_path() {
        let found = paths("nav a");
        assert_eq!(
            found,
            vec!["#main-nav > a:nth-child(1)", "#main-nav > a:nth-child(2)"]
        );
    }

    #[test]
    fn test_classes_disambiguate_when_unique() {
        let found = paths("div a");
        // "btn primary" keeps "primary" unmatched by its "btn" sibling,
        // "btn" is fully covered by its sibling and needs a position,
        // the class-less anchor always needs one.
        assert_eq!(
            found,
            vec![
                "body > div:nth-child(2) > a.btn.primary",
                "body > div:nth-child(2) > a:nth-child(3)",
                "body > div:nth-child(2) > a:nth-child(4)",
            ]
        );
    }

    #[test]
    fn test_target_input_gets_type_attribute() {
        let found = paths("input");
        assert_eq!(
            found,
            vec![
                "body > div:nth-child(3) > form > input[type=text]:nth-child(1)",
                "body > div:nth-child(3) > form > input.go",
            ]
        );
    }

    #[test]
    fn test_locators_round_trip_to_the_same_element() {
        let doc = Html::parse_document(PAGE);
        let synthesizer = LocatorSynthesizer::new(&doc);
        for element in synthesizer.matches("a, input, p").unwrap() {
            let path = css_path(element);
            let selector = Selector::parse(&path).unwrap();
            let resolved: Vec<_> = doc.select(&selector).collect();
            assert_eq!(resolved.len(), 1, "{} is ambiguous", path);
            assert_eq!(resolved[0].id(), element.id(), "{} resolves elsewhere", path);
        }
    }

    #[test]
    fn test_body_html_head_stop_the_walk() {
        assert_eq!(paths("body"), vec!["body"]);
        assert_eq!(paths("title"), vec!["head > title"]);
    }

    #[test]
    fn test_xpaths() {
        let doc = Html::parse_document(PAGE);
        let synthesizer = LocatorSynthesizer::new(&doc);
        let xpaths: Vec<_> = synthesizer
            .locate("a")
            .unwrap()
            .into_iter()
            .map(|p| p.xpath)
            .collect();
        assert_eq!(xpaths[0], r#"//*[@id="main-nav"]/a[1]"#);
        assert_eq!(xpaths[1], r#"//*[@id="main-nav"]/a[2]"#);
        assert_eq!(xpaths[2], "/html/body/div[1]/a[1]");
        assert_eq!(xpaths[4], "/html/body/div[1]/a[3]");

        let form = synthesizer.locate("form").unwrap();
        assert_eq!(form[0].xpath, "/html/body/div[2]/form");
    }

    #[test]
    fn test_locate_rejects_bad_selector() {
        let doc = Html::parse_document(PAGE);
        let result = LocatorSynthesizer::new(&doc).locate("a[");
        assert!(matches!(result, Err(ScanError::InvalidSelector { .. })));
    }

    #[test]
    fn test_content_hash_tracks_markup() {
        let doc = Html::parse_document(PAGE);
        let specs = LocatorSynthesizer::new(&doc).locate("nav a").unwrap();
        assert_ne!(specs[0].content_hash, specs[1].content_hash);
        assert_eq!(specs[0].tag, "a");
    }

    #[test]
    fn test_css_escape() {
        assert_eq!(css_escape("plain-name_1"), "plain-name_1");
        assert_eq!(css_escape("1st"), "\\31 st");
        assert_eq!(css_escape("-"), "\\-");
        assert_eq!(css_escape("-2x"), "-\\32 x");
        assert_eq!(css_escape("a.b:c"), "a\\.b\\:c");
    }
}
