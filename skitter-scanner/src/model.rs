//! The crawl graph: states are nodes, actions are edges, inputs are side data
//! attached to the state they were discovered in.
//!
//! States and actions live in the arena owned by
//! [`CrawlStateManager`](crate::manager::CrawlStateManager) and refer to each
//! other through [`StateId`] and [`ActionId`], never through references.

use crate::error::Result;
use crate::locator::{LocatorSynthesizer, PathSpec};
use scraper::ElementRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fillable field selectors, consulted both when discovering a state's inputs
/// and when deciding which markup survives state canonicalization.
pub const INPUT_SELECTORS: &[&str] = &[
    "input:not([type])",
    r#"input[type="text"]"#,
    r#"input[type="email"]"#,
    r#"input[type="password"]"#,
    r#"input[type="search"]"#,
    r#"input[type="url"]"#,
    r#"input[type="checkbox"]"#,
    r#"input[type="radio"]"#,
    r#"input[type="file"]"#,
    "textarea",
    "select",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub(crate) usize);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// Hex SHA-256 digest of a canonicalized DOM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateHash(String);

impl StateHash {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is plenty for logs
        let short: String = self.0.chars().take(12).collect();
        f.write_str(&short)
    }
}

/// Kind of element an action operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Anchor,
    Button,
    Input,
    Other(String),
}

impl ElementKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "a" | "area" => ElementKind::Anchor,
            "button" => ElementKind::Button,
            "input" => ElementKind::Input,
            other => ElementKind::Other(other.to_string()),
        }
    }

    /// Plain navigational anchors never submit anything, so the inputs of
    /// their parent state are not filled before clicking them.
    pub fn is_anchor(&self) -> bool {
        matches!(self, ElementKind::Anchor)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ElementKind::Anchor => "a",
            ElementKind::Button => "button",
            ElementKind::Input => "input",
            ElementKind::Other(tag) => tag,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Click,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Click => "click",
        }
    }
}

/// An edge of the crawl graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlAction {
    pub id: ActionId,
    pub element: ElementKind,
    pub operation: Operation,
    pub locator: String,
    pub xpath: String,
    pub content_hash: String,
    pub parent: StateId,
    /// `None` until the action has been executed and its result identified.
    pub child: Option<StateId>,
}

impl CrawlAction {
    pub fn is_executed(&self) -> bool {
        self.child.is_some()
    }
}

/// Everything needed to create a [`CrawlAction`] except its ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    pub element: ElementKind,
    pub operation: Operation,
    pub locator: String,
    pub xpath: String,
    pub content_hash: String,
}

impl ActionSpec {
    pub fn click(path: PathSpec) -> Self {
        Self {
            element: ElementKind::from_tag(&path.tag),
            operation: Operation::Click,
            locator: path.css_path,
            xpath: path.xpath,
            content_hash: path.content_hash,
        }
    }
}

/// A node of the crawl graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlState {
    pub id: StateId,
    pub url: String,
    pub hash: StateHash,
    pub depth: usize,
    /// Outgoing actions in discovery order.
    pub actions: Vec<ActionId>,
    pub inputs: Vec<CrawlInput>,
}

impl CrawlState {
    pub(crate) fn new(id: StateId, url: String, hash: StateHash, depth: usize) -> Self {
        Self {
            id,
            url,
            hash,
            depth,
            actions: Vec::new(),
            inputs: Vec::new(),
        }
    }
}

/// A fillable field of a state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlInput {
    pub kind: InputKind,
    pub locator: String,
    pub xpath: String,
}

/// Supported input fields, each with its own way of being filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputKind {
    Text,
    Email,
    Password,
    Search,
    Url,
    Checkbox,
    Radio,
    File,
    Textarea,
    /// Carries the first non-empty option value, if the list has one.
    Select { value: Option<String> },
    Unsupported,
}

/// What to do with an input before acting on its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillStrategy {
    Type(&'static str),
    Check,
    Choose,
    SelectOption(String),
    Upload,
    Skip,
}

impl InputKind {
    pub fn from_element(element: ElementRef<'_>) -> Self {
        let value = element.value();
        match value.name() {
            "textarea" => InputKind::Textarea,
            "select" => {
                let first = element
                    .descendants()
                    .filter_map(ElementRef::wrap)
                    .filter(|el| el.value().name() == "option")
                    .filter_map(|option| {
                        option
                            .value()
                            .attr("value")
                            .map(str::to_string)
                            .or_else(|| Some(option.text().collect::<String>().trim().to_string()))
                    })
                    .find(|v| !v.is_empty());
                InputKind::Select { value: first }
            }
            "input" => match value
                .attr("type")
                .unwrap_or("text")
                .to_ascii_lowercase()
                .as_str()
            {
                "text" => InputKind::Text,
                "email" => InputKind::Email,
                "password" => InputKind::Password,
                "search" => InputKind::Search,
                "url" => InputKind::Url,
                "checkbox" => InputKind::Checkbox,
                "radio" => InputKind::Radio,
                "file" => InputKind::File,
                _ => InputKind::Unsupported,
            },
            _ => InputKind::Unsupported,
        }
    }

    pub fn fill_strategy(&self) -> FillStrategy {
        match self {
            InputKind::Text | InputKind::Search | InputKind::Textarea => {
                FillStrategy::Type("skitter")
            }
            InputKind::Email => FillStrategy::Type("skitter@example.com"),
            InputKind::Password => FillStrategy::Type("Skitter@1234"),
            InputKind::Url => FillStrategy::Type("https://example.com/"),
            InputKind::Checkbox => FillStrategy::Check,
            InputKind::Radio => FillStrategy::Choose,
            InputKind::File => FillStrategy::Upload,
            InputKind::Select { value: Some(value) } => FillStrategy::SelectOption(value.clone()),
            InputKind::Select { value: None } | InputKind::Unsupported => FillStrategy::Skip,
        }
    }
}

/// Finds every fillable field of the page the synthesizer was built over.
pub fn discover_inputs(synthesizer: &LocatorSynthesizer<'_>) -> Result<Vec<CrawlInput>> {
    let mut inputs = Vec::new();
    for selector in INPUT_SELECTORS {
        for element in synthesizer.matches(selector)? {
            let path = synthesizer.path_spec(element);
            inputs.push(CrawlInput {
                kind: InputKind::from_element(element),
                locator: path.css_path,
                xpath: path.xpath,
            });
        }
    }
    Ok(inputs)
}
