//! State identity.
//!
//! A page is reduced to the skeleton of markup that can actually be
//! interacted with: text and comments go, attributes go (except link and
//! script targets), and any subtree without an interactable element goes.
//! The SHA-256 of what remains is the state's hash, so churn in ads,
//! timestamps or CSRF tokens does not split one state into many.

use crate::error::Result;
use crate::locator::parse_selector;
use crate::model::{INPUT_SELECTORS, StateHash};
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Compiled union of the crawl's target selectors and the input selectors.
#[derive(Debug, Clone)]
pub struct Interactables {
    selectors: Vec<Selector>,
}

impl Interactables {
    pub fn new<S: AsRef<str>>(targets: &[S]) -> Result<Self> {
        let selectors = targets
            .iter()
            .map(|s| s.as_ref())
            .chain(INPUT_SELECTORS.iter().copied())
            .map(parse_selector)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { selectors })
    }
}

/// Canonical serialization of `html` used for hashing.
pub fn canonicalize(html: &str, interactables: &Interactables) -> String {
    let document = Html::parse_document(html);

    // Everything on the way from the root to an interactable element survives
    let mut keep = HashSet::new();
    for selector in &interactables.selectors {
        for element in document.select(selector) {
            if !keep.insert(element.id()) {
                continue;
            }
            for ancestor in element.ancestors() {
                if !keep.insert(ancestor.id()) {
                    break;
                }
            }
        }
    }

    let kept = |element: &ElementRef<'_>| keep.contains(&element.id());
    let mut out = String::new();
    let root = document.root_element();
    if kept(&root) {
        write_element(root, &kept, &mut out);
    }
    out
}

fn write_element<F>(element: ElementRef<'_>, kept: &F, out: &mut String)
where
    F: Fn(&ElementRef<'_>) -> bool,
{
    let value = element.value();
    let name = value.name();

    out.push('<');
    out.push_str(name);
    match name {
        "a" | "base" => {
            if let Some(href) = value.attr("href") {
                write_attr(out, "href", href);
            }
        }
        "script" => {
            if let Some(src) = value.attr("src") {
                // Cache-busting query strings are not part of the identity
                let src = src.split('?').next().unwrap_or_default();
                write_attr(out, "src", src);
            }
        }
        _ => {}
    }
    out.push('>');

    for child in element.children().filter_map(ElementRef::wrap) {
        if kept(&child) {
            write_element(child, kept, out);
        }
    }

    if !VOID_ELEMENTS.contains(&name) {
        out.push_str("</");
        out.push_str(name);
        out.push('>');
    }
}

fn write_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Identity of the page described by `html`.
pub fn fingerprint(html: &str, interactables: &Interactables) -> StateHash {
    StateHash::new(sha256_hex(canonicalize(html, interactables).as_bytes()))
}

/// Digest of an element's serialized markup.
pub fn content_hash(markup: &str) -> String {
    sha256_hex(markup.as_bytes())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
