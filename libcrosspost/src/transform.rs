//! Status HTML to outbound plain text
//!
//! The conversion runs in four steps: line-break normalization, markup
//! stripping, find/replace rules and truncation with an optional link suffix.

use regex::Regex;
use scraper::{Html, Node};
use std::collections::{BTreeMap, HashMap};

use crate::error::{ConfigError, Result};

/// Byte budget for the text part of an outbound post, suffix included
pub const TEXT_BUDGET: usize = 275;

/// Appended when the text had to be cut
pub const ELLIPSIS: &str = "..";

/// Markup rewritten before stripping so line structure survives
const BREAK_REWRITES: [(&str, &str); 5] = [
    ("</p><p>", "\n\n</p><p>"),
    ("<br />", "\n"),
    ("<br/>", "\n"),
    ("<br>", "\n"),
    ("@twitter.com", ""),
];

/// Rewrite paragraph and line-break markup into newlines
pub fn normalize_breaks(html: &str) -> String {
    BREAK_REWRITES
        .iter()
        .fold(html.to_string(), |text, (from, to)| text.replace(from, to))
}

/// Remove all markup, keeping unescaped text outside `script`/`style`
pub fn strip_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());

    for node in fragment.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|parent| parent.value().as_element())
            .map(|element| matches!(element.name(), "script" | "style"))
            .unwrap_or(false);
        if !hidden {
            out.push_str(text);
        }
    }

    out
}

/// Status HTML to plain text, before rules and truncation
pub fn to_plain_text(html: &str) -> String {
    strip_html(&normalize_breaks(html))
}

/// Case-sensitive find/replace rules applied in a single pass
///
/// At each position the longest matching key wins, so the result does not
/// depend on the order the rules were configured in.
#[derive(Debug, Clone, Default)]
pub struct RewriteRules {
    pattern: Option<Regex>,
    replacements: HashMap<String, String>,
}

impl RewriteRules {
    pub fn new(rules: &BTreeMap<String, String>) -> Result<Self> {
        let mut keys: Vec<&str> = rules.keys().map(String::as_str).filter(|k| !k.is_empty()).collect();
        if keys.is_empty() {
            return Ok(Self::default());
        }
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let alternation = keys
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&alternation).map_err(|e| ConfigError::InvalidValue {
            field: "replace".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            pattern: Some(pattern),
            replacements: rules.clone().into_iter().collect(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_none()
    }

    pub fn apply(&self, text: &str) -> String {
        match &self.pattern {
            Some(pattern) => pattern
                .replace_all(text, |caps: &regex::Captures| {
                    self.replacements
                        .get(&caps[0])
                        .cloned()
                        .unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned(),
            None => text.to_string(),
        }
    }
}

/// Link appended to a post: the prefix and the status id joined by one `/`
///
/// Returns an empty string when no prefix is configured.
pub fn link_suffix(prefix: Option<&str>, status_id: &str) -> String {
    match prefix.map(str::trim) {
        Some(prefix) if !prefix.is_empty() => {
            format!("{}/{}", prefix.trim_end_matches('/'), status_id)
        }
        _ => String::new(),
    }
}

/// Fit `text` into [`TEXT_BUDGET`] bytes minus the suffix length
///
/// Text that does not fit is cut on a character boundary and ends with
/// [`ELLIPSIS`], which counts against the budget. A non-empty suffix is
/// appended after one space whether or not the text was cut.
pub fn truncate_with_suffix(text: &str, suffix: &str) -> String {
    let threshold = TEXT_BUDGET.saturating_sub(suffix.len());
    let mut out = String::with_capacity(text.len().min(TEXT_BUDGET) + suffix.len() + 1);

    if text.len() <= threshold {
        out.push_str(text);
    } else {
        let limit = threshold.saturating_sub(ELLIPSIS.len());
        let mut end = 0;
        for (index, ch) in text.char_indices() {
            let next = index + ch.len_utf8();
            if next > limit {
                break;
            }
            end = next;
        }
        out.push_str(&text[..end]);
        out.push_str(ELLIPSIS);
    }

    if !suffix.is_empty() {
        out.push(' ');
        out.push_str(suffix);
    }
    out
}

/// Per-pipeline content transformation
#[derive(Debug, Clone, Default)]
pub struct ContentTransformer {
    rules: RewriteRules,
    link_prefix: Option<String>,
}

impl ContentTransformer {
    pub fn new(rules: RewriteRules, link_prefix: Option<String>) -> Self {
        Self { rules, link_prefix }
    }

    /// Build from an account's `replace` table and `prefix`
    pub fn from_config(replace: &BTreeMap<String, String>, prefix: Option<&str>) -> Result<Self> {
        Ok(Self::new(RewriteRules::new(replace)?, prefix.map(str::to_string)))
    }

    /// Convert a status' HTML content into the outbound text
    pub fn transform(&self, status_id: &str, html: &str) -> String {
        let text = self.rules.apply(&to_plain_text(html));
        let suffix = link_suffix(self.link_prefix.as_deref(), status_id);
        truncate_with_suffix(&text, &suffix)
    }
}
