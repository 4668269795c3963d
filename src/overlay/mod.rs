//! Token-color overlay rules.
//!
//! The overlay is a set of token-color rules cloned from a bundled theme
//! definition and injected into the user's `editor.tokenColorCustomizations`
//! object. Every injected rule is renamed with [`RULE_MARKER`] so it can be
//! told apart from user-authored rules and stripped again without touching
//! anything else. Rules carrying the marker are always and only ours; the
//! stripper never inspects the rest.
//!
//! [`TokenCustomization`] types the one field this module rewrites and
//! passes every other key through untouched, so a strip reconstructs the
//! user's object exactly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::theme::Variant;

/// Reserved name prefix identifying rules injected by this extension.
pub const RULE_MARKER: &str = "hypatia-auto:";

/// One `textMateRules` entry.
///
/// `scope` and `settings` are opaque to this module; unrecognized keys ride
/// along in `extra` so user rules round-trip byte-for-byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TokenRule {
    /// True if this rule was injected by this extension.
    pub fn is_injected(&self) -> bool {
        self.name
            .as_deref()
            .is_some_and(|n| n.starts_with(RULE_MARKER))
    }
}

/// The `editor.tokenColorCustomizations` object: the rule list we manage,
/// plus a passthrough map for everything else (per-theme blocks, `comments`
/// shorthand keys, and so on).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenCustomization {
    #[serde(
        default,
        rename = "textMateRules",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub text_mate_rules: Vec<TokenRule>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TokenCustomization {
    /// Parse from the raw configuration value; absent or unparsable input
    /// yields an empty customization.
    pub fn from_value(value: Option<&Value>) -> Self {
        value
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// True if serializing this would produce an empty object.
    pub fn is_empty(&self) -> bool {
        self.text_mate_rules.is_empty() && self.extra.is_empty()
    }
}

/// Clone `rules` for injection, renaming each with the marker, the variant,
/// and an index suffix. The index makes every injected name unique, which
/// keeps stripping a pure prefix test.
pub fn build_injected(rules: &[TokenRule], variant: Variant) -> Vec<TokenRule> {
    rules
        .iter()
        .enumerate()
        .map(|(index, rule)| TokenRule {
            name: Some(format!("{RULE_MARKER}{variant}:{index}")),
            scope: rule.scope.clone(),
            settings: rule.settings.clone(),
            extra: rule.extra.clone(),
        })
        .collect()
}

/// Copy of `customization` with every marker-prefixed rule removed.
/// Remaining rules keep their order and content.
pub fn strip_injected(customization: &TokenCustomization) -> TokenCustomization {
    TokenCustomization {
        text_mate_rules: customization
            .text_mate_rules
            .iter()
            .filter(|r| !r.is_injected())
            .cloned()
            .collect(),
        extra: customization.extra.clone(),
    }
}

/// True if any rule in `customization` carries the marker.
pub fn has_injected(customization: &TokenCustomization) -> bool {
    customization.text_mate_rules.iter().any(TokenRule::is_injected)
}
