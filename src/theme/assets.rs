//! Bundled theme-definition loading.
//!
//! A theme definition is a JSON file carrying (among keys we ignore) a
//! `tokenColors` array of token rules. Each variant's file is read at most
//! once per process: the parsed rules are cached, and a read or parse
//! failure is logged once and cached as an empty list so a broken asset
//! cannot be retried on every reconciliation pass.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tracing::warn;

use crate::overlay::TokenRule;
use crate::theme::{Variant, file_for};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct ThemeDefinition {
    #[serde(default, rename = "tokenColors")]
    token_colors: Vec<TokenRule>,
}

/// Per-variant cache over the bundled theme-definition files.
pub struct ThemeAssets {
    root: PathBuf,
    cache: Mutex<HashMap<Variant, Arc<Vec<TokenRule>>>>,
}

impl ThemeAssets {
    /// Create a cache reading definitions from `root` (the directory holding
    /// the bundled `*-color-theme.json` files).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Token rules of the bundled theme for `variant`.
    ///
    /// Never fails: an unreadable or corrupt definition yields an empty rule
    /// list, cached like a successful read.
    pub fn token_colors(&self, variant: Variant) -> Arc<Vec<TokenRule>> {
        let mut cache = self.cache.lock().unwrap();
        if let Some(rules) = cache.get(&variant) {
            return rules.clone();
        }

        let path = self.root.join(file_for(variant));
        let rules = match read_definition(&path) {
            Ok(rules) => Arc::new(rules),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "theme definition unreadable, using no rules");
                Arc::new(Vec::new())
            }
        };
        cache.insert(variant, rules.clone());
        rules
    }
}

fn read_definition(path: &Path) -> Result<Vec<TokenRule>> {
    let raw = fs::read_to_string(path)?;
    let definition: ThemeDefinition = serde_json::from_str(&raw)
        .map_err(|e| Error::AssetUnreadable(format!("{}: {}", path.display(), e)))?;
    Ok(definition.token_colors)
}
