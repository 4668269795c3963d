//! Style automation.
//!
//! Three independent style facets ("concerns") are automated while a Hypatia
//! document is current: the whole workbench theme, an injected token-color
//! overlay, and the semantic-highlighting flag. [`reconciler`] holds the
//! per-pass state machine; [`automation`] owns the trigger channel, the
//! serialized pass queue, and the re-entrancy guard around self-initiated
//! writes.

pub mod automation;
pub mod reconciler;

use std::time::Duration;

use serde_json::Value;

use crate::settings::SettingsAccessor;
use crate::theme::VariantSetting;

pub use automation::{StyleAutomation, Trigger};
pub use reconciler::{PassOutcome, ReasonSet, Reconciler, SwitchGuard};

/// Configuration keys this extension reads and writes.
pub mod keys {
    /// Automate the whole workbench theme (bool).
    pub const AUTOTHEME: &str = "hypatia.style.autotheme";
    /// Token-overlay mode: `off`/`auto`/`light`/`dark`, or a bool.
    pub const AUTOTOKENS: &str = "hypatia.style.autotokens";
    /// Variant preference: `light`/`dark`/`auto`.
    pub const VARIANT: &str = "hypatia.style.variant";
    /// Semantic-highlighting override: `on`/`off`/`inherit`.
    pub const SEMANTIC: &str = "hypatia.style.semanticHighlighting";
    /// Verbose reconciler logging (bool).
    pub const TRACE: &str = "hypatia.style.trace";
    /// Delay before the leave sequence runs after the last Hypatia editor
    /// goes away (milliseconds).
    pub const LEAVE_DEBOUNCE_MS: &str = "hypatia.style.leaveDebounceMs";

    /// Host-owned: active workbench theme label.
    pub const COLOR_THEME: &str = "workbench.colorTheme";
    /// Host-owned: token-color customization object.
    pub const TOKEN_CUSTOMIZATIONS: &str = "editor.tokenColorCustomizations";
    /// Host-owned: semantic-highlighting flag.
    pub const SEMANTIC_ENABLED: &str = "editor.semanticHighlighting.enabled";

    /// True for keys in this extension's namespace; only these schedule a
    /// reconciliation pass on change.
    pub fn is_extension_key(key: &str) -> bool {
        key.starts_with("hypatia.")
    }
}

/// Token-overlay mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenMode {
    #[default]
    Auto,
    Off,
    Light,
    Dark,
}

impl TokenMode {
    /// Parse from a configuration value. Bools are accepted for
    /// compatibility with older settings files: `true` means `auto`.
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Bool(true)) => Self::Auto,
            Some(Value::Bool(false)) => Self::Off,
            Some(Value::String(s)) => match s.as_str() {
                "off" => Self::Off,
                "light" => Self::Light,
                "dark" => Self::Dark,
                _ => Self::Auto,
            },
            _ => Self::default(),
        }
    }
}

/// Semantic-highlighting override mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SemanticMode {
    On,
    Off,
    /// Leave the host's own value alone (restores any override).
    #[default]
    Inherit,
}

impl SemanticMode {
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Bool(true)) => Self::On,
            Some(Value::Bool(false)) => Self::Off,
            Some(Value::String(s)) => match s.as_str() {
                "on" => Self::On,
                "off" => Self::Off,
                _ => Self::Inherit,
            },
            _ => Self::default(),
        }
    }
}

/// Snapshot of the extension's style configuration.
///
/// Loaded fresh at the start of every reconciliation pass and never cached
/// beyond it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSettings {
    pub autotheme: bool,
    pub autotokens: TokenMode,
    pub variant: VariantSetting,
    pub semantic: SemanticMode,
    pub trace: bool,
    pub leave_debounce: Duration,
}

impl Default for StyleSettings {
    fn default() -> Self {
        Self {
            autotheme: false,
            autotokens: TokenMode::Auto,
            variant: VariantSetting::Auto,
            semantic: SemanticMode::Inherit,
            trace: false,
            leave_debounce: Duration::ZERO,
        }
    }
}

impl StyleSettings {
    /// Read the current style configuration.
    pub fn load(accessor: &SettingsAccessor) -> Self {
        let defaults = Self::default();
        let variant = accessor
            .read(keys::VARIANT, None)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(defaults.variant);
        Self {
            autotheme: accessor
                .read(keys::AUTOTHEME, None)
                .and_then(|v| v.as_bool())
                .unwrap_or(defaults.autotheme),
            autotokens: TokenMode::from_value(accessor.read(keys::AUTOTOKENS, None).as_ref()),
            variant,
            semantic: SemanticMode::from_value(accessor.read(keys::SEMANTIC, None).as_ref()),
            trace: accessor
                .read(keys::TRACE, None)
                .and_then(|v| v.as_bool())
                .unwrap_or(defaults.trace),
            leave_debounce: accessor
                .read(keys::LEAVE_DEBOUNCE_MS, None)
                .and_then(|v| v.as_u64())
                .map(Duration::from_millis)
                .unwrap_or(defaults.leave_debounce),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ConfigTier, MemoryConfigStore};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn defaults_when_nothing_is_configured() {
        let accessor = SettingsAccessor::new(Arc::new(MemoryConfigStore::new()));
        let settings = StyleSettings::load(&accessor);
        assert_eq!(settings, StyleSettings::default());
    }

    #[test]
    fn reads_all_keys() {
        let store = MemoryConfigStore::new();
        store.seed(keys::AUTOTHEME, json!(true), ConfigTier::Global, None);
        store.seed(keys::AUTOTOKENS, json!("dark"), ConfigTier::Global, None);
        store.seed(keys::VARIANT, json!("light"), ConfigTier::Workspace, None);
        store.seed(keys::SEMANTIC, json!("off"), ConfigTier::Global, None);
        store.seed(keys::TRACE, json!(true), ConfigTier::Global, None);
        store.seed(keys::LEAVE_DEBOUNCE_MS, json!(40), ConfigTier::Global, None);

        let accessor = SettingsAccessor::new(Arc::new(store));
        let settings = StyleSettings::load(&accessor);
        assert!(settings.autotheme);
        assert_eq!(settings.autotokens, TokenMode::Dark);
        assert_eq!(settings.variant, VariantSetting::Light);
        assert_eq!(settings.semantic, SemanticMode::Off);
        assert!(settings.trace);
        assert_eq!(settings.leave_debounce, Duration::from_millis(40));
    }

    #[test]
    fn legacy_bool_autotokens_still_parses() {
        assert_eq!(TokenMode::from_value(Some(&json!(true))), TokenMode::Auto);
        assert_eq!(TokenMode::from_value(Some(&json!(false))), TokenMode::Off);
        assert_eq!(TokenMode::from_value(Some(&json!("off"))), TokenMode::Off);
        assert_eq!(TokenMode::from_value(None), TokenMode::Auto);
    }
}
