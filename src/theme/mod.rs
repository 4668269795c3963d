//! Theme variant resolution and bundled-theme lookup.
//!
//! Pure functions only; the stateful asset cache lives in [`assets`].

pub mod assets;

use serde::{Deserialize, Serialize};

pub use assets::ThemeAssets;

/// Concrete color variant of the bundled Hypatia themes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Light,
    Dark,
}

impl Variant {
    /// Get the variant name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The `hypatia.style.variant` setting: a fixed variant, or follow the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantSetting {
    Light,
    Dark,
    #[default]
    Auto,
}

/// Kind of the host's active color theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThemeKind {
    Light,
    Dark,
    HighContrast,
    HighContrastLight,
}

impl ThemeKind {
    /// True for the two light-side kinds.
    pub fn is_light(&self) -> bool {
        matches!(self, Self::Light | Self::HighContrastLight)
    }
}

/// Map the variant setting and the host's current theme kind to a concrete
/// variant. `Auto` follows the host: light-side kinds resolve light,
/// everything else dark.
pub fn resolve_variant(setting: VariantSetting, kind: ThemeKind) -> Variant {
    match setting {
        VariantSetting::Light => Variant::Light,
        VariantSetting::Dark => Variant::Dark,
        VariantSetting::Auto => {
            if kind.is_light() {
                Variant::Light
            } else {
                Variant::Dark
            }
        }
    }
}

/// Workbench label of the bundled theme for `variant`.
pub fn label_for(variant: Variant) -> &'static str {
    match variant {
        Variant::Light => "Hypatia Light",
        Variant::Dark => "Hypatia Dark",
    }
}

/// Definition-file name of the bundled theme for `variant`.
pub fn file_for(variant: Variant) -> &'static str {
    match variant {
        Variant::Light => "hypatia-light-color-theme.json",
        Variant::Dark => "hypatia-dark-color-theme.json",
    }
}

/// True if `label` names one of the two bundled themes.
pub fn is_bundled_label(label: &str) -> bool {
    variant_for_label(label).is_some()
}

/// Variant of a bundled theme label, if it is one.
pub fn variant_for_label(label: &str) -> Option<Variant> {
    match label {
        "Hypatia Light" => Some(Variant::Light),
        "Hypatia Dark" => Some(Variant::Dark),
        _ => None,
    }
}
