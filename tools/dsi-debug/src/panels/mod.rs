//! Built-in panel profiles
//!
//! Each profile is a complete [`PanelDescriptor`] for a panel the transport
//! has been brought up against. Any profile can be written out as TOML with
//! `dsi-debug generate panel` and edited into a new one.

pub mod auo;
pub mod lg;
pub mod sharp;

pub use auo::AUO_E1807_PANEL;
pub use lg::LG_720P_PANEL;
pub use sharp::SHARP_HVGA_PANEL;

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use tegra_dsi::PanelDescriptor;

/// Registry of built-in panel profiles
pub static PANEL_PROFILES: Lazy<HashMap<&'static str, &'static PanelDescriptor>> =
    Lazy::new(|| {
        let mut m = HashMap::new();
        m.insert("auo", &*AUO_E1807_PANEL);
        m.insert("auo-e1807", &*AUO_E1807_PANEL);
        m.insert("lg", &*LG_720P_PANEL);
        m.insert("lg-720p", &*LG_720P_PANEL);
        m.insert("sharp", &*SHARP_HVGA_PANEL);
        m.insert("sharp-hvga", &*SHARP_HVGA_PANEL);
        m
    });

/// Get a panel profile by name
pub fn get_panel(name: &str) -> Option<&'static PanelDescriptor> {
    PANEL_PROFILES.get(name.to_lowercase().as_str()).copied()
}

/// Profile names only (deduplicated)
pub fn panel_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = vec!["auo", "lg", "sharp"];
    names.sort();
    names
}

/// Resolve a built-in profile name or a panel TOML file
pub fn resolve_panel(name_or_path: &str) -> Result<PanelDescriptor> {
    if let Some(panel) = get_panel(name_or_path) {
        return Ok(panel.clone());
    }
    let path = Path::new(name_or_path);
    if path.is_file() {
        return PanelDescriptor::load(path)
            .with_context(|| format!("Failed to load panel file {}", path.display()));
    }
    anyhow::bail!(
        "Unknown panel: {}. Use 'dsi-debug panels list' to see built-in profiles.",
        name_or_path
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_profile_validates() {
        for name in panel_names() {
            let panel = get_panel(name).unwrap();
            assert!(panel.validate().is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert!(get_panel("LG").is_some());
        assert!(get_panel("Sharp-HVGA").is_some());
        assert!(get_panel("unknown").is_none());
    }

    #[test]
    fn test_resolve_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        let mut panel = LG_720P_PANEL.clone();
        panel.name = "custom".into();
        panel.save(&path).unwrap();

        let loaded = resolve_panel(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded, panel);
        assert!(resolve_panel("/nonexistent/panel.toml").is_err());
    }
}
