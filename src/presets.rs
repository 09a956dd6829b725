use crate::config::PipelineConfig;
use anyhow::Context;
use log::{debug, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// =============================================================================
// FACTORY PRESETS
// =============================================================================

/// Factory presets for common endpoint acoustics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AecPreset {
    #[default]
    #[serde(rename = "Default")]
    Default,
    #[serde(rename = "Speakerphone")]
    Speakerphone,
    #[serde(rename = "Headset")]
    Headset,
    #[serde(rename = "Conference Room")]
    ConferenceRoom,
}

impl AecPreset {
    pub fn all_presets() -> [AecPreset; 4] {
        [
            AecPreset::Default,
            AecPreset::Speakerphone,
            AecPreset::Headset,
            AecPreset::ConferenceRoom,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            AecPreset::Default => "Default",
            AecPreset::Speakerphone => "Speakerphone",
            AecPreset::Headset => "Headset",
            AecPreset::ConferenceRoom => "Conference Room",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AecPreset::Default => "Balanced settings for a laptop or desktop endpoint",
            AecPreset::Speakerphone => "Long tail and wider delay search for loud loudspeakers",
            AecPreset::Headset => "Short tail, small delay, no post filter",
            AecPreset::ConferenceRoom => "Long reverberant tail with a less eager double-talk gate",
        }
    }
}

// =============================================================================
// PRESET MANAGER
// =============================================================================

static BUILTIN: Lazy<PresetManager> = Lazy::new(PresetManager::new);

/// Process-wide table parsed from the baked-in `presets.json`.
pub fn builtin() -> &'static PresetManager {
    &BUILTIN
}

#[derive(Debug)]
pub struct PresetManager {
    presets: HashMap<String, PipelineConfig>,
}

impl PresetManager {
    /// Load presets from baked-in JSON. This is fallible but non-fatal:
    /// a malformed table falls back to a manager with only "Default".
    pub fn new() -> Self {
        match Self::from_json_str(include_str!("../presets.json")) {
            Ok(m) => m,
            Err(e) => {
                warn!("built-in presets unusable, falling back to defaults: {:#}", e);
                Self::default()
            }
        }
    }

    /// Parse a preset table. Each entry only lists the fields it overrides.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let presets: HashMap<String, PipelineConfig> =
            serde_json::from_str(json).context("failed to parse preset table")?;
        debug!("loaded {} presets", presets.len());
        Ok(Self { presets })
    }

    pub fn load_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read presets from {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("in {}", path.display()))
    }

    pub fn get(&self, name: &str) -> Option<&PipelineConfig> {
        self.presets.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(|k| k.as_str())
    }

    /// Config for `preset`, or defaults if the table lacks it.
    pub fn config_for(&self, preset: AecPreset) -> PipelineConfig {
        match self.get(preset.name()) {
            Some(cfg) => *cfg,
            None => {
                debug!("preset '{}' not in table, using defaults", preset.name());
                PipelineConfig::default()
            }
        }
    }
}

impl Default for PresetManager {
    fn default() -> Self {
        let mut presets = HashMap::new();
        presets.insert("Default".to_string(), PipelineConfig::default());
        Self { presets }
    }
}
