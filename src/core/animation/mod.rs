//! Animation Engine
//!
//! Stateless keyframe computation for enter/exit/continuous motion. A named
//! preset defines a keyframe template of *relative* transforms; the engine
//! resolves it against a source's base (animation-free) geometry into
//! absolute keyframes plus timing, which the render engine then plays.

mod engine;
mod presets;

pub use engine::{resolve, AnimationRequest, AnimationSpec, BaseState};
pub use presets::builtin_presets;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::core::TimeUs;

// =============================================================================
// Keyframe Positions
// =============================================================================

/// Position of a keyframe within one animation cycle.
///
/// Ordering: `From` < any `Percent` < `To`; percents order numerically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum KeyframePos {
    From,
    Percent(u32),
    To,
}

impl From<KeyframePos> for String {
    fn from(pos: KeyframePos) -> Self {
        match pos {
            KeyframePos::From => "from".to_string(),
            KeyframePos::Percent(p) => format!("{}%", p),
            KeyframePos::To => "to".to_string(),
        }
    }
}

impl TryFrom<String> for KeyframePos {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "from" => Ok(KeyframePos::From),
            "to" => Ok(KeyframePos::To),
            other => other
                .strip_suffix('%')
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|p| *p <= 100)
                .map(KeyframePos::Percent)
                .ok_or_else(|| format!("invalid keyframe position: {}", other)),
        }
    }
}

// =============================================================================
// Resolved Keyframes
// =============================================================================

/// Absolute sprite pose held at one keyframe
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpritePose {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    /// Radians
    pub angle: f64,
    pub opacity: f64,
}

/// Resolved keyframe set, ordered by position
pub type KeyframeSet = BTreeMap<KeyframePos, SpritePose>;

/// Playback parameters of a resolved animation
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationTiming {
    /// Length of one cycle
    pub duration: TimeUs,
    pub delay: TimeUs,
    /// Number of cycles; 0 means repeat forever
    pub iter_count: u32,
}

// =============================================================================
// Presets
// =============================================================================

/// Animation category, driving iteration and delay resolution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnimationKind {
    Enter,
    Exit,
    Motion,
}

/// One template entry: relative transforms against the base geometry.
///
/// `offset_x`/`offset_y` of `±f64::INFINITY` mean "fully off-canvas on that
/// edge". `scale` applies to both w and h and recenters via contain fit.
/// `rotate` is in degrees; `opacity` is an absolute value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RelTransform {
    pub offset_x: Option<f64>,
    pub offset_y: Option<f64>,
    pub scale: Option<f64>,
    pub rotate: Option<f64>,
    pub opacity: Option<f64>,
}

/// A named animation template
#[derive(Clone, Debug)]
pub struct AnimationPreset {
    pub key: String,
    pub kind: AnimationKind,
    pub template: Vec<(KeyframePos, RelTransform)>,
    pub default_duration: TimeUs,
    pub default_iter_count: Option<u32>,
}

/// Explicit preset registry, constructed once and passed by reference
/// wherever animations are resolved.
#[derive(Debug, Default)]
pub struct AnimationRegistry {
    presets: HashMap<String, AnimationPreset>,
}

impl AnimationRegistry {
    pub fn new() -> Self {
        Self {
            presets: HashMap::new(),
        }
    }

    /// Creates a registry holding the builtin preset set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for preset in builtin_presets() {
            registry.register(preset);
        }
        registry
    }

    pub fn register(&mut self, preset: AnimationPreset) {
        self.presets.insert(preset.key.clone(), preset);
    }

    pub fn get(&self, key: &str) -> Option<&AnimationPreset> {
        self.presets.get(key)
    }

    pub fn names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyframe_pos_ordering() {
        assert!(KeyframePos::From < KeyframePos::Percent(0));
        assert!(KeyframePos::Percent(25) < KeyframePos::Percent(75));
        assert!(KeyframePos::Percent(100) < KeyframePos::To);
    }

    #[test]
    fn test_keyframe_pos_roundtrip() {
        for pos in [KeyframePos::From, KeyframePos::Percent(50), KeyframePos::To] {
            let s: String = pos.into();
            assert_eq!(KeyframePos::try_from(s).unwrap(), pos);
        }
        assert!(KeyframePos::try_from("150%".to_string()).is_err());
        assert!(KeyframePos::try_from("middle".to_string()).is_err());
    }

    #[test]
    fn test_builtin_registry() {
        let registry = AnimationRegistry::with_builtins();
        assert!(registry.get("fadeIn").is_some());
        assert!(registry.get("slideOutRight").is_some());
        assert!(registry.get("pulse").is_some());
        assert!(registry.get("nope").is_none());
    }
}
