//! Railcut Core Type Definitions
//!
//! Defines fundamental types used throughout the project.

use serde::{Deserialize, Serialize};
use tracing::warn;

// =============================================================================
// ID Types
// =============================================================================

/// Project unique identifier
pub type ProjectId = String;

/// Source unique identifier (ULID)
pub type SourceKey = String;

/// Segment unique identifier (ULID)
pub type SegmentId = String;

/// Rail (track) unique identifier (ULID)
pub type RailId = String;

/// Transition unique identifier (ULID)
pub type TransitionId = String;

/// History entry unique identifier (ULID)
pub type HistoryId = String;

/// Generates a new ULID-based identifier.
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

// =============================================================================
// Time Types
// =============================================================================

/// Time in microseconds (1_000_000 per second)
pub type TimeUs = i64;

/// Microseconds per second
pub const US_PER_SEC: TimeUs = 1_000_000;

/// Checks two half-open windows `[s1, e1)` / `[s2, e2)` for overlap.
///
/// Touching windows do not overlap.
pub fn windows_overlap(s1: TimeUs, e1: TimeUs, s2: TimeUs, e2: TimeUs) -> bool {
    !(e1 <= s2 || s1 >= e2)
}

// =============================================================================
// Spatial Types
// =============================================================================

/// On-canvas rectangle with rotation, in pixels
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    /// Rotation in radians
    pub angle: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self {
            x,
            y,
            w,
            h,
            angle: 0.0,
        }
    }
}

impl Default for Rect {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

/// 2D size in pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size2D {
    pub width: u32,
    pub height: u32,
}

impl Size2D {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Fit modes for placing media onto the canvas.
///
/// The `_scale` variants allow upscaling beyond the media's native size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FitMode {
    Contain,
    Cover,
    ContainScale,
    CoverScale,
}

/// Fits `element` into `canvas` per the given mode, centering the result.
///
/// With no mode the element keeps its size and is centered.
pub fn auto_fit_rect(canvas: Size2D, element: Size2D, mode: Option<FitMode>) -> Rect {
    let (cw, ch) = (canvas.width as f64, canvas.height as f64);
    let (ew, eh) = (element.width as f64, element.height as f64);
    if ew <= 0.0 || eh <= 0.0 {
        warn!("auto_fit_rect called with empty element size");
        return Rect::new(cw / 2.0, ch / 2.0, 0.0, 0.0);
    }

    let (w, h) = match mode {
        Some(FitMode::Contain) | Some(FitMode::ContainScale) => {
            let mut scale = (cw / ew).min(ch / eh);
            if mode != Some(FitMode::ContainScale) {
                scale = scale.min(1.0);
            }
            (ew * scale, eh * scale)
        }
        Some(FitMode::Cover) | Some(FitMode::CoverScale) => {
            let mut scale = (cw / ew).max(ch / eh);
            if mode != Some(FitMode::CoverScale) {
                scale = scale.max(1.0);
            }
            (ew * scale, eh * scale)
        }
        None => (ew, eh),
    };

    Rect::new((cw - w) / 2.0, (ch - h) / 2.0, w, h)
}

// =============================================================================
// Media Kind
// =============================================================================

/// Media kind of a source and of the rail that holds it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
    Text,
}

impl MediaKind {
    /// Returns true for kinds that carry an audio payload
    pub fn has_audio(&self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::Audio)
    }

    /// Returns true for kinds that carry a video payload
    pub fn has_video(&self) -> bool {
        !matches!(self, MediaKind::Audio)
    }
}

// =============================================================================
// Aspect Ratio Presets
// =============================================================================

/// Canvas presets selectable in the editor, keyed by aspect-ratio label
pub const ASPECT_RATIOS: &[(&str, u32, u32)] = &[
    ("16:9", 1920, 1080),
    ("9:16", 1080, 1920),
    ("4:3", 1440, 1080),
    ("1:1", 1080, 1080),
    ("21:9", 2520, 1080),
];

/// Looks up the canvas size for an aspect-ratio label.
pub fn aspect_ratio_size(label: &str) -> Option<Size2D> {
    ASPECT_RATIOS
        .iter()
        .find(|(name, _, _)| *name == label)
        .map(|(_, w, h)| Size2D::new(*w, *h))
}

/// Returns the preset label closest to the given canvas size.
pub fn closest_aspect_ratio(width: u32, height: u32) -> &'static str {
    let target = width as f64 / height as f64;
    ASPECT_RATIOS
        .iter()
        .min_by(|(_, w1, h1), (_, w2, h2)| {
            let d1 = (target - *w1 as f64 / *h1 as f64).abs();
            let d2 = (target - *w2 as f64 / *h2 as f64).abs();
            d1.total_cmp(&d2)
        })
        .map(|(name, _, _)| *name)
        .unwrap_or("16:9")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_overlap() {
        assert!(windows_overlap(0, 10, 5, 15));
        assert!(windows_overlap(5, 15, 0, 10));
        assert!(windows_overlap(0, 10, 2, 8));
        // Touching windows do not overlap
        assert!(!windows_overlap(0, 10, 10, 20));
        assert!(!windows_overlap(10, 20, 0, 10));
        assert!(!windows_overlap(0, 5, 6, 10));
    }

    #[test]
    fn test_auto_fit_contain_downscales_only() {
        let canvas = Size2D::new(1920, 1080);
        // Larger than canvas: scaled down to fit height
        let fitted = auto_fit_rect(canvas, Size2D::new(4000, 3000), Some(FitMode::Contain));
        assert!((fitted.h - 1080.0).abs() < 1e-9);
        assert!((fitted.w - 1440.0).abs() < 1e-9);
        // Smaller than canvas: left at native size, centered
        let small = auto_fit_rect(canvas, Size2D::new(640, 480), Some(FitMode::Contain));
        assert_eq!(small.w, 640.0);
        assert_eq!(small.x, (1920.0 - 640.0) / 2.0);
    }

    #[test]
    fn test_auto_fit_contain_scale_upscales() {
        let canvas = Size2D::new(1920, 1080);
        let fitted = auto_fit_rect(canvas, Size2D::new(640, 480), Some(FitMode::ContainScale));
        assert!((fitted.h - 1080.0).abs() < 1e-9);
    }

    #[test]
    fn test_auto_fit_none_centers() {
        let canvas = Size2D::new(1000, 1000);
        let r = auto_fit_rect(canvas, Size2D::new(200, 100), None);
        assert_eq!((r.x, r.y, r.w, r.h), (400.0, 450.0, 200.0, 100.0));
    }

    #[test]
    fn test_closest_aspect_ratio() {
        assert_eq!(closest_aspect_ratio(1920, 1080), "16:9");
        assert_eq!(closest_aspect_ratio(1080, 1920), "9:16");
        assert_eq!(closest_aspect_ratio(1000, 1000), "1:1");
    }

    #[test]
    fn test_aspect_ratio_size() {
        assert_eq!(aspect_ratio_size("4:3"), Some(Size2D::new(1440, 1080)));
        assert_eq!(aspect_ratio_size("3:2"), None);
    }
}
