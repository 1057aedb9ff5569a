//! Video Filters
//!
//! Named per-frame filters with JSON parameters. Filters are chained in
//! configuration order; each one consumes the previous stage's frame and
//! produces a freshly owned one. A failing filter never propagates; the
//! chain logs and falls back to a duplicate of its input.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::render::Frame;
use crate::core::CoreResult;

// =============================================================================
// Filter Contract
// =============================================================================

/// One configured filter on a source
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    pub key: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl FilterSpec {
    pub fn new(key: &str, params: serde_json::Value) -> Self {
        Self {
            key: key.to_string(),
            params,
        }
    }

    /// A filter with default parameters.
    pub fn named(key: &str) -> Self {
        Self::new(key, serde_json::Value::Null)
    }
}

/// A named frame transform
pub trait VideoFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produces a new frame from `frame`. The input stays owned by the
    /// caller; the output is always freshly owned.
    fn apply(&self, frame: &Frame, params: &serde_json::Value) -> CoreResult<Frame>;
}

/// Explicit filter registry, constructed once and injected where interceptors
/// are built.
#[derive(Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<dyn VideoFilter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for filter in builtin_filters() {
            registry.register(filter);
        }
        registry
    }

    pub fn register(&mut self, filter: Arc<dyn VideoFilter>) {
        self.filters.insert(filter.name().to_string(), filter);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn VideoFilter>> {
        self.filters.get(name)
    }

    /// Runs the configured chain over `frame`.
    ///
    /// Unknown filter names are skipped. Any filter error releases the
    /// intermediates and yields a duplicate of the chain input, so the caller
    /// always receives a frame it exclusively owns.
    pub fn apply_chain(&self, frame: &Frame, specs: &[FilterSpec]) -> Frame {
        let mut current: Option<Frame> = None;
        for spec in specs {
            let Some(filter) = self.get(&spec.key) else {
                warn!(filter = %spec.key, "skipping unknown filter");
                continue;
            };
            let input = current.as_ref().unwrap_or(frame);
            match filter.apply(input, &spec.params) {
                Ok(next) => current = Some(next),
                Err(e) => {
                    warn!(filter = %spec.key, error = %e, "filter failed, passing frame through");
                    return frame.duplicate();
                }
            }
        }
        current.unwrap_or_else(|| frame.duplicate())
    }
}

// =============================================================================
// Builtin Filters
// =============================================================================

/// Reads the conventional `amount` parameter, in percent.
fn amount(params: &serde_json::Value, default: f64) -> f64 {
    params
        .get("amount")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(default)
}

fn map_rgb(frame: &Frame, mut f: impl FnMut(u8, usize) -> u8) -> Frame {
    let mut out = frame.duplicate();
    for (i, value) in out.data.iter_mut().enumerate() {
        if i % 4 != 3 {
            *value = f(*value, i);
        }
    }
    out
}

/// Scales every color channel; `amount` 100 is identity.
struct BrightnessFilter;

impl VideoFilter for BrightnessFilter {
    fn name(&self) -> &'static str {
        "brightness"
    }

    fn apply(&self, frame: &Frame, params: &serde_json::Value) -> CoreResult<Frame> {
        let factor = amount(params, 100.0) / 100.0;
        Ok(map_rgb(frame, |c, _| {
            (c as f64 * factor).round().clamp(0.0, 255.0) as u8
        }))
    }
}

/// Spreads channels around mid gray; `amount` 100 is identity.
struct ContrastFilter;

impl VideoFilter for ContrastFilter {
    fn name(&self) -> &'static str {
        "contrast"
    }

    fn apply(&self, frame: &Frame, params: &serde_json::Value) -> CoreResult<Frame> {
        let factor = amount(params, 100.0) / 100.0;
        Ok(map_rgb(frame, |c, _| {
            ((c as f64 - 128.0) * factor + 128.0).round().clamp(0.0, 255.0) as u8
        }))
    }
}

fn luma(r: u8, g: u8, b: u8) -> f64 {
    0.2126 * r as f64 + 0.7152 * g as f64 + 0.0722 * b as f64
}

/// Mixes channels toward/away from luma; `amount` 100 is identity,
/// 0 is grayscale, above 100 oversaturates.
struct SaturateFilter;

impl VideoFilter for SaturateFilter {
    fn name(&self) -> &'static str {
        "saturate"
    }

    fn apply(&self, frame: &Frame, params: &serde_json::Value) -> CoreResult<Frame> {
        let factor = amount(params, 100.0) / 100.0;
        let mut out = frame.duplicate();
        for px in out.data.chunks_exact_mut(4) {
            let l = luma(px[0], px[1], px[2]);
            for c in px.iter_mut().take(3) {
                *c = (l + (*c as f64 - l) * factor).round().clamp(0.0, 255.0) as u8;
            }
        }
        Ok(out)
    }
}

/// Mixes toward luma; `amount` 100 is fully gray, 0 is identity.
struct GrayscaleFilter;

impl VideoFilter for GrayscaleFilter {
    fn name(&self) -> &'static str {
        "grayscale"
    }

    fn apply(&self, frame: &Frame, params: &serde_json::Value) -> CoreResult<Frame> {
        let mix = (amount(params, 100.0) / 100.0).clamp(0.0, 1.0);
        let mut out = frame.duplicate();
        for px in out.data.chunks_exact_mut(4) {
            let l = luma(px[0], px[1], px[2]);
            for c in px.iter_mut().take(3) {
                *c = (*c as f64 + (l - *c as f64) * mix).round().clamp(0.0, 255.0) as u8;
            }
        }
        Ok(out)
    }
}

/// Separable box blur; `amount` 100 maps to a 5 pixel radius.
struct BlurFilter;

impl BlurFilter {
    fn blur_axis(src: &[u8], dst: &mut [u8], width: usize, height: usize, radius: usize, horizontal: bool) {
        let (outer, inner) = if horizontal {
            (height, width)
        } else {
            (width, height)
        };
        let index = |o: usize, i: usize| -> usize {
            if horizontal {
                (o * width + i) * 4
            } else {
                (i * width + o) * 4
            }
        };
        for o in 0..outer {
            for i in 0..inner {
                let lo = i.saturating_sub(radius);
                let hi = (i + radius).min(inner - 1);
                let mut sums = [0u32; 4];
                for j in lo..=hi {
                    let base = index(o, j);
                    for (k, sum) in sums.iter_mut().enumerate() {
                        *sum += src[base + k] as u32;
                    }
                }
                let count = (hi - lo + 1) as u32;
                let base = index(o, i);
                for (k, sum) in sums.iter().enumerate() {
                    dst[base + k] = (sum / count) as u8;
                }
            }
        }
    }
}

impl VideoFilter for BlurFilter {
    fn name(&self) -> &'static str {
        "blur"
    }

    fn apply(&self, frame: &Frame, params: &serde_json::Value) -> CoreResult<Frame> {
        let radius = (amount(params, 0.0) / 100.0 * 5.0).round().max(0.0) as usize;
        if radius == 0 {
            return Ok(frame.duplicate());
        }
        let (w, h) = (frame.width as usize, frame.height as usize);
        let mut pass = vec![0u8; frame.data.len()];
        Self::blur_axis(&frame.data, &mut pass, w, h, radius, true);
        let mut out = frame.duplicate();
        Self::blur_axis(&pass, &mut out.data, w, h, radius, false);
        Ok(out)
    }
}

/// Returns the builtin filter set.
pub fn builtin_filters() -> Vec<Arc<dyn VideoFilter>> {
    vec![
        Arc::new(BrightnessFilter),
        Arc::new(ContrastFilter),
        Arc::new(SaturateFilter),
        Arc::new(GrayscaleFilter),
        Arc::new(BlurFilter),
    ]
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::solid(4, 4, 0, [100, 150, 200, 255])
    }

    #[test]
    fn test_brightness_scales_channels() {
        let registry = FilterRegistry::with_builtins();
        let out = registry.apply_chain(
            &frame(),
            &[FilterSpec::new("brightness", serde_json::json!({"amount": 50}))],
        );
        assert_eq!(&out.data[0..4], &[50, 75, 100, 255]);
    }

    #[test]
    fn test_brightness_clamps() {
        let registry = FilterRegistry::with_builtins();
        let out = registry.apply_chain(
            &frame(),
            &[FilterSpec::new("brightness", serde_json::json!({"amount": 300}))],
        );
        assert_eq!(&out.data[0..4], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_grayscale_full_converges_channels() {
        let registry = FilterRegistry::with_builtins();
        let out = registry.apply_chain(&frame(), &[FilterSpec::named("grayscale")]);
        let px = &out.data[0..3];
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
    }

    #[test]
    fn test_saturate_zero_equals_grayscale() {
        let registry = FilterRegistry::with_builtins();
        let desat = registry.apply_chain(
            &frame(),
            &[FilterSpec::new("saturate", serde_json::json!({"amount": 0}))],
        );
        let gray = registry.apply_chain(&frame(), &[FilterSpec::named("grayscale")]);
        assert_eq!(desat.data, gray.data);
    }

    #[test]
    fn test_contrast_identity_at_100() {
        let registry = FilterRegistry::with_builtins();
        let out = registry.apply_chain(
            &frame(),
            &[FilterSpec::new("contrast", serde_json::json!({"amount": 100}))],
        );
        assert_eq!(out.data, frame().data);
    }

    #[test]
    fn test_blur_zero_radius_is_duplicate() {
        let registry = FilterRegistry::with_builtins();
        let out = registry.apply_chain(
            &frame(),
            &[FilterSpec::new("blur", serde_json::json!({"amount": 0}))],
        );
        assert_eq!(out.data, frame().data);
    }

    #[test]
    fn test_blur_smooths_edges() {
        let registry = FilterRegistry::with_builtins();
        let mut input = Frame::solid(8, 8, 0, [0, 0, 0, 255]);
        // White pixel in the middle
        let center = (4 * 8 + 4) * 4;
        input.data[center] = 255;
        input.data[center + 1] = 255;
        input.data[center + 2] = 255;

        let out = registry.apply_chain(
            &input,
            &[FilterSpec::new("blur", serde_json::json!({"amount": 40}))],
        );
        // Energy spread: the center darkened, a neighbor brightened
        assert!(out.data[center] < 255);
        let neighbor = (4 * 8 + 5) * 4;
        assert!(out.data[neighbor] > 0);
    }

    #[test]
    fn test_chain_applies_in_order() {
        let registry = FilterRegistry::with_builtins();
        let out = registry.apply_chain(
            &frame(),
            &[
                FilterSpec::new("brightness", serde_json::json!({"amount": 50})),
                FilterSpec::new("brightness", serde_json::json!({"amount": 50})),
            ],
        );
        assert_eq!(out.data[0], 25);
    }

    #[test]
    fn test_unknown_filter_skipped() {
        let registry = FilterRegistry::with_builtins();
        let out = registry.apply_chain(
            &frame(),
            &[
                FilterSpec::named("vortex"),
                FilterSpec::new("brightness", serde_json::json!({"amount": 50})),
            ],
        );
        assert_eq!(out.data[0], 50);
    }

    #[test]
    fn test_empty_chain_duplicates() {
        let registry = FilterRegistry::with_builtins();
        let input = frame();
        let out = registry.apply_chain(&input, &[]);
        assert_eq!(out.data, input.data);
        assert_ne!(out.data.as_ptr(), input.data.as_ptr());
    }

    #[test]
    fn test_failing_filter_falls_back_to_input() {
        struct FailingFilter;
        impl VideoFilter for FailingFilter {
            fn name(&self) -> &'static str {
                "failing"
            }
            fn apply(&self, _: &Frame, _: &serde_json::Value) -> CoreResult<Frame> {
                Err(crate::core::CoreError::InvalidEffectParams("boom".into()))
            }
        }

        let mut registry = FilterRegistry::with_builtins();
        registry.register(Arc::new(FailingFilter));

        let input = frame();
        let out = registry.apply_chain(
            &input,
            &[
                FilterSpec::new("brightness", serde_json::json!({"amount": 50})),
                FilterSpec::named("failing"),
            ],
        );
        // The chain yields a duplicate of the unfiltered input
        assert_eq!(out.data, input.data);
    }
}
