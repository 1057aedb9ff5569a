//! Frame Pipeline
//!
//! Each source owns one swappable frame interceptor attached to its clip
//! handle. The interceptor composes, in fixed order, a filter stage and an
//! audio mute/volume stage. Whenever filters, animation or mute state change,
//! the closure is rebuilt and reassigned (a stale closure would silently
//! keep reading old metadata) and the engine is asked to redraw the
//! previous, next and current frames.

mod filters;
mod transitions;

pub use filters::{builtin_filters, FilterRegistry, FilterSpec, VideoFilter};
pub use transitions::{
    builtin_transitions, first_frame, last_decodable_frame, left_fragment_interceptor,
    right_fragment_interceptor, TransitionEffect, TransitionRegistry,
};

use std::sync::Arc;

use crate::core::render::{FrameInterceptor, RenderEngine, TickResult};
use crate::core::{MediaKind, TimeUs};

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Snapshot of the source metadata a pipeline instance is built from.
///
/// The interceptor captures this by value; any change to the underlying
/// metadata requires building a fresh interceptor.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub kind: MediaKind,
    pub filters: Vec<FilterSpec>,
    /// Owning rail's mute flag
    pub muted: bool,
    /// Source volume; 1.0 is unity
    pub volume: f64,
}

/// Builds the per-frame interceptor for a source.
///
/// Stage order is fixed: filters first, then audio mute/volume. Ownership of
/// the incoming tick moves into the closure; every frame it does not return
/// is released there.
pub fn build_interceptor(registry: Arc<FilterRegistry>, config: PipelineConfig) -> FrameInterceptor {
    Arc::new(move |_time, tick: TickResult| {
        let TickResult { video, audio } = tick;

        // Filter stage. With no filters configured the raw frame is
        // duplicated rather than passed through, so the caller can always
        // release the original safely.
        let video = video.map(|frame| {
            if config.filters.is_empty() {
                frame.duplicate()
            } else {
                registry.apply_chain(&frame, &config.filters)
            }
            // `frame` is dropped here: this stage owned it.
        });

        // Audio stage.
        let audio = if config.muted {
            Vec::new()
        } else if config.kind.has_audio() && (config.volume - 1.0).abs() > f64::EPSILON {
            audio
                .into_iter()
                .map(|channel| {
                    channel
                        .into_iter()
                        .map(|sample| (sample as f64 * config.volume) as f32)
                        .collect()
                })
                .collect()
        } else {
            audio
        };

        Ok(TickResult { video, audio })
    })
}

/// Forces the engine to redraw around the cursor after an interceptor swap,
/// so the visible preview reflects the change immediately.
pub fn force_refresh(engine: &dyn RenderEngine, time: TimeUs) {
    engine.preview_frame(time + 1);
    engine.preview_frame(time - 1);
    engine.preview_frame(time);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::render::{Frame, MemoryRenderEngine};

    fn tick_with_frame() -> TickResult {
        TickResult {
            video: Some(Frame::solid(4, 4, 0, [100, 100, 100, 255])),
            audio: vec![vec![0.5; 8]; 2],
        }
    }

    fn config(kind: MediaKind) -> PipelineConfig {
        PipelineConfig {
            kind,
            filters: vec![],
            muted: false,
            volume: 1.0,
        }
    }

    #[test]
    fn test_no_filters_duplicates_frame() {
        let registry = Arc::new(FilterRegistry::with_builtins());
        let interceptor = build_interceptor(registry, config(MediaKind::Video));

        let input = tick_with_frame();
        let input_ptr = input.video.as_ref().unwrap().data.as_ptr();
        let out = interceptor(0, input).unwrap();

        let frame = out.video.unwrap();
        // Fresh allocation, same content
        assert_ne!(frame.data.as_ptr(), input_ptr);
        assert_eq!(frame.data[0], 100);
    }

    #[test]
    fn test_filter_stage_applies_configured_filters() {
        let registry = Arc::new(FilterRegistry::with_builtins());
        let mut cfg = config(MediaKind::Video);
        cfg.filters = vec![FilterSpec::new("brightness", serde_json::json!({"amount": 200}))];
        let interceptor = build_interceptor(registry, cfg);

        let out = interceptor(0, tick_with_frame()).unwrap();
        assert_eq!(out.video.unwrap().data[0], 200);
    }

    #[test]
    fn test_muted_rail_strips_audio() {
        let registry = Arc::new(FilterRegistry::with_builtins());
        let mut cfg = config(MediaKind::Video);
        cfg.muted = true;
        let interceptor = build_interceptor(registry, cfg);

        let out = interceptor(0, tick_with_frame()).unwrap();
        assert!(out.audio.is_empty());
        assert!(out.video.is_some());
    }

    #[test]
    fn test_volume_scales_samples() {
        let registry = Arc::new(FilterRegistry::with_builtins());
        let mut cfg = config(MediaKind::Audio);
        cfg.volume = 0.5;
        let interceptor = build_interceptor(registry, cfg);

        let out = interceptor(
            0,
            TickResult {
                video: None,
                audio: vec![vec![0.8; 4]],
            },
        )
        .unwrap();
        assert!((out.audio[0][0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_volume_ignored_for_image_kind() {
        let registry = Arc::new(FilterRegistry::with_builtins());
        let mut cfg = config(MediaKind::Image);
        cfg.volume = 0.5;
        let interceptor = build_interceptor(registry, cfg);

        let out = interceptor(
            0,
            TickResult {
                video: None,
                audio: vec![vec![0.8; 4]],
            },
        )
        .unwrap();
        assert_eq!(out.audio[0][0], 0.8);
    }

    #[test]
    fn test_force_refresh_redraws_neighbors_and_current() {
        let engine = MemoryRenderEngine::new();
        force_refresh(&engine, 1_000);
        assert_eq!(engine.preview_log(), vec![1_001, 999, 1_000]);
    }
}
