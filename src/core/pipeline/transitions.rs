//! Cross-Fade Transition Composition
//!
//! A transition spans the tail of one segment and the head of the next. Each
//! adjoining clip contributes a half-duration fragment; the left fragment
//! blends its advancing frame with a cached freeze-frame of the right
//! fragment's first frame, the right fragment blends a cached freeze-frame of
//! the left fragment's last decodable frame with its own advancing frame.
//! Audio on transition fragments is always suppressed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::core::render::{ClipHandle, Frame, FrameInterceptor, RenderEngine, TickResult};
use crate::core::{CoreError, CoreResult, TimeUs};

/// Offset from the clip end where the tail freeze-frame is first probed
const TAIL_PROBE_US: TimeUs = 30_000;

/// Fallback scan start when the first tail probe decodes nothing
const TAIL_SCAN_START_US: TimeUs = 100_000;

/// Step of the backwards tail scan (one frame at ~30fps)
const TAIL_SCAN_STEP_US: TimeUs = 33_000;

// =============================================================================
// Transition Effects
// =============================================================================

/// A named two-frame blend
pub trait TransitionEffect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Blends `from` into `to` at `progress` in `[0, 1]`, producing a freshly
    /// owned frame. Inputs stay owned by the caller.
    fn blend(
        &self,
        from: &Frame,
        to: &Frame,
        progress: f64,
        config: &serde_json::Value,
    ) -> CoreResult<Frame>;
}

/// Explicit transition-effect registry, injected where transitions are built.
#[derive(Default)]
pub struct TransitionRegistry {
    effects: HashMap<String, Arc<dyn TransitionEffect>>,
}

impl TransitionRegistry {
    pub fn new() -> Self {
        Self {
            effects: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for effect in builtin_transitions() {
            registry.register(effect);
        }
        registry
    }

    pub fn register(&mut self, effect: Arc<dyn TransitionEffect>) {
        self.effects.insert(effect.name().to_string(), effect);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TransitionEffect>> {
        self.effects.get(name)
    }

    fn blend(
        &self,
        name: &str,
        from: &Frame,
        to: &Frame,
        progress: f64,
        config: &serde_json::Value,
    ) -> CoreResult<Frame> {
        let effect = self
            .get(name)
            .ok_or_else(|| CoreError::UnknownEffect(name.to_string()))?;
        effect.blend(from, to, progress.clamp(0.0, 1.0), config)
    }
}

/// Nearest-neighbor sample of `frame` at output coordinates, tolerating
/// differing fragment dimensions.
fn sample(frame: &Frame, x: u32, y: u32, out_w: u32, out_h: u32) -> [u8; 4] {
    let sx = (x as u64 * frame.width as u64 / out_w.max(1) as u64).min(frame.width as u64 - 1);
    let sy = (y as u64 * frame.height as u64 / out_h.max(1) as u64).min(frame.height as u64 - 1);
    let base = ((sy * frame.width as u64 + sx) * 4) as usize;
    [
        frame.data[base],
        frame.data[base + 1],
        frame.data[base + 2],
        frame.data[base + 3],
    ]
}

/// Linear per-pixel cross fade
struct CrossFade;

impl TransitionEffect for CrossFade {
    fn name(&self) -> &'static str {
        "crossFade"
    }

    fn blend(
        &self,
        from: &Frame,
        to: &Frame,
        progress: f64,
        _config: &serde_json::Value,
    ) -> CoreResult<Frame> {
        let (w, h) = (from.width, from.height);
        let mut out = Frame::solid(w, h, from.timestamp, [0, 0, 0, 255]);
        for y in 0..h {
            for x in 0..w {
                let a = sample(from, x, y, w, h);
                let b = sample(to, x, y, w, h);
                let base = ((y * w + x) * 4) as usize;
                for k in 0..4 {
                    out.data[base + k] =
                        (a[k] as f64 * (1.0 - progress) + b[k] as f64 * progress).round() as u8;
                }
            }
        }
        Ok(out)
    }
}

/// Fade through black: out to black for the first half, in from black for the
/// second.
struct FadeBlack;

impl TransitionEffect for FadeBlack {
    fn name(&self) -> &'static str {
        "fadeBlack"
    }

    fn blend(
        &self,
        from: &Frame,
        to: &Frame,
        progress: f64,
        _config: &serde_json::Value,
    ) -> CoreResult<Frame> {
        let (source, factor) = if progress < 0.5 {
            (from, 1.0 - progress * 2.0)
        } else {
            (to, (progress - 0.5) * 2.0)
        };
        let (w, h) = (from.width, from.height);
        let mut out = Frame::solid(w, h, from.timestamp, [0, 0, 0, 255]);
        for y in 0..h {
            for x in 0..w {
                let px = sample(source, x, y, w, h);
                let base = ((y * w + x) * 4) as usize;
                for k in 0..3 {
                    out.data[base + k] = (px[k] as f64 * factor).round() as u8;
                }
                out.data[base + 3] = px[3];
            }
        }
        Ok(out)
    }
}

/// Returns the builtin transition effects.
pub fn builtin_transitions() -> Vec<Arc<dyn TransitionEffect>> {
    vec![Arc::new(CrossFade), Arc::new(FadeBlack)]
}

// =============================================================================
// Freeze Frames
// =============================================================================

/// Decodes the first frame of a fragment, for the left side's blend target.
pub async fn first_frame(engine: &dyn RenderEngine, clip: ClipHandle) -> CoreResult<Frame> {
    let tick = engine.tick(clip, 0).await?;
    tick.video
        .ok_or_else(|| CoreError::DecodeFailed("no first frame in transition fragment".into()))
}

/// Decodes the last decodable frame of a fragment, scanning backwards from
/// the end until a frame materializes.
pub async fn last_decodable_frame(
    engine: &dyn RenderEngine,
    clip: ClipHandle,
) -> CoreResult<Frame> {
    let duration = engine.clip_meta(clip)?.duration;

    let tick = engine.tick(clip, duration - TAIL_PROBE_US).await?;
    if let Some(frame) = tick.video {
        return Ok(frame);
    }

    let mut probe = duration - TAIL_SCAN_START_US;
    while probe > 0 {
        let tick = engine.tick(clip, probe).await?;
        if let Some(frame) = tick.video {
            return Ok(frame);
        }
        probe -= TAIL_SCAN_STEP_US;
    }

    Err(CoreError::DecodeFailed(
        "no decodable tail frame in transition fragment".into(),
    ))
}

// =============================================================================
// Fragment Interceptors
// =============================================================================

/// Interceptor for the left (outgoing) fragment: blends its own advancing
/// frame with the cached first frame of the right fragment.
/// Progress runs `time / duration` over the full transition.
pub fn left_fragment_interceptor(
    registry: Arc<TransitionRegistry>,
    effect: String,
    config: serde_json::Value,
    right_first: Arc<Frame>,
    duration: TimeUs,
) -> FrameInterceptor {
    Arc::new(move |time, tick: TickResult| {
        let Some(frame) = tick.video else {
            return Ok(TickResult::default());
        };
        let progress = time as f64 / duration as f64;
        let video = match registry.blend(&effect, &frame, &right_first, progress, &config) {
            Ok(blended) => Some(blended),
            Err(e) => {
                warn!(effect = %effect, error = %e, "transition blend failed, passing frame through");
                Some(frame.duplicate())
            }
        };
        Ok(TickResult {
            video,
            audio: Vec::new(),
        })
    })
}

/// Interceptor for the right (incoming) fragment: blends the cached last
/// frame of the left fragment with its own advancing frame.
/// Progress runs `(half + time) / duration`.
pub fn right_fragment_interceptor(
    registry: Arc<TransitionRegistry>,
    effect: String,
    config: serde_json::Value,
    left_last: Arc<Frame>,
    duration: TimeUs,
) -> FrameInterceptor {
    let half = duration / 2;
    Arc::new(move |time, tick: TickResult| {
        let Some(frame) = tick.video else {
            return Ok(TickResult::default());
        };
        let progress = (half + time) as f64 / duration as f64;
        let video = match registry.blend(&effect, &left_last, &frame, progress, &config) {
            Ok(blended) => Some(blended),
            Err(e) => {
                warn!(effect = %effect, error = %e, "transition blend failed, passing frame through");
                Some(frame.duplicate())
            }
        };
        Ok(TickResult {
            video,
            audio: Vec::new(),
        })
    })
}

// =============================================================================
// Tests
// =============================================================================
