//! Keyframe Resolution
//!
//! Resolves a preset template against a source's base geometry into absolute
//! keyframes plus playback timing. Pure computation; the caller pushes the
//! result to the render engine.

use serde::{Deserialize, Serialize};

use super::{AnimationKind, AnimationPreset, AnimationTiming, KeyframeSet, SpritePose};
use crate::core::{auto_fit_rect, CoreError, CoreResult, Rect, Size2D, TimeUs};

// =============================================================================
// Inputs / Outputs
// =============================================================================

/// The animation-free rest state an animation is computed from.
///
/// Must always come from stored metadata, never from the live (possibly
/// mid-animation) sprite, so recomputation cannot drift.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BaseState {
    pub rect: Rect,
    pub opacity: f64,
}

/// Caller-supplied animation parameters; unset fields fall back to the preset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationRequest {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<TimeUs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<TimeUs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iter_count: Option<u32>,
}

impl AnimationRequest {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }
}

/// A fully resolved animation, as stored on source metadata
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationSpec {
    pub key: String,
    pub kind: AnimationKind,
    pub duration: TimeUs,
    pub delay: TimeUs,
    pub iter_count: u32,
}

impl AnimationSpec {
    /// Reconstructs the request that produced this spec, for recomputation
    /// after geometry or duration edits.
    pub fn as_request(&self) -> AnimationRequest {
        AnimationRequest {
            key: self.key.clone(),
            duration: Some(self.duration),
            delay: None,
            iter_count: Some(self.iter_count),
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolves `preset` against `base` into timing plus absolute keyframes.
///
/// `max_duration` is the owning segment's length: cycle duration is clamped
/// to it, motion animations repeat to fill it, and exit animations are
/// delayed so the cycle ends exactly at the segment's end.
pub fn resolve(
    preset: &AnimationPreset,
    request: &AnimationRequest,
    base: &BaseState,
    canvas: Size2D,
    max_duration: TimeUs,
) -> CoreResult<(AnimationSpec, KeyframeSet)> {
    let duration = request
        .duration
        .unwrap_or(preset.default_duration)
        .min(max_duration);
    if duration <= 0 {
        return Err(CoreError::InvalidTimeRange(0, duration));
    }

    let mut keyframes = KeyframeSet::new();
    for (pos, rel) in &preset.template {
        keyframes.insert(*pos, resolve_pose(rel, base, canvas));
    }

    let iter_count = match preset.kind {
        AnimationKind::Enter | AnimationKind::Exit => 1,
        AnimationKind::Motion => request
            .iter_count
            .or(preset.default_iter_count)
            .unwrap_or_else(|| ((max_duration + duration - 1) / duration) as u32),
    };

    let delay = match preset.kind {
        AnimationKind::Exit => max_duration - duration,
        _ => request.delay.unwrap_or(0),
    };

    let spec = AnimationSpec {
        key: preset.key.clone(),
        kind: preset.kind,
        duration,
        delay,
        iter_count,
    };

    Ok((spec, keyframes))
}

/// Resolves one relative template entry into an absolute pose.
fn resolve_pose(rel: &super::RelTransform, base: &BaseState, canvas: Size2D) -> SpritePose {
    let Rect { x, y, w, h, angle } = base.rect;
    let mut pose = SpritePose {
        x,
        y,
        w,
        h,
        angle,
        opacity: base.opacity,
    };

    if let Some(off) = rel.offset_x.filter(|v| *v != 0.0) {
        if off.is_finite() {
            pose.x = x + off;
        } else if off > 0.0 {
            // Fully hidden past the right edge
            pose.x = canvas.width as f64;
        } else {
            // Fully hidden past the left edge
            pose.x = -w;
        }
    }

    if let Some(off) = rel.offset_y.filter(|v| *v != 0.0) {
        if off.is_finite() {
            pose.y = y + off;
        } else if off > 0.0 {
            pose.y = canvas.height as f64;
        } else {
            pose.y = -h;
        }
    }

    if let Some(scale) = rel.scale.filter(|s| *s >= 0.0) {
        pose.w = w * scale;
        pose.h = h * scale;
        // Scaling recenters the sprite on the canvas
        let centered = auto_fit_rect(
            canvas,
            Size2D::new(pose.w.round() as u32, pose.h.round() as u32),
            None,
        );
        pose.x = centered.x;
        pose.y = centered.y;
    }

    if let Some(deg) = rel.rotate.filter(|d| *d != 0.0) {
        pose.angle = deg.to_radians();
    }

    if let Some(op) = rel.opacity.filter(|o| (0.0..1.0).contains(o)) {
        pose.opacity = op;
    }

    pose
}

// =============================================================================
// Tests
// =============================================================================
