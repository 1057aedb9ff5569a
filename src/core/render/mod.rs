//! Render Engine Collaborator
//!
//! The compositing/decoding engine is an external collaborator. This module
//! defines the contract the editing core programs against: opaque clip and
//! sprite handles, per-frame tick results, and the frame-interceptor hook the
//! pipeline attaches to each clip.
//!
//! Handles are plain arena ids. All cross-references between sources, clips
//! and sprites are id lookups, never direct pointers, so destroy-by-id is the
//! single release path.

mod memory;

pub use memory::MemoryRenderEngine;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::animation::{AnimationTiming, KeyframeSet};
use crate::core::{CoreResult, MediaKind, Rect, TimeUs};

// =============================================================================
// Handles
// =============================================================================

/// Opaque handle to decodable media content owned by the render engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClipHandle(pub u64);

/// Opaque handle to an on-canvas sprite owned by the render engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpriteHandle(pub u64);

// =============================================================================
// Frames
// =============================================================================

/// A decoded RGBA8 video frame.
///
/// Frames are owned values: whoever holds one is responsible for it, and a
/// pipeline stage must never hand out a frame it does not own. Duplication is
/// explicit via [`Frame::duplicate`].
#[derive(Debug, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp, clip-local
    pub timestamp: TimeUs,
    pub duration: Option<TimeUs>,
    /// RGBA8 pixel data, `width * height * 4` bytes
    pub data: Vec<u8>,
}

impl Frame {
    /// Creates a frame filled with a single RGBA color.
    pub fn solid(width: u32, height: u32, timestamp: TimeUs, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..(width * height) {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            timestamp,
            duration: None,
            data,
        }
    }

    /// Produces a fresh, independently owned copy of this frame.
    pub fn duplicate(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            timestamp: self.timestamp,
            duration: self.duration,
            data: self.data.clone(),
        }
    }
}

/// Planar audio samples, one `Vec<f32>` per channel
pub type AudioSamples = Vec<Vec<f32>>;

/// Result of decoding one tick of a clip
#[derive(Debug, Default)]
pub struct TickResult {
    pub video: Option<Frame>,
    pub audio: AudioSamples,
}

/// Per-displayed-frame transform attached to a clip.
///
/// Invoked by the render engine once per displayed frame for that clip. Takes
/// ownership of the raw tick result and returns a transformed one; anything
/// not returned is released here.
pub type FrameInterceptor = Arc<dyn Fn(TimeUs, TickResult) -> CoreResult<TickResult> + Send + Sync>;

// =============================================================================
// Clip Descriptors
// =============================================================================

/// Where a clip's content comes from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClipOrigin {
    /// Content-addressed file in the blob store
    File { file_id: String },
    /// Remote resource fetched by the engine
    Url { url: String },
    /// Text rendered to a bitmap by the engine
    Text { content: String },
}

/// Style for text sources; changing any field requires regenerating the
/// backing bitmap clip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    pub font_family: String,
    pub font_size: f64,
    pub color: String,
    pub align: TextAlign,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: "Rubik, sans-serif".to_string(),
            font_size: 48.0,
            color: "rgba(255,255,255,1)".to_string(),
            align: TextAlign::Center,
            background: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

/// Decoded-media metadata reported by the engine
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipMeta {
    /// Total decodable duration; 0 for still content (image/text)
    pub duration: TimeUs,
    pub width: u32,
    pub height: u32,
}

// =============================================================================
// Sprite State
// =============================================================================

/// Mirror flip applied by the renderer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Flip {
    Horizontal,
    Vertical,
}

/// Sprite timing on the output timeline
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpriteTime {
    pub offset: TimeUs,
    pub duration: TimeUs,
    pub playback_rate: f64,
}

impl Default for SpriteTime {
    fn default() -> Self {
        Self {
            offset: 0,
            duration: 0,
            playback_rate: 1.0,
        }
    }
}

/// Full renderable state of a sprite
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpriteState {
    pub rect: Rect,
    pub time: SpriteTime,
    pub z_index: i64,
    pub opacity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flip: Option<Flip>,
    pub visible: bool,
    pub interactable: bool,
}

impl Default for SpriteState {
    fn default() -> Self {
        Self {
            rect: Rect::default(),
            time: SpriteTime::default(),
            z_index: 0,
            opacity: 1.0,
            flip: None,
            visible: true,
            interactable: true,
        }
    }
}

// =============================================================================
// Render Engine Contract
// =============================================================================

/// The external rendering/compositing collaborator.
///
/// The editing core never holds decoded media; it owns handles and drives
/// them through this trait. Every handle issued here must eventually be
/// destroyed through it as well.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Decodes media into a new clip.
    async fn create_clip(&self, origin: &ClipOrigin, kind: MediaKind) -> CoreResult<ClipHandle>;

    /// Renders text to a bitmap-backed clip.
    async fn create_text_clip(&self, content: &str, style: &TextStyle) -> CoreResult<ClipHandle>;

    /// Splits a clip at a clip-local time, returning (left, right).
    ///
    /// The original clip is left untouched; the caller decides which parts to
    /// keep and must destroy the rest.
    async fn split_clip(&self, clip: ClipHandle, at: TimeUs)
        -> CoreResult<(ClipHandle, ClipHandle)>;

    /// Returns decoded-media metadata for a clip.
    fn clip_meta(&self, clip: ClipHandle) -> CoreResult<ClipMeta>;

    /// Decodes one raw tick at a clip-local time. Interceptors are not applied.
    async fn tick(&self, clip: ClipHandle, time: TimeUs) -> CoreResult<TickResult>;

    /// Installs or clears the frame interceptor for a clip.
    fn set_interceptor(
        &self,
        clip: ClipHandle,
        interceptor: Option<FrameInterceptor>,
    ) -> CoreResult<()>;

    /// Releases a clip and its decoder resources. Idempotent.
    fn destroy_clip(&self, clip: ClipHandle);

    /// Adds a sprite for a clip to the canvas.
    fn add_sprite(&self, clip: ClipHandle, state: SpriteState) -> CoreResult<SpriteHandle>;

    /// Replaces a sprite's renderable state.
    fn update_sprite(&self, sprite: SpriteHandle, state: &SpriteState) -> CoreResult<()>;

    /// Reads back a sprite's current state.
    fn sprite_state(&self, sprite: SpriteHandle) -> CoreResult<SpriteState>;

    /// Installs a keyframe animation on a sprite.
    fn set_sprite_animation(
        &self,
        sprite: SpriteHandle,
        keyframes: &KeyframeSet,
        timing: &AnimationTiming,
    ) -> CoreResult<()>;

    /// Removes any keyframe animation from a sprite.
    fn clear_sprite_animation(&self, sprite: SpriteHandle) -> CoreResult<()>;

    /// Removes a sprite from the canvas. Idempotent.
    fn remove_sprite(&self, sprite: SpriteHandle);

    /// Asks the engine to redraw the frame at the given time.
    fn preview_frame(&self, time: TimeUs);

    /// Starts playback at the given time.
    fn play(&self, start: TimeUs);

    /// Pauses playback.
    fn pause(&self);

    /// Composites the full timeline into an encoded container stream.
    async fn export(&self) -> CoreResult<Vec<u8>>;
}
