//! Source Definitions
//!
//! A source is one timeline-placed media or text instance: metadata plus the
//! clip/sprite handles lifetime-bound to it. Metadata `rect`/`opacity` hold
//! the base (animation-free) state; the live sprite may diverge while an
//! animation plays and must always be restorable from here.

use serde::{Deserialize, Serialize};

use crate::core::animation::{AnimationRequest, AnimationSpec, BaseState};
use crate::core::pipeline::FilterSpec;
use crate::core::render::{
    ClipHandle, ClipOrigin, Flip, SpriteHandle, SpriteState, SpriteTime, TextStyle,
};
use crate::core::{
    FitMode, MediaKind, RailId, Rect, SegmentId, SourceKey, TimeUs, TransitionId,
};

// =============================================================================
// Per-Kind Options
// =============================================================================

fn unity_volume() -> f64 {
    1.0
}

/// Options carried only by the media kinds they apply to
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum KindOptions {
    Video {
        /// Media-internal start offset; playback begins here
        #[serde(default)]
        offset: TimeUs,
        #[serde(default = "unity_volume")]
        volume: f64,
    },
    Audio {
        #[serde(default)]
        offset: TimeUs,
        #[serde(default = "unity_volume")]
        volume: f64,
        #[serde(default)]
        looped: bool,
    },
    Image,
    Text {
        style: TextStyle,
    },
}

impl KindOptions {
    pub fn default_for(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Video => KindOptions::Video {
                offset: 0,
                volume: 1.0,
            },
            MediaKind::Audio => KindOptions::Audio {
                offset: 0,
                volume: 1.0,
                looped: false,
            },
            MediaKind::Image => KindOptions::Image,
            MediaKind::Text => KindOptions::Text {
                style: TextStyle::default(),
            },
        }
    }

    /// Media-internal offset, 0 for still kinds.
    pub fn offset(&self) -> TimeUs {
        match self {
            KindOptions::Video { offset, .. } | KindOptions::Audio { offset, .. } => *offset,
            _ => 0,
        }
    }

    /// Shifts the media-internal offset, used when splitting.
    pub fn with_offset(mut self, new_offset: TimeUs) -> Self {
        match &mut self {
            KindOptions::Video { offset, .. } | KindOptions::Audio { offset, .. } => {
                *offset = new_offset;
            }
            _ => {}
        }
        self
    }

    /// Playback volume, unity for kinds without audio.
    pub fn volume(&self) -> f64 {
        match self {
            KindOptions::Video { volume, .. } | KindOptions::Audio { volume, .. } => *volume,
            _ => 1.0,
        }
    }

    pub fn text_style(&self) -> Option<&TextStyle> {
        match self {
            KindOptions::Text { style } => Some(style),
            _ => None,
        }
    }
}

// =============================================================================
// Source Metadata
// =============================================================================

/// Serializable metadata of a source.
///
/// `rect` and `opacity` are the animation-free base state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMeta {
    pub rect: Rect,
    pub z_index: i64,
    pub opacity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flip: Option<Flip>,
    pub visible: bool,
    pub interactable: bool,
    pub time: SpriteTime,
    pub options: KindOptions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation: Option<AnimationSpec>,
}

impl SourceMeta {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            rect: Rect::default(),
            z_index: 0,
            opacity: 1.0,
            flip: None,
            visible: true,
            interactable: true,
            time: SpriteTime::default(),
            options: KindOptions::default_for(kind),
            filters: vec![],
            animation: None,
        }
    }

    /// The full renderable state this metadata describes.
    pub fn sprite_state(&self) -> SpriteState {
        SpriteState {
            rect: self.rect,
            time: self.time,
            z_index: self.z_index,
            opacity: self.opacity,
            flip: self.flip,
            visible: self.visible,
            interactable: self.interactable,
        }
    }

    /// The rest state animations are resolved from.
    pub fn base_state(&self) -> BaseState {
        BaseState {
            rect: self.rect,
            opacity: self.opacity,
        }
    }
}

// =============================================================================
// Source
// =============================================================================

/// What a source renders for: an ordinary segment or a transition fragment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceAttachment {
    Segment { segment_id: SegmentId },
    Transition { transition_id: TransitionId },
}

/// A timeline-managed media/text instance with live engine handles
#[derive(Debug)]
pub struct Source {
    pub key: SourceKey,
    pub kind: MediaKind,
    pub clip: ClipHandle,
    pub sprite: SpriteHandle,
    pub origin: ClipOrigin,
    pub rail_id: RailId,
    pub attachment: SourceAttachment,
    pub meta: SourceMeta,
}

impl Source {
    pub fn segment_id(&self) -> Option<&str> {
        match &self.attachment {
            SourceAttachment::Segment { segment_id } => Some(segment_id),
            SourceAttachment::Transition { .. } => None,
        }
    }

    pub fn transition_id(&self) -> Option<&str> {
        match &self.attachment {
            SourceAttachment::Transition { transition_id } => Some(transition_id),
            SourceAttachment::Segment { .. } => None,
        }
    }

    pub fn text_content(&self) -> Option<&str> {
        match &self.origin {
            ClipOrigin::Text { content } => Some(content),
            _ => None,
        }
    }
}

// =============================================================================
// Placement Options
// =============================================================================

/// Options for [`Timeline::place`](super::Timeline::place). Unset fields fall
/// back to kind defaults, the cursor position, and decoded media metadata.
#[derive(Clone, Debug, Default)]
pub struct PlaceOptions {
    /// Reuse a specific source key (history reconciliation)
    pub key: Option<SourceKey>,
    pub rect: Option<Rect>,
    pub auto_fit: Option<FitMode>,
    /// Timeline start; defaults to the cursor
    pub start: Option<TimeUs>,
    /// Timeline duration; defaults to media duration, or 2s for still kinds
    pub duration: Option<TimeUs>,
    pub playback_rate: Option<f64>,
    pub opacity: Option<f64>,
    pub flip: Option<Flip>,
    pub visible: Option<bool>,
    pub interactable: Option<bool>,
    pub options: Option<KindOptions>,
    pub filters: Vec<FilterSpec>,
    pub animation: Option<AnimationRequest>,
    /// Place on this rail when it exists
    pub with_rail_id: Option<RailId>,
    /// Use this id for the created segment (history reconciliation)
    pub with_segment_id: Option<SegmentId>,
}

// =============================================================================
// Tests
// =============================================================================
