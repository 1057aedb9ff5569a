//! Timeline Model Definitions
//!
//! Defines Rail, Segment and Transition. Rails store segments directly
//! (denormalized) so snapshots serialize wholesale.

use serde::{Deserialize, Serialize};

use crate::core::{
    new_id, windows_overlap, MediaKind, RailId, SegmentId, SourceKey, TimeUs, TransitionId,
};

/// Z-order stride between rails
pub const Z_RAIL_STRIDE: i64 = 1_000_000;

/// Z-order stride between transitions within a rail; keeps transition
/// fragments layered between ordinary segments of the same rail
pub const Z_TRANSITION_STRIDE: i64 = 1000;

// =============================================================================
// Segment
// =============================================================================

/// A timed placement of one source on a rail
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: SegmentId,
    pub start: TimeUs,
    pub end: TimeUs,
    /// Key into the source arena
    pub source_key: SourceKey,
}

impl Segment {
    pub fn new(start: TimeUs, end: TimeUs, source_key: &str) -> Self {
        Self {
            id: new_id(),
            start,
            end,
            source_key: source_key.to_string(),
        }
    }

    pub fn duration(&self) -> TimeUs {
        self.end - self.start
    }

    /// Half-open window overlap; touching segments do not overlap.
    pub fn overlaps(&self, other: &Segment) -> bool {
        windows_overlap(self.start, self.end, other.start, other.end)
    }
}

// =============================================================================
// Transition
// =============================================================================

/// A timed cross-fade region spanning exactly two adjacent segments
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub id: TransitionId,
    pub start: TimeUs,
    pub end: TimeUs,
    /// Transition effect name in the transition registry
    pub effect: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
    /// The two synthetic fragment sources rendering the cross-fade
    #[serde(default)]
    pub source_keys: Vec<SourceKey>,
}

impl Transition {
    pub fn new(start: TimeUs, end: TimeUs, effect: &str, config: serde_json::Value) -> Self {
        Self {
            id: new_id(),
            start,
            end,
            effect: effect.to_string(),
            config,
            source_keys: vec![],
        }
    }

    pub fn duration(&self) -> TimeUs {
        self.end - self.start
    }

    /// True when this transition straddles a boundary of `segment`.
    pub fn covers(&self, segment: &Segment) -> bool {
        (self.start < segment.start && self.end > segment.start)
            || (self.start < segment.end && self.end > segment.end)
    }
}

// =============================================================================
// Rail
// =============================================================================

/// An ordered, non-overlapping sequence of segments of one media kind
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rail {
    pub id: RailId,
    pub kind: MediaKind,
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub locked: bool,
    /// The main rail anchors total-duration computation for video
    #[serde(default)]
    pub main: bool,
}

impl Rail {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            id: new_id(),
            kind,
            segments: vec![],
            transitions: vec![],
            muted: false,
            hidden: false,
            locked: false,
            main: false,
        }
    }

    pub fn with_id(id: &str, kind: MediaKind) -> Self {
        Self {
            id: id.to_string(),
            ..Self::new(kind)
        }
    }

    pub fn segment(&self, segment_id: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == segment_id)
    }

    pub fn segment_mut(&mut self, segment_id: &str) -> Option<&mut Segment> {
        self.segments.iter_mut().find(|s| s.id == segment_id)
    }

    pub fn transition(&self, transition_id: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.id == transition_id)
    }

    /// Returns the first existing segment overlapping `[start, end)`.
    pub fn find_overlap(&self, start: TimeUs, end: TimeUs) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|seg| windows_overlap(start, end, seg.start, seg.end))
    }

    /// Inserts a segment keeping segments ordered by start time.
    pub fn insert_segment(&mut self, segment: Segment) {
        self.segments.push(segment);
        self.segments
            .sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
    }

    pub fn remove_segment(&mut self, segment_id: &str) -> Option<Segment> {
        let pos = self.segments.iter().position(|s| s.id == segment_id)?;
        Some(self.segments.remove(pos))
    }

    /// Segments whose boundary the transition straddles.
    pub fn covered_segments(&self, transition: &Transition) -> Vec<&Segment> {
        self.segments
            .iter()
            .filter(|seg| transition.covers(seg))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
