//! Timeline Model
//!
//! Owns rails, segments, transitions and the source arena. All placement
//! invariants live here: segments on one rail never overlap in time, sprite
//! timing mirrors segment windows, transitions cover exactly two segments,
//! and every handle issued by the render engine is released on exactly one
//! path.

mod editor;
mod models;
mod source;

pub use editor::{Registries, SplitKeep, Timeline, TransitionRequest};
pub use models::{Rail, Segment, Transition, Z_RAIL_STRIDE, Z_TRANSITION_STRIDE};
pub use source::{KindOptions, PlaceOptions, Source, SourceAttachment, SourceMeta};
