//! Railcut Error Definitions
//!
//! Defines error types used throughout the project.

use thiserror::Error;

use super::{RailId, SegmentId, SourceKey, TimeUs, TransitionId};

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Timeline Errors
    // =========================================================================
    #[error("Source not found: {0}")]
    SourceNotFound(SourceKey),

    #[error("Rail not found: {0}")]
    RailNotFound(RailId),

    #[error("Segment not found: {0}")]
    SegmentNotFound(SegmentId),

    #[error("Transition not found: {0}")]
    TransitionNotFound(TransitionId),

    #[error("Invalid split point: {0} microseconds")]
    InvalidSplitPoint(TimeUs),

    #[error("Invalid time range: {0}~{1} microseconds")]
    InvalidTimeRange(TimeUs, TimeUs),

    // =========================================================================
    // Render Collaborator Errors
    // =========================================================================
    #[error("Clip handle not found: {0}")]
    ClipNotFound(u64),

    #[error("Sprite handle not found: {0}")]
    SpriteNotFound(u64),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    // =========================================================================
    // Pipeline Errors
    // =========================================================================
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    #[error("Unknown transition effect: {0}")]
    UnknownEffect(String),

    #[error("Unknown animation preset: {0}")]
    UnknownAnimation(String),

    #[error("Invalid effect parameters: {0}")]
    InvalidEffectParams(String),

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    #[error("Persistence failure: {0}")]
    Persistence(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;
