//! Railcut Core Engine
//!
//! Core editing engine module.
//! Handles the timeline model, undo/redo history, frame pipeline, animation
//! engine, and the serializable project state.

pub mod animation;
pub mod history;
pub mod pipeline;
pub mod project;
pub mod render;
pub mod timeline;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;

mod events;
pub use events::*;
