//! Project State
//!
//! Serializable aggregate of the timeline (snapshots recorded by the history
//! machine) and the per-project editing session that wires the timeline and
//! history together.

mod session;
mod snapshot;

pub use session::ProjectSession;
pub use snapshot::{PersistedProjectState, ProjectSnapshot, ProjectStatePatch, SourceSnapshot};
