//! Snapshot Shapes
//!
//! The serializable capture of the full timeline state at one edit point.
//! Snapshots hold rails wholesale and sources by key: clip metadata only,
//! never live handles.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::render::{ClipMeta, ClipOrigin};
use crate::core::timeline::{Rail, SourceMeta};
use crate::core::{HistoryId, MediaKind, RailId, SegmentId, SourceKey};

/// Serializable form of a source: everything except the live handles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSnapshot {
    pub key: SourceKey,
    pub kind: MediaKind,
    pub origin: ClipOrigin,
    pub rail_id: RailId,
    pub segment_id: SegmentId,
    pub meta: SourceMeta,
    /// Decoded-media metadata at capture time
    pub clip: ClipMeta,
}

/// Immutable capture of the full timeline state at one edit point.
///
/// Transition fragment sources are not captured; they are derived state and
/// are rebuilt from rail transition data during reconciliation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub rails: Vec<Rail>,
    pub sources: HashMap<SourceKey, SourceSnapshot>,
}

/// The small per-project record kept in the key-value store
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedProjectState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_at: Option<HistoryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
}

/// Partial update of [`PersistedProjectState`]; unset fields keep their
/// stored values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_at: Option<HistoryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
}

impl PersistedProjectState {
    /// Applies a patch in place.
    pub fn apply(&mut self, patch: &ProjectStatePatch) {
        if let Some(history_at) = &patch.history_at {
            self.history_at = Some(history_at.clone());
        }
        if let Some(aspect_ratio) = &patch.aspect_ratio {
            self.aspect_ratio = Some(aspect_ratio.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_keeps_unset_fields() {
        let mut state = PersistedProjectState {
            history_at: Some("h1".into()),
            aspect_ratio: Some("16:9".into()),
        };
        state.apply(&ProjectStatePatch {
            history_at: Some("h2".into()),
            aspect_ratio: None,
        });
        assert_eq!(state.history_at.as_deref(), Some("h2"));
        assert_eq!(state.aspect_ratio.as_deref(), Some("16:9"));
    }

    #[test]
    fn test_snapshot_serialization_roundtrip() {
        let snapshot = ProjectSnapshot::default();
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: ProjectSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, parsed);
    }
}
