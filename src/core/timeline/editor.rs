//! Timeline Editing Operations
//!
//! The [`Timeline`] owns the rail list and the source arena for one project,
//! and drives every edit: placement, removal, split, resize, transitions,
//! animation, filters and snapshot reconciliation. External handles are only
//! touched through the injected [`RenderEngine`]; registries for filters,
//! transitions and animation presets are injected as well.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::core::animation::{resolve, AnimationRegistry, AnimationRequest, AnimationSpec, AnimationTiming};
use crate::core::pipeline::{
    build_interceptor, first_frame, force_refresh, last_decodable_frame,
    left_fragment_interceptor, right_fragment_interceptor, FilterRegistry, FilterSpec,
    PipelineConfig, TransitionRegistry,
};
use crate::core::project::{ProjectSnapshot, SourceSnapshot};
use crate::core::render::{
    ClipHandle, ClipMeta, ClipOrigin, RenderEngine, SpriteState, SpriteTime, TextStyle,
};
use crate::core::{
    auto_fit_rect, new_id, CoreError, CoreResult, EditorEvent, EventBus, MediaKind, ProjectId,
    RailId, Rect, SegmentId, Size2D, SourceKey, TimeUs, TransitionId, US_PER_SEC,
};

use super::models::{Rail, Segment, Transition, Z_RAIL_STRIDE, Z_TRANSITION_STRIDE};
use super::source::{KindOptions, PlaceOptions, Source, SourceAttachment, SourceMeta};

/// Timeline duration given to image and text placements with no explicit one
const DEFAULT_STILL_DURATION: TimeUs = 2 * US_PER_SEC;

/// Audio sprites are parked far off-canvas
const AUDIO_OFFSCREEN_Y: f64 = -1_000_000_000.0;

// =============================================================================
// Dependency Injection
// =============================================================================

/// The effect registries a timeline operates with, constructed once at
/// startup and shared by reference.
#[derive(Clone)]
pub struct Registries {
    pub filters: Arc<FilterRegistry>,
    pub transitions: Arc<TransitionRegistry>,
    pub animations: Arc<AnimationRegistry>,
}

impl Default for Registries {
    fn default() -> Self {
        Self {
            filters: Arc::new(FilterRegistry::with_builtins()),
            transitions: Arc::new(TransitionRegistry::with_builtins()),
            animations: Arc::new(AnimationRegistry::with_builtins()),
        }
    }
}

/// Which side(s) of a split survive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitKeep {
    Left,
    Right,
    Both,
}

/// Parameters for applying a transition across two adjacent segments
#[derive(Clone, Debug)]
pub struct TransitionRequest {
    pub start: TimeUs,
    pub end: TimeUs,
    pub effect: String,
    pub config: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq)]
struct Selection {
    segment_id: SegmentId,
    rail_id: RailId,
}

// =============================================================================
// Timeline
// =============================================================================

/// The timeline model of one project
pub struct Timeline {
    project_id: ProjectId,
    canvas: Size2D,
    cursor_time: TimeUs,
    rails: Vec<Rail>,
    sources: HashMap<SourceKey, Source>,
    selected: Vec<Selection>,
    current: Option<SegmentId>,
    engine: Arc<dyn RenderEngine>,
    registries: Registries,
    events: EventBus,
}

impl Timeline {
    pub fn new(
        project_id: &str,
        canvas: Size2D,
        engine: Arc<dyn RenderEngine>,
        registries: Registries,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            canvas,
            cursor_time: 0,
            rails: vec![],
            sources: HashMap::new(),
            selected: vec![],
            current: None,
            engine,
            registries,
            events: EventBus::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn canvas(&self) -> Size2D {
        self.canvas
    }

    pub fn cursor_time(&self) -> TimeUs {
        self.cursor_time
    }

    pub fn rails(&self) -> &[Rail] {
        &self.rails
    }

    /// Loud source lookup.
    pub fn source(&self, key: &str) -> CoreResult<&Source> {
        self.sources
            .get(key)
            .ok_or_else(|| CoreError::SourceNotFound(key.to_string()))
    }

    pub fn get_source(&self, key: &str) -> Option<&Source> {
        self.sources.get(key)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EditorEvent> {
        self.events.subscribe()
    }

    /// Total timeline length: the furthest sprite end over all sources.
    pub fn total_duration(&self) -> TimeUs {
        self.sources
            .values()
            .map(|s| s.meta.time.offset + s.meta.time.duration)
            .max()
            .unwrap_or(0)
    }

    /// Moves the cursor and previews the frame there.
    pub fn seek(&mut self, time: TimeUs) {
        self.cursor_time = time;
        self.engine.preview_frame(time);
    }

    /// Starts playback from the cursor. Past-the-end cursors cannot play.
    pub fn play(&self) {
        if self.cursor_time > self.total_duration() {
            return;
        }
        self.engine.play(self.cursor_time);
    }

    pub fn pause(&self) {
        self.engine.pause();
    }

    /// Switches the canvas to an aspect-ratio preset.
    pub fn set_aspect_ratio(&mut self, label: &str) -> CoreResult<Size2D> {
        let size = crate::core::aspect_ratio_size(label)
            .ok_or_else(|| CoreError::NotFound(format!("aspect ratio {}", label)))?;
        self.canvas = size;
        Ok(size)
    }

    // =========================================================================
    // Selection
    // =========================================================================

    pub fn select_segment(&mut self, segment_id: &str, rail_id: &str) {
        if !self
            .selected
            .iter()
            .any(|s| s.segment_id == segment_id && s.rail_id == rail_id)
        {
            self.selected.push(Selection {
                segment_id: segment_id.to_string(),
                rail_id: rail_id.to_string(),
            });
        }
        self.current = Some(segment_id.to_string());
    }

    pub fn unselect_segment(&mut self, segment_id: &str, rail_id: &str) {
        self.selected
            .retain(|s| !(s.segment_id == segment_id && s.rail_id == rail_id));
        if self.current.as_deref() == Some(segment_id) {
            self.current = None;
        }
    }

    pub fn toggle_segment(&mut self, segment_id: &str, rail_id: &str) {
        let index = self
            .selected
            .iter()
            .position(|s| s.segment_id == segment_id && s.rail_id == rail_id);
        let Some(index) = index else {
            self.select_segment(segment_id, rail_id);
            return;
        };
        if self.current.is_some() && self.current.as_deref() != Some(segment_id) {
            self.current = Some(segment_id.to_string());
            return;
        }
        self.selected.remove(index);
        if self.current.as_deref() == Some(segment_id) {
            self.current = None;
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
        self.current = None;
    }

    pub fn selected_segments(&self) -> Vec<(SegmentId, RailId)> {
        self.selected
            .iter()
            .map(|s| (s.segment_id.clone(), s.rail_id.clone()))
            .collect()
    }

    pub fn current_segment_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Creates a source plus its segment and returns the source key.
    ///
    /// Rail selection: the explicit rail when it exists and has room, else
    /// the newest rail of the kind, else a fresh rail (video rails become
    /// main). A time overlap always forces a fresh rail; rails never hold
    /// overlapping segments.
    pub async fn place(
        &mut self,
        kind: MediaKind,
        origin: ClipOrigin,
        opts: PlaceOptions,
    ) -> CoreResult<SourceKey> {
        let key = opts.key.clone().unwrap_or_else(new_id);
        if self.sources.contains_key(&key) {
            return Err(CoreError::ValidationError(format!(
                "source key already in use: {}",
                key
            )));
        }

        let options = opts
            .options
            .clone()
            .unwrap_or_else(|| KindOptions::default_for(kind));

        let clip = self.create_clip_for(kind, &origin, &options).await?;
        let clip_meta = match self.engine.clip_meta(clip) {
            Ok(meta) => meta,
            Err(e) => {
                self.engine.destroy_clip(clip);
                return Err(e);
            }
        };

        // Geometry
        let natural = Size2D::new(clip_meta.width.max(1), clip_meta.height.max(1));
        let mut rect = match (opts.rect, opts.auto_fit) {
            (Some(rect), _) => rect,
            (None, Some(fit)) if matches!(kind, MediaKind::Video | MediaKind::Image) => {
                auto_fit_rect(self.canvas, natural, Some(fit))
            }
            (None, _) if kind == MediaKind::Text => auto_fit_rect(self.canvas, natural, None),
            (None, _) => Rect::new(0.0, 0.0, natural.width as f64, natural.height as f64),
        };
        if kind == MediaKind::Audio {
            rect.y = AUDIO_OFFSCREEN_Y;
        }

        // Timing
        let start = opts.start.unwrap_or(self.cursor_time);
        let duration = opts.duration.unwrap_or(match kind {
            MediaKind::Video | MediaKind::Audio => clip_meta.duration,
            MediaKind::Image | MediaKind::Text => DEFAULT_STILL_DURATION,
        });
        if duration <= 0 {
            self.engine.destroy_clip(clip);
            return Err(CoreError::InvalidTimeRange(start, start + duration));
        }

        let mut meta = SourceMeta::new(kind);
        meta.rect = rect;
        meta.opacity = opts.opacity.unwrap_or(1.0);
        meta.flip = opts.flip;
        meta.visible = opts.visible.unwrap_or(true);
        meta.interactable = opts.interactable.unwrap_or(true);
        meta.time = SpriteTime {
            offset: start,
            duration,
            playback_rate: opts.playback_rate.unwrap_or(1.0),
        };
        meta.options = options;
        meta.filters = opts.filters.clone();

        let sprite = match self.engine.add_sprite(clip, meta.sprite_state()) {
            Ok(sprite) => sprite,
            Err(e) => {
                self.engine.destroy_clip(clip);
                return Err(e);
            }
        };

        let segment = Segment {
            id: opts.with_segment_id.clone().unwrap_or_else(new_id),
            start,
            end: start + duration,
            source_key: key.clone(),
        };
        let segment_id = segment.id.clone();
        let rail_id = self.attach_segment(kind, segment, opts.with_rail_id.as_deref());

        self.sources.insert(
            key.clone(),
            Source {
                key: key.clone(),
                kind,
                clip,
                sprite,
                origin,
                rail_id: rail_id.clone(),
                attachment: SourceAttachment::Segment {
                    segment_id: segment_id.clone(),
                },
                meta,
            },
        );

        self.sync_interceptor(&key)?;
        self.reindex_z();

        if let Some(request) = opts.animation.clone() {
            self.apply_animation(&key, Some(request))?;
        }

        debug!(key = %key, rail = %rail_id, ?kind, "source placed");
        self.events.emit(EditorEvent::SourcePlaced {
            key: key.clone(),
            rail_id,
            segment_id,
        });
        self.emit_duration();
        Ok(key)
    }

    /// Decodes the clip for a placement, applying the media-internal head
    /// trim for timed kinds. The returned handle is the only one left alive.
    async fn create_clip_for(
        &self,
        kind: MediaKind,
        origin: &ClipOrigin,
        options: &KindOptions,
    ) -> CoreResult<ClipHandle> {
        let clip = match origin {
            ClipOrigin::Text { content } => {
                let default_style = TextStyle::default();
                let style = options.text_style().unwrap_or(&default_style);
                self.engine.create_text_clip(content, style).await?
            }
            _ => self.engine.create_clip(origin, kind).await?,
        };

        let offset = options.offset();
        if offset > 0 && matches!(kind, MediaKind::Video | MediaKind::Audio) {
            match self.engine.split_clip(clip, offset).await {
                Ok((head, tail)) => {
                    self.engine.destroy_clip(head);
                    self.engine.destroy_clip(clip);
                    Ok(tail)
                }
                Err(e) => {
                    self.engine.destroy_clip(clip);
                    Err(e)
                }
            }
        } else {
            Ok(clip)
        }
    }

    /// Attaches a segment to a rail per the placement rules and regroups
    /// rails for display precedence.
    fn attach_segment(
        &mut self,
        kind: MediaKind,
        segment: Segment,
        with_rail_id: Option<&str>,
    ) -> RailId {
        if let Some(id) = with_rail_id {
            if let Some(rail) = self.rails.iter_mut().find(|r| r.id == id) {
                if rail.find_overlap(segment.start, segment.end).is_none() {
                    let rail_id = rail.id.clone();
                    rail.insert_segment(segment);
                    self.regroup_rails();
                    return rail_id;
                }
            }
        }

        // Newest rail of this kind, else a fresh one
        let mut index = match self.rails.iter().rposition(|r| r.kind == kind) {
            Some(index) => index,
            None => {
                let mut rail = match with_rail_id {
                    Some(id) => Rail::with_id(id, kind),
                    None => Rail::new(kind),
                };
                if kind == MediaKind::Video {
                    rail.main = true;
                }
                self.rails.push(rail);
                self.rails.len() - 1
            }
        };

        // Overlapping placements always go onto a fresh rail
        if self.rails[index]
            .find_overlap(segment.start, segment.end)
            .is_some()
        {
            self.rails.push(Rail::new(kind));
            index = self.rails.len() - 1;
        }

        self.rails[index].insert_segment(segment);
        let rail_id = self.rails[index].id.clone();
        self.regroup_rails();
        rail_id
    }

    /// Display precedence: audio rails first, text rails last (drawn on top).
    fn regroup_rails(&mut self) {
        let rails = std::mem::take(&mut self.rails);
        let (audio, rest): (Vec<_>, Vec<_>) =
            rails.into_iter().partition(|r| r.kind == MediaKind::Audio);
        let (text, middle): (Vec<_>, Vec<_>) =
            rest.into_iter().partition(|r| r.kind == MediaKind::Text);
        self.rails = audio.into_iter().chain(middle).chain(text).collect();
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Detaches a source from its rail, releases its handles, and drops it.
    /// No-op when the key is unknown.
    pub fn remove(&mut self, key: &str) {
        let Some(source) = self.sources.remove(key) else {
            return;
        };
        self.engine.remove_sprite(source.sprite);
        self.engine.destroy_clip(source.clip);

        match &source.attachment {
            SourceAttachment::Segment { segment_id } => {
                let rail_id = source.rail_id.clone();
                if let Some(rail) = self.rails.iter_mut().find(|r| r.id == rail_id) {
                    rail.remove_segment(segment_id);
                }
                let segment_id = segment_id.clone();
                self.unselect_segment(&segment_id, &rail_id);
                self.sync_transitions(&rail_id);
            }
            SourceAttachment::Transition { transition_id } => {
                // A half-released transition is never left behind.
                let transition_id = transition_id.clone();
                let _ = self.remove_transition(&transition_id);
            }
        }

        self.reindex_z();
        self.events.emit(EditorEvent::SourceRemoved {
            key: key.to_string(),
        });
        self.emit_duration();
    }

    /// Releases a segment's resources and removes it from its rail.
    /// Now-empty rails persist.
    pub fn delete_segment(&mut self, segment_id: &str) -> CoreResult<()> {
        let (rail_index, _) = self
            .find_segment(segment_id)
            .ok_or_else(|| CoreError::SegmentNotFound(segment_id.to_string()))?;
        let rail_id = self.rails[rail_index].id.clone();
        let segment = self.rails[rail_index]
            .remove_segment(segment_id)
            .expect("segment located above");

        if let Some(source) = self.sources.remove(&segment.source_key) {
            self.engine.remove_sprite(source.sprite);
            self.engine.destroy_clip(source.clip);
        }

        self.unselect_segment(segment_id, &rail_id);
        self.sync_transitions(&rail_id);
        self.reindex_z();
        self.events.emit(EditorEvent::SegmentDeleted {
            segment_id: segment_id.to_string(),
        });
        self.emit_duration();
        Ok(())
    }

    /// Releases every source and resets the timeline.
    pub fn clear(&mut self) {
        for (_, source) in self.sources.drain() {
            self.engine.remove_sprite(source.sprite);
            self.engine.destroy_clip(source.clip);
        }
        self.rails.clear();
        self.clear_selection();
        self.cursor_time = 0;
    }

    // =========================================================================
    // Resize & Split
    // =========================================================================

    /// Updates a segment's window and propagates the timing to the sprite.
    pub fn resize_segment(
        &mut self,
        segment_id: &str,
        new_start: TimeUs,
        new_end: TimeUs,
    ) -> CoreResult<()> {
        if new_end <= new_start {
            return Err(CoreError::InvalidTimeRange(new_start, new_end));
        }
        let (rail_index, segment_index) = self
            .find_segment(segment_id)
            .ok_or_else(|| CoreError::SegmentNotFound(segment_id.to_string()))?;
        let rail_id = self.rails[rail_index].id.clone();
        let source_key = {
            let segment = &mut self.rails[rail_index].segments[segment_index];
            segment.start = new_start;
            segment.end = new_end;
            segment.source_key.clone()
        };
        self.rails[rail_index]
            .segments
            .sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));

        let animation = if let Some(source) = self.sources.get_mut(&source_key) {
            source.meta.time.offset = new_start;
            source.meta.time.duration = new_end - new_start;
            let state = source.meta.sprite_state();
            self.engine.update_sprite(source.sprite, &state)?;
            source.meta.animation.as_ref().map(AnimationSpec::as_request)
        } else {
            None
        };
        // Duration changes invalidate the keyframe set; recompute from base.
        if let Some(request) = animation {
            self.apply_animation(&source_key, Some(request))?;
        }

        self.sync_transitions(&rail_id);
        self.events.emit(EditorEvent::SegmentResized {
            segment_id: segment_id.to_string(),
            start: new_start,
            end: new_end,
        });
        self.emit_duration();
        Ok(())
    }

    /// Splits a segment at `at`.
    ///
    /// `Left` truncates the segment to `[start, at)`; `Right` moves its start
    /// to `at` (media kinds re-decode from the advanced offset); `Both` keeps
    /// the left half and creates a fresh source for the right half whose
    /// media offset advances by the elapsed time. Returns the key of the
    /// created fragment, if any. A failed fragment creation rolls the
    /// original segment back.
    pub async fn split(
        &mut self,
        segment_id: &str,
        at: TimeUs,
        keep: SplitKeep,
    ) -> CoreResult<Option<SourceKey>> {
        let (rail_index, segment_index) = self
            .find_segment(segment_id)
            .ok_or_else(|| CoreError::SegmentNotFound(segment_id.to_string()))?;
        let rail_id = self.rails[rail_index].id.clone();
        let (start, end, source_key) = {
            let segment = &self.rails[rail_index].segments[segment_index];
            (segment.start, segment.end, segment.source_key.clone())
        };
        if at <= start || at >= end {
            return Err(CoreError::InvalidSplitPoint(at));
        }
        let elapsed = at - start;

        let (kind, origin, meta) = {
            let source = self.source(&source_key)?;
            (source.kind, source.origin.clone(), source.meta.clone())
        };

        let created = match keep {
            SplitKeep::Left => {
                self.resize_segment(segment_id, start, at)?;
                None
            }
            SplitKeep::Right => {
                if matches!(kind, MediaKind::Image | MediaKind::Text) {
                    // Still content needs no media trim, only a window shift.
                    self.resize_segment(segment_id, at, end)?;
                    None
                } else {
                    // Replace the source with one decoding from the advanced
                    // offset; the segment id survives.
                    let removed = self.rails[rail_index]
                        .remove_segment(segment_id)
                        .expect("segment located above");
                    let opts = Self::fragment_options(
                        &meta,
                        at,
                        end - at,
                        elapsed,
                        &rail_id,
                        Some(segment_id.to_string()),
                    );
                    match self.place(kind, origin.clone(), opts).await {
                        Ok(new_key) => {
                            if let Some(old) = self.sources.remove(&source_key) {
                                self.engine.remove_sprite(old.sprite);
                                self.engine.destroy_clip(old.clip);
                            }
                            Some(new_key)
                        }
                        Err(e) => {
                            if let Some(rail) =
                                self.rails.iter_mut().find(|r| r.id == rail_id)
                            {
                                rail.insert_segment(removed);
                            }
                            return Err(e);
                        }
                    }
                }
            }
            SplitKeep::Both => {
                self.resize_segment(segment_id, start, at)?;
                let bump = match kind {
                    MediaKind::Video | MediaKind::Audio => elapsed,
                    MediaKind::Image | MediaKind::Text => 0,
                };
                let opts = Self::fragment_options(&meta, at, end - at, bump, &rail_id, None);
                match self.place(kind, origin.clone(), opts).await {
                    Ok(new_key) => Some(new_key),
                    Err(e) => {
                        // Roll the left truncation back; no orphaned fragment
                        // survives a failed split.
                        self.resize_segment(segment_id, start, end)?;
                        return Err(e);
                    }
                }
            }
        };

        self.sync_transitions(&rail_id);
        self.reindex_z();
        self.events.emit(EditorEvent::SegmentSplit {
            segment_id: segment_id.to_string(),
            at,
        });
        self.emit_duration();
        Ok(created)
    }

    /// Placement options for a split fragment: same look, filters carried
    /// over so the rebuilt interceptor matches the original's, media offset
    /// advanced by the elapsed time.
    fn fragment_options(
        meta: &SourceMeta,
        start: TimeUs,
        duration: TimeUs,
        offset_bump: TimeUs,
        rail_id: &str,
        segment_id: Option<SegmentId>,
    ) -> PlaceOptions {
        PlaceOptions {
            key: None,
            rect: Some(meta.rect),
            auto_fit: None,
            start: Some(start),
            duration: Some(duration),
            playback_rate: Some(meta.time.playback_rate),
            opacity: Some(meta.opacity),
            flip: meta.flip,
            visible: Some(meta.visible),
            interactable: Some(meta.interactable),
            options: Some(
                meta.options
                    .clone()
                    .with_offset(meta.options.offset() + offset_bump),
            ),
            filters: meta.filters.clone(),
            animation: None,
            with_rail_id: Some(rail_id.to_string()),
            with_segment_id: segment_id,
        }
    }

    // =========================================================================
    // Rail Flags
    // =========================================================================

    /// Toggles a rail's mute flag and rebuilds the interceptors of every
    /// source on it so the audio stage sees the new state.
    pub fn set_rail_muted(&mut self, rail_id: &str, muted: bool) -> CoreResult<()> {
        let rail = self
            .rails
            .iter_mut()
            .find(|r| r.id == rail_id)
            .ok_or_else(|| CoreError::RailNotFound(rail_id.to_string()))?;
        rail.muted = muted;
        let keys: Vec<SourceKey> = rail.segments.iter().map(|s| s.source_key.clone()).collect();
        for key in keys {
            self.sync_interceptor(&key)?;
        }
        self.events.emit(EditorEvent::RailFlagsChanged {
            rail_id: rail_id.to_string(),
        });
        Ok(())
    }

    /// Hides or shows every sprite on a rail. Source metadata is untouched.
    pub fn set_rail_hidden(&mut self, rail_id: &str, hidden: bool) -> CoreResult<()> {
        let rail = self
            .rails
            .iter_mut()
            .find(|r| r.id == rail_id)
            .ok_or_else(|| CoreError::RailNotFound(rail_id.to_string()))?;
        rail.hidden = hidden;
        let keys: Vec<SourceKey> = rail.segments.iter().map(|s| s.source_key.clone()).collect();
        for key in keys {
            if let Some(source) = self.sources.get(&key) {
                let mut state = self.engine.sprite_state(source.sprite)?;
                state.visible = !hidden;
                self.engine.update_sprite(source.sprite, &state)?;
            }
        }
        self.events.emit(EditorEvent::RailFlagsChanged {
            rail_id: rail_id.to_string(),
        });
        Ok(())
    }

    // =========================================================================
    // Source Metadata
    // =========================================================================

    /// Replaces a source's filter list and swaps in a fresh interceptor.
    pub fn set_filters(&mut self, key: &str, filters: Vec<FilterSpec>) -> CoreResult<()> {
        let source = self
            .sources
            .get_mut(key)
            .ok_or_else(|| CoreError::SourceNotFound(key.to_string()))?;
        source.meta.filters = filters;
        self.sync_interceptor(key)?;
        self.events.emit(EditorEvent::SourceMetaChanged {
            key: key.to_string(),
        });
        Ok(())
    }

    /// Updates the base rectangle; an active animation is recomputed from the
    /// new base, never from the live animated geometry.
    pub fn set_rect(&mut self, key: &str, rect: Rect) -> CoreResult<()> {
        let animation = {
            let source = self
                .sources
                .get_mut(key)
                .ok_or_else(|| CoreError::SourceNotFound(key.to_string()))?;
            source.meta.rect = rect;
            let state = source.meta.sprite_state();
            self.engine.update_sprite(source.sprite, &state)?;
            source.meta.animation.as_ref().map(AnimationSpec::as_request)
        };
        if let Some(request) = animation {
            self.apply_animation(key, Some(request))?;
        }
        self.events.emit(EditorEvent::SourceMetaChanged {
            key: key.to_string(),
        });
        Ok(())
    }

    /// Updates the base opacity; an active animation is recomputed.
    pub fn set_opacity(&mut self, key: &str, opacity: f64) -> CoreResult<()> {
        let animation = {
            let source = self
                .sources
                .get_mut(key)
                .ok_or_else(|| CoreError::SourceNotFound(key.to_string()))?;
            source.meta.opacity = opacity;
            let state = source.meta.sprite_state();
            self.engine.update_sprite(source.sprite, &state)?;
            source.meta.animation.as_ref().map(AnimationSpec::as_request)
        };
        if let Some(request) = animation {
            self.apply_animation(key, Some(request))?;
        }
        self.events.emit(EditorEvent::SourceMetaChanged {
            key: key.to_string(),
        });
        Ok(())
    }

    /// Regenerates a text source's backing bitmap for new content or style.
    /// The clip and sprite are rebuilt; everything else is carried over.
    pub async fn update_text(
        &mut self,
        key: &str,
        content: Option<String>,
        style: Option<TextStyle>,
    ) -> CoreResult<()> {
        let (old_clip, old_sprite, new_content, new_style, mut meta) = {
            let source = self.source(key)?;
            if source.kind != MediaKind::Text {
                return Err(CoreError::ValidationError(format!(
                    "not a text source: {}",
                    key
                )));
            }
            let current = source.text_content().unwrap_or_default().to_string();
            let current_style = source
                .meta
                .options
                .text_style()
                .cloned()
                .unwrap_or_default();
            (
                source.clip,
                source.sprite,
                content.unwrap_or(current),
                style.unwrap_or(current_style),
                source.meta.clone(),
            )
        };

        let clip = self
            .engine
            .create_text_clip(&new_content, &new_style)
            .await?;
        let clip_meta = self.engine.clip_meta(clip)?;
        // Content changes change the bitmap size; keep position, adopt size.
        meta.rect.w = clip_meta.width as f64;
        meta.rect.h = clip_meta.height as f64;
        meta.options = KindOptions::Text { style: new_style };

        let sprite = match self.engine.add_sprite(clip, meta.sprite_state()) {
            Ok(sprite) => sprite,
            Err(e) => {
                self.engine.destroy_clip(clip);
                return Err(e);
            }
        };

        // The new handles are live; only now release the old ones.
        self.engine.remove_sprite(old_sprite);
        self.engine.destroy_clip(old_clip);

        let source = self.sources.get_mut(key).expect("source looked up above");
        source.clip = clip;
        source.sprite = sprite;
        source.origin = ClipOrigin::Text {
            content: new_content,
        };
        source.meta = meta;

        self.sync_interceptor(key)?;
        self.events.emit(EditorEvent::SourceMetaChanged {
            key: key.to_string(),
        });
        Ok(())
    }

    // =========================================================================
    // Animation
    // =========================================================================

    /// Applies (or clears, with `None`) an animation on a source.
    ///
    /// Keyframes are always resolved from the stored base geometry; clearing
    /// resets the sprite to exactly that base.
    pub fn apply_animation(
        &mut self,
        key: &str,
        request: Option<AnimationRequest>,
    ) -> CoreResult<Option<AnimationSpec>> {
        let (sprite, base, max_duration) = {
            let source = self.source(key)?;
            let max_duration = source
                .segment_id()
                .and_then(|sid| self.find_segment(sid))
                .map(|(ri, si)| self.rails[ri].segments[si].duration())
                .unwrap_or(source.meta.time.duration);
            (source.sprite, source.meta.base_state(), max_duration)
        };

        // No request (or an explicit zero duration) clears the animation and
        // restores the base state.
        let Some(request) = request.filter(|r| r.duration != Some(0)) else {
            self.engine.clear_sprite_animation(sprite)?;
            let source = self.sources.get_mut(key).expect("source looked up above");
            source.meta.animation = None;
            let state = source.meta.sprite_state();
            self.engine.update_sprite(sprite, &state)?;
            self.sync_interceptor(key)?;
            self.events.emit(EditorEvent::AnimationChanged {
                key: key.to_string(),
            });
            return Ok(None);
        };

        let preset = self
            .registries
            .animations
            .get(&request.key)
            .ok_or_else(|| CoreError::UnknownAnimation(request.key.clone()))?;
        let (spec, keyframes) = resolve(preset, &request, &base, self.canvas, max_duration)?;

        let source = self.sources.get_mut(key).expect("source looked up above");
        source.meta.animation = Some(spec.clone());
        let state = source.meta.sprite_state();
        // Reset to base before installing: keyframes stack on the rest
        // state, never on a previous animation's values.
        self.engine.update_sprite(sprite, &state)?;
        self.engine.set_sprite_animation(
            sprite,
            &keyframes,
            &AnimationTiming {
                duration: spec.duration,
                delay: spec.delay,
                iter_count: spec.iter_count,
            },
        )?;
        self.sync_interceptor(key)?;
        self.events.emit(EditorEvent::AnimationChanged {
            key: key.to_string(),
        });
        Ok(Some(spec))
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Applies a cross-fade transition across the two segments the window
    /// covers on the rail.
    pub async fn apply_transition(
        &mut self,
        rail_id: &str,
        request: TransitionRequest,
    ) -> CoreResult<TransitionId> {
        let transition = Transition::new(request.start, request.end, &request.effect, request.config);
        self.apply_transition_data(rail_id, transition).await
    }

    async fn apply_transition_data(
        &mut self,
        rail_id: &str,
        mut transition: Transition,
    ) -> CoreResult<TransitionId> {
        if transition.end <= transition.start {
            return Err(CoreError::InvalidTimeRange(transition.start, transition.end));
        }
        if self.registries.transitions.get(&transition.effect).is_none() {
            return Err(CoreError::UnknownEffect(transition.effect.clone()));
        }

        let rail = self
            .rails
            .iter()
            .find(|r| r.id == rail_id)
            .ok_or_else(|| CoreError::RailNotFound(rail_id.to_string()))?;
        let mut covered: Vec<Segment> = rail
            .covered_segments(&transition)
            .into_iter()
            .cloned()
            .collect();
        if covered.len() != 2 {
            return Err(CoreError::ValidationError(format!(
                "transition must cover exactly two segments, found {}",
                covered.len()
            )));
        }
        covered.sort_by_key(|s| s.start);

        let (left_clip, left_origin, left_meta) = {
            let source = self.source(&covered[0].source_key)?;
            (source.clip, source.origin.clone(), source.meta.clone())
        };
        let (right_clip, right_origin, right_meta) = {
            let source = self.source(&covered[1].source_key)?;
            (source.clip, source.origin.clone(), source.meta.clone())
        };

        let duration = transition.duration();
        let half = duration / 2;

        // Extract the overlap fragments: half from the left tail, half from
        // the right head.
        let left_duration = self.engine.clip_meta(left_clip)?.duration;
        let (tmp_left, fragment_left) = self
            .engine
            .split_clip(left_clip, left_duration - half)
            .await?;
        self.engine.destroy_clip(tmp_left);

        let (fragment_right, tmp_right) = match self.engine.split_clip(right_clip, half).await {
            Ok(parts) => parts,
            Err(e) => {
                self.engine.destroy_clip(fragment_left);
                return Err(e);
            }
        };
        self.engine.destroy_clip(tmp_right);

        let cleanup = |engine: &dyn RenderEngine| {
            engine.destroy_clip(fragment_left);
            engine.destroy_clip(fragment_right);
        };

        // Freeze frames feeding the two blends
        let right_first = match first_frame(self.engine.as_ref(), fragment_right).await {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                cleanup(self.engine.as_ref());
                return Err(e);
            }
        };
        let left_last = match last_decodable_frame(self.engine.as_ref(), fragment_left).await {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                cleanup(self.engine.as_ref());
                return Err(e);
            }
        };

        self.engine.set_interceptor(
            fragment_left,
            Some(left_fragment_interceptor(
                self.registries.transitions.clone(),
                transition.effect.clone(),
                transition.config.clone(),
                right_first,
                duration,
            )),
        )?;
        self.engine.set_interceptor(
            fragment_right,
            Some(right_fragment_interceptor(
                self.registries.transitions.clone(),
                transition.effect.clone(),
                transition.config.clone(),
                left_last,
                duration,
            )),
        )?;

        // Fragment sprites mirror their parents and sit above both
        let z_index = left_meta.z_index.max(right_meta.z_index);
        let fragment_state = |meta: &SourceMeta, offset: TimeUs| SpriteState {
            rect: meta.rect,
            time: SpriteTime {
                offset,
                duration: half,
                playback_rate: 1.0,
            },
            z_index,
            opacity: meta.opacity,
            flip: meta.flip,
            visible: true,
            interactable: false,
        };

        let sprite_left = match self
            .engine
            .add_sprite(fragment_left, fragment_state(&left_meta, transition.start))
        {
            Ok(sprite) => sprite,
            Err(e) => {
                cleanup(self.engine.as_ref());
                return Err(e);
            }
        };
        let sprite_right = match self.engine.add_sprite(
            fragment_right,
            fragment_state(&right_meta, transition.start + half),
        ) {
            Ok(sprite) => sprite,
            Err(e) => {
                self.engine.remove_sprite(sprite_left);
                cleanup(self.engine.as_ref());
                return Err(e);
            }
        };

        let make_fragment_source =
            |key: &SourceKey, clip, sprite, origin: &ClipOrigin, meta: &SourceMeta, offset| {
                let mut fragment_meta = SourceMeta::new(MediaKind::Video);
                fragment_meta.rect = meta.rect;
                fragment_meta.opacity = meta.opacity;
                fragment_meta.flip = meta.flip;
                fragment_meta.interactable = false;
                fragment_meta.z_index = z_index;
                fragment_meta.time = SpriteTime {
                    offset,
                    duration: half,
                    playback_rate: 1.0,
                };
                Source {
                    key: key.clone(),
                    kind: MediaKind::Video,
                    clip,
                    sprite,
                    origin: origin.clone(),
                    rail_id: rail_id.to_string(),
                    attachment: SourceAttachment::Transition {
                        transition_id: transition.id.clone(),
                    },
                    meta: fragment_meta,
                }
            };

        let key_left = new_id();
        let key_right = new_id();
        self.sources.insert(
            key_left.clone(),
            make_fragment_source(
                &key_left,
                fragment_left,
                sprite_left,
                &left_origin,
                &left_meta,
                transition.start,
            ),
        );
        self.sources.insert(
            key_right.clone(),
            make_fragment_source(
                &key_right,
                fragment_right,
                sprite_right,
                &right_origin,
                &right_meta,
                transition.start + half,
            ),
        );

        transition.source_keys = vec![key_left, key_right];
        let transition_id = transition.id.clone();
        self.rails
            .iter_mut()
            .find(|r| r.id == rail_id)
            .expect("rail looked up above")
            .transitions
            .push(transition);

        self.reindex_z();
        self.events.emit(EditorEvent::TransitionApplied {
            transition_id: transition_id.clone(),
            rail_id: rail_id.to_string(),
        });
        Ok(transition_id)
    }

    /// Removes a transition and releases its fragment sources.
    pub fn remove_transition(&mut self, transition_id: &str) -> CoreResult<()> {
        let rail_index = self
            .rails
            .iter()
            .position(|r| r.transition(transition_id).is_some())
            .ok_or_else(|| CoreError::TransitionNotFound(transition_id.to_string()))?;
        let position = self.rails[rail_index]
            .transitions
            .iter()
            .position(|t| t.id == transition_id)
            .expect("transition located above");
        let transition = self.rails[rail_index].transitions.remove(position);

        for key in &transition.source_keys {
            if let Some(source) = self.sources.remove(key) {
                self.engine.remove_sprite(source.sprite);
                self.engine.destroy_clip(source.clip);
            }
        }

        self.reindex_z();
        self.events.emit(EditorEvent::TransitionRemoved {
            transition_id: transition_id.to_string(),
        });
        Ok(())
    }

    /// Discards every transition on a rail that no longer covers exactly two
    /// segments. Called after any segment mutation.
    pub fn sync_transitions(&mut self, rail_id: &str) {
        let Some(rail) = self.rails.iter().find(|r| r.id == rail_id) else {
            return;
        };
        let stale: Vec<TransitionId> = rail
            .transitions
            .iter()
            .filter(|t| rail.covered_segments(t).len() != 2)
            .map(|t| t.id.clone())
            .collect();
        for transition_id in stale {
            if let Err(e) = self.remove_transition(&transition_id) {
                warn!(transition = %transition_id, error = %e, "failed to drop stale transition");
            }
        }
    }

    // =========================================================================
    // Snapshot & Reconciliation
    // =========================================================================

    /// Captures the serializable state of the timeline. Transition fragment
    /// sources are derived state and are not captured.
    pub fn snapshot(&self) -> ProjectSnapshot {
        let mut sources = HashMap::new();
        for (key, source) in &self.sources {
            let Some(segment_id) = source.segment_id() else {
                continue;
            };
            let clip = self.engine.clip_meta(source.clip).unwrap_or(ClipMeta {
                duration: source.meta.time.duration,
                width: 0,
                height: 0,
            });
            sources.insert(
                key.clone(),
                SourceSnapshot {
                    key: key.clone(),
                    kind: source.kind,
                    origin: source.origin.clone(),
                    rail_id: source.rail_id.clone(),
                    segment_id: segment_id.to_string(),
                    meta: source.meta.clone(),
                    clip,
                },
            );
        }
        ProjectSnapshot {
            rails: self.rails.clone(),
            sources,
        }
    }

    /// Reconciles the live timeline with a target snapshot using minimal
    /// reconstruction: removed keys release their handles, new keys
    /// materialize fresh, common keys update in place, except text sources
    /// whose content or style changed, which regenerate their bitmap.
    /// Rails are replaced wholesale, transitions rebuilt where still valid,
    /// and the selection is cleared.
    pub async fn reconcile(&mut self, target: &ProjectSnapshot) -> CoreResult<()> {
        self.clear_selection();

        // Transition fragments are derived; drop them all and rebuild below.
        let fragment_keys: Vec<SourceKey> = self
            .sources
            .values()
            .filter(|s| s.transition_id().is_some())
            .map(|s| s.key.clone())
            .collect();
        for key in fragment_keys {
            if let Some(source) = self.sources.remove(&key) {
                self.engine.remove_sprite(source.sprite);
                self.engine.destroy_clip(source.clip);
            }
        }

        // Keys absent from the target are removed.
        let live_keys: Vec<SourceKey> = self.sources.keys().cloned().collect();
        for key in &live_keys {
            if !target.sources.contains_key(key) {
                if let Some(source) = self.sources.remove(key) {
                    self.engine.remove_sprite(source.sprite);
                    self.engine.destroy_clip(source.clip);
                }
            }
        }

        // Keys present in both update in place, without handle churn. Text
        // sources whose content or style changed regenerate their bitmap.
        for (key, snap) in &target.sources {
            let Some(live) = self.sources.get(key) else {
                continue;
            };

            if live.kind == MediaKind::Text {
                let content_changed = live.origin != snap.origin;
                let style_changed =
                    live.meta.options.text_style() != snap.meta.options.text_style();
                if content_changed || style_changed {
                    let content = match &snap.origin {
                        ClipOrigin::Text { content } => Some(content.clone()),
                        _ => None,
                    };
                    let style = snap.meta.options.text_style().cloned();
                    self.update_text(key, content, style).await?;
                }
            }

            let live = self.sources.get_mut(key).expect("still present");
            if live.meta != snap.meta
                || live.rail_id != snap.rail_id
                || live.segment_id() != Some(snap.segment_id.as_str())
            {
                live.meta = snap.meta.clone();
                live.rail_id = snap.rail_id.clone();
                live.attachment = SourceAttachment::Segment {
                    segment_id: snap.segment_id.clone(),
                };
                let state = live.meta.sprite_state();
                let sprite = live.sprite;
                self.engine.update_sprite(sprite, &state)?;
            }
        }

        // Rails are lightweight; replace wholesale. Transition data is
        // re-applied after sources settle.
        self.rails = target.rails.clone();
        let pending_transitions: Vec<(RailId, Vec<Transition>)> = self
            .rails
            .iter_mut()
            .map(|rail| (rail.id.clone(), std::mem::take(&mut rail.transitions)))
            .collect();

        // Keys absent from live state materialize fresh.
        for (key, snap) in &target.sources {
            if !self.sources.contains_key(key) {
                self.materialize_source(snap).await?;
            }
        }

        // Interceptors capture metadata by value: rebuild them all, then
        // reinstall animations from the restored base geometry.
        let keys: Vec<SourceKey> = self.sources.keys().cloned().collect();
        for key in &keys {
            self.install_interceptor(key)?;
            let animation = self
                .sources
                .get(key)
                .and_then(|s| s.meta.animation.as_ref().map(AnimationSpec::as_request));
            if let Some(request) = animation {
                if let Err(e) = self.apply_animation(key, Some(request)) {
                    warn!(key = %key, error = %e, "failed to restore animation");
                }
            }
        }

        for (rail_id, transitions) in pending_transitions {
            for mut transition in transitions {
                transition.source_keys.clear();
                if let Err(e) = self.apply_transition_data(&rail_id, transition).await {
                    // An edit may have invalidated the coverage; the
                    // transition is simply discarded.
                    debug!(rail = %rail_id, error = %e, "transition dropped during reconcile");
                }
            }
        }

        self.reindex_z();
        self.cursor_time = 0;
        force_refresh(self.engine.as_ref(), self.cursor_time);
        self.events.emit(EditorEvent::Reconciled);
        self.emit_duration();
        Ok(())
    }

    /// Creates live handles for a snapshotted source without touching rails;
    /// the wholesale rail replacement already carries its segment.
    async fn materialize_source(&mut self, snap: &SourceSnapshot) -> CoreResult<()> {
        let clip = self
            .create_clip_for(snap.kind, &snap.origin, &snap.meta.options)
            .await?;
        let sprite = match self.engine.add_sprite(clip, snap.meta.sprite_state()) {
            Ok(sprite) => sprite,
            Err(e) => {
                self.engine.destroy_clip(clip);
                return Err(e);
            }
        };
        self.sources.insert(
            snap.key.clone(),
            Source {
                key: snap.key.clone(),
                kind: snap.kind,
                clip,
                sprite,
                origin: snap.origin.clone(),
                rail_id: snap.rail_id.clone(),
                attachment: SourceAttachment::Segment {
                    segment_id: snap.segment_id.clone(),
                },
                meta: snap.meta.clone(),
            },
        );
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn find_segment(&self, segment_id: &str) -> Option<(usize, usize)> {
        for (rail_index, rail) in self.rails.iter().enumerate() {
            if let Some(segment_index) = rail.segments.iter().position(|s| s.id == segment_id) {
                return Some((rail_index, segment_index));
            }
        }
        None
    }

    /// Builds and installs the interceptor for a source from its current
    /// metadata and rail mute state, without redrawing.
    fn install_interceptor(&self, key: &str) -> CoreResult<()> {
        let source = self.source(key)?;
        let muted = self
            .rails
            .iter()
            .find(|r| r.id == source.rail_id)
            .map(|r| r.muted)
            .unwrap_or(false);
        let config = PipelineConfig {
            kind: source.kind,
            filters: source.meta.filters.clone(),
            muted,
            volume: source.meta.options.volume(),
        };
        let interceptor = build_interceptor(self.registries.filters.clone(), config);
        self.engine.set_interceptor(source.clip, Some(interceptor))
    }

    /// Installs a fresh interceptor and forces the preview to catch up.
    fn sync_interceptor(&self, key: &str) -> CoreResult<()> {
        self.install_interceptor(key)?;
        force_refresh(self.engine.as_ref(), self.cursor_time);
        Ok(())
    }

    /// Recomputes every sprite's stacking order:
    /// `railIndex * 1_000_000 + segmentIndex`, transitions at
    /// `railIndex * 1_000_000 + transitionIndex * 1000`.
    fn reindex_z(&mut self) {
        let mut assignments: Vec<(SourceKey, i64)> = vec![];
        for (rail_index, rail) in self.rails.iter().enumerate() {
            let rail_base = rail_index as i64 * Z_RAIL_STRIDE;
            for (segment_index, segment) in rail.segments.iter().enumerate() {
                assignments.push((segment.source_key.clone(), rail_base + segment_index as i64));
            }
            for (transition_index, transition) in rail.transitions.iter().enumerate() {
                let z = rail_base + transition_index as i64 * Z_TRANSITION_STRIDE;
                for key in &transition.source_keys {
                    assignments.push((key.clone(), z));
                }
            }
        }
        for (key, z_index) in assignments {
            if let Some(source) = self.sources.get_mut(&key) {
                if source.meta.z_index != z_index {
                    source.meta.z_index = z_index;
                    let state = source.meta.sprite_state();
                    if let Err(e) = self.engine.update_sprite(source.sprite, &state) {
                        warn!(key = %key, error = %e, "failed to push z-order");
                    }
                }
            }
        }
    }

    fn emit_duration(&self) {
        self.events.emit(EditorEvent::DurationChanged {
            duration: self.total_duration(),
        });
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::render::{Frame, MemoryRenderEngine, TickResult};

    fn setup() -> (Timeline, Arc<MemoryRenderEngine>) {
        let engine = Arc::new(MemoryRenderEngine::new());
        engine.register_media("vid-a", 10 * US_PER_SEC, 1280, 720);
        engine.register_media("vid-b", 10 * US_PER_SEC, 1280, 720);
        engine.register_media("song", 30 * US_PER_SEC, 0, 0);
        let timeline = Timeline::new(
            "project-1",
            Size2D::new(1920, 1080),
            engine.clone(),
            Registries::default(),
        );
        (timeline, engine)
    }

    fn file(id: &str) -> ClipOrigin {
        ClipOrigin::File {
            file_id: id.to_string(),
        }
    }

    fn at(start: TimeUs) -> PlaceOptions {
        PlaceOptions {
            start: Some(start),
            ..Default::default()
        }
    }

    fn segment_of<'a>(timeline: &'a Timeline, key: &str) -> &'a Segment {
        let source = timeline.source(key).unwrap();
        let segment_id = source.segment_id().unwrap();
        timeline
            .rails()
            .iter()
            .find_map(|r| r.segment(segment_id))
            .unwrap()
    }

    fn audio_tick() -> TickResult {
        TickResult {
            video: Some(Frame::solid(2, 2, 0, [10, 10, 10, 255])),
            audio: vec![vec![0.5; 4]; 2],
        }
    }

    // -------------------------------------------------------------------------
    // Placement
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_place_creates_rail_and_segment() {
        let (mut timeline, engine) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();

        assert_eq!(timeline.rails().len(), 1);
        assert!(timeline.rails()[0].main);
        let segment = segment_of(&timeline, &key);
        assert_eq!(segment.start, 0);
        assert_eq!(segment.end, 10 * US_PER_SEC);
        assert_eq!(engine.clip_count(), 1);
        assert_eq!(engine.sprite_count(), 1);
    }

    #[tokio::test]
    async fn test_place_appends_to_newest_matching_rail() {
        let (mut timeline, _) = setup();
        timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        timeline
            .place(MediaKind::Video, file("vid-b"), at(10 * US_PER_SEC))
            .await
            .unwrap();

        assert_eq!(timeline.rails().len(), 1);
        assert_eq!(timeline.rails()[0].segments.len(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_place_creates_second_rail() {
        let (mut timeline, _) = setup();
        timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        // Overlaps the first segment: placement must not be rejected,
        // a second rail appears instead.
        timeline
            .place(MediaKind::Video, file("vid-b"), at(5 * US_PER_SEC))
            .await
            .unwrap();

        assert_eq!(timeline.rails().len(), 2);
        for rail in timeline.rails() {
            for (i, a) in rail.segments.iter().enumerate() {
                for b in rail.segments.iter().skip(i + 1) {
                    assert!(!a.overlaps(b));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_rails_regroup_audio_first_text_last() {
        let (mut timeline, _) = setup();
        timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        timeline
            .place(MediaKind::Audio, file("song"), at(0))
            .await
            .unwrap();
        timeline
            .place(
                MediaKind::Text,
                ClipOrigin::Text {
                    content: "Title".to_string(),
                },
                at(0),
            )
            .await
            .unwrap();

        let kinds: Vec<MediaKind> = timeline.rails().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![MediaKind::Audio, MediaKind::Video, MediaKind::Text]
        );
    }

    #[tokio::test]
    async fn test_place_on_explicit_rail() {
        let (mut timeline, _) = setup();
        timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let rail_id = timeline.rails()[0].id.clone();
        timeline
            .place(
                MediaKind::Video,
                file("vid-b"),
                PlaceOptions {
                    start: Some(20 * US_PER_SEC),
                    with_rail_id: Some(rail_id.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(timeline.rails().len(), 1);
        assert_eq!(timeline.rails()[0].segments.len(), 2);
    }

    #[tokio::test]
    async fn test_place_audio_parks_sprite_offscreen() {
        let (mut timeline, engine) = setup();
        let key = timeline
            .place(MediaKind::Audio, file("song"), at(0))
            .await
            .unwrap();
        let sprite = timeline.source(&key).unwrap().sprite;
        assert!(engine.sprite_state(sprite).unwrap().rect.y < -1_000_000.0);
    }

    #[tokio::test]
    async fn test_place_with_media_offset_trims_head() {
        let (mut timeline, _) = setup();
        let key = timeline
            .place(
                MediaKind::Video,
                file("vid-a"),
                PlaceOptions {
                    start: Some(0),
                    options: Some(KindOptions::Video {
                        offset: 4 * US_PER_SEC,
                        volume: 1.0,
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // 10s media minus the 4s head
        let segment = segment_of(&timeline, &key);
        assert_eq!(segment.duration(), 6 * US_PER_SEC);
    }

    #[tokio::test]
    async fn test_z_order_assignment() {
        let (mut timeline, _) = setup();
        let first = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let second = timeline
            .place(MediaKind::Video, file("vid-b"), at(10 * US_PER_SEC))
            .await
            .unwrap();
        let overlapping = timeline
            .place(MediaKind::Video, file("vid-a"), at(5 * US_PER_SEC))
            .await
            .unwrap();

        assert_eq!(timeline.source(&first).unwrap().meta.z_index, 0);
        assert_eq!(timeline.source(&second).unwrap().meta.z_index, 1);
        assert_eq!(
            timeline.source(&overlapping).unwrap().meta.z_index,
            Z_RAIL_STRIDE
        );
    }

    // -------------------------------------------------------------------------
    // Removal
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_remove_releases_handles_and_detaches() {
        let (mut timeline, engine) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();

        timeline.remove(&key);
        assert_eq!(engine.clip_count(), 0);
        assert_eq!(engine.sprite_count(), 0);
        assert!(timeline.get_source(&key).is_none());
        assert!(timeline.rails()[0].segments.is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_key_is_noop() {
        let (mut timeline, _) = setup();
        timeline.remove("nope");
    }

    #[tokio::test]
    async fn test_delete_segment_keeps_empty_rail() {
        let (mut timeline, engine) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let segment_id = timeline
            .source(&key)
            .unwrap()
            .segment_id()
            .unwrap()
            .to_string();

        timeline.delete_segment(&segment_id).unwrap();
        assert_eq!(timeline.rails().len(), 1);
        assert!(timeline.rails()[0].segments.is_empty());
        assert_eq!(engine.clip_count(), 0);
    }

    // -------------------------------------------------------------------------
    // Resize & Split
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_resize_propagates_to_sprite() {
        let (mut timeline, engine) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let segment_id = timeline
            .source(&key)
            .unwrap()
            .segment_id()
            .unwrap()
            .to_string();

        timeline
            .resize_segment(&segment_id, US_PER_SEC, 5 * US_PER_SEC)
            .unwrap();

        let sprite = timeline.source(&key).unwrap().sprite;
        let state = engine.sprite_state(sprite).unwrap();
        assert_eq!(state.time.offset, US_PER_SEC);
        assert_eq!(state.time.duration, 4 * US_PER_SEC);
        assert_eq!(timeline.total_duration(), 5 * US_PER_SEC);
    }

    #[tokio::test]
    async fn test_resize_rejects_empty_window() {
        let (mut timeline, _) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let segment_id = timeline
            .source(&key)
            .unwrap()
            .segment_id()
            .unwrap()
            .to_string();
        assert!(timeline
            .resize_segment(&segment_id, 5 * US_PER_SEC, 5 * US_PER_SEC)
            .is_err());
    }

    #[tokio::test]
    async fn test_split_both_halves_and_offset_arithmetic() {
        let (mut timeline, _) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let segment_id = timeline
            .source(&key)
            .unwrap()
            .segment_id()
            .unwrap()
            .to_string();

        let new_key = timeline
            .split(&segment_id, 4 * US_PER_SEC, SplitKeep::Both)
            .await
            .unwrap()
            .unwrap();

        let left = segment_of(&timeline, &key);
        assert_eq!((left.start, left.end), (0, 4 * US_PER_SEC));
        let right = segment_of(&timeline, &new_key);
        assert_eq!((right.start, right.end), (4 * US_PER_SEC, 10 * US_PER_SEC));
        // Media offsets differ by exactly the elapsed time
        assert_eq!(
            timeline.source(&new_key).unwrap().meta.options.offset(),
            4 * US_PER_SEC
        );
        // Both halves share the rail
        assert_eq!(timeline.rails().len(), 1);
        assert_eq!(timeline.rails()[0].segments.len(), 2);
    }

    #[tokio::test]
    async fn test_split_both_accumulates_prior_offset() {
        let (mut timeline, _) = setup();
        let key = timeline
            .place(
                MediaKind::Video,
                file("vid-a"),
                PlaceOptions {
                    start: Some(0),
                    options: Some(KindOptions::Video {
                        offset: 2 * US_PER_SEC,
                        volume: 1.0,
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let segment_id = timeline
            .source(&key)
            .unwrap()
            .segment_id()
            .unwrap()
            .to_string();

        let new_key = timeline
            .split(&segment_id, 3 * US_PER_SEC, SplitKeep::Both)
            .await
            .unwrap()
            .unwrap();
        // prior 2s offset + 3s elapsed
        assert_eq!(
            timeline.source(&new_key).unwrap().meta.options.offset(),
            5 * US_PER_SEC
        );
    }

    #[tokio::test]
    async fn test_split_keep_left_truncates() {
        let (mut timeline, _) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let segment_id = timeline
            .source(&key)
            .unwrap()
            .segment_id()
            .unwrap()
            .to_string();

        let created = timeline
            .split(&segment_id, 4 * US_PER_SEC, SplitKeep::Left)
            .await
            .unwrap();
        assert!(created.is_none());
        let segment = segment_of(&timeline, &key);
        assert_eq!((segment.start, segment.end), (0, 4 * US_PER_SEC));
    }

    #[tokio::test]
    async fn test_split_keep_right_replaces_media_source() {
        let (mut timeline, engine) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let segment_id = timeline
            .source(&key)
            .unwrap()
            .segment_id()
            .unwrap()
            .to_string();

        let new_key = timeline
            .split(&segment_id, 4 * US_PER_SEC, SplitKeep::Right)
            .await
            .unwrap()
            .unwrap();

        // Old source released, segment id survived with a moved start
        assert!(timeline.get_source(&key).is_none());
        let segment = segment_of(&timeline, &new_key);
        assert_eq!(segment.id, segment_id);
        assert_eq!((segment.start, segment.end), (4 * US_PER_SEC, 10 * US_PER_SEC));
        assert_eq!(
            timeline.source(&new_key).unwrap().meta.options.offset(),
            4 * US_PER_SEC
        );
        // One clip + one sprite alive
        assert_eq!(engine.clip_count(), 1);
        assert_eq!(engine.sprite_count(), 1);
    }

    #[tokio::test]
    async fn test_split_image_adjusts_window_only() {
        let (mut timeline, engine) = setup();
        let key = timeline
            .place(
                MediaKind::Image,
                file("pic"),
                PlaceOptions {
                    start: Some(0),
                    duration: Some(4 * US_PER_SEC),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let segment_id = timeline
            .source(&key)
            .unwrap()
            .segment_id()
            .unwrap()
            .to_string();

        // keep-right on an image never re-decodes
        let clips_before = engine.clip_count();
        timeline
            .split(&segment_id, US_PER_SEC, SplitKeep::Right)
            .await
            .unwrap();
        assert_eq!(engine.clip_count(), clips_before);
        let segment = segment_of(&timeline, &key);
        assert_eq!(segment.start, US_PER_SEC);

        // keep-both duplicates the source at the new window
        let new_key = timeline
            .split(&segment_id, 2 * US_PER_SEC, SplitKeep::Both)
            .await
            .unwrap()
            .unwrap();
        let right = segment_of(&timeline, &new_key);
        assert_eq!((right.start, right.end), (2 * US_PER_SEC, 4 * US_PER_SEC));
    }

    #[tokio::test]
    async fn test_split_filters_carry_to_fragment() {
        let (mut timeline, _) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        timeline
            .set_filters(&key, vec![FilterSpec::named("grayscale")])
            .unwrap();
        let segment_id = timeline
            .source(&key)
            .unwrap()
            .segment_id()
            .unwrap()
            .to_string();

        let new_key = timeline
            .split(&segment_id, 4 * US_PER_SEC, SplitKeep::Both)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            timeline.source(&new_key).unwrap().meta.filters,
            vec![FilterSpec::named("grayscale")]
        );
    }

    #[tokio::test]
    async fn test_split_outside_window_rejected() {
        let (mut timeline, _) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let segment_id = timeline
            .source(&key)
            .unwrap()
            .segment_id()
            .unwrap()
            .to_string();

        assert!(timeline
            .split(&segment_id, 0, SplitKeep::Both)
            .await
            .is_err());
        assert!(timeline
            .split(&segment_id, 11 * US_PER_SEC, SplitKeep::Both)
            .await
            .is_err());
    }

    // -------------------------------------------------------------------------
    // Pipeline Integration
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_rail_mute_rebuilds_interceptor() {
        let (mut timeline, engine) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let clip = timeline.source(&key).unwrap().clip;
        let rail_id = timeline.source(&key).unwrap().rail_id.clone();

        let before = engine.interceptor(clip).unwrap();
        assert!(!before(0, audio_tick()).unwrap().audio.is_empty());

        timeline.set_rail_muted(&rail_id, true).unwrap();
        let after = engine.interceptor(clip).unwrap();
        assert!(after(0, audio_tick()).unwrap().audio.is_empty());

        timeline.set_rail_muted(&rail_id, false).unwrap();
        let unmuted = engine.interceptor(clip).unwrap();
        assert!(!unmuted(0, audio_tick()).unwrap().audio.is_empty());
    }

    #[tokio::test]
    async fn test_set_filters_swaps_interceptor_and_refreshes() {
        let (mut timeline, engine) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let clip = timeline.source(&key).unwrap().clip;

        engine.clear_preview_log();
        timeline
            .set_filters(
                &key,
                vec![FilterSpec::new(
                    "brightness",
                    serde_json::json!({"amount": 0}),
                )],
            )
            .unwrap();

        // previous / next / current redraws
        assert_eq!(engine.preview_log().len(), 3);

        let interceptor = engine.interceptor(clip).unwrap();
        let out = interceptor(0, audio_tick()).unwrap();
        assert_eq!(out.video.unwrap().data[0], 0);
    }

    #[tokio::test]
    async fn test_hidden_rail_hides_sprites() {
        let (mut timeline, engine) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let rail_id = timeline.source(&key).unwrap().rail_id.clone();
        let sprite = timeline.source(&key).unwrap().sprite;

        timeline.set_rail_hidden(&rail_id, true).unwrap();
        assert!(!engine.sprite_state(sprite).unwrap().visible);
        timeline.set_rail_hidden(&rail_id, false).unwrap();
        assert!(engine.sprite_state(sprite).unwrap().visible);
    }

    // -------------------------------------------------------------------------
    // Animation Integration
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_apply_animation_from_base_geometry() {
        let (mut timeline, engine) = setup();
        let key = timeline
            .place(
                MediaKind::Video,
                file("vid-a"),
                PlaceOptions {
                    start: Some(0),
                    rect: Some(Rect::new(50.0, 60.0, 640.0, 360.0)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let spec = timeline
            .apply_animation(&key, Some(AnimationRequest::new("fadeIn")))
            .unwrap()
            .unwrap();
        assert_eq!(spec.iter_count, 1);

        let sprite = timeline.source(&key).unwrap().sprite;
        let (keyframes, timing) = engine.sprite_animation(sprite).unwrap();
        assert_eq!(timing.duration, spec.duration);
        // Keyframes resolved against the stored base geometry
        let from = keyframes
            .get(&crate::core::animation::KeyframePos::From)
            .unwrap();
        assert_eq!(from.x, 50.0);
        assert_eq!(from.opacity, 0.0);
    }

    #[tokio::test]
    async fn test_clear_animation_restores_base() {
        let (mut timeline, engine) = setup();
        let key = timeline
            .place(
                MediaKind::Video,
                file("vid-a"),
                PlaceOptions {
                    start: Some(0),
                    rect: Some(Rect::new(50.0, 60.0, 640.0, 360.0)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        timeline
            .apply_animation(&key, Some(AnimationRequest::new("slideInLeft")))
            .unwrap();

        timeline.apply_animation(&key, None).unwrap();

        let source = timeline.source(&key).unwrap();
        assert!(source.meta.animation.is_none());
        let state = engine.sprite_state(source.sprite).unwrap();
        assert_eq!(state.rect.x, 50.0);
        assert!(engine.sprite_animation(source.sprite).is_none());
    }

    #[tokio::test]
    async fn test_resize_recomputes_exit_animation_delay() {
        let (mut timeline, engine) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let segment_id = timeline
            .source(&key)
            .unwrap()
            .segment_id()
            .unwrap()
            .to_string();

        timeline
            .apply_animation(
                &key,
                Some(AnimationRequest {
                    key: "fadeOut".to_string(),
                    duration: Some(US_PER_SEC),
                    ..Default::default()
                }),
            )
            .unwrap();
        // 10s segment, 1s exit: delay 9s
        assert_eq!(
            timeline.source(&key).unwrap().meta.animation.as_ref().unwrap().delay,
            9 * US_PER_SEC
        );

        timeline
            .resize_segment(&segment_id, 0, 4 * US_PER_SEC)
            .unwrap();
        // Recomputed for the 4s window
        let spec = timeline
            .source(&key)
            .unwrap()
            .meta
            .animation
            .clone()
            .unwrap();
        assert_eq!(spec.delay, 3 * US_PER_SEC);
        let sprite = timeline.source(&key).unwrap().sprite;
        assert_eq!(engine.sprite_animation(sprite).unwrap().1.delay, 3 * US_PER_SEC);
    }

    #[tokio::test]
    async fn test_unknown_animation_rejected() {
        let (mut timeline, _) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        assert!(matches!(
            timeline.apply_animation(&key, Some(AnimationRequest::new("wobble"))),
            Err(CoreError::UnknownAnimation(_))
        ));
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    async fn adjacent_pair(timeline: &mut Timeline) -> (SourceKey, SourceKey, RailId) {
        let left = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let right = timeline
            .place(MediaKind::Video, file("vid-b"), at(10 * US_PER_SEC))
            .await
            .unwrap();
        let rail_id = timeline.source(&left).unwrap().rail_id.clone();
        (left, right, rail_id)
    }

    fn cross_fade(start: TimeUs, end: TimeUs) -> TransitionRequest {
        TransitionRequest {
            start,
            end,
            effect: "crossFade".to_string(),
            config: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_transition_creates_two_fragments() {
        let (mut timeline, engine) = setup();
        let (_, _, rail_id) = adjacent_pair(&mut timeline).await;

        let transition_id = timeline
            .apply_transition(&rail_id, cross_fade(8 * US_PER_SEC, 12 * US_PER_SEC))
            .await
            .unwrap();

        let rail = &timeline.rails()[0];
        let transition = rail.transition(&transition_id).unwrap();
        assert_eq!(transition.source_keys.len(), 2);

        // Two 2s-half fragments positioned back to back
        let first = timeline.source(&transition.source_keys[0]).unwrap();
        let second = timeline.source(&transition.source_keys[1]).unwrap();
        assert_eq!(first.meta.time.offset, 8 * US_PER_SEC);
        assert_eq!(first.meta.time.duration, 2 * US_PER_SEC);
        assert_eq!(second.meta.time.offset, 10 * US_PER_SEC);
        assert_eq!(second.meta.time.duration, 2 * US_PER_SEC);

        // 2 originals + 2 fragments
        assert_eq!(engine.clip_count(), 4);
        assert_eq!(engine.sprite_count(), 4);
    }

    #[tokio::test]
    async fn test_transition_fragment_blend_and_silence() {
        let (mut timeline, engine) = setup();
        let (_, _, rail_id) = adjacent_pair(&mut timeline).await;
        let transition_id = timeline
            .apply_transition(&rail_id, cross_fade(8 * US_PER_SEC, 12 * US_PER_SEC))
            .await
            .unwrap();

        let rail = &timeline.rails()[0];
        let keys = rail.transition(&transition_id).unwrap().source_keys.clone();
        let fragment = timeline.source(&keys[0]).unwrap();
        let interceptor = engine.interceptor(fragment.clip).unwrap();

        let out = interceptor(0, audio_tick()).unwrap();
        assert!(out.video.is_some());
        assert!(out.audio.is_empty());
    }

    #[tokio::test]
    async fn test_transition_requires_two_covered_segments() {
        let (mut timeline, _) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let rail_id = timeline.source(&key).unwrap().rail_id.clone();

        let result = timeline
            .apply_transition(&rail_id, cross_fade(4 * US_PER_SEC, 6 * US_PER_SEC))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_deleting_adjacent_segment_removes_transition() {
        let (mut timeline, engine) = setup();
        let (_, right, rail_id) = adjacent_pair(&mut timeline).await;
        timeline
            .apply_transition(&rail_id, cross_fade(8 * US_PER_SEC, 12 * US_PER_SEC))
            .await
            .unwrap();

        let right_segment = timeline
            .source(&right)
            .unwrap()
            .segment_id()
            .unwrap()
            .to_string();
        timeline.delete_segment(&right_segment).unwrap();

        assert!(timeline.rails()[0].transitions.is_empty());
        // Only the left original remains
        assert_eq!(engine.clip_count(), 1);
        assert_eq!(engine.sprite_count(), 1);
    }

    #[tokio::test]
    async fn test_moving_segment_away_removes_transition() {
        let (mut timeline, _) = setup();
        let (_, right, rail_id) = adjacent_pair(&mut timeline).await;
        timeline
            .apply_transition(&rail_id, cross_fade(8 * US_PER_SEC, 12 * US_PER_SEC))
            .await
            .unwrap();

        let right_segment = timeline
            .source(&right)
            .unwrap()
            .segment_id()
            .unwrap()
            .to_string();
        timeline
            .resize_segment(&right_segment, 20 * US_PER_SEC, 30 * US_PER_SEC)
            .unwrap();

        assert!(timeline.rails()[0].transitions.is_empty());
    }

    #[tokio::test]
    async fn test_transition_z_order_layering() {
        let (mut timeline, _) = setup();
        let (_, _, rail_id) = adjacent_pair(&mut timeline).await;
        let transition_id = timeline
            .apply_transition(&rail_id, cross_fade(8 * US_PER_SEC, 12 * US_PER_SEC))
            .await
            .unwrap();

        let rail = &timeline.rails()[0];
        let keys = rail.transition(&transition_id).unwrap().source_keys.clone();
        // transitionIndex 0 on rail 0
        assert_eq!(timeline.source(&keys[0]).unwrap().meta.z_index, 0);
        assert_eq!(timeline.source(&keys[1]).unwrap().meta.z_index, 0);
    }

    #[tokio::test]
    async fn test_unknown_transition_effect_rejected() {
        let (mut timeline, _) = setup();
        let (_, _, rail_id) = adjacent_pair(&mut timeline).await;
        let result = timeline
            .apply_transition(
                &rail_id,
                TransitionRequest {
                    start: 8 * US_PER_SEC,
                    end: 12 * US_PER_SEC,
                    effect: "spiral".to_string(),
                    config: serde_json::Value::Null,
                },
            )
            .await;
        assert!(matches!(result, Err(CoreError::UnknownEffect(_))));
    }

    // -------------------------------------------------------------------------
    // Text Sources
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_update_text_recreates_handles() {
        let (mut timeline, engine) = setup();
        let key = timeline
            .place(
                MediaKind::Text,
                ClipOrigin::Text {
                    content: "Before".to_string(),
                },
                at(0),
            )
            .await
            .unwrap();
        let old_clip = timeline.source(&key).unwrap().clip;
        let old_sprite = timeline.source(&key).unwrap().sprite;

        timeline
            .update_text(&key, Some("After, much longer".to_string()), None)
            .await
            .unwrap();

        let source = timeline.source(&key).unwrap();
        assert_ne!(source.clip, old_clip);
        assert_ne!(source.sprite, old_sprite);
        assert!(!engine.clip_alive(old_clip));
        assert!(!engine.sprite_alive(old_sprite));
        assert_eq!(source.text_content(), Some("After, much longer"));
    }

    #[tokio::test]
    async fn test_update_text_rejects_non_text() {
        let (mut timeline, _) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        assert!(timeline
            .update_text(&key, Some("nope".to_string()), None)
            .await
            .is_err());
    }

    // -------------------------------------------------------------------------
    // Snapshot & Reconcile
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_snapshot_excludes_transition_fragments() {
        let (mut timeline, _) = setup();
        let (left, right, rail_id) = adjacent_pair(&mut timeline).await;
        timeline
            .apply_transition(&rail_id, cross_fade(8 * US_PER_SEC, 12 * US_PER_SEC))
            .await
            .unwrap();

        let snapshot = timeline.snapshot();
        assert_eq!(snapshot.sources.len(), 2);
        assert!(snapshot.sources.contains_key(&left));
        assert!(snapshot.sources.contains_key(&right));
        // Rail transition data is captured
        assert_eq!(snapshot.rails[0].transitions.len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_removes_sources_missing_from_target() {
        let (mut timeline, engine) = setup();
        let first = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let snapshot = timeline.snapshot();

        timeline
            .place(MediaKind::Video, file("vid-b"), at(10 * US_PER_SEC))
            .await
            .unwrap();
        assert_eq!(timeline.source_count(), 2);

        timeline.reconcile(&snapshot).await.unwrap();
        assert_eq!(timeline.source_count(), 1);
        assert!(timeline.get_source(&first).is_some());
        assert_eq!(engine.clip_count(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_materializes_missing_sources() {
        let (mut timeline, _) = setup();
        let first = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let second = timeline
            .place(MediaKind::Video, file("vid-b"), at(10 * US_PER_SEC))
            .await
            .unwrap();
        let snapshot = timeline.snapshot();

        timeline.remove(&second);
        assert_eq!(timeline.source_count(), 1);

        timeline.reconcile(&snapshot).await.unwrap();
        assert_eq!(timeline.source_count(), 2);
        assert!(timeline.get_source(&first).is_some());
        let restored = timeline.source(&second).unwrap();
        assert_eq!(restored.meta.time.offset, 10 * US_PER_SEC);
        assert_eq!(timeline.rails()[0].segments.len(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_unchanged_source_keeps_handles() {
        let (mut timeline, _) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let clip = timeline.source(&key).unwrap().clip;
        let sprite = timeline.source(&key).unwrap().sprite;
        let snapshot = timeline.snapshot();

        timeline.reconcile(&snapshot).await.unwrap();

        // No destroy/recreate for unchanged sources
        let source = timeline.source(&key).unwrap();
        assert_eq!(source.clip, clip);
        assert_eq!(source.sprite, sprite);
    }

    #[tokio::test]
    async fn test_reconcile_updates_changed_source_in_place() {
        let (mut timeline, engine) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let snapshot = timeline.snapshot();
        let clip = timeline.source(&key).unwrap().clip;

        timeline
            .set_rect(&key, Rect::new(500.0, 500.0, 100.0, 100.0))
            .unwrap();

        timeline.reconcile(&snapshot).await.unwrap();
        let source = timeline.source(&key).unwrap();
        // Same handles, restored geometry
        assert_eq!(source.clip, clip);
        assert_eq!(source.meta.rect.x, 0.0);
        let state = engine.sprite_state(source.sprite).unwrap();
        assert_eq!(state.rect.x, 0.0);
    }

    #[tokio::test]
    async fn test_reconcile_regenerates_changed_text() {
        let (mut timeline, _) = setup();
        let key = timeline
            .place(
                MediaKind::Text,
                ClipOrigin::Text {
                    content: "Original".to_string(),
                },
                at(0),
            )
            .await
            .unwrap();
        let snapshot = timeline.snapshot();
        let old_clip = timeline.source(&key).unwrap().clip;

        timeline
            .update_text(&key, Some("Edited".to_string()), None)
            .await
            .unwrap();
        let edited_clip = timeline.source(&key).unwrap().clip;
        assert_ne!(edited_clip, old_clip);

        timeline.reconcile(&snapshot).await.unwrap();
        let source = timeline.source(&key).unwrap();
        // Text changed back: bitmap regenerated again
        assert_ne!(source.clip, edited_clip);
        assert_eq!(source.text_content(), Some("Original"));
    }

    #[tokio::test]
    async fn test_reconcile_rebuilds_valid_transitions() {
        let (mut timeline, _) = setup();
        let (_, _, rail_id) = adjacent_pair(&mut timeline).await;
        timeline
            .apply_transition(&rail_id, cross_fade(8 * US_PER_SEC, 12 * US_PER_SEC))
            .await
            .unwrap();
        let snapshot = timeline.snapshot();

        timeline.reconcile(&snapshot).await.unwrap();

        let rail = &timeline.rails()[0];
        assert_eq!(rail.transitions.len(), 1);
        // Fragments rebuilt with fresh keys
        let keys = &rail.transitions[0].source_keys;
        assert_eq!(keys.len(), 2);
        assert!(timeline.get_source(&keys[0]).is_some());
        assert_eq!(timeline.source_count(), 4);
    }

    #[tokio::test]
    async fn test_reconcile_clears_selection() {
        let (mut timeline, _) = setup();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();
        let segment_id = timeline
            .source(&key)
            .unwrap()
            .segment_id()
            .unwrap()
            .to_string();
        let rail_id = timeline.source(&key).unwrap().rail_id.clone();
        timeline.select_segment(&segment_id, &rail_id);
        assert_eq!(timeline.selected_segments().len(), 1);

        let snapshot = timeline.snapshot();
        timeline.reconcile(&snapshot).await.unwrap();
        assert!(timeline.selected_segments().is_empty());
        assert!(timeline.current_segment_id().is_none());
    }

    // -------------------------------------------------------------------------
    // Playback
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_play_guards_past_end_cursor() {
        let (mut timeline, engine) = setup();
        timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();

        timeline.seek(20 * US_PER_SEC);
        timeline.play();
        assert!(engine.playing_from().is_none());

        timeline.seek(US_PER_SEC);
        timeline.play();
        assert_eq!(engine.playing_from(), Some(US_PER_SEC));
        timeline.pause();
        assert!(engine.playing_from().is_none());
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_place_emits_events() {
        let (mut timeline, _) = setup();
        let mut rx = timeline.subscribe();
        let key = timeline
            .place(MediaKind::Video, file("vid-a"), at(0))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        match event {
            EditorEvent::SourcePlaced { key: placed, .. } => assert_eq!(placed, key),
            other => panic!("unexpected event: {:?}", other),
        }
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            EditorEvent::DurationChanged {
                duration: 10 * US_PER_SEC
            }
        );
    }
}
