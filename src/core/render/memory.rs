//! In-Memory Render Engine
//!
//! A headless implementation of the [`RenderEngine`] contract producing
//! synthetic frames. Backs unit tests and server-side (no-GPU) use of the
//! editing core; real deployments provide an engine bound to an actual
//! compositor.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::{
    ClipHandle, ClipMeta, ClipOrigin, Frame, FrameInterceptor, RenderEngine, SpriteHandle,
    SpriteState, TextStyle, TickResult,
};
use crate::core::animation::{AnimationTiming, KeyframeSet};
use crate::core::{CoreError, CoreResult, MediaKind, TimeUs, US_PER_SEC};

/// Duration reported for media that has not been registered explicitly
const DEFAULT_MEDIA_DURATION: TimeUs = 10 * US_PER_SEC;

const DEFAULT_MEDIA_WIDTH: u32 = 1280;
const DEFAULT_MEDIA_HEIGHT: u32 = 720;

/// Audio samples synthesized per tick and channel
const TICK_SAMPLES: usize = 16;

struct ClipRecord {
    kind: MediaKind,
    meta: ClipMeta,
    /// Media-internal offset accumulated through splits
    source_offset: TimeUs,
    /// Drives the synthetic pixel pattern
    seed: u64,
    interceptor: Option<FrameInterceptor>,
}

struct SpriteRecord {
    clip: ClipHandle,
    state: SpriteState,
    animation: Option<(KeyframeSet, AnimationTiming)>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    clips: HashMap<u64, ClipRecord>,
    sprites: HashMap<u64, SpriteRecord>,
    /// Known media durations/sizes by file id or url
    media: HashMap<String, ClipMeta>,
    preview_log: Vec<TimeUs>,
    playing_from: Option<TimeUs>,
}

/// In-memory render engine with synthetic decoding
#[derive(Default)]
pub struct MemoryRenderEngine {
    inner: Mutex<Inner>,
}

impl MemoryRenderEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers duration and frame size for a file id or url, so subsequent
    /// `create_clip` calls report realistic metadata.
    pub fn register_media(&self, id: &str, duration: TimeUs, width: u32, height: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.media.insert(
            id.to_string(),
            ClipMeta {
                duration,
                width,
                height,
            },
        );
    }

    /// Times `preview_frame` has been asked to redraw, in call order.
    pub fn preview_log(&self) -> Vec<TimeUs> {
        self.inner.lock().unwrap().preview_log.clone()
    }

    pub fn clear_preview_log(&self) {
        self.inner.lock().unwrap().preview_log.clear();
    }

    /// Number of clips currently alive (leak detection in tests).
    pub fn clip_count(&self) -> usize {
        self.inner.lock().unwrap().clips.len()
    }

    /// Number of sprites currently alive.
    pub fn sprite_count(&self) -> usize {
        self.inner.lock().unwrap().sprites.len()
    }

    pub fn clip_alive(&self, clip: ClipHandle) -> bool {
        self.inner.lock().unwrap().clips.contains_key(&clip.0)
    }

    pub fn sprite_alive(&self, sprite: SpriteHandle) -> bool {
        self.inner.lock().unwrap().sprites.contains_key(&sprite.0)
    }

    /// Reads back the interceptor installed on a clip so tests can invoke it
    /// the way the compositor would.
    pub fn interceptor(&self, clip: ClipHandle) -> Option<FrameInterceptor> {
        self.inner
            .lock()
            .unwrap()
            .clips
            .get(&clip.0)
            .and_then(|c| c.interceptor.clone())
    }

    fn alloc_id(inner: &mut Inner) -> u64 {
        inner.next_id += 1;
        inner.next_id
    }

    fn insert_clip(inner: &mut Inner, record: ClipRecord) -> ClipHandle {
        let id = Self::alloc_id(inner);
        inner.clips.insert(id, record);
        ClipHandle(id)
    }
}

#[async_trait]
impl RenderEngine for MemoryRenderEngine {
    async fn create_clip(&self, origin: &ClipOrigin, kind: MediaKind) -> CoreResult<ClipHandle> {
        let mut inner = self.inner.lock().unwrap();
        let key = match origin {
            ClipOrigin::File { file_id } => file_id.clone(),
            ClipOrigin::Url { url } => url.clone(),
            ClipOrigin::Text { content } => {
                return Err(CoreError::DecodeFailed(format!(
                    "text origin requires create_text_clip: {:?}",
                    content
                )))
            }
        };
        let meta = inner.media.get(&key).copied().unwrap_or(ClipMeta {
            duration: match kind {
                MediaKind::Video | MediaKind::Audio => DEFAULT_MEDIA_DURATION,
                MediaKind::Image | MediaKind::Text => 0,
            },
            width: DEFAULT_MEDIA_WIDTH,
            height: DEFAULT_MEDIA_HEIGHT,
        });
        let seed = key.bytes().fold(0u64, |acc, b| {
            acc.wrapping_mul(31).wrapping_add(b as u64)
        });
        Ok(Self::insert_clip(
            &mut inner,
            ClipRecord {
                kind,
                meta,
                source_offset: 0,
                seed,
                interceptor: None,
            },
        ))
    }

    async fn create_text_clip(&self, content: &str, style: &TextStyle) -> CoreResult<ClipHandle> {
        let mut inner = self.inner.lock().unwrap();
        // Approximate the rendered bitmap size from content and font size.
        let width = ((content.chars().count() as f64) * style.font_size * 0.6).ceil() as u32;
        let height = (style.font_size * 1.25).ceil() as u32;
        let seed = content.bytes().fold(7u64, |acc, b| {
            acc.wrapping_mul(31).wrapping_add(b as u64)
        });
        Ok(Self::insert_clip(
            &mut inner,
            ClipRecord {
                kind: MediaKind::Text,
                meta: ClipMeta {
                    duration: 0,
                    width: width.max(1),
                    height: height.max(1),
                },
                source_offset: 0,
                seed,
                interceptor: None,
            },
        ))
    }

    async fn split_clip(
        &self,
        clip: ClipHandle,
        at: TimeUs,
    ) -> CoreResult<(ClipHandle, ClipHandle)> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .clips
            .get(&clip.0)
            .ok_or(CoreError::ClipNotFound(clip.0))?;
        if at <= 0 || at >= record.meta.duration {
            return Err(CoreError::InvalidSplitPoint(at));
        }

        let (kind, meta, source_offset, seed) =
            (record.kind, record.meta, record.source_offset, record.seed);

        let left = ClipRecord {
            kind,
            meta: ClipMeta {
                duration: at,
                ..meta
            },
            source_offset,
            seed,
            interceptor: None,
        };
        let right = ClipRecord {
            kind,
            meta: ClipMeta {
                duration: meta.duration - at,
                ..meta
            },
            source_offset: source_offset + at,
            seed,
            interceptor: None,
        };

        let left_handle = Self::insert_clip(&mut inner, left);
        let right_handle = Self::insert_clip(&mut inner, right);
        Ok((left_handle, right_handle))
    }

    fn clip_meta(&self, clip: ClipHandle) -> CoreResult<ClipMeta> {
        self.inner
            .lock()
            .unwrap()
            .clips
            .get(&clip.0)
            .map(|c| c.meta)
            .ok_or(CoreError::ClipNotFound(clip.0))
    }

    async fn tick(&self, clip: ClipHandle, time: TimeUs) -> CoreResult<TickResult> {
        let inner = self.inner.lock().unwrap();
        let record = inner
            .clips
            .get(&clip.0)
            .ok_or(CoreError::ClipNotFound(clip.0))?;

        // Still content decodes at any time; timed media past its end yields
        // nothing, like a decoder returning a done state.
        let timed = matches!(record.kind, MediaKind::Video | MediaKind::Audio);
        if timed && (time < 0 || time > record.meta.duration) {
            return Ok(TickResult::default());
        }

        let video = record.kind.has_video().then(|| {
            // Deterministic pattern derived from media identity and position.
            let t = record.source_offset + time.max(0);
            let shade = ((record.seed as i64 + t / 1000) % 256) as u8;
            Frame::solid(record.meta.width, record.meta.height, time, [
                shade,
                shade.wrapping_add(85),
                shade.wrapping_add(170),
                255,
            ])
        });

        let audio = if record.kind.has_audio() {
            vec![vec![0.5f32; TICK_SAMPLES]; 2]
        } else {
            Vec::new()
        };

        Ok(TickResult { video, audio })
    }

    fn set_interceptor(
        &self,
        clip: ClipHandle,
        interceptor: Option<FrameInterceptor>,
    ) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .clips
            .get_mut(&clip.0)
            .ok_or(CoreError::ClipNotFound(clip.0))?;
        record.interceptor = interceptor;
        Ok(())
    }

    fn destroy_clip(&self, clip: ClipHandle) {
        let mut inner = self.inner.lock().unwrap();
        if inner.clips.remove(&clip.0).is_none() {
            debug!(clip = clip.0, "destroy_clip on unknown handle");
        }
    }

    fn add_sprite(&self, clip: ClipHandle, state: SpriteState) -> CoreResult<SpriteHandle> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.clips.contains_key(&clip.0) {
            return Err(CoreError::ClipNotFound(clip.0));
        }
        let id = Self::alloc_id(&mut inner);
        inner.sprites.insert(
            id,
            SpriteRecord {
                clip,
                state,
                animation: None,
            },
        );
        Ok(SpriteHandle(id))
    }

    fn update_sprite(&self, sprite: SpriteHandle, state: &SpriteState) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .sprites
            .get_mut(&sprite.0)
            .ok_or(CoreError::SpriteNotFound(sprite.0))?;
        record.state = state.clone();
        Ok(())
    }

    fn sprite_state(&self, sprite: SpriteHandle) -> CoreResult<SpriteState> {
        self.inner
            .lock()
            .unwrap()
            .sprites
            .get(&sprite.0)
            .map(|s| s.state.clone())
            .ok_or(CoreError::SpriteNotFound(sprite.0))
    }

    fn set_sprite_animation(
        &self,
        sprite: SpriteHandle,
        keyframes: &KeyframeSet,
        timing: &AnimationTiming,
    ) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .sprites
            .get_mut(&sprite.0)
            .ok_or(CoreError::SpriteNotFound(sprite.0))?;
        record.animation = Some((keyframes.clone(), *timing));
        Ok(())
    }

    fn clear_sprite_animation(&self, sprite: SpriteHandle) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .sprites
            .get_mut(&sprite.0)
            .ok_or(CoreError::SpriteNotFound(sprite.0))?;
        record.animation = None;
        Ok(())
    }

    fn remove_sprite(&self, sprite: SpriteHandle) {
        let mut inner = self.inner.lock().unwrap();
        if inner.sprites.remove(&sprite.0).is_none() {
            debug!(sprite = sprite.0, "remove_sprite on unknown handle");
        }
    }

    fn preview_frame(&self, time: TimeUs) {
        self.inner.lock().unwrap().preview_log.push(time);
    }

    fn play(&self, start: TimeUs) {
        let mut inner = self.inner.lock().unwrap();
        inner.playing_from = Some(start);
    }

    fn pause(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.playing_from = None;
    }

    async fn export(&self) -> CoreResult<Vec<u8>> {
        // A stand-in container: one byte per alive sprite, enough for tests
        // to see that export consumed the composition.
        let inner = self.inner.lock().unwrap();
        Ok(vec![0u8; inner.sprites.len()])
    }
}

impl MemoryRenderEngine {
    /// Returns the animation installed on a sprite, if any.
    pub fn sprite_animation(
        &self,
        sprite: SpriteHandle,
    ) -> Option<(KeyframeSet, AnimationTiming)> {
        self.inner
            .lock()
            .unwrap()
            .sprites
            .get(&sprite.0)
            .and_then(|s| s.animation.clone())
    }

    /// The playback start time, when playing.
    pub fn playing_from(&self) -> Option<TimeUs> {
        self.inner.lock().unwrap().playing_from
    }
}

// =============================================================================
// Tests
// =============================================================================
