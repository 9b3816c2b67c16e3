//! Observable state of one generation session.
//!
//! Readers only ever see immutable [`SessionState`] snapshots. Every mutation
//! copies the current snapshot, edits the copy and publishes it, so a scene
//! list with an update in flight is never visible half-written.

use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    error::{Result, StoryforgeError},
    schema::{AspectRatio, ImageModel, MediaArtifact, Scene, Title},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedScene {
    pub scene: Scene,
    pub image: Option<MediaArtifact>,
    pub is_loading: bool,
    pub error: Option<String>,
    /// Bumped on every fulfillment attempt; completions of older attempts are dropped
    pub attempt: u32,
}

impl GeneratedScene {
    pub fn loading(scene: Scene) -> Self {
        Self {
            scene,
            image: None,
            is_loading: true,
            error: None,
            attempt: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        !self.is_loading && self.error.is_some()
    }

    pub fn is_ready(&self) -> bool {
        !self.is_loading && self.image.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum VideoState {
    #[default]
    Idle,
    Pending,
    Done(MediaArtifact),
    Failed(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoryboardSettings {
    pub image_model: ImageModel,
    pub aspect_ratio: AspectRatio,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Identifies the storyboard run the scenes belong to
    pub session_id: Option<Uuid>,
    pub topic: String,
    pub settings: StoryboardSettings,
    pub scenes: Vec<GeneratedScene>,
    pub titles: Vec<Title>,
    pub is_generating: bool,
    pub is_generating_story: bool,
    pub is_regenerating_titles: bool,
    pub video: VideoState,
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn ready_count(&self) -> usize {
        self.scenes.iter().filter(|s| s.is_ready()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.scenes.iter().filter(|s| s.is_failed()).count()
    }

    pub fn loading_count(&self) -> usize {
        self.scenes.iter().filter(|s| s.is_loading).count()
    }
}

/// Handle for one in-flight scene fulfillment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SceneTicket {
    pub session_id: Uuid,
    pub index: usize,
    pub attempt: u32,
}

#[derive(Clone)]
pub struct SessionStore {
    tx: Arc<watch::Sender<Arc<SessionState>>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(SessionState::default()));
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Arc<SessionState> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionState>> {
        self.tx.subscribe()
    }

    fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut out = None;
        self.tx.send_modify(|current| {
            let mut next = SessionState::clone(current);
            out = Some(f(&mut next));
            *current = Arc::new(next);
        });
        match out {
            Some(out) => out,
            None => unreachable!("send_modify always runs its closure"),
        }
    }

    /// Like `update`, but an `Err` leaves the published snapshot untouched and
    /// subscribers are not notified.
    fn try_update<T>(&self, f: impl FnOnce(&mut SessionState) -> Result<T>) -> Result<T> {
        let mut out = None;
        self.tx.send_if_modified(|current| {
            let mut next = SessionState::clone(current);
            let result = f(&mut next);
            let modified = result.is_ok();
            if modified {
                *current = Arc::new(next);
            }
            out = Some(result);
            modified
        });
        match out {
            Some(out) => out,
            None => unreachable!("send_if_modified always runs its closure"),
        }
    }

    /// Start a new run: prior scenes and titles are discarded
    pub fn begin_storyboard(&self, topic: &str, settings: StoryboardSettings) -> Uuid {
        let session_id = Uuid::new_v4();
        self.update(|state| {
            state.session_id = Some(session_id);
            state.topic = topic.to_string();
            state.settings = settings;
            state.scenes.clear();
            state.titles.clear();
            state.is_generating = true;
            state.is_generating_story = true;
            state.last_error = None;
        });
        session_id
    }

    /// Publish the generated structure with every scene still loading
    pub fn publish_story(
        &self,
        session_id: Uuid,
        scenes: Vec<Scene>,
        titles: Vec<Title>,
    ) -> Vec<SceneTicket> {
        let tickets: Vec<SceneTicket> = (0..scenes.len())
            .map(|index| SceneTicket {
                session_id,
                index,
                attempt: 0,
            })
            .collect();

        let published = self.update(|state| {
            if state.session_id != Some(session_id) {
                return false;
            }
            state.scenes = scenes.into_iter().map(GeneratedScene::loading).collect();
            state.titles = titles;
            state.is_generating_story = false;
            true
        });

        if published { tickets } else { Vec::new() }
    }

    /// Drop the whole run after the structure itself failed
    pub fn abandon_story(&self, session_id: Uuid, message: String) {
        self.update(|state| {
            if state.session_id != Some(session_id) {
                return;
            }
            state.scenes.clear();
            state.is_generating = false;
            state.is_generating_story = false;
            state.last_error = Some(message);
        });
    }

    pub fn finish_storyboard(&self, session_id: Uuid) {
        self.update(|state| {
            if state.session_id == Some(session_id) {
                state.is_generating = false;
                state.is_generating_story = false;
            }
        });
    }

    /// Record the outcome of one fulfillment attempt. Returns false when the
    /// ticket is stale and nothing changed.
    pub fn complete_scene(
        &self,
        ticket: SceneTicket,
        outcome: std::result::Result<MediaArtifact, String>,
    ) -> bool {
        self.update(|state| {
            if state.session_id != Some(ticket.session_id) {
                return false;
            }
            let Some(slot) = state.scenes.get_mut(ticket.index) else {
                return false;
            };
            if slot.attempt != ticket.attempt || !slot.is_loading {
                return false;
            }

            slot.is_loading = false;
            match outcome {
                Ok(image) => {
                    slot.image = Some(image);
                    slot.error = None;
                }
                Err(message) => {
                    slot.image = None;
                    slot.error = Some(message);
                }
            }
            true
        })
    }

    /// Put one scene back into loading with a replacement prompt
    pub fn reset_scene(&self, index: usize, image_prompt: &str) -> Result<SceneTicket> {
        self.try_update(|state| {
            let len = state.scenes.len();
            let session_id = state
                .session_id
                .ok_or(StoryforgeError::SceneOutOfRange { index, len })?;
            let slot = state
                .scenes
                .get_mut(index)
                .ok_or(StoryforgeError::SceneOutOfRange { index, len })?;

            slot.scene.image_prompt = image_prompt.to_string();
            slot.image = None;
            slot.error = None;
            slot.is_loading = true;
            slot.attempt += 1;

            Ok(SceneTicket {
                session_id,
                index,
                attempt: slot.attempt,
            })
        })
    }

    pub fn set_regenerating_titles(&self, value: bool) {
        self.update(|state| state.is_regenerating_titles = value);
    }

    pub fn replace_titles(&self, titles: Vec<Title>) {
        self.update(|state| state.titles = titles);
    }

    pub fn record_error(&self, message: String) {
        self.update(|state| state.last_error = Some(message));
    }

    pub fn set_video(&self, video: VideoState) {
        self.update(|state| state.video = video);
    }
}
