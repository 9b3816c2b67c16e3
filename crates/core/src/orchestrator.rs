//! Top-level generation flows.
//!
//! Every entry point passes the credential gate first; a missing key aborts
//! the flow before any state changes or remote calls. Remote failures are
//! caught here and land in the session store as messages, never as panics.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    client::GenerationClient,
    credential::{ApiKey, CredentialGate},
    error::{Result, StoryforgeError},
    schema::{
        AspectRatio, DEFAULT_SCENE_COUNT, ImageModel, ReferenceImage, VideoJob,
        validate_scene_count,
    },
    session::{SceneTicket, SessionStore, StoryboardSettings, VideoState},
};

#[derive(Clone, Debug)]
pub struct StoryboardRequest {
    pub topic: String,
    pub reference_image: Option<ReferenceImage>,
    pub image_model: ImageModel,
    pub aspect_ratio: AspectRatio,
    pub scene_count: usize,
}

impl StoryboardRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            reference_image: None,
            image_model: ImageModel::default(),
            aspect_ratio: AspectRatio::default(),
            scene_count: DEFAULT_SCENE_COUNT,
        }
    }

    pub fn with_scene_count(mut self, scene_count: usize) -> Self {
        self.scene_count = scene_count;
        self
    }

    pub fn with_reference_image(mut self, image: ReferenceImage) -> Self {
        self.reference_image = Some(image);
        self
    }

    pub fn with_image_model(mut self, model: ImageModel) -> Self {
        self.image_model = model;
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The gate asked for a key; nothing was sent and nothing changed
    SkippedMissingCredential,
    Completed { ready: usize, failed: usize },
    /// Story structure failed, so no scenes were kept
    Abandoned { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    SkippedMissingCredential,
    Succeeded,
    Failed { reason: String },
    /// A newer run or attempt replaced the target before the result arrived
    Superseded,
}

pub struct StoryboardOrchestrator {
    client: Arc<GenerationClient>,
    gate: CredentialGate,
    store: SessionStore,
}

impl StoryboardOrchestrator {
    pub fn new(client: Arc<GenerationClient>, gate: CredentialGate) -> Self {
        Self::with_store(client, gate, SessionStore::new())
    }

    pub fn with_store(
        client: Arc<GenerationClient>,
        gate: CredentialGate,
        store: SessionStore,
    ) -> Self {
        Self { client, gate, store }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn gate(&self) -> &CredentialGate {
        &self.gate
    }

    /// Topic to finished storyboard: structure first, then every scene image
    /// concurrently. Returns once each scene has settled.
    #[instrument(skip(self, request), fields(topic = %request.topic, scenes = request.scene_count))]
    pub async fn run_storyboard(&self, request: StoryboardRequest) -> Result<RunOutcome> {
        if !self.gate.ensure() {
            return Ok(RunOutcome::SkippedMissingCredential);
        }
        let topic = validate_topic(&request.topic)?;
        validate_scene_count(request.scene_count)?;

        let settings = StoryboardSettings {
            image_model: request.image_model,
            aspect_ratio: request.aspect_ratio,
        };
        let session_id = self.store.begin_storyboard(topic, settings);

        let story = match self
            .client
            .generate_story_structure(topic, request.reference_image.as_ref(), request.scene_count)
            .await
        {
            Ok(story) => story,
            Err(e) => {
                let reason = e.user_message();
                error!(error = %e, "story structure failed, abandoning run");
                self.store.abandon_story(session_id, reason.clone());
                return Ok(RunOutcome::Abandoned { reason });
            }
        };

        let prompts: Vec<String> = story.scenes.iter().map(|s| s.image_prompt.clone()).collect();
        let tickets = self.store.publish_story(session_id, story.scenes, story.titles);
        info!(scenes = tickets.len(), "story published, fulfilling scene images");

        let results = join_all(
            tickets
                .into_iter()
                .zip(prompts)
                .map(|(ticket, prompt)| self.fulfill_scene(ticket, prompt, settings)),
        )
        .await;

        self.store.finish_storyboard(session_id);

        let outcome = tally(&results);
        info!(?outcome, "storyboard settled");
        Ok(outcome)
    }

    /// Run every failed scene again with its current prompt. The counts in
    /// the outcome cover only the retried scenes.
    #[instrument(skip(self))]
    pub async fn retry_failed_scenes(&self) -> Result<RunOutcome> {
        if !self.gate.ensure() {
            return Ok(RunOutcome::SkippedMissingCredential);
        }

        let state = self.store.snapshot();
        let mut pending = Vec::new();
        for (index, generated) in state.scenes.iter().enumerate() {
            if generated.is_failed() {
                let prompt = generated.scene.image_prompt.clone();
                pending.push((self.store.reset_scene(index, &prompt)?, prompt));
            }
        }
        info!(scenes = pending.len(), "retrying failed scenes");

        let results = join_all(
            pending
                .into_iter()
                .map(|(ticket, prompt)| self.fulfill_scene(ticket, prompt, state.settings)),
        )
        .await;
        Ok(tally(&results))
    }

    /// Retry one scene with a replacement prompt, leaving every other scene
    /// and the titles as they are.
    #[instrument(skip(self, new_prompt))]
    pub async fn regenerate_scene(&self, index: usize, new_prompt: &str) -> Result<ActionOutcome> {
        if !self.gate.ensure() {
            return Ok(ActionOutcome::SkippedMissingCredential);
        }

        let ticket = self.store.reset_scene(index, new_prompt)?;
        let settings = self.store.snapshot().settings;
        Ok(self
            .fulfill_scene(ticket, new_prompt.to_string(), settings)
            .await)
    }

    #[instrument(skip(self))]
    pub async fn regenerate_titles(&self, topic: &str) -> Result<ActionOutcome> {
        if !self.gate.ensure() {
            return Ok(ActionOutcome::SkippedMissingCredential);
        }
        let topic = validate_topic(topic)?;

        self.store.set_regenerating_titles(true);
        let outcome = match self.client.generate_titles(topic).await {
            Ok(titles) => {
                self.store.replace_titles(titles);
                ActionOutcome::Succeeded
            }
            Err(e) => {
                let reason = e.user_message();
                warn!(error = %e, "title regeneration failed, keeping previous titles");
                self.store.record_error(reason.clone());
                ActionOutcome::Failed { reason }
            }
        };
        self.store.set_regenerating_titles(false);
        Ok(outcome)
    }

    /// Run one video job to completion. Calling again after a failure is the
    /// manual retry.
    #[instrument(skip(self, job), fields(model = job.model.model_id()))]
    pub async fn generate_video(&self, job: &VideoJob) -> ActionOutcome {
        if !self.gate.ensure() {
            return ActionOutcome::SkippedMissingCredential;
        }

        self.store.set_video(VideoState::Pending);
        match self.client.generate_video(job).await {
            Ok(video) => {
                info!(bytes = video.data.len(), "video ready");
                self.store.set_video(VideoState::Done(video));
                ActionOutcome::Succeeded
            }
            Err(e) => {
                let reason = e.user_message();
                error!(error = %e, "video generation failed");
                self.store.set_video(VideoState::Failed(reason.clone()));
                ActionOutcome::Failed { reason }
            }
        }
    }

    pub async fn test_connection(&self, candidate: &ApiKey) -> bool {
        self.client.test_connection(candidate).await
    }

    async fn fulfill_scene(
        &self,
        ticket: SceneTicket,
        prompt: String,
        settings: StoryboardSettings,
    ) -> ActionOutcome {
        let result = self
            .client
            .generate_scene_image(settings.image_model, &prompt, settings.aspect_ratio)
            .await;

        let outcome = match &result {
            Ok(_) => ActionOutcome::Succeeded,
            Err(e) => {
                warn!(scene = ticket.index + 1, error = %e, "scene image failed");
                ActionOutcome::Failed {
                    reason: e.user_message(),
                }
            }
        };

        if self
            .store
            .complete_scene(ticket, result.map_err(|e| e.user_message()))
        {
            outcome
        } else {
            debug!(scene = ticket.index + 1, "dropping stale scene completion");
            ActionOutcome::Superseded
        }
    }
}

fn tally(results: &[ActionOutcome]) -> RunOutcome {
    let ready = results
        .iter()
        .filter(|outcome| **outcome == ActionOutcome::Succeeded)
        .count();
    let failed = results
        .iter()
        .filter(|outcome| matches!(outcome, ActionOutcome::Failed { .. }))
        .count();
    RunOutcome::Completed { ready, failed }
}

fn validate_topic(topic: &str) -> Result<&str> {
    let topic = topic.trim();
    if topic.is_empty() {
        return Err(StoryforgeError::invalid_input("Topic must not be empty"));
    }
    Ok(topic)
}
