//! Scripted generative service for driving the pipeline without a network.
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::json;
use storyforge_core::{
    ApiKey, Clock, CredentialGate, CredentialStore, GenerationClient, MediaArtifact,
    MemoryCredentialStore, Result, ServiceConfig, StoryboardOrchestrator, StoryforgeError,
    VideoJob,
    service::{ContentRequest, ContentResponse, GenerativeService, Part, VideoOperation},
};

/// How the fake answers one image prompt
#[derive(Clone, Debug)]
pub struct ImageRule {
    pub needle: String,
    pub delay: Duration,
    pub fail: Option<String>,
}

#[derive(Default)]
pub struct FakeService {
    story: Mutex<Option<std::result::Result<String, String>>>,
    titles: Mutex<VecDeque<std::result::Result<String, String>>>,
    image_rules: Mutex<Vec<ImageRule>>,
    video_reports: Mutex<VecDeque<VideoOperation>>,
    story_calls: AtomicUsize,
    title_calls: AtomicUsize,
    image_calls: AtomicUsize,
    ping_calls: AtomicUsize,
    video_submits: AtomicUsize,
    video_polls: AtomicUsize,
    media_fetches: AtomicUsize,
    completed_prompts: Mutex<Vec<String>>,
    last_story_request: Mutex<Option<ContentRequest>>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_story(self, json: impl Into<String>) -> Self {
        *self.story.lock().unwrap() = Some(Ok(json.into()));
        self
    }

    pub fn with_story_error(self, message: impl Into<String>) -> Self {
        *self.story.lock().unwrap() = Some(Err(message.into()));
        self
    }

    /// Make every later story request fail
    pub fn fail_story(&self, message: &str) {
        *self.story.lock().unwrap() = Some(Err(message.to_string()));
    }

    pub fn with_titles(self, json: impl Into<String>) -> Self {
        self.titles.lock().unwrap().push_back(Ok(json.into()));
        self
    }

    pub fn with_titles_error(self, message: impl Into<String>) -> Self {
        self.titles.lock().unwrap().push_back(Err(message.into()));
        self
    }

    /// Prompts containing `needle` succeed after `delay`
    pub fn with_image_delay(self, needle: &str, delay: Duration) -> Self {
        self.image_rules.lock().unwrap().push(ImageRule {
            needle: needle.to_string(),
            delay,
            fail: None,
        });
        self
    }

    /// Prompts containing `needle` fail after `delay`
    pub fn with_image_failure(self, needle: &str, delay: Duration, message: &str) -> Self {
        self.image_rules.lock().unwrap().push(ImageRule {
            needle: needle.to_string(),
            delay,
            fail: Some(message.to_string()),
        });
        self
    }

    /// Drop every image rule so later prompts succeed at once
    pub fn clear_image_rules(&self) {
        self.image_rules.lock().unwrap().clear();
    }

    pub fn with_video_reports(self, reports: Vec<VideoOperation>) -> Self {
        self.video_reports.lock().unwrap().extend(reports);
        self
    }

    pub fn story_calls(&self) -> usize {
        self.story_calls.load(Ordering::SeqCst)
    }

    pub fn title_calls(&self) -> usize {
        self.title_calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    pub fn video_polls(&self) -> usize {
        self.video_polls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.story_calls()
            + self.title_calls()
            + self.image_calls()
            + self.ping_calls.load(Ordering::SeqCst)
            + self.video_submits.load(Ordering::SeqCst)
            + self.video_polls()
            + self.media_fetches.load(Ordering::SeqCst)
    }

    /// Image prompts in the order their responses were produced
    pub fn completed_prompts(&self) -> Vec<String> {
        self.completed_prompts.lock().unwrap().clone()
    }

    pub fn last_story_request(&self) -> Option<ContentRequest> {
        self.last_story_request.lock().unwrap().clone()
    }

    fn image_rule(&self, prompt: &str) -> Option<ImageRule> {
        self.image_rules
            .lock()
            .unwrap()
            .iter()
            .find(|rule| prompt.contains(&rule.needle))
            .cloned()
    }

    async fn answer_image(&self, prompt: String) -> Result<ContentResponse> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        let rule = self.image_rule(&prompt);

        if let Some(rule) = &rule
            && !rule.delay.is_zero()
        {
            tokio::time::sleep(rule.delay).await;
        }
        self.completed_prompts.lock().unwrap().push(prompt.clone());

        match rule.and_then(|rule| rule.fail) {
            Some(message) => Err(StoryforgeError::Service {
                status: 500,
                message,
            }),
            None => Ok(ContentResponse {
                parts: vec![Part::InlineData {
                    mime_type: "image/png".into(),
                    data_base64: STANDARD.encode(prompt.as_bytes()),
                }],
            }),
        }
    }
}

fn scripted(reply: Option<std::result::Result<String, String>>) -> Result<ContentResponse> {
    match reply {
        Some(Ok(text)) => Ok(ContentResponse::from_text(text)),
        Some(Err(message)) => Err(StoryforgeError::generation(message)),
        None => Ok(ContentResponse::default()),
    }
}

#[async_trait]
impl GenerativeService for FakeService {
    async fn generate_content(
        &self,
        _key: &ApiKey,
        _model: &str,
        request: &ContentRequest,
    ) -> Result<ContentResponse> {
        if request.image_aspect_ratio.is_some() {
            return self.answer_image(request.prompt_text()).await;
        }

        let is_story = request
            .response_schema
            .as_ref()
            .is_some_and(|schema| schema.pointer("/properties/scenes").is_some());

        if is_story {
            self.story_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_story_request.lock().unwrap() = Some(request.clone());
            let reply = self.story.lock().unwrap().clone();
            scripted(reply)
        } else if request.response_schema.is_some() {
            self.title_calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.titles.lock().unwrap().pop_front();
            scripted(reply)
        } else {
            self.ping_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ContentResponse::from_text("pong"))
        }
    }

    async fn submit_video(&self, _key: &ApiKey, _job: &VideoJob) -> Result<VideoOperation> {
        self.video_submits.fetch_add(1, Ordering::SeqCst);
        Ok(VideoOperation::pending("models/veo/operations/fake"))
    }

    async fn get_video_operation(
        &self,
        _key: &ApiKey,
        operation: &VideoOperation,
    ) -> Result<VideoOperation> {
        self.video_polls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .video_reports
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| VideoOperation::pending(operation.name.clone())))
    }

    async fn fetch_media(&self, _key: &ApiKey, uri: &str) -> Result<MediaArtifact> {
        self.media_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(MediaArtifact::new("video/mp4", uri.as_bytes().to_vec()))
    }
}

/// Clock that returns immediately and records every requested wait
#[derive(Default)]
pub struct InstantClock {
    pub sleeps: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Clock for InstantClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

pub fn scene_json(number: u32, subject: &str) -> serde_json::Value {
    json!({
        "sceneNumber": number,
        "description": format!("장면 {number}"),
        "imagePrompt": format!("{subject} shot {number}"),
        "i2vPrompt": format!("{subject} motion {number}"),
    })
}

pub fn titles_json(count: usize, tag: &str) -> Vec<serde_json::Value> {
    (0..count)
        .map(|i| {
            json!({
                "english": format!("{tag} title {i}"),
                "localized": format!("{tag} 제목 {i}"),
            })
        })
        .collect()
}

/// Story payload with `count` scenes whose prompts are `"<subject> shot <n>"`
pub fn story_json(count: u32, subject: &str) -> String {
    let scenes: Vec<_> = (1..=count).map(|n| scene_json(n, subject)).collect();
    json!({ "scenes": scenes, "titles": titles_json(10, "story") }).to_string()
}

pub fn title_list_json(tag: &str) -> String {
    json!({ "titles": titles_json(10, tag) }).to_string()
}

pub struct Harness {
    pub service: Arc<FakeService>,
    pub credentials: Arc<MemoryCredentialStore>,
    pub clock: Arc<InstantClock>,
    pub orchestrator: StoryboardOrchestrator,
}

pub fn harness(service: FakeService, key: Option<&str>) -> Harness {
    let service = Arc::new(service);
    let credentials = Arc::new(match key {
        Some(key) => MemoryCredentialStore::with_key(ApiKey::new(key).unwrap()),
        None => MemoryCredentialStore::new(),
    });
    let clock = Arc::new(InstantClock::default());
    let store: Arc<dyn CredentialStore> = credentials.clone();

    let client = GenerationClient::with_clock(
        service.clone(),
        store.clone(),
        ServiceConfig::default(),
        clock.clone(),
    );
    let orchestrator = StoryboardOrchestrator::new(Arc::new(client), CredentialGate::new(store));

    Harness {
        service,
        credentials,
        clock,
        orchestrator,
    }
}
