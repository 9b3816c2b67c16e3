pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod format;
pub mod orchestrator;
pub mod poller;
pub mod schema;
pub mod service;
pub mod session;

pub use client::GenerationClient;
pub use config::{
    API_KEY_ENV_VAR, PollConfig, ServiceConfig, get_config_dir, get_credential_path,
};
pub use credential::{
    ApiKey, CredentialGate, CredentialStore, FileCredentialStore, MemoryCredentialStore,
};
pub use error::{Result, StoryforgeError};
pub use format::{format_storyboard_readable, scene_file_name};
pub use orchestrator::{ActionOutcome, RunOutcome, StoryboardOrchestrator, StoryboardRequest};
pub use poller::{Clock, JobState, TokioClock, VideoJobPoller};
pub use schema::{
    AspectRatio, ImageModel, MediaArtifact, ReferenceImage, Scene, StoryStructure, Title,
    VideoAspectRatio, VideoJob, VideoModel, VideoResolution,
};
pub use service::{GeminiService, GenerativeService};
pub use session::{GeneratedScene, SessionState, SessionStore, VideoState};
