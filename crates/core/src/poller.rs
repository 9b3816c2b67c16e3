use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    config::PollConfig,
    credential::ApiKey,
    error::{Result, StoryforgeError},
    service::{GenerativeService, VideoOperation},
};

/// Source of the waits between status checks
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Polling { attempts: u32 },
    Done { video_uri: String },
    Failed { reason: String },
}

impl JobState {
    /// State implied by the latest report after `attempts` status checks
    pub fn from_report(operation: &VideoOperation, attempts: u32) -> Self {
        if let Some(reason) = &operation.error {
            return JobState::Failed {
                reason: reason.clone(),
            };
        }

        if operation.done {
            return match &operation.video_uri {
                Some(uri) if !uri.is_empty() => JobState::Done {
                    video_uri: uri.clone(),
                },
                _ => JobState::Failed {
                    reason: "Video URI not found".to_string(),
                },
            };
        }

        if attempts == 0 {
            JobState::Submitted
        } else {
            JobState::Polling { attempts }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done { .. } | JobState::Failed { .. })
    }
}

/// Waits for a submitted video job to reach a terminal state.
///
/// Each iteration sleeps for the configured interval and then performs one
/// status check; checks for the same job never overlap.
pub struct VideoJobPoller {
    service: Arc<dyn GenerativeService>,
    clock: Arc<dyn Clock>,
    config: PollConfig,
}

impl VideoJobPoller {
    pub fn new(
        service: Arc<dyn GenerativeService>,
        clock: Arc<dyn Clock>,
        config: PollConfig,
    ) -> Self {
        Self {
            service,
            clock,
            config,
        }
    }

    /// Resolve the job to its media URI
    pub async fn wait(&self, key: &ApiKey, submitted: VideoOperation) -> Result<String> {
        let mut operation = submitted;
        let mut attempts = 0u32;

        loop {
            match JobState::from_report(&operation, attempts) {
                JobState::Done { video_uri } => {
                    info!(operation = %operation.name, attempts, "video job done");
                    return Ok(video_uri);
                }
                JobState::Failed { reason } => {
                    warn!(operation = %operation.name, attempts, %reason, "video job failed");
                    return Err(StoryforgeError::generation(reason));
                }
                state => debug!(operation = %operation.name, ?state, "video job pending"),
            }

            if let Some(max_attempts) = self.config.max_attempts
                && attempts >= max_attempts
            {
                return Err(StoryforgeError::PollExhausted {
                    operation: operation.name,
                    attempts,
                });
            }

            self.clock.sleep(self.config.interval).await;
            operation = self.service.get_video_operation(key, &operation).await?;
            attempts += 1;
        }
    }
}
