use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::ServiceConfig,
    credential::{ApiKey, CredentialStore},
    error::{Result, StoryforgeError},
    poller::{Clock, TokioClock, VideoJobPoller},
    schema::{
        AspectRatio, ImageModel, MediaArtifact, ReferenceImage, StoryStructure, TITLE_COUNT,
        Title, TitleList, VideoJob, apply_i2v_suffix, apply_image_prefix, story_response_schema,
        titles_response_schema, validate_scene_count,
    },
    service::{ContentRequest, GenerativeService, Part},
};

fn story_system_instruction(scene_count: usize, narrative_language: &str) -> String {
    format!(
        r#"You are an expert Storyboard AI. Create one coherent story told in exactly {scene_count} scenes.

IMPORTANT: When a reference image is provided, you must preserve the subject's clothing, face,
and background elements EXACTLY across all generated prompts, unless specifically instructed to change them.
Maintain visual consistency as a top priority.

Output Constraints:
1. 'sceneNumber': 1-based, sequential.
2. 'description': {narrative_language}.
3. 'imagePrompt': Detailed visual prompt in English.
4. 'i2vPrompt': Technical image-to-video motion prompt in English.
5. 'titles': {TITLE_COUNT} YouTube SEO titles, each in English and {narrative_language}."#
    )
}

/// Performs one remote operation per call.
///
/// The client holds no mutable state; the active key is read from the
/// credential store on every call, so concurrent calls are independent.
pub struct GenerationClient {
    service: Arc<dyn GenerativeService>,
    credentials: Arc<dyn CredentialStore>,
    poller: VideoJobPoller,
    config: ServiceConfig,
}

impl GenerationClient {
    pub fn new(
        service: Arc<dyn GenerativeService>,
        credentials: Arc<dyn CredentialStore>,
        config: ServiceConfig,
    ) -> Self {
        Self::with_clock(service, credentials, config, Arc::new(TokioClock))
    }

    pub fn with_clock(
        service: Arc<dyn GenerativeService>,
        credentials: Arc<dyn CredentialStore>,
        config: ServiceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let poller = VideoJobPoller::new(Arc::clone(&service), clock, config.poll.clone());
        Self {
            service,
            credentials,
            poller,
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn api_key(&self) -> Result<ApiKey> {
        self.credentials
            .get()?
            .ok_or(StoryforgeError::MissingCredential)
    }

    /// Generate the scene list and titles for a topic.
    ///
    /// Either every scene comes back post-processed or the call fails; partial
    /// structures are never returned.
    #[instrument(skip(self, reference_image), fields(with_reference = reference_image.is_some()))]
    pub async fn generate_story_structure(
        &self,
        topic: &str,
        reference_image: Option<&ReferenceImage>,
        scene_count: usize,
    ) -> Result<StoryStructure> {
        validate_scene_count(scene_count)?;
        let key = self.api_key()?;
        let language = &self.config.narrative_language;

        let mut parts = Vec::with_capacity(2);
        match reference_image {
            Some(image) => {
                parts.push(Part::from(image));
                parts.push(Part::Text(format!(
                    "REFERENCE IMAGE PROVIDED. MAINTAIN STYLE AND CHARACTER CONSISTENCY. Topic: {topic}"
                )));
            }
            None => parts.push(Part::Text(format!("Topic: {topic}"))),
        }

        let request = ContentRequest::new(parts)
            .with_system_instruction(story_system_instruction(scene_count, language))
            .with_response_schema(story_response_schema(scene_count, language));

        let response = self
            .service
            .generate_content(&key, &self.config.text_model, &request)
            .await
            .inspect_err(|e| error!(error = %e, "story structure request failed"))
            .map_err(into_generation_failure)?;

        let text = response
            .text()
            .ok_or_else(|| StoryforgeError::generation("Empty response"))?;
        let raw: StoryStructure = serde_json::from_str(&text).map_err(|e| {
            StoryforgeError::generation(format!("Unparsable story structure: {e}"))
        })?;

        let story = normalize_story(raw, scene_count)?;
        info!(scenes = story.scenes.len(), "story structure generated");
        Ok(story)
    }

    #[instrument(skip(self, prompt), fields(model = model.model_id(), aspect = aspect_ratio.as_str()))]
    pub async fn generate_scene_image(
        &self,
        model: ImageModel,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<MediaArtifact> {
        let key = self.api_key()?;
        let request = ContentRequest::text(prompt).with_image_aspect_ratio(aspect_ratio);

        let response = self
            .service
            .generate_content(&key, model.model_id(), &request)
            .await
            .map_err(into_generation_failure)?;

        let image = response
            .first_inline_data()?
            .ok_or_else(|| StoryforgeError::generation("No image generated"))?;
        debug!(bytes = image.data.len(), mime = %image.mime_type, "scene image generated");
        Ok(image)
    }

    #[instrument(skip(self))]
    pub async fn generate_titles(&self, topic: &str) -> Result<Vec<Title>> {
        let key = self.api_key()?;
        let request = ContentRequest::text(format!(
            "Generate {TITLE_COUNT} SEO titles for: {topic}"
        ))
        .with_response_schema(titles_response_schema(&self.config.narrative_language));

        let response = self
            .service
            .generate_content(&key, &self.config.text_model, &request)
            .await
            .map_err(into_generation_failure)?;

        let text = response
            .text()
            .ok_or_else(|| StoryforgeError::generation("Empty response"))?;
        let list: TitleList = serde_json::from_str(&text)
            .map_err(|e| StoryforgeError::generation(format!("Unparsable title list: {e}")))?;

        normalize_titles(list.titles)
    }

    /// Submit a video job, wait for it, then download the result
    #[instrument(skip(self, job), fields(model = job.model.model_id()))]
    pub async fn generate_video(&self, job: &VideoJob) -> Result<MediaArtifact> {
        let key = self.api_key()?;

        let run = async {
            let submitted = self.service.submit_video(&key, job).await?;
            info!(operation = %submitted.name, "video job submitted");
            let uri = self.poller.wait(&key, submitted).await?;
            self.service.fetch_media(&key, &uri).await
        };

        run.await.map_err(into_generation_failure)
    }

    /// Check a candidate key with one minimal request. Never fails.
    pub async fn test_connection(&self, candidate: &ApiKey) -> bool {
        let request = ContentRequest::text("ping");
        match self
            .service
            .generate_content(candidate, &self.config.text_model, &request)
            .await
        {
            Ok(response) => response.text().is_some(),
            Err(e) => {
                warn!(error = %e, "connection test failed");
                false
            }
        }
    }
}

/// Transport and service errors surface as generation failures carrying the
/// underlying message
fn into_generation_failure(e: StoryforgeError) -> StoryforgeError {
    match e {
        StoryforgeError::GenerationFailure { .. } | StoryforgeError::MissingCredential => e,
        other => StoryforgeError::generation(other.to_string()),
    }
}

pub(crate) fn normalize_story(raw: StoryStructure, scene_count: usize) -> Result<StoryStructure> {
    if raw.scenes.len() != scene_count {
        return Err(StoryforgeError::generation(format!(
            "Expected {scene_count} scenes, received {}",
            raw.scenes.len()
        )));
    }

    let mut scenes = raw.scenes;
    scenes.sort_by_key(|scene| scene.scene_number);
    for (index, scene) in scenes.iter_mut().enumerate() {
        scene.scene_number = index as u32 + 1;
        scene.image_prompt = apply_image_prefix(&scene.image_prompt);
        scene.i2v_prompt = apply_i2v_suffix(&scene.i2v_prompt);
    }

    Ok(StoryStructure {
        scenes,
        titles: normalize_titles(raw.titles)?,
    })
}

pub(crate) fn normalize_titles(mut titles: Vec<Title>) -> Result<Vec<Title>> {
    if titles.len() < TITLE_COUNT {
        return Err(StoryforgeError::generation(format!(
            "Expected {TITLE_COUNT} titles, received {}",
            titles.len()
        )));
    }
    titles.truncate(TITLE_COUNT);
    Ok(titles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{I2V_PROMPT_SUFFIX, IMAGE_PROMPT_PREFIX, Scene};

    fn scene(number: u32) -> Scene {
        Scene {
            scene_number: number,
            description: format!("장면 {number}"),
            image_prompt: format!("shot {number}"),
            i2v_prompt: format!("motion {number}"),
        }
    }

    fn titles(count: usize) -> Vec<Title> {
        (0..count)
            .map(|i| Title {
                english: format!("Title {i}"),
                localized: format!("제목 {i}"),
            })
            .collect()
    }

    #[test]
    fn story_is_renumbered_and_affixed() {
        let raw = StoryStructure {
            scenes: vec![scene(3), scene(1), scene(2)],
            titles: titles(12),
        };

        let story = normalize_story(raw, 3).unwrap();
        let numbers: Vec<_> = story.scenes.iter().map(|s| s.scene_number).collect();
        assert_eq!(numbers, [1, 2, 3]);
        assert_eq!(
            story.scenes[0].image_prompt,
            format!("{IMAGE_PROMPT_PREFIX}shot 1")
        );
        assert!(story.scenes[2].i2v_prompt.ends_with(I2V_PROMPT_SUFFIX));
        assert_eq!(story.titles.len(), TITLE_COUNT);
    }

    #[test]
    fn wrong_scene_count_fails_whole_story() {
        let raw = StoryStructure {
            scenes: vec![scene(1), scene(2)],
            titles: titles(10),
        };
        assert!(matches!(
            normalize_story(raw, 3),
            Err(StoryforgeError::GenerationFailure { .. })
        ));
    }

    #[test]
    fn short_title_list_is_rejected() {
        assert!(normalize_titles(titles(9)).is_err());
        assert_eq!(normalize_titles(titles(10)).unwrap().len(), 10);
    }

    #[test]
    fn service_errors_become_generation_failures() {
        let err = into_generation_failure(StoryforgeError::Service {
            status: 503,
            message: "overloaded".into(),
        });
        assert_eq!(err.user_message(), "Service returned 503: overloaded");
        assert!(matches!(
            into_generation_failure(StoryforgeError::MissingCredential),
            StoryforgeError::MissingCredential
        ));
    }

    #[test]
    fn system_instruction_names_count_and_language() {
        let instruction = story_system_instruction(4, "Japanese");
        assert!(instruction.contains("exactly 4 scenes"));
        assert!(instruction.contains("'description': Japanese."));
    }
}
