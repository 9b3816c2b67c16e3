//! Boundary to the remote generative service.
//!
//! [`GenerativeService`] is the only seam through which the crate talks to the
//! network. [`gemini::GeminiService`] implements it over HTTP; tests substitute
//! scripted fakes.

pub mod gemini;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::Value;

use crate::{
    credential::ApiKey,
    error::Result,
    schema::{AspectRatio, MediaArtifact, ReferenceImage, VideoJob},
};

pub use gemini::GeminiService;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Part {
    Text(String),
    InlineData {
        mime_type: String,
        data_base64: String,
    },
}

impl From<&ReferenceImage> for Part {
    fn from(image: &ReferenceImage) -> Self {
        Part::InlineData {
            mime_type: image.mime_type.clone(),
            data_base64: image.data_base64.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContentRequest {
    pub parts: Vec<Part>,
    pub system_instruction: Option<String>,
    /// Asks for a JSON payload matching this schema
    pub response_schema: Option<Value>,
    /// Asks for an image of this shape
    pub image_aspect_ratio: Option<AspectRatio>,
}

impl ContentRequest {
    pub fn new(parts: Vec<Part>) -> Self {
        Self {
            parts,
            ..Default::default()
        }
    }

    pub fn text(prompt: impl Into<String>) -> Self {
        Self::new(vec![Part::Text(prompt.into())])
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_image_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.image_aspect_ratio = Some(aspect_ratio);
        self
    }

    /// Concatenated text of every text part
    pub fn prompt_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                Part::InlineData { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentResponse {
    pub parts: Vec<Part>,
}

impl ContentResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Joined text parts, `None` when the service returned no text at all
    pub fn text(&self) -> Option<String> {
        let text: String = self
            .parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                Part::InlineData { .. } => None,
            })
            .collect();

        if text.trim().is_empty() { None } else { Some(text) }
    }

    /// First inline payload, decoded
    pub fn first_inline_data(&self) -> Result<Option<MediaArtifact>> {
        for part in &self.parts {
            if let Part::InlineData {
                mime_type,
                data_base64,
            } = part
            {
                let data = STANDARD.decode(data_base64)?;
                return Ok(Some(MediaArtifact::new(mime_type.clone(), data)));
            }
        }
        Ok(None)
    }
}

/// Snapshot of a long-running video job as reported by the service
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VideoOperation {
    pub name: String,
    pub done: bool,
    pub video_uri: Option<String>,
    pub error: Option<String>,
}

impl VideoOperation {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait GenerativeService: Send + Sync {
    async fn generate_content(
        &self,
        key: &ApiKey,
        model: &str,
        request: &ContentRequest,
    ) -> Result<ContentResponse>;

    async fn submit_video(&self, key: &ApiKey, job: &VideoJob) -> Result<VideoOperation>;

    async fn get_video_operation(
        &self,
        key: &ApiKey,
        operation: &VideoOperation,
    ) -> Result<VideoOperation>;

    async fn fetch_media(&self, key: &ApiKey, uri: &str) -> Result<MediaArtifact>;
}
