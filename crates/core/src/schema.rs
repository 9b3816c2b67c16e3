//! Shapes exchanged with the generative service.
//!
//! Everything the service is asked to return is declared here, both as Rust
//! types and as the JSON response schemas sent alongside the request.

use std::ops::RangeInclusive;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Result, StoryforgeError};

pub const IMAGE_PROMPT_PREFIX: &str = "A hyper-realistic, documentary-style image. ";
pub const I2V_PROMPT_SUFFIX: &str = " There is no slow motion, and the scene unfolds quickly.";

pub const TITLE_COUNT: usize = 10;
pub const SCENE_COUNT_RANGE: RangeInclusive<usize> = 1..=20;
pub const DEFAULT_SCENE_COUNT: usize = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageModel {
    #[default]
    Fast,
    Pro,
}

impl ImageModel {
    pub fn model_id(&self) -> &'static str {
        match self {
            ImageModel::Fast => "gemini-2.5-flash-image",
            ImageModel::Pro => "gemini-3-pro-image-preview",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ImageModel::Fast => "Nano Banana",
            ImageModel::Pro => "Nano Banana Pro",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    Square,
    Portrait,
    Landscape,
    Vertical,
    #[default]
    Widescreen,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Vertical => "9:16",
            AspectRatio::Widescreen => "16:9",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoModel {
    #[default]
    Fast,
    Quality,
}

impl VideoModel {
    pub fn model_id(&self) -> &'static str {
        match self {
            VideoModel::Fast => "veo-3.1-fast-generate-preview",
            VideoModel::Quality => "veo-3.1-generate-preview",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoAspectRatio {
    #[default]
    Widescreen,
    Vertical,
}

impl VideoAspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoAspectRatio::Widescreen => "16:9",
            VideoAspectRatio::Vertical => "9:16",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoResolution {
    #[default]
    Hd,
    FullHd,
}

impl VideoResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoResolution::Hd => "720p",
            VideoResolution::FullHd => "1080p",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub scene_number: u32,
    pub description: String,
    pub image_prompt: String,
    pub i2v_prompt: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Title {
    pub english: String,
    pub localized: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryStructure {
    pub scenes: Vec<Scene>,
    #[serde(default)]
    pub titles: Vec<Title>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TitleList {
    #[serde(default)]
    pub titles: Vec<Title>,
}

/// Image attached to requests to keep the subject consistent across scenes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceImage {
    pub mime_type: String,
    pub data_base64: String,
}

impl ReferenceImage {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data_base64: STANDARD.encode(bytes),
        }
    }

    /// Accepts either a `data:<mime>;base64,<payload>` URL or a bare payload
    pub fn from_data_url(value: &str) -> Result<Self> {
        let (mime_type, payload) = match value.split_once(',') {
            Some((header, payload)) => {
                let mime = header
                    .strip_prefix("data:")
                    .and_then(|rest| rest.strip_suffix(";base64"))
                    .ok_or_else(|| {
                        StoryforgeError::invalid_input("reference image is not a base64 data URL")
                    })?;
                (mime.to_string(), payload)
            }
            None => ("image/jpeg".to_string(), value),
        };

        STANDARD.decode(payload)?;
        Ok(Self {
            mime_type,
            data_base64: payload.to_string(),
        })
    }
}

/// A generated image or video held in memory for the session
#[derive(Clone, PartialEq, Eq)]
pub struct MediaArtifact {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for MediaArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaArtifact")
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .finish()
    }
}

impl MediaArtifact {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.data))
    }

    pub fn file_extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "video/mp4" => "mp4",
            "video/webm" => "webm",
            _ => "bin",
        }
    }
}

/// One video generation request, submitted once and resolved by polling
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoJob {
    pub model: VideoModel,
    pub prompt: String,
    pub aspect_ratio: VideoAspectRatio,
    pub resolution: VideoResolution,
    pub reference_image: Option<ReferenceImage>,
}

pub fn validate_scene_count(scene_count: usize) -> Result<()> {
    if SCENE_COUNT_RANGE.contains(&scene_count) {
        Ok(())
    } else {
        Err(StoryforgeError::invalid_input(format!(
            "scene count must be between {} and {}, got {scene_count}",
            SCENE_COUNT_RANGE.start(),
            SCENE_COUNT_RANGE.end()
        )))
    }
}

/// Prepend the consistency prefix, never stacking it
pub fn apply_image_prefix(prompt: &str) -> String {
    let mut body = prompt.trim_start();
    while let Some(rest) = body.strip_prefix(IMAGE_PROMPT_PREFIX.trim_end()) {
        body = rest.trim_start();
    }
    format!("{IMAGE_PROMPT_PREFIX}{body}")
}

/// Append the pacing clause, never stacking it
pub fn apply_i2v_suffix(prompt: &str) -> String {
    let mut body = prompt.trim_end();
    while let Some(rest) = body.strip_suffix(I2V_PROMPT_SUFFIX.trim_start()) {
        body = rest.trim_end();
    }
    format!("{body}{I2V_PROMPT_SUFFIX}")
}

fn title_item_schema(narrative_language: &str) -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "english": { "type": "STRING" },
            "localized": {
                "type": "STRING",
                "description": format!("The same title in {narrative_language}."),
            },
        },
        "required": ["english", "localized"],
    })
}

pub fn story_response_schema(scene_count: usize, narrative_language: &str) -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "scenes": {
                "type": "ARRAY",
                "description": format!("A list of exactly {scene_count} scenes forming a complete story."),
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "sceneNumber": { "type": "INTEGER" },
                        "description": {
                            "type": "STRING",
                            "description": format!("{narrative_language} description."),
                        },
                        "imagePrompt": {
                            "type": "STRING",
                            "description": "Detailed visual description in English.",
                        },
                        "i2vPrompt": {
                            "type": "STRING",
                            "description": "Technical motion prompt in English.",
                        },
                    },
                    "required": ["sceneNumber", "description", "imagePrompt", "i2vPrompt"],
                },
            },
            "titles": {
                "type": "ARRAY",
                "description": format!("Exactly {TITLE_COUNT} YouTube SEO titles."),
                "items": title_item_schema(narrative_language),
            },
        },
        "required": ["scenes", "titles"],
    })
}

pub fn titles_response_schema(narrative_language: &str) -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "titles": {
                "type": "ARRAY",
                "description": format!("Exactly {TITLE_COUNT} YouTube SEO titles."),
                "items": title_item_schema(narrative_language),
            },
        },
        "required": ["titles"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_tables_are_stable() {
        assert_eq!(ImageModel::Fast.model_id(), "gemini-2.5-flash-image");
        assert_eq!(ImageModel::Pro.model_id(), "gemini-3-pro-image-preview");
        assert_eq!(VideoModel::Fast.model_id(), "veo-3.1-fast-generate-preview");
        assert_eq!(VideoModel::Quality.model_id(), "veo-3.1-generate-preview");
    }

    #[test]
    fn aspect_ratios_render_as_wire_strings() {
        let all = [
            AspectRatio::Square,
            AspectRatio::Portrait,
            AspectRatio::Landscape,
            AspectRatio::Vertical,
            AspectRatio::Widescreen,
        ];
        let rendered: Vec<_> = all.iter().map(AspectRatio::as_str).collect();
        assert_eq!(rendered, ["1:1", "3:4", "4:3", "9:16", "16:9"]);
        assert_eq!(VideoAspectRatio::Vertical.as_str(), "9:16");
        assert_eq!(VideoResolution::FullHd.as_str(), "1080p");
    }

    #[test]
    fn image_prefix_is_applied_once() {
        let once = apply_image_prefix("A lighthouse at dusk");
        assert_eq!(once, format!("{IMAGE_PROMPT_PREFIX}A lighthouse at dusk"));
        assert_eq!(apply_image_prefix(&once), once);
        assert_eq!(once.matches(IMAGE_PROMPT_PREFIX.trim_end()).count(), 1);
    }

    #[test]
    fn i2v_suffix_is_applied_once() {
        let once = apply_i2v_suffix("Camera pushes in slowly.");
        assert!(once.ends_with(I2V_PROMPT_SUFFIX));
        assert_eq!(apply_i2v_suffix(&once), once);
        assert_eq!(once.matches(I2V_PROMPT_SUFFIX.trim_start()).count(), 1);
    }

    #[test]
    fn scene_count_bounds() {
        assert!(validate_scene_count(1).is_ok());
        assert!(validate_scene_count(20).is_ok());
        assert!(validate_scene_count(0).is_err());
        assert!(validate_scene_count(21).is_err());
    }

    #[test]
    fn scene_uses_camel_case_wire_names() {
        let scene: Scene = serde_json::from_value(json!({
            "sceneNumber": 2,
            "description": "설명",
            "imagePrompt": "a keeper climbs the stairs",
            "i2vPrompt": "handheld tracking shot",
        }))
        .unwrap();
        assert_eq!(scene.scene_number, 2);
        assert_eq!(scene.i2v_prompt, "handheld tracking shot");
    }

    #[test]
    fn story_schema_mentions_requested_count() {
        let schema = story_response_schema(7, "Korean");
        let description = schema["properties"]["scenes"]["description"]
            .as_str()
            .unwrap();
        assert!(description.contains("exactly 7 scenes"));
        assert_eq!(schema["required"], json!(["scenes", "titles"]));
    }

    #[test]
    fn reference_image_accepts_data_urls() {
        let image = ReferenceImage::from_bytes("image/png", b"png-bytes");
        let url = format!("data:{};base64,{}", image.mime_type, image.data_base64);

        let parsed = ReferenceImage::from_data_url(&url).unwrap();
        assert_eq!(parsed, image);

        let bare = ReferenceImage::from_data_url(&image.data_base64).unwrap();
        assert_eq!(bare.mime_type, "image/jpeg");
        assert!(ReferenceImage::from_data_url("data:image/png,not-base64").is_err());
    }

    #[test]
    fn artifact_renders_data_url() {
        let artifact = MediaArtifact::new("image/png", vec![1, 2, 3]);
        assert_eq!(artifact.to_data_url(), "data:image/png;base64,AQID");
        assert_eq!(artifact.file_extension(), "png");
    }
}
