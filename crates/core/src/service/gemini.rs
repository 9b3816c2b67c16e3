use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::{
    config::ServiceConfig,
    credential::ApiKey,
    error::{Result, StoryforgeError},
    schema::{MediaArtifact, VideoJob},
    service::{ContentRequest, ContentResponse, GenerativeService, Part, VideoOperation},
};

const API_KEY_HEADER: &str = "x-goog-api-key";
const DEFAULT_VIDEO_MIME: &str = "video/mp4";

/// REST client for the Gemini and Veo endpoints
#[derive(Clone)]
pub struct GeminiService {
    http: reqwest::Client,
    base_url: String,
}

impl GeminiService {
    pub fn new(config: &ServiceConfig) -> Self {
        Self::with_client(reqwest::Client::new(), &config.base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    contents: Vec<WireContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
}

#[derive(Serialize)]
struct WireContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePart<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<WireBlob<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireBlob<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<[&'static str; 1]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: &'static str,
}

impl<'a> From<&'a Part> for WirePart<'a> {
    fn from(part: &'a Part) -> Self {
        match part {
            Part::Text(text) => WirePart {
                text: Some(text.as_str()),
                inline_data: None,
            },
            Part::InlineData {
                mime_type,
                data_base64,
            } => WirePart {
                text: None,
                inline_data: Some(WireBlob {
                    mime_type: mime_type.as_str(),
                    data: data_base64.as_str(),
                }),
            },
        }
    }
}

impl<'a> From<&'a ContentRequest> for GenerateContentBody<'a> {
    fn from(request: &'a ContentRequest) -> Self {
        let generation_config = match (&request.response_schema, request.image_aspect_ratio) {
            (None, None) => None,
            (schema, aspect_ratio) => Some(GenerationConfig {
                response_mime_type: schema.as_ref().map(|_| "application/json"),
                response_schema: schema.as_ref(),
                response_modalities: aspect_ratio.map(|_| ["IMAGE"]),
                image_config: aspect_ratio.map(|ratio| ImageConfig {
                    aspect_ratio: ratio.as_str(),
                }),
            }),
        };

        Self {
            contents: vec![WireContent {
                role: Some("user"),
                parts: request.parts.iter().map(WirePart::from).collect(),
            }],
            system_instruction: request.system_instruction.as_deref().map(|text| WireContent {
                role: None,
                parts: vec![WirePart {
                    text: Some(text),
                    inline_data: None,
                }],
            }),
            generation_config,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatePart {
    text: Option<String>,
    inline_data: Option<CandidateBlob>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateBlob {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct PredictBody<'a> {
    instances: [VideoInstance<'a>; 1],
    parameters: VideoParameters,
}

#[derive(Serialize)]
struct VideoInstance<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<VideoImage<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoImage<'a> {
    bytes_base64_encoded: &'a str,
    mime_type: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoParameters {
    aspect_ratio: &'static str,
    resolution: &'static str,
    sample_count: u32,
}

#[derive(Deserialize)]
struct OperationStatus {
    name: String,
    #[serde(default)]
    done: bool,
    response: Option<OperationResponse>,
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Deserialize)]
struct GeneratedSample {
    video: Option<SampleVideo>,
}

#[derive(Deserialize)]
struct SampleVideo {
    uri: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

impl From<OperationStatus> for VideoOperation {
    fn from(status: OperationStatus) -> Self {
        let video_uri = status
            .response
            .and_then(|r| r.generate_video_response)
            .and_then(|r| r.generated_samples.into_iter().next())
            .and_then(|sample| sample.video)
            .and_then(|video| video.uri);

        VideoOperation {
            name: status.name,
            done: status.done,
            video_uri,
            error: status.error.map(|e| e.message),
        }
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
            .map(|envelope| envelope.error.message)
            .unwrap_or(body);
        return Err(StoryforgeError::Service {
            status: status.as_u16(),
            message,
        });
    }

    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl GenerativeService for GeminiService {
    #[instrument(skip(self, key, request), fields(parts = request.parts.len()))]
    async fn generate_content(
        &self,
        key: &ApiKey,
        model: &str,
        request: &ContentRequest,
    ) -> Result<ContentResponse> {
        let response = self
            .http
            .post(self.model_url(model, "generateContent"))
            .header(API_KEY_HEADER, key.expose())
            .json(&GenerateContentBody::from(request))
            .send()
            .await?;

        let body: GenerateContentResponse = read_json(response).await?;

        if body.candidates.is_empty()
            && let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason)
        {
            return Err(StoryforgeError::generation(format!(
                "request was blocked: {reason}"
            )));
        }

        let parts = body
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts)
            .unwrap_or_default()
            .into_iter()
            .filter(|part| !part.thought)
            .filter_map(|part| match (part.inline_data, part.text) {
                (Some(blob), _) => Some(Part::InlineData {
                    mime_type: blob.mime_type,
                    data_base64: blob.data,
                }),
                (None, Some(text)) => Some(Part::Text(text)),
                (None, None) => None,
            })
            .collect::<Vec<_>>();

        debug!(parts = parts.len(), "content generated");
        Ok(ContentResponse { parts })
    }

    #[instrument(skip(self, key, job), fields(model = job.model.model_id()))]
    async fn submit_video(&self, key: &ApiKey, job: &VideoJob) -> Result<VideoOperation> {
        let body = PredictBody {
            instances: [VideoInstance {
                prompt: &job.prompt,
                image: job.reference_image.as_ref().map(|image| VideoImage {
                    bytes_base64_encoded: &image.data_base64,
                    mime_type: &image.mime_type,
                }),
            }],
            parameters: VideoParameters {
                aspect_ratio: job.aspect_ratio.as_str(),
                resolution: job.resolution.as_str(),
                sample_count: 1,
            },
        };

        let response = self
            .http
            .post(self.model_url(job.model.model_id(), "predictLongRunning"))
            .header(API_KEY_HEADER, key.expose())
            .json(&body)
            .send()
            .await?;

        let status: OperationStatus = read_json(response).await?;
        debug!(operation = %status.name, "video job submitted");
        Ok(status.into())
    }

    #[instrument(skip(self, key, operation), fields(operation = %operation.name))]
    async fn get_video_operation(
        &self,
        key: &ApiKey,
        operation: &VideoOperation,
    ) -> Result<VideoOperation> {
        let response = self
            .http
            .get(format!("{}/{}", self.base_url, operation.name))
            .header(API_KEY_HEADER, key.expose())
            .send()
            .await?;

        let status: OperationStatus = read_json(response).await?;
        Ok(status.into())
    }

    #[instrument(skip(self, key))]
    async fn fetch_media(&self, key: &ApiKey, uri: &str) -> Result<MediaArtifact> {
        let response = self
            .http
            .get(uri)
            .header(API_KEY_HEADER, key.expose())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoryforgeError::Service {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .filter(|value| value.starts_with("video/"))
            .unwrap_or_else(|| DEFAULT_VIDEO_MIME.to_string());

        let data = response.bytes().await?.to_vec();
        debug!(bytes = data.len(), "media fetched");
        Ok(MediaArtifact::new(mime_type, data))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::AspectRatio;

    #[test]
    fn structured_request_declares_json_schema() {
        let schema = json!({"type": "OBJECT"});
        let request = ContentRequest::text("Topic: tides")
            .with_system_instruction("be brief")
            .with_response_schema(schema.clone());

        let body = serde_json::to_value(GenerateContentBody::from(&request)).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [{"role": "user", "parts": [{"text": "Topic: tides"}]}],
                "systemInstruction": {"parts": [{"text": "be brief"}]},
                "generationConfig": {
                    "responseMimeType": "application/json",
                    "responseSchema": schema,
                },
            })
        );
    }

    #[test]
    fn image_request_sets_aspect_ratio() {
        let request = ContentRequest::text("a lighthouse")
            .with_image_aspect_ratio(AspectRatio::Vertical);

        let body = serde_json::to_value(GenerateContentBody::from(&request)).unwrap();
        assert_eq!(
            body["generationConfig"],
            json!({"responseModalities": ["IMAGE"], "imageConfig": {"aspectRatio": "9:16"}})
        );
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn inline_parts_serialize_as_blobs() {
        let request = ContentRequest::new(vec![
            Part::InlineData {
                mime_type: "image/jpeg".into(),
                data_base64: "AAEC".into(),
            },
            Part::Text("REFERENCE".into()),
        ]);

        let body = serde_json::to_value(GenerateContentBody::from(&request)).unwrap();
        assert_eq!(
            body["contents"][0]["parts"][0],
            json!({"inlineData": {"mimeType": "image/jpeg", "data": "AAEC"}})
        );
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn operation_status_extracts_first_video_uri() {
        let status: OperationStatus = serde_json::from_value(json!({
            "name": "models/veo/operations/op-1",
            "done": true,
            "response": {"generateVideoResponse": {"generatedSamples": [
                {"video": {"uri": "https://media.example/v1.mp4"}},
                {"video": {"uri": "https://media.example/v2.mp4"}},
            ]}},
        }))
        .unwrap();

        let operation = VideoOperation::from(status);
        assert!(operation.done);
        assert_eq!(
            operation.video_uri.as_deref(),
            Some("https://media.example/v1.mp4")
        );
        assert_eq!(operation.error, None);
    }

    #[test]
    fn pending_operation_defaults_to_not_done() {
        let status: OperationStatus =
            serde_json::from_value(json!({"name": "models/veo/operations/op-2"})).unwrap();
        let operation = VideoOperation::from(status);
        assert!(!operation.done);
        assert_eq!(operation.video_uri, None);
    }
}
