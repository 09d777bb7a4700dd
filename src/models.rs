use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ModelError;
use crate::settings::AppConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelResponse {
    pub content: String,
    pub model: String,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, req: ModelRequest) -> Result<ModelResponse, ModelError>;
}

/// Google Generative Language API (`models/{model}:generateContent`).
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(
        base_url: &url::Url,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, ModelError> {
        Self::new(&cfg.base_url, cfg.api_key.clone(), cfg.request_timeout)
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: [RequestContent<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: [RequestPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<u16>,
    message: Option<String>,
    status: Option<String>,
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, req: ModelRequest) -> Result<ModelResponse, ModelError> {
        let Some(key) = &self.api_key else {
            return Err(ModelError::MissingCredential);
        };
        let url = format!("{}/models/{}:generateContent", self.base_url, req.model);
        let body = GenerateContentRequest {
            contents: [RequestContent {
                role: "user",
                parts: [RequestPart { text: &req.prompt }],
            }],
        };
        debug!(
            model = %req.model,
            prompt_chars = req.prompt.len(),
            "calling generateContent"
        );
        let resp = self
            .http
            .post(url)
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &raw));
        }

        let v: GenerateContentResponse = resp.json().await?;
        let candidate = v
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidPayload("response contained no candidates".into()))?;
        let texts: Vec<String> = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if texts.is_empty() {
            return Err(ModelError::InvalidPayload(format!(
                "candidate has no text (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(ModelResponse {
            content: texts.concat(),
            model: v.model_version.unwrap_or(req.model),
        })
    }
}

fn status_error(http_status: u16, raw: &str) -> ModelError {
    match serde_json::from_str::<ErrorEnvelope>(raw) {
        Ok(env) => ModelError::Status {
            code: env.error.code.unwrap_or(http_status),
            status: env.error.status,
            message: env.error.message.unwrap_or_default(),
        },
        Err(_) => ModelError::Status {
            code: http_status,
            status: None,
            message: raw.trim().to_string(),
        },
    }
}
