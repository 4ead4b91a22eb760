//! OpenAI-compatible chat completion provider (`/v1/chat/completions`).
//!
//! Covers OpenAI, OpenAI-compatible local servers (Ollama, LM Studio…), and
//! hosted alternatives. All wire types are private to this module — callers
//! only see the engine contract. The system prompt instructs the model to
//! reply with a single JSON object `{answer, company_ids, risk_ids}`; the
//! first JSON object found in the completion text is parsed, so models that
//! wrap their output in prose or code fences still work.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::engine::{EngineReply, EngineRequest, ProviderError};

const SYSTEM_PROMPT: &str = "You are a financial research assistant answering questions about \
companies and their risk factors. Reply with exactly one JSON object and nothing else: \
{\"answer\": \"<your answer>\", \"company_ids\": [\"<referenced company ids>\"], \
\"risk_ids\": [\"<referenced risk factor ids>\"]}. Reference only entity ids you were \
given in the conversation; use empty arrays when nothing was referenced.";

// ── Public provider ───────────────────────────────────────────────────────────

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions`.
///
/// Constructed once at startup, then cheaply cloned because
/// `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// Build a provider from config values and an optional API key.
    ///
    /// `api_key` is `None` for keyless local models. When present it is sent
    /// as `Authorization: Bearer <key>` on every request.
    pub fn new(
        api_base_url: String,
        model: String,
        temperature: f32,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, api_base_url, model, temperature, api_key })
    }

    /// One round trip: conversation context and question in, parsed reply out.
    pub async fn answer(&self, request: &EngineRequest) -> Result<EngineReply, ProviderError> {
        let mut messages = vec![Message {
            role: "system".to_string(),
            content: SYSTEM_PROMPT.to_string(),
        }];
        for turn in &request.context {
            messages.push(Message { role: "user".to_string(), content: turn.question.clone() });
            messages.push(Message { role: "assistant".to_string(), content: turn.answer.clone() });
        }
        messages.push(Message { role: "user".to_string(), content: request.question.clone() });

        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(self.temperature),
        };

        debug!(
            model = %payload.model,
            context_turns = request.context.len(),
            "sending engine request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full engine request payload");
        }

        let mut req = self.client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "engine HTTP request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;

        let response = check_status(response).await?;

        let parsed = response.json::<ChatCompletionResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize engine response");
            ProviderError::Request(format!("failed to parse response body: {e}"))
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::Request("empty or missing content in response".into()))?;

        parse_reply(&text)
    }
}

/// Extract and parse the JSON reply object from the completion text.
fn parse_reply(text: &str) -> Result<EngineReply, ProviderError> {
    let json = extract_json_object(text).ok_or_else(|| {
        ProviderError::MalformedReply(format!("no JSON object in completion: {text}"))
    })?;
    let body: ReplyBody = serde_json::from_str(json)
        .map_err(|e| ProviderError::MalformedReply(format!("invalid reply JSON: {e}")))?;
    if body.answer.trim().is_empty() {
        return Err(ProviderError::MalformedReply("reply has an empty answer".into()));
    }
    Ok(EngineReply {
        answer: body.answer,
        company_ids: body.company_ids.into_iter().collect(),
        risk_ids: body.risk_ids.into_iter().collect(),
    })
}

/// Return the first balanced `{…}` block in `text`, respecting strings.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Shape of the JSON object the system prompt asks the model to produce.
#[derive(Debug, Deserialize)]
struct ReplyBody {
    answer: String,
    #[serde(default)]
    company_ids: Vec<String>,
    #[serde(default)]
    risk_ids: Vec<String>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = env
            .error
            .code
            .map(|v| match v {
                serde_json::Value::String(s) => format!(" [code={s}]"),
                other => format!(" [code={other}]"),
            })
            .unwrap_or_default();
        format!("HTTP {status}{code}: {}", env.error.message)
    } else {
        format!("HTTP {status}: {body}")
    };

    error!(%status, %message, "engine request returned HTTP error");
    Err(ProviderError::Request(message))
}
