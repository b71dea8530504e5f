//! # oracle::llm — call Claude or OpenAI
//!
//! One prompt per cycle (see [`super::prompt`]), raw text back, fences
//! stripped, verdicts parsed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompt::{build_prompt, parse_verdicts};
use super::{DecisionOracle, DecisionRequest, Verdict};
use crate::error::OracleError;

const SYSTEM_PROMPT: &str =
    "You are a professional trading AI. Always respond with valid JSON only. Use historical performance data to improve decisions.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    Claude,
    OpenAi,
}

pub struct LlmOracle {
    client:   reqwest::Client,
    provider: Provider,
    api_key:  String,
    base_url: String,
}

impl LlmOracle {
    pub fn claude(client: reqwest::Client, api_key: String) -> Self {
        Self { client, provider: Provider::Claude, api_key, base_url: "https://api.anthropic.com".into() }
    }

    pub fn openai(client: reqwest::Client, api_key: String) -> Self {
        Self { client, provider: Provider::OpenAi, api_key, base_url: "https://api.openai.com".into() }
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn call(&self, prompt: &str) -> Result<String, OracleError> {
        match self.provider {
            Provider::Claude => self.call_claude(prompt).await,
            Provider::OpenAi => self.call_openai(prompt).await,
        }
    }
}

fn transport(e: reqwest::Error) -> OracleError {
    if e.is_timeout() { OracleError::Timeout } else { OracleError::Transport(e.to_string()) }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, OracleError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(OracleError::Status { status, body })
}

// ─── Anthropic Claude ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ClaudeRequest<'a> {
    model:      &'a str,
    max_tokens: u32,
    system:     &'a str,
    messages:   Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role:    &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
}

#[derive(Deserialize)]
struct ClaudeContent {
    #[serde(default)]
    text: String,
}

impl LlmOracle {
    async fn call_claude(&self, prompt: &str) -> Result<String, OracleError> {
        let body = ClaudeRequest {
            model:      "claude-3-5-sonnet-20241022",
            max_tokens: 2048,
            system:     SYSTEM_PROMPT,
            messages:   vec![ChatMessage { role: "user", content: prompt }],
        };

        debug!("Calling Claude API...");

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let data: ClaudeResponse = check(resp)
            .await?
            .json()
            .await
            .map_err(|e| OracleError::Parse(format!("Claude response: {e}")))?;

        data.content
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or_else(|| OracleError::Parse("Claude returned empty content".into()))
    }
}

// ─── OpenAI ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model:       &'a str,
    temperature: f32,
    messages:    Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMsg,
}

#[derive(Deserialize)]
struct OpenAiChoiceMsg {
    content: Option<String>,
}

impl LlmOracle {
    async fn call_openai(&self, prompt: &str) -> Result<String, OracleError> {
        let body = OpenAiRequest {
            model:       "gpt-4o",
            temperature: 0.3,
            messages:    vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user",   content: prompt },
            ],
        };

        debug!("Calling OpenAI API...");

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let data: OpenAiResponse = check(resp)
            .await?
            .json()
            .await
            .map_err(|e| OracleError::Parse(format!("OpenAI response: {e}")))?;

        data.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::Parse("OpenAI returned empty content".into()))
    }
}

#[async_trait]
impl DecisionOracle for LlmOracle {
    async fn decide(&self, request: &DecisionRequest) -> Result<Vec<Verdict>, OracleError> {
        let prompt = build_prompt(request);
        let text = self.call(&prompt).await?;
        parse_verdicts(&text)
    }
}
