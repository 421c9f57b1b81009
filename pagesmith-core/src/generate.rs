//! Code generation: brief + attachment manifest in, named file set out.
//!
//! The call is made once. A failure is reported as [`GenerationError`] and
//! never retried here; a bad brief does not improve on a second attempt.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::GenerationError;
use crate::llm::{DEFAULT_ENDPOINT, DEFAULT_MODEL, LlmClient};
use crate::types::{AttachmentRef, GeneratedFileSet, GenerationRequest};

/// Bytes of a textual attachment included verbatim in the prompt.
const EXCERPT_LIMIT: usize = 4096;

/// Anything that can turn a request into a set of site files.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
        attachments: &[AttachmentRef],
    ) -> Result<GeneratedFileSet, GenerationError>;
}

const SYSTEM_PROMPT: &str = r#"You are a code generator for static websites hosted on GitHub Pages.

Rules:
- Build exactly what the brief asks for using plain HTML, CSS and JavaScript.
- No build step, no server code, no package managers. Libraries only via CDN.
- The entry point must be index.html at the repository root.
- Attachments are described in the request but are not published; embed any
  data the app needs from them directly in the generated files.
- Do not write a LICENSE or README.md unless the brief asks for one.

Respond with ONLY a JSON object, no prose and no code fences:
{"files": [{"path": "index.html", "content": "..."}]}"#;

/// Settings for the LLM-backed generator.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub model: String,
    pub endpoint: String,
    pub max_tokens: u32,
    /// Bound on the whole provider call.
    pub timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_tokens: 16_000,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Generator backed by the Claude Messages API.
pub struct LlmCodeGenerator {
    client: LlmClient,
    timeout: Duration,
}

impl LlmCodeGenerator {
    pub fn new(client: LlmClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn from_config(api_key: String, config: &GenerationConfig) -> Self {
        let client = LlmClient::new(api_key)
            .with_model(&config.model)
            .with_endpoint(&config.endpoint)
            .with_max_tokens(config.max_tokens);
        Self::new(client, config.timeout)
    }
}

#[async_trait]
impl CodeGenerator for LlmCodeGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
        attachments: &[AttachmentRef],
    ) -> Result<GeneratedFileSet, GenerationError> {
        let prompt = build_prompt(request, attachments);
        tracing::info!(
            model = %self.client.model(),
            attachments = attachments.len(),
            "Requesting generated site"
        );

        let text = tokio::time::timeout(self.timeout, self.client.complete(SYSTEM_PROMPT, &prompt))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))??;

        let files = parse_files(&text)?;
        tracing::info!(files = files.len(), "Generation complete");
        Ok(files)
    }
}

/// Render the user prompt: brief, checks and an attachment manifest.
pub fn build_prompt(request: &GenerationRequest, attachments: &[AttachmentRef]) -> String {
    let mut prompt = format!(
        "Task: {}\nRound: {}\n\nBrief:\n{}\n",
        request.task,
        request.round,
        request.brief.trim()
    );

    if !request.checks.is_empty() {
        prompt.push_str("\nThe result will be evaluated against these checks:\n");
        for check in &request.checks {
            prompt.push_str(&format!("- {check}\n"));
        }
    }

    if !attachments.is_empty() {
        prompt.push_str("\nAttachments:\n");
        for att in attachments {
            prompt.push_str(&format!(
                "- {} ({}, {} bytes)\n",
                att.name,
                att.media_type,
                att.bytes.len()
            ));
            if let Some(excerpt) = att.excerpt(EXCERPT_LIMIT) {
                prompt.push_str(&format!("```\n{excerpt}\n```\n"));
            }
        }
    }

    prompt
}

#[derive(Deserialize)]
struct Manifest {
    files: Vec<ManifestFile>,
}

#[derive(Deserialize)]
struct ManifestFile {
    path: String,
    content: String,
}

/// Interpret the model's answer.
///
/// A JSON `{"files": [...]}` manifest is preferred. Anything else is taken
/// as the body of a single `index.html`, with surrounding code fences
/// removed.
pub fn parse_files(raw: &str) -> Result<GeneratedFileSet, GenerationError> {
    let body = strip_fences(raw);
    if body.is_empty() {
        return Err(GenerationError::Empty);
    }

    let files = if body.starts_with('{') {
        let manifest: Manifest = serde_json::from_str(body)
            .map_err(|e| GenerationError::Malformed(format!("file manifest: {e}")))?;
        GeneratedFileSet::from_files(
            manifest
                .files
                .into_iter()
                .filter(|f| !f.content.trim().is_empty())
                .map(|f| (f.path, f.content)),
        )?
    } else {
        GeneratedFileSet::from_files([("index.html", body)])?
    };

    if files.is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(files)
}

/// Drop a leading ```lang line and a trailing ``` line.
fn strip_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if text.starts_with("```") {
        text = text.split_once('\n').map_or("", |(_, rest)| rest);
    }
    if let Some(stripped) = text.trim_end().strip_suffix("```") {
        text = stripped;
    }
    text.trim()
}
