use super::prompts::{grounded_system_prompt, grounded_user_prompt};
use crate::config::LlmConfig;
use crate::database::models::RetrievedChunk;
use crate::utils::limiters::Limiters;
use anyhow::{bail, Context, Result};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChoiceMessage>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    message: ChoiceMessageContent,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessageContent {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChoiceDelta>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceDelta {
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: i32,
    #[serde(default)]
    completion_tokens: i32,
    #[serde(default)]
    total_tokens: i32,
}

#[derive(Debug, Clone)]
pub struct LlmAnswer {
    pub answer: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub total_tokens: i32,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Delta(String),
    Done(LlmAnswer),
}

/// Calls an OpenAI-compatible chat-completions endpoint with the strict
/// grounded system prompt, temperature pinned to 0 (spec §4.3). Ported
/// from `original_source/server/app/core/llm.py`.
pub struct Answerer {
    client: Client,
    config: LlmConfig,
    limiters: Arc<Limiters>,
}

impl Answerer {
    pub fn new(config: LlmConfig, limiters: Arc<Limiters>) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("failed to build LLM http client");

        Self {
            client,
            config,
            limiters,
        }
    }

    fn messages(question: &str, chunks: &[RetrievedChunk]) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: "system",
                content: grounded_system_prompt(),
            },
            ChatMessage {
                role: "user",
                content: grounded_user_prompt(question, chunks),
            },
        ]
    }

    fn request_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    pub async fn answer(&self, question: &str, chunks: &[RetrievedChunk]) -> Result<LlmAnswer> {
        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.llm_generate.clone(),
            self.limiters.acquire_timeout,
            "llm_generate",
        )
        .await?;
        debug!(wait_ms = wait.as_millis() as u64, op = "llm_generate", "wait_queue");
        let exec_start = Instant::now();

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            temperature: 0.0,
            max_tokens: self.config.max_output_tokens,
            messages: Self::messages(question, chunks),
            stream: false,
            stream_options: None,
        };

        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let response = self
            .request_headers(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .context("failed to call LLM endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("LLM endpoint returned {}: {}", status, body);
        }

        let parsed: ChatCompletionResponse = response.json().await.context("failed to parse LLM response")?;
        debug!(exec_ms = exec_start.elapsed().as_millis() as u64, op = "llm_generate", "exec");

        let answer = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default()
            .trim()
            .to_string();

        let usage = parsed.usage.unwrap_or_default();
        let total_tokens = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.prompt_tokens + usage.completion_tokens
        };

        Ok(LlmAnswer {
            answer,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens,
        })
    }

    pub async fn stream_answer(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>> {
        let permit = tokio::time::timeout(
            self.limiters.acquire_timeout,
            self.limiters.llm_stream.clone().acquire_owned(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("limiter acquire timeout for op=llm_stream"))??;

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            temperature: 0.0,
            max_tokens: self.config.max_output_tokens,
            messages: Self::messages(question, chunks),
            stream: true,
            stream_options: Some(StreamOptions { include_usage: true }),
        };

        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let response = self
            .request_headers(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .context("failed to call LLM endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("LLM endpoint returned {}: {}", status, body);
        }

        let byte_stream = response.bytes_stream();

        let stream = futures::stream::unfold(
            (byte_stream, String::new(), Vec::<String>::new(), Usage::default(), false, permit),
            |(mut byte_stream, mut buffer, mut answer_parts, mut usage, mut finished, permit)| async move {
                if finished {
                    return None;
                }

                loop {
                    if let Some(pos) = buffer.find("\n\n") {
                        let frame = buffer[..pos].to_string();
                        buffer.drain(..pos + 2);

                        for line in frame.lines() {
                            let Some(payload) = line.strip_prefix("data: ") else {
                                continue;
                            };

                            if payload == "[DONE]" {
                                finished = true;
                                let total = if usage.total_tokens > 0 {
                                    usage.total_tokens
                                } else {
                                    usage.prompt_tokens + usage.completion_tokens
                                };
                                let result = LlmAnswer {
                                    answer: answer_parts.join("").trim().to_string(),
                                    input_tokens: usage.prompt_tokens,
                                    output_tokens: usage.completion_tokens,
                                    total_tokens: total,
                                };
                                return Some((
                                    Ok(StreamEvent::Done(result)),
                                    (byte_stream, buffer, answer_parts, usage, finished, permit),
                                ));
                            }

                            if let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(payload) {
                                if let Some(u) = chunk.usage {
                                    usage = u;
                                }
                                if let Some(text) = chunk.choices.first().and_then(|c| c.delta.content.clone()) {
                                    if !text.is_empty() {
                                        answer_parts.push(text.clone());
                                        return Some((
                                            Ok(StreamEvent::Delta(text)),
                                            (byte_stream, buffer, answer_parts, usage, finished, permit),
                                        ));
                                    }
                                }
                            }
                        }
                        continue;
                    }

                    match byte_stream.next().await {
                        Some(Ok(bytes)) => {
                            buffer.push_str(&String::from_utf8_lossy(&bytes));
                        }
                        Some(Err(e)) => {
                            return Some((
                                Err(anyhow::anyhow!("LLM stream error: {e}")),
                                (byte_stream, buffer, answer_parts, usage, true, permit),
                            ));
                        }
                        None => {
                            finished = true;
                            let total = if usage.total_tokens > 0 {
                                usage.total_tokens
                            } else {
                                usage.prompt_tokens + usage.completion_tokens
                            };
                            let result = LlmAnswer {
                                answer: answer_parts.join("").trim().to_string(),
                                input_tokens: usage.prompt_tokens,
                                output_tokens: usage.completion_tokens,
                                total_tokens: total,
                            };
                            return Some((
                                Ok(StreamEvent::Done(result)),
                                (byte_stream, buffer, answer_parts, usage, finished, permit),
                            ));
                        }
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}
