//! Answer-generation providers.
//!
//! [`OpenAiAnswerer`] calls the chat completions API with the retrieved
//! context as a grounding block. Answer failures never fail a query;
//! the query engine degrades to search-only results with an error note.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use docvault_core::services::AnswerGenerator;

use crate::config::AnswerConfig;

/// Create the configured answer generator, or `None` when disabled.
pub fn create_answerer(config: &AnswerConfig) -> Result<Option<Box<dyn AnswerGenerator>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Box::new(OpenAiAnswerer::new(config)?))),
        other => bail!("Unknown answer provider: {}", other),
    }
}

pub struct OpenAiAnswerer {
    client: reqwest::Client,
    model: String,
    max_retries: u32,
}

impl OpenAiAnswerer {
    pub fn new(config: &AnswerConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("answer.model required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiAnswerer {
    async fn generate(
        &self,
        system_instruction: &str,
        context: &str,
        question: &str,
    ) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let user_content = format!("Context:\n{}\n\nQuestion: {}", context, question);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_instruction},
                {"role": "user", "content": user_content},
            ],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_answer_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Answer generation failed after retries")))
    }
}

fn parse_answer_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_choice_content() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "The fee is $500."}}]
        });
        assert_eq!(parse_answer_response(&json).unwrap(), "The fee is $500.");
    }

    #[test]
    fn missing_content_is_an_error() {
        let json = serde_json::json!({"choices": []});
        assert!(parse_answer_response(&json).is_err());
    }
}
