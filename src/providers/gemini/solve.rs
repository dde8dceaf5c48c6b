//! Document solving through Gemini's multimodal `generateContent`.
//!
//! The PDF travels inline as base64 next to the rendered question prompt; the
//! text parts of the first candidate are joined into the solution.

use super::client::GeminiHttpClient;
use super::types::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, InlineData, Part,
};
use crate::config::ProviderConfig;
use crate::models::{DocumentSolveInput, TaskOutput, TaskRequest, TaskResult};
use crate::providers::{unexpected_task, TaskAdapter};
use crate::{prompts, Error, Result};
use async_trait::async_trait;

const PROVIDER: &str = "Gemini";

pub struct GeminiDocumentClient {
    http: GeminiHttpClient,
}

impl GeminiDocumentClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Self::new_with_client(config, reqwest::Client::new())
    }

    pub fn new_with_client(config: &ProviderConfig, client: reqwest::Client) -> Result<Self> {
        Ok(Self {
            http: GeminiHttpClient::from_config(config, client)?,
        })
    }

    fn build_request(input: &DocumentSolveInput) -> GenerateContentRequest {
        use base64::Engine as _;
        let pdf_base64 = base64::engine::general_purpose::STANDARD.encode(&input.file);

        GenerateContentRequest {
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::Text {
                    text: prompts::SOLVE_SYSTEM.to_string(),
                }],
            }),
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part::Text {
                        text: prompts::render(prompts::SOLVE_USER, &[("question", &input.question)]),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "application/pdf".to_string(),
                            data: pdf_base64,
                        },
                    },
                ],
            }],
            generation_config: Some(GenerationConfig {
                max_output_tokens: Some(input.max_tokens),
                temperature: Some(input.temperature),
            }),
        }
    }

    fn extract_text(response: &GenerateContentResponse) -> Option<String> {
        let content = response.candidates.first()?.content.as_ref()?;
        let texts: Vec<&str> = content
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();

        let joined = texts.join("\n");
        if joined.trim().is_empty() {
            None
        } else {
            Some(joined)
        }
    }

    async fn solve(&self, input: DocumentSolveInput) -> TaskResult {
        tracing::debug!(
            "Solving PDF ({} bytes) with Gemini model {}",
            input.file.len(),
            self.http.model()
        );

        let request = Self::build_request(&input);
        // The request owns its own base64 copy; release the raw upload now.
        drop(input);

        let response: GenerateContentResponse = self.http.generate_content(&request).await?;
        drop(request);

        let solution = Self::extract_text(&response).ok_or_else(|| {
            let reason = response
                .candidates
                .first()
                .and_then(|c| c.finish_reason.clone())
                .unwrap_or_else(|| "no candidates".to_string());
            tracing::error!("Gemini returned no solution text (finish reason: {})", reason);
            Error::upstream(
                200,
                format!("Gemini returned no solution text (finish reason: {})", reason),
            )
        })?;

        let mut output = TaskOutput::text(solution).with_model(self.http.model());
        if let Some(tokens) = response
            .usage_metadata
            .as_ref()
            .and_then(|usage| usage.total_token_count)
        {
            output = output.with_tokens_used(tokens);
        }

        Ok(output)
    }
}

#[async_trait]
impl TaskAdapter for GeminiDocumentClient {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn invoke(&self, request: TaskRequest) -> TaskResult {
        match request {
            TaskRequest::DocumentSolve(input) => self.solve(input).await,
            other => Err(unexpected_task(PROVIDER, &other)),
        }
    }
}
