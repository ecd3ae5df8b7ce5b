use crate::error::LLMError;
use crate::types::{ChatResponse, ProviderMetadata};

use super::types::{GeminiBody, ResponsePart};

/// 将非流式 GenerateContent 响应转换为统一结构
///
/// The body may be a single response or an array of chunks; text parts of each chunk are
/// joined with blank lines and the chunks are concatenated. Thought parts are kept as
/// reasoning.
pub(crate) fn map_response(body: &str, endpoint: String) -> Result<ChatResponse, LLMError> {
    let chunks = serde_json::from_str::<GeminiBody>(body)
        .map_err(|err| LLMError::Provider {
            provider: "google_gemini",
            message: format!("failed to parse Gemini response: {err}"),
        })?
        .into_chunks();

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut model = None;

    for chunk in &chunks {
        if let Some(error) = &chunk.error {
            return Err(LLMError::provider("google_gemini", error.describe()));
        }
        if let Some(reason) = chunk.block_reason() {
            return Err(LLMError::Blocked {
                reason: reason.to_string(),
            });
        }
        if model.is_none() {
            model = chunk.model_version.clone();
        }
        content.push_str(&join_text(chunk.parts(), false));
        reasoning.push_str(&join_text(chunk.parts(), true));
    }

    Ok(ChatResponse {
        content,
        reasoning: Some(reasoning).filter(|text| !text.is_empty()),
        model,
        provider: ProviderMetadata {
            provider: "google_gemini".to_string(),
            endpoint: Some(endpoint),
        },
    })
}

fn join_text(parts: &[ResponsePart], thought: bool) -> String {
    parts
        .iter()
        .filter(|part| part.thought == thought)
        .filter_map(|part| part.text.as_deref())
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
