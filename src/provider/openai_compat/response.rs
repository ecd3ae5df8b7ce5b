use crate::error::LLMError;
use crate::types::{ChatResponse, ProviderMetadata};

use super::types::{CompatResponse, VendorQuirks, first_text_field, images_markdown};

/// Extracts the final message from a single-shot chat-completions body.
///
/// Generated images are appended as markdown after the answer; reasoning is kept apart
/// and inlined by [`ChatResponse::rendered`].
pub(crate) fn map_response(
    quirks: &VendorQuirks,
    body: &str,
    endpoint: String,
) -> Result<ChatResponse, LLMError> {
    let parsed: CompatResponse = serde_json::from_str(body).map_err(|err| LLMError::Provider {
        provider: quirks.name,
        message: format!("failed to parse {} response: {err}", quirks.name),
    })?;

    if let Some(error) = parsed.error {
        return Err(LLMError::provider(quirks.name, error.describe()));
    }

    let message = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message);

    let (mut content, reasoning, images) = match message {
        Some(message) => (
            message.content.unwrap_or_default(),
            first_text_field(&message.extra, quirks.reasoning_fields),
            message.images.unwrap_or_default(),
        ),
        None => (String::new(), None, Vec::new()),
    };

    if quirks.stream_images && !images.is_empty() {
        let markdown = images_markdown(&images);
        content = if content.is_empty() {
            markdown
        } else {
            format!("{content}\n\n{markdown}")
        };
    }

    Ok(ChatResponse {
        content,
        reasoning,
        model: parsed.model,
        provider: ProviderMetadata {
            provider: quirks.name.to_string(),
            endpoint: Some(endpoint),
        },
    })
}
