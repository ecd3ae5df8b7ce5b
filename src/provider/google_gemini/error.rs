use std::time::Duration;

use serde::Deserialize;

use crate::error::{LLMError, looks_like_token_limit_error};

/// Parses error responses returned by Google Gemini.
pub(crate) fn parse_gemini_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<InnerError>,
    }

    #[derive(Deserialize)]
    struct InnerError {
        message: Option<String>,
        status: Option<String>,
    }

    // Some proxies wrap the error object in a one-element array.
    let parsed = serde_json::from_str::<ErrorBody>(body).ok().or_else(|| {
        serde_json::from_str::<Vec<ErrorBody>>(body)
            .ok()
            .and_then(|bodies| bodies.into_iter().next())
    });

    if let Some(ErrorBody { error: Some(error) }) = parsed {
        let mut message = error.message.unwrap_or_else(|| "unknown error".to_string());
        let status_hint = error.status.as_deref().filter(|text| !text.is_empty());
        if let Some(status_text) = status_hint {
            message = format!("{message} ({status_text})");
        }

        if looks_like_token_limit_error(status_hint, &message) {
            return LLMError::TokenLimitExceeded { message };
        }

        return match (status, status_hint) {
            (401 | 403, _) | (_, Some("UNAUTHENTICATED" | "PERMISSION_DENIED")) => {
                LLMError::Auth { message }
            }
            (429, _) | (_, Some("RESOURCE_EXHAUSTED")) => LLMError::RateLimit {
                message,
                retry_after,
            },
            (400, _) => LLMError::Validation { message },
            _ => LLMError::Provider {
                provider: "google_gemini",
                message,
            },
        };
    }

    // Fallback: if the payload cannot be parsed, return the raw body.
    match status {
        401 | 403 => LLMError::Auth {
            message: format!("status {status}: {body}"),
        },
        429 => LLMError::RateLimit {
            message: format!("status {status}: {body}"),
            retry_after,
        },
        _ => LLMError::Provider {
            provider: "google_gemini",
            message: format!("status {status}: {body}"),
        },
    }
}
