use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{LLMError, looks_like_token_limit_error};

/// Parses error bodies returned by chat-completions vendors.
pub(crate) fn parse_compat_error(
    provider: &'static str,
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
        code: Option<Value>,
    }

    if let Ok(ErrorBody { error: Some(error) }) = serde_json::from_str::<ErrorBody>(body) {
        let mut message = error.message.unwrap_or_else(|| "unknown error".to_string());
        let code = error.code.map(|code| match code {
            Value::String(text) => text,
            other => other.to_string(),
        });
        if let Some(code) = &code {
            message = format!("{message} ({code})");
        }

        if looks_like_token_limit_error(code.as_deref(), &message) {
            return LLMError::TokenLimitExceeded { message };
        }

        return match status {
            401 | 403 => LLMError::Auth { message },
            429 => LLMError::RateLimit {
                message,
                retry_after,
            },
            400 | 422 => LLMError::Validation { message },
            _ => LLMError::Provider { provider, message },
        };
    }

    match status {
        401 | 403 => LLMError::Auth {
            message: format!("status {status}: {body}"),
        },
        429 => LLMError::RateLimit {
            message: format!("status {status}: {body}"),
            retry_after,
        },
        _ => LLMError::Provider {
            provider,
            message: format!("status {status}: {body}"),
        },
    }
}
