use std::time::Duration;

use thiserror::Error;

/// Aggregates every failure mode exposed by the streaming chat adapters.
///
/// Callers can match on the specific variant to decide whether to re-issue the chat,
/// switch to another provider, or surface an actionable message to the user interface.
/// Nothing in this crate retries on its own.
#[derive(Debug, Clone, Error)]
pub enum LLMError {
    /// Represents transport-layer or networking failures.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Reports invalid or missing credentials.
    #[error("auth failure: {message}")]
    Auth { message: String },
    /// Indicates that the provider throttled the request.
    #[error("rate limited: {message}")]
    RateLimit {
        /// Raw message returned by the upstream provider.
        message: String,
        /// Optional wait duration suggested by the provider before retrying.
        retry_after: Option<Duration>,
    },
    /// Indicates that the prompt or expected completion exceeds the allowed token budget.
    #[error("token limit exceeded: {message}")]
    TokenLimitExceeded { message: String },
    /// Signals validation failures in the request payload.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Raised when building or validating configuration fails.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the configuration field that failed validation.
        field: String,
        /// Additional context explaining why the field is invalid.
        reason: String,
    },
    /// Surfaces cancellations triggered explicitly by the caller.
    #[error("request aborted: {message}")]
    Aborted { message: String },
    /// The per-model deadline elapsed before the provider answered.
    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },
    /// The vendor refused to answer because of a safety or policy block.
    #[error("Message is being blocked for reason: {reason}")]
    Blocked { reason: String },
    /// Wraps provider-defined errors that cannot be normalized.
    #[error("provider {provider} error: {message}")]
    Provider {
        /// Name of the provider, such as `openrouter`.
        provider: &'static str,
        /// Human-readable error message returned by the provider.
        message: String,
    },
    /// A tool requested by the model failed or could not be invoked.
    #[error("tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },
    /// Catches opaque or unexpected failures.
    #[error("unknown error: {message}")]
    Unknown { message: String },
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use thinkstream::error::LLMError;
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert!(matches!(err, LLMError::Transport { .. }));
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Provider`] with the given provider name and message.
    ///
    /// # Examples
    ///
    /// ```
    /// use thinkstream::error::LLMError;
    ///
    /// let err = LLMError::provider("openrouter", "bad JSON payload");
    /// assert!(matches!(err, LLMError::Provider { provider: "openrouter", .. }));
    /// ```
    pub fn provider<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::ToolExecution`] for the named tool.
    pub fn tool<N: Into<String>, M: Into<String>>(tool: N, message: M) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Returns `true` when re-issuing the same chat may succeed.
    ///
    /// Timeouts are fatal for the request they bound but are reported as recoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::RateLimit { .. }
                | Self::Timeout { .. }
                | Self::Provider { .. }
                | Self::Unknown { .. }
        )
    }
}

/// Returns `true` when an error code or message suggests a context/window overflow.
pub(crate) fn looks_like_token_limit_error(code_hint: Option<&str>, message: &str) -> bool {
    if let Some(code) = code_hint {
        let lower = code.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "context_length_exceeded"
                | "max_context_length_exceeded"
                | "prompt_tokens_exceeded"
                | "context_window_exceeded"
        ) {
            return true;
        }
    }

    let lower_message = message.to_ascii_lowercase();
    const HINTS: [&str; 7] = [
        "context length",
        "context window",
        "token limit",
        "maximum output tokens",
        "max output tokens",
        "prompt is too long",
        "maximum number of tokens",
    ];
    HINTS.iter().any(|needle| lower_message.contains(needle))
}
