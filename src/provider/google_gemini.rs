//! Google Gemini `streamGenerateContent` dialect.

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::GoogleGeminiProvider;
pub use types::{DEFAULT_SAFETY_THRESHOLD, GeminiPayload, HARM_CATEGORIES};
