//! OpenAI chat-completions dialect shared by OpenRouter, NVIDIA, LongCat and Meituan.

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::OpenAiCompatProvider;
pub use types::{CompatPayload, CompatVendor, LONGCAT, MEITUAN, NVIDIA, OPENROUTER, VendorQuirks};
