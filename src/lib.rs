//! 多供应商流式聊天适配层
//!
//! Normalizes OpenAI-compatible (OpenRouter, NVIDIA, LongCat, Meituan) and Gemini
//! streaming protocols into one event model: reasoning and answer deltas, assembled
//! tool calls with their results, and exactly one terminal outcome per chat.

pub mod capabilities;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod provider;
pub mod session;
pub mod stream;
pub mod tools;
pub mod types;

pub use client::{LLMClient, wait_for_outcome};
pub use config::{ProviderConfig, ProviderKind, build_client_from_configs};
pub use error::LLMError;
pub use provider::{ChatStream, LLMProvider};
pub use tools::{Toolset, ToolExecutor};
pub use types::*;
