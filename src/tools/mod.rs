//! Tool collaborators: declarations, execution and content pre-processing.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::error::LLMError;
use crate::types::{Message, MessageContent, ToolCall, ToolDefinition, ToolResult};

pub mod assembler;

pub use assembler::{AssemblerState, ClosedBatch, RejectedCall, ToolCallAssembler};

/// Runs a tool by name with its assembled JSON arguments.
///
/// The returned string becomes the tool message content sent back to the model.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: &str) -> Result<String, LLMError>;
}

pub type DynToolExecutor = Arc<dyn ToolExecutor>;

/// Tool declarations offered to the model together with the executor that serves them.
#[derive(Clone, Default)]
pub struct Toolset {
    pub definitions: Vec<ToolDefinition>,
    pub executor: Option<DynToolExecutor>,
}

impl Toolset {
    pub fn new(definitions: Vec<ToolDefinition>, executor: DynToolExecutor) -> Self {
        Self {
            definitions,
            executor: Some(executor),
        }
    }

    /// A toolset without tools; sessions finish after the first round.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl std::fmt::Debug for Toolset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolset")
            .field("definitions", &self.definitions)
            .field("executor", &self.executor.is_some())
            .finish()
    }
}

/// Source of tools enabled for a conversation, keyed by plugin ids.
pub trait ToolRegistry: Send + Sync {
    fn as_tools(&self, plugin_ids: &[String]) -> Toolset;
}

/// Rewrites message content before payload shaping, e.g. to inline cached images.
#[async_trait]
pub trait ContentPreprocessor: Send + Sync {
    async fn preprocess(&self, content: &MessageContent) -> Result<MessageContent, LLMError>;
}

/// Leaves content untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait]
impl ContentPreprocessor for PassThrough {
    async fn preprocess(&self, content: &MessageContent) -> Result<MessageContent, LLMError> {
        Ok(content.clone())
    }
}

pub type DynContentPreprocessor = Arc<dyn ContentPreprocessor>;

/// Runs the preprocessor over every message, keeping roles and tool metadata.
pub(crate) async fn preprocess_messages(
    preprocessor: &dyn ContentPreprocessor,
    messages: &[Message],
) -> Result<Vec<Message>, LLMError> {
    let mut prepared = Vec::with_capacity(messages.len());
    for message in messages {
        let content = preprocessor.preprocess(&message.content).await?;
        prepared.push(Message {
            content,
            ..message.clone()
        });
    }
    Ok(prepared)
}

/// Executes a closed batch concurrently, keeping the call order in the results.
///
/// A failing tool does not affect the others; its error, reported as
/// [`LLMError::ToolExecution`], becomes its result content.
pub(crate) async fn execute_batch(
    executor: &dyn ToolExecutor,
    calls: &[ToolCall],
) -> Vec<ToolResult> {
    let futures = calls.iter().map(|call| async move {
        debug!(tool = %call.name, call_id = %call.id, "executing tool");
        match executor.execute(&call.name, &call.arguments).await {
            Ok(content) => ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content,
                is_error: false,
            },
            Err(err) => {
                let err = match err {
                    err @ LLMError::ToolExecution { .. } => err,
                    other => LLMError::tool(call.name.clone(), other.to_string()),
                };
                warn!(tool = %call.name, error = %err, "tool execution failed");
                ToolResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    content: format!("Error: {err}"),
                    is_error: true,
                }
            }
        }
    });
    join_all(futures).await
}
