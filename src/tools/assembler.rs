//! Assembly of streamed tool-call fragments into invocable calls.

use tracing::{debug, warn};

use crate::error::LLMError;
use crate::types::{ToolCall, ToolCallFragment, ToolResult};

/// Lifecycle of the assembler within one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssemblerState {
    #[default]
    Idle,
    Accumulating,
    Closed,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    id: String,
    name: String,
    arguments: String,
}

/// A call dropped at close time together with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub reason: String,
}

impl RejectedCall {
    /// Echo of the call for the assistant turn plus the error result answering it.
    ///
    /// Unparseable arguments are echoed as `{}`; the raw text is quoted in the result.
    pub fn into_failed_call(self) -> (ToolCall, ToolResult) {
        let name = if self.name.is_empty() {
            "unknown".to_string()
        } else {
            self.name
        };
        let echoed = if serde_json::from_str::<serde_json::Value>(&self.arguments).is_ok() {
            self.arguments.clone()
        } else {
            "{}".to_string()
        };
        let error = LLMError::tool(
            name.clone(),
            format!("{}; received arguments: {}", self.reason, self.arguments),
        );
        let result = ToolResult {
            call_id: self.id.clone(),
            name: name.clone(),
            content: format!("Error: {error}"),
            is_error: true,
        };
        let call = ToolCall {
            id: self.id,
            name,
            arguments: echoed,
        };
        (call, result)
    }
}

/// Result of closing a round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosedBatch {
    pub calls: Vec<ToolCall>,
    pub rejected: Vec<RejectedCall>,
}

impl ClosedBatch {
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.rejected.is_empty()
    }
}

/// Accumulates tool-call fragments for one round.
///
/// A fragment carrying a new id opens a slot and makes it the active one. Fragments
/// without an id append to the slot at their wire index when the vendor sends one,
/// otherwise to the active slot. The active pointer only moves forward within a round
/// and goes back to "none" on [`ToolCallAssembler::reset`].
///
/// # Examples
///
/// ```
/// use thinkstream::tools::ToolCallAssembler;
/// use thinkstream::types::ToolCallFragment;
///
/// let mut assembler = ToolCallAssembler::new();
/// assembler.push(ToolCallFragment {
///     id: Some("abc".into()),
///     name: Some("lookup".into()),
///     arguments: Some("{\"x\":".into()),
///     ..Default::default()
/// });
/// assembler.push(ToolCallFragment { arguments: Some("1}".into()), ..Default::default() });
///
/// let batch = assembler.close();
/// assert_eq!(batch.calls[0].arguments, "{\"x\":1}");
/// ```
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    slots: Vec<Slot>,
    active: Option<usize>,
    state: AssemblerState,
    round: usize,
    generated: usize,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Index of the slot receiving id-less fragments, if any.
    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Clears every slot and starts round `round`.
    pub fn reset(&mut self, round: usize) {
        self.slots.clear();
        self.active = None;
        self.state = AssemblerState::Idle;
        self.round = round;
        self.generated = 0;
    }

    /// Applies one streamed fragment.
    ///
    /// Returns `false` when the fragment could not be attributed to any call and was
    /// dropped.
    pub fn push(&mut self, fragment: ToolCallFragment) -> bool {
        if self.state == AssemblerState::Closed {
            warn!(round = self.round, "tool-call fragment after close; dropping");
            return false;
        }

        let id = fragment.id.filter(|id| !id.is_empty());
        let target = match id {
            Some(id) => match self.slots.iter().position(|slot| slot.id == id) {
                Some(existing) => existing,
                None => self.open(id),
            },
            None => {
                let by_index = fragment.index.filter(|index| *index < self.slots.len());
                match by_index.or(self.active) {
                    Some(index) => index,
                    None => {
                        warn!(
                            round = self.round,
                            index = ?fragment.index,
                            "tool-call fragment without an open call; dropping"
                        );
                        return false;
                    }
                }
            }
        };

        let slot = &mut self.slots[target];
        if let Some(name) = fragment.name.filter(|name| !name.is_empty()) {
            if slot.name.is_empty() {
                slot.name = name;
            }
        }
        if let Some(arguments) = fragment.arguments {
            slot.arguments.push_str(&arguments);
        }
        true
    }

    /// Records a call that arrived whole, generating an id when the vendor sent none.
    pub fn push_complete(&mut self, id: Option<String>, name: String, arguments: String) {
        let id = id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.generate_id());
        self.push(ToolCallFragment {
            index: None,
            id: Some(id),
            name: Some(name),
            arguments: Some(arguments),
        });
    }

    fn generate_id(&mut self) -> String {
        self.generated += 1;
        format!("call_{}_{}", self.round, self.generated)
    }

    fn open(&mut self, id: String) -> usize {
        self.slots.push(Slot {
            id,
            ..Slot::default()
        });
        let index = self.slots.len() - 1;
        self.active = Some(index);
        self.state = AssemblerState::Accumulating;
        debug!(round = self.round, index, "opened tool call");
        index
    }

    /// Ends the round and validates every accumulated call.
    ///
    /// Empty argument strings are read as `{}`. Calls whose arguments are not valid JSON
    /// or that never received a name are rejected and logged.
    pub fn close(&mut self) -> ClosedBatch {
        self.state = AssemblerState::Closed;
        self.active = None;

        let mut batch = ClosedBatch::default();
        for slot in self.slots.drain(..) {
            let arguments = if slot.arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                slot.arguments
            };

            let reason = if slot.name.is_empty() {
                Some("tool call is missing a function name".to_string())
            } else {
                serde_json::from_str::<serde_json::Value>(&arguments)
                    .err()
                    .map(|err| format!("invalid tool arguments: {err}"))
            };

            match reason {
                None => batch.calls.push(ToolCall {
                    id: slot.id,
                    name: slot.name,
                    arguments,
                }),
                Some(reason) => {
                    warn!(
                        round = self.round,
                        call_id = %slot.id,
                        tool = %slot.name,
                        %reason,
                        "rejecting tool call"
                    );
                    batch.rejected.push(RejectedCall {
                        id: slot.id,
                        name: slot.name,
                        arguments,
                        reason,
                    });
                }
            }
        }
        batch
    }
}
