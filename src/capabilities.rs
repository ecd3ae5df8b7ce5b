//! Model-id driven behavior flags.
//!
//! Request shaping never inspects model names directly; it asks [`ModelProfile::lookup`]
//! which folds the ordered [`RULES`] table into one profile. For each field the first
//! matching rule wins, so specific patterns are listed before general ones.

use std::time::Duration;

/// Timeout for models without the extended deadline.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for slow thinking or image generation models.
pub const THINKING_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
/// Context size assumed for models missing from the table.
pub const DEFAULT_COMPRESS_THRESHOLD: u32 = 128_000;

/// Case-insensitive matcher over a model id.
///
/// `Exact` and `Prefix` compare against the id's last path segment, so
/// `openai/o3-mini` matches `Prefix("o3")`. `Contains` and `AllOf` look at the full id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelPattern {
    Exact(&'static str),
    Prefix(&'static str),
    Contains(&'static str),
    AnyOf(&'static [&'static str]),
    AllOf(&'static [&'static str]),
}

impl ModelPattern {
    pub fn matches(&self, model: &str) -> bool {
        let full = model.to_ascii_lowercase();
        let base = full.rsplit('/').next().unwrap_or(full.as_str());
        match self {
            Self::Exact(name) => base == *name,
            Self::Prefix(prefix) => base.starts_with(prefix),
            Self::Contains(needle) => full.contains(needle),
            Self::AnyOf(needles) => needles.iter().any(|needle| full.contains(needle)),
            Self::AllOf(needles) => needles.iter().all(|needle| full.contains(needle)),
        }
    }
}

/// Shape of Gemini's `thinkingConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeminiThinking {
    /// `thinkingBudget`, clamped to the given bounds.
    Budget { floor: Option<i32>, ceiling: i32 },
    /// `thinkingLevel`.
    Level,
}

/// How a model overrides the configured `max_tokens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxTokensRule {
    Fixed(u32),
    AtLeast(u32),
}

/// Sampling values a model requires regardless of the configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingOverride {
    pub temperature_thinking: f32,
    pub temperature: f32,
    pub top_p: f32,
}

/// One behavior flag attached to a [`ModelPattern`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Capability {
    /// Accepts image parts; images are dropped for other models.
    Vision,
    /// Streams chain-of-thought the UI should render separately.
    ReasoningDisplay,
    /// Uses [`THINKING_REQUEST_TIMEOUT`].
    ExtendedTimeout,
    ThinkingShape(GeminiThinking),
    MaxTokens(MaxTokensRule),
    /// Hard ceiling applied by vendors that enforce one.
    OutputCeiling(u32),
    Sampling(SamplingOverride),
    /// Sends `thinking: {type: enabled|disabled}` driven by `enable_thinking`.
    ThinkingTypeField,
    /// Forwards `reasoning_effort`.
    ReasoningEffort,
    /// Sends `enable_thinking` plus `thinking_budget` with the given default budget.
    ThinkingToggle { default_budget: u32 },
    /// Generates images; requests the image modality.
    ImageOutput,
    ContextTokens(u32),
}

use Capability::*;
use ModelPattern::*;

const KIMI_SAMPLING: SamplingOverride = SamplingOverride {
    temperature_thinking: 1.0,
    temperature: 0.6,
    top_p: 0.95,
};

const CLAUDE_4_FAMILY: &[&str] = &[
    "claude-4",
    "claude-sonnet-4",
    "claude-opus-4",
    "claude-haiku-4",
];

/// Ordered capability rules.
pub static RULES: &[(ModelPattern, Capability)] = &[
    // vision
    (
        AnyOf(&[
            "gpt-4o",
            "gpt-4.1",
            "gpt-4-turbo",
            "gpt-5",
            "vision",
            "claude-3",
            "gemini-1.5",
            "gemini-2",
            "gemini-3",
            "gemini-exp",
            "qwen-vl",
            "qwen2-vl",
            "qwen2.5-vl",
            "-vl-",
            "kimi-k2.5",
            "llama-4",
        ]),
        Vision,
    ),
    (AnyOf(CLAUDE_4_FAMILY), Vision),
    (Prefix("o1"), Vision),
    (Prefix("o3"), Vision),
    (Prefix("o4-mini"), Vision),
    // reasoning display
    (
        AnyOf(&["deepseek-r1", "thinking", "gemini", "kimi", "gpt-oss"]),
        ReasoningDisplay,
    ),
    (Prefix("o1"), ReasoningDisplay),
    (Prefix("o3"), ReasoningDisplay),
    // deadlines
    (Prefix("o1"), ExtendedTimeout),
    (Prefix("o3"), ExtendedTimeout),
    (Prefix("dall-e"), ExtendedTimeout),
    (Prefix("dalle"), ExtendedTimeout),
    (AnyOf(&["deepseek-r", "-thinking"]), ExtendedTimeout),
    // gemini thinking
    (
        AllOf(&["gemini-2.5", "flash"]),
        ThinkingShape(GeminiThinking::Budget {
            floor: None,
            ceiling: 24_576,
        }),
    ),
    (
        AllOf(&["gemini-2.5", "pro"]),
        ThinkingShape(GeminiThinking::Budget {
            floor: Some(128),
            ceiling: 32_768,
        }),
    ),
    (
        Contains("gemini-2.5"),
        ThinkingShape(GeminiThinking::Budget {
            floor: None,
            ceiling: i32::MAX,
        }),
    ),
    (Contains("gemini-3"), ThinkingShape(GeminiThinking::Level)),
    // nvidia-hosted families
    (Contains("kimi-k2.5"), MaxTokens(MaxTokensRule::Fixed(32_768))),
    (Contains("kimi-k2.5"), Sampling(KIMI_SAMPLING)),
    (Contains("kimi-k2.5"), ThinkingTypeField),
    (Contains("gpt-oss-120b"), MaxTokens(MaxTokensRule::Fixed(131_072))),
    (Contains("gpt-oss"), ReasoningEffort),
    // longcat / meituan
    (
        Contains("thinking"),
        ThinkingToggle {
            default_budget: 1024,
        },
    ),
    (Contains("2601"), OutputCeiling(262_144)),
    (Contains("flash"), OutputCeiling(131_072)),
    // image generation
    (AnyOf(&["flux", "image"]), ImageOutput),
    (Prefix("dall-e"), ImageOutput),
    // context windows
    (Contains("kimi-k2.5"), ContextTokens(262_144)),
    (AllOf(&["longcat", "lite"]), ContextTokens(327_680)),
    (Contains("longcat"), ContextTokens(262_144)),
    (Contains("gemini-3"), ContextTokens(1_048_576)),
    (Contains("deepseek-r1"), ContextTokens(163_840)),
    (Contains("gpt-oss"), ContextTokens(131_072)),
    (AnyOf(CLAUDE_4_FAMILY), ContextTokens(1_048_576)),
];

/// Behavior flags resolved for one model id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelProfile {
    pub vision: bool,
    pub reasoning_display: bool,
    pub extended_timeout: bool,
    pub gemini_thinking: Option<GeminiThinking>,
    pub max_tokens: Option<MaxTokensRule>,
    pub output_ceiling: Option<u32>,
    pub sampling: Option<SamplingOverride>,
    pub thinking_type_field: bool,
    pub reasoning_effort: bool,
    pub thinking_budget_default: Option<u32>,
    pub image_output: bool,
    pub context_tokens: Option<u32>,
}

impl ModelProfile {
    /// Folds every rule matching `model` into a profile.
    ///
    /// # Examples
    ///
    /// ```
    /// use thinkstream::capabilities::ModelProfile;
    ///
    /// let profile = ModelProfile::lookup("deepseek-ai/deepseek-r1");
    /// assert!(profile.reasoning_display);
    /// assert_eq!(profile.request_timeout().as_secs(), 300);
    /// ```
    pub fn lookup(model: &str) -> Self {
        let mut profile = Self::default();
        for (pattern, capability) in RULES {
            if pattern.matches(model) {
                profile.apply(*capability);
            }
        }
        profile
    }

    fn apply(&mut self, capability: Capability) {
        match capability {
            Vision => self.vision = true,
            ReasoningDisplay => self.reasoning_display = true,
            ExtendedTimeout => self.extended_timeout = true,
            ThinkingShape(shape) => {
                self.gemini_thinking.get_or_insert(shape);
            }
            MaxTokens(rule) => {
                self.max_tokens.get_or_insert(rule);
            }
            OutputCeiling(limit) => {
                self.output_ceiling.get_or_insert(limit);
            }
            Sampling(sampling) => {
                self.sampling.get_or_insert(sampling);
            }
            ThinkingTypeField => self.thinking_type_field = true,
            ReasoningEffort => self.reasoning_effort = true,
            ThinkingToggle { default_budget } => {
                self.thinking_budget_default.get_or_insert(default_budget);
            }
            ImageOutput => self.image_output = true,
            ContextTokens(tokens) => {
                self.context_tokens.get_or_insert(tokens);
            }
        }
    }

    /// Deadline for single-shot requests and for opening a stream.
    pub fn request_timeout(&self) -> Duration {
        if self.extended_timeout {
            THINKING_REQUEST_TIMEOUT
        } else {
            REQUEST_TIMEOUT
        }
    }

    /// History size above which callers should summarize older turns.
    pub fn compress_threshold(&self) -> u32 {
        self.context_tokens.unwrap_or(DEFAULT_COMPRESS_THRESHOLD)
    }

    /// Whether the model sends `enable_thinking`/`thinking_budget` fields.
    pub fn has_thinking_toggle(&self) -> bool {
        self.thinking_budget_default.is_some()
    }
}

impl GeminiThinking {
    /// Clamps a configured budget; `None` means the field must be omitted.
    pub fn clamp_budget(&self, budget: Option<i32>) -> Option<i32> {
        let Self::Budget { floor, ceiling } = *self else {
            return None;
        };
        let budget = budget?;
        if budget == -1 {
            return None;
        }
        let budget = budget.min(ceiling);
        Some(floor.map_or(budget, |floor| budget.max(floor)))
    }
}
