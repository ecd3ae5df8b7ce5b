use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::client::LLMClient;
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::DynProvider;
use crate::provider::google_gemini::GoogleGeminiProvider;
use crate::provider::openai_compat::{CompatVendor, OpenAiCompatProvider};
use crate::types::ChatRequestConfig;

/// 后端配置 描述一个可调用的供应商句柄
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// 自定义句柄 例如 `openrouter-main`
    pub handle: String,
    pub provider: ProviderKind,
    pub credential: Credential,
    #[serde(default)]
    pub default_model: Option<String>,
    /// 用户填写的地址 为空时按 build_mode 取默认值
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub build_mode: BuildMode,
    /// Gemini safetySettings 阈值
    #[serde(default)]
    pub safety_threshold: Option<String>,
    #[serde(default)]
    pub max_tool_rounds: Option<usize>,
    /// 附加设置 例如 `headers` 或 Gemini 的 `sse`
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// 供应商类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenRouter,
    Nvidia,
    LongCat,
    Meituan,
    GoogleGemini,
}

/// 鉴权信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// 简单 API Key
    ApiKey { key: String },
    /// Bearer Token
    Bearer { token: String },
    /// 由同源代理注入凭证
    None,
}

/// Where the client runs, which decides the default base URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BuildMode {
    /// Talks to the vendor's public endpoint.
    #[default]
    App,
    /// Goes through the same-origin proxy mounted at the vendor's proxy path.
    Proxy {
        #[serde(default)]
        origin: String,
    },
}

/// Static defaults of one vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorProfile {
    pub kind: ProviderKind,
    pub app_base_url: &'static str,
    pub proxy_path: &'static str,
    /// Chat path below the base URL; Gemini builds its path from the model id.
    pub chat_path: Option<&'static str>,
    pub default_safety_threshold: Option<&'static str>,
}

pub static VENDOR_PROFILES: [VendorProfile; 5] = [
    VendorProfile {
        kind: ProviderKind::OpenRouter,
        app_base_url: "https://openrouter.ai/api",
        proxy_path: "/api/openrouter",
        chat_path: Some("v1/chat/completions"),
        default_safety_threshold: None,
    },
    VendorProfile {
        kind: ProviderKind::Nvidia,
        app_base_url: "https://integrate.api.nvidia.com",
        proxy_path: "/api/nvidia",
        chat_path: Some("v1/chat/completions"),
        default_safety_threshold: None,
    },
    VendorProfile {
        kind: ProviderKind::LongCat,
        app_base_url: "https://api.longcat.chat/openai",
        proxy_path: "/api/longcat",
        chat_path: Some("v1/chat/completions"),
        default_safety_threshold: None,
    },
    VendorProfile {
        kind: ProviderKind::Meituan,
        app_base_url: "https://api.longcat.chat/openai",
        proxy_path: "/api/meituan",
        chat_path: Some("v1/chat/completions"),
        default_safety_threshold: None,
    },
    VendorProfile {
        kind: ProviderKind::GoogleGemini,
        app_base_url: "https://generativelanguage.googleapis.com",
        proxy_path: "/api/google",
        chat_path: None,
        default_safety_threshold: Some("BLOCK_ONLY_HIGH"),
    },
];

impl ProviderKind {
    pub fn profile(self) -> &'static VendorProfile {
        let index = match self {
            Self::OpenRouter => 0,
            Self::Nvidia => 1,
            Self::LongCat => 2,
            Self::Meituan => 3,
            Self::GoogleGemini => 4,
        };
        &VENDOR_PROFILES[index]
    }

    /// Provider name used in logs and errors.
    pub fn name(self) -> &'static str {
        match self.compat_vendor() {
            Some(vendor) => vendor.quirks().name,
            None => "google_gemini",
        }
    }

    /// Chat-completions vendor behind this kind, `None` for Gemini.
    pub fn compat_vendor(self) -> Option<CompatVendor> {
        match self {
            Self::OpenRouter => Some(CompatVendor::OpenRouter),
            Self::Nvidia => Some(CompatVendor::Nvidia),
            Self::LongCat => Some(CompatVendor::LongCat),
            Self::Meituan => Some(CompatVendor::Meituan),
            Self::GoogleGemini => None,
        }
    }
}

impl From<CompatVendor> for ProviderKind {
    fn from(vendor: CompatVendor) -> Self {
        match vendor {
            CompatVendor::OpenRouter => Self::OpenRouter,
            CompatVendor::Nvidia => Self::Nvidia,
            CompatVendor::LongCat => Self::LongCat,
            CompatVendor::Meituan => Self::Meituan,
        }
    }
}

/// Resolves the base URL a provider talks to.
///
/// A non-empty override wins over the build-mode default. One trailing `/` is removed and
/// `https://` is prefixed unless the URL already starts with `http` or with the vendor's
/// proxy path.
///
/// # Examples
///
/// ```
/// use thinkstream::config::{BuildMode, ProviderKind, resolve_base_url};
///
/// assert_eq!(
///     resolve_base_url(ProviderKind::OpenRouter, Some("my.host/api/"), &BuildMode::App),
///     "https://my.host/api"
/// );
/// assert_eq!(
///     resolve_base_url(ProviderKind::GoogleGemini, None, &BuildMode::Proxy { origin: String::new() }),
///     "/api/google"
/// );
/// ```
pub fn resolve_base_url(kind: ProviderKind, override_url: Option<&str>, mode: &BuildMode) -> String {
    let profile = kind.profile();
    let mut url = match override_url.map(str::trim).filter(|url| !url.is_empty()) {
        Some(url) => url.to_string(),
        None => match mode {
            BuildMode::App => profile.app_base_url.to_string(),
            BuildMode::Proxy { origin } => {
                format!("{}{}", origin.trim_end_matches('/'), profile.proxy_path)
            }
        },
    };
    if url.ends_with('/') {
        url.pop();
    }
    if !url.starts_with("http") && !url.starts_with(profile.proxy_path) {
        url = format!("https://{url}");
    }
    url
}

/// Complete global model settings.
pub type ModelSettings = ChatRequestConfig;

/// Partial settings layered over [`ModelSettings`]; `None` keeps the lower layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfigLayer {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub stream: Option<bool>,
    pub include_thoughts: Option<bool>,
    pub gemini_thinking_budget: Option<i32>,
    pub thinking_level: Option<String>,
    pub thinking_budget: Option<u32>,
    pub enable_thinking: Option<bool>,
    pub reasoning_effort: Option<String>,
    pub aspect_ratio: Option<String>,
    pub n_trajectories: Option<u32>,
    /// Merged key by key into the lower layer.
    pub extra: HashMap<String, Value>,
}

impl ModelConfigLayer {
    /// A layer that only selects the model.
    pub fn model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Self::default()
        }
    }

    fn apply(&self, config: &mut ChatRequestConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }
        fn set_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        set(&mut config.model, &self.model);
        set(&mut config.temperature, &self.temperature);
        set(&mut config.top_p, &self.top_p);
        set(&mut config.max_tokens, &self.max_tokens);
        set(&mut config.presence_penalty, &self.presence_penalty);
        set(&mut config.frequency_penalty, &self.frequency_penalty);
        set(&mut config.stream, &self.stream);
        set(&mut config.include_thoughts, &self.include_thoughts);
        set_opt(&mut config.gemini_thinking_budget, &self.gemini_thinking_budget);
        set_opt(&mut config.thinking_level, &self.thinking_level);
        set_opt(&mut config.thinking_budget, &self.thinking_budget);
        set_opt(&mut config.enable_thinking, &self.enable_thinking);
        set_opt(&mut config.reasoning_effort, &self.reasoning_effort);
        set_opt(&mut config.aspect_ratio, &self.aspect_ratio);
        set_opt(&mut config.n_trajectories, &self.n_trajectories);
        config
            .extra
            .extend(self.extra.iter().map(|(key, value)| (key.clone(), value.clone())));
    }
}

/// Layers global, session and call-site settings; later layers win field by field.
pub fn resolve_request_config(
    global: &ModelSettings,
    session: &ModelConfigLayer,
    call: &ModelConfigLayer,
) -> ChatRequestConfig {
    let mut config = global.clone();
    session.apply(&mut config);
    call.apply(&mut config);
    config
}

/// 根据一组后端配置构建 LLMClient
pub fn build_client_from_configs(
    configs: &[ProviderConfig],
    transport: DynHttpTransport,
) -> Result<LLMClient, LLMError> {
    let mut builder = LLMClient::builder();
    let mut seen = HashSet::new();

    for config in configs {
        if config.handle.trim().is_empty() {
            return Err(LLMError::InvalidConfig {
                field: "handle".to_string(),
                reason: "handle must not be empty".to_string(),
            });
        }
        if !seen.insert(config.handle.as_str()) {
            return Err(LLMError::InvalidConfig {
                field: "handle".to_string(),
                reason: format!("duplicate handle `{}`", config.handle),
            });
        }
        let provider = build_provider_from_config(config, transport.clone())?;
        debug!(handle = %config.handle, provider = provider.name(), "registered provider");
        builder = builder.register_handle(config.handle.clone(), provider);
    }

    Ok(builder.build())
}

fn build_provider_from_config(
    config: &ProviderConfig,
    transport: DynHttpTransport,
) -> Result<DynProvider, LLMError> {
    let base_url = resolve_base_url(config.provider, config.base_url.as_deref(), &config.build_mode);
    let api_key = extract_api_key(config)?;

    let provider: DynProvider = match config.provider.compat_vendor() {
        Some(vendor) => {
            let mut provider =
                OpenAiCompatProvider::new(transport, vendor).with_base_url(base_url);
            if let Some(key) = api_key {
                provider = provider.with_api_key(key);
            }
            if let Some(model) = &config.default_model {
                provider = provider.with_default_model(model.clone());
            }
            if let Some(rounds) = config.max_tool_rounds {
                provider = provider.with_max_tool_rounds(rounds);
            }
            if let Some(Value::Object(headers)) = config.extra.get("headers") {
                for (name, value) in headers {
                    if let Value::String(value) = value {
                        provider = provider.with_header(name.clone(), value.clone());
                    }
                }
            }
            Arc::new(provider)
        }
        None => {
            let mut provider = GoogleGeminiProvider::new(transport).with_base_url(base_url);
            if let Some(key) = api_key {
                provider = provider.with_api_key(key);
            }
            if let Some(model) = &config.default_model {
                provider = provider.with_default_model(model.clone());
            }
            if let Some(rounds) = config.max_tool_rounds {
                provider = provider.with_max_tool_rounds(rounds);
            }
            let threshold = config
                .safety_threshold
                .as_deref()
                .filter(|threshold| !threshold.is_empty())
                .or(config.provider.profile().default_safety_threshold);
            if let Some(threshold) = threshold {
                provider = provider.with_safety_threshold(threshold);
            }
            if let Some(Value::Bool(sse)) = config.extra.get("sse") {
                provider = provider.with_sse(*sse);
            }
            Arc::new(provider)
        }
    };

    Ok(provider)
}

/// Credentials may only be omitted behind the proxy, which injects them server side.
fn extract_api_key(config: &ProviderConfig) -> Result<Option<String>, LLMError> {
    let name = config.provider.name();
    match (&config.credential, &config.build_mode) {
        (Credential::ApiKey { key }, _) => Ok(Some(key.clone())),
        (Credential::Bearer { token }, _) => Ok(Some(token.clone())),
        (Credential::None, BuildMode::Proxy { .. }) => Ok(None),
        (Credential::None, BuildMode::App) => Err(LLMError::Auth {
            message: format!("provider {name} requires credential"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::reqwest::default_dyn_transport;

    fn config(handle: &str, provider: ProviderKind, credential: Credential) -> ProviderConfig {
        ProviderConfig {
            handle: handle.to_string(),
            provider,
            credential,
            default_model: None,
            base_url: None,
            build_mode: BuildMode::App,
            safety_threshold: None,
            max_tool_rounds: None,
            extra: HashMap::new(),
        }
    }

    fn key(key: &str) -> Credential {
        Credential::ApiKey {
            key: key.to_string(),
        }
    }

    /// 验证所有 ProviderKind 分支都可以被构建并注册到 LLMClient
    #[test]
    fn build_client_from_configs_supports_all_providers() {
        let transport = default_dyn_transport().expect("transport");
        let configs = vec![
            config("openrouter", ProviderKind::OpenRouter, key("k1")),
            config("nvidia", ProviderKind::Nvidia, key("k2")),
            config("longcat", ProviderKind::LongCat, key("k3")),
            config("meituan", ProviderKind::Meituan, key("k4")),
            config("gemini", ProviderKind::GoogleGemini, key("k5")),
        ];

        let client = build_client_from_configs(&configs, transport).expect("client");
        let mut handles = client.handles();
        handles.sort();
        assert_eq!(
            handles,
            vec!["gemini", "longcat", "meituan", "nvidia", "openrouter"]
        );
    }

    #[test]
    fn missing_credential_is_only_allowed_behind_proxy() {
        let transport = default_dyn_transport().expect("transport");

        let configs = vec![config("or", ProviderKind::OpenRouter, Credential::None)];
        match build_client_from_configs(&configs, transport.clone()) {
            Err(LLMError::Auth { message }) => assert!(message.contains("openrouter")),
            Err(other) => panic!("unexpected error type: {other:?}"),
            Ok(_) => panic!("expected auth error"),
        }

        let mut proxied = config("or", ProviderKind::OpenRouter, Credential::None);
        proxied.build_mode = BuildMode::Proxy {
            origin: String::new(),
        };
        assert!(build_client_from_configs(&[proxied], transport).is_ok());
    }

    #[test]
    fn duplicate_handles_are_rejected() {
        let transport = default_dyn_transport().expect("transport");
        let configs = vec![
            config("same", ProviderKind::Nvidia, key("a")),
            config("same", ProviderKind::LongCat, key("b")),
        ];
        match build_client_from_configs(&configs, transport) {
            Err(LLMError::InvalidConfig { field, reason }) => {
                assert_eq!(field, "handle");
                assert!(reason.contains("same"));
            }
            Err(other) => panic!("unexpected error type: {other:?}"),
            Ok(_) => panic!("expected invalid config"),
        }
    }

    #[test]
    fn base_url_resolution_follows_override_then_mode() {
        let app = BuildMode::App;
        let proxy = BuildMode::Proxy {
            origin: "https://chat.example.com/".to_string(),
        };
        assert_eq!(
            resolve_base_url(ProviderKind::Nvidia, None, &app),
            "https://integrate.api.nvidia.com"
        );
        assert_eq!(
            resolve_base_url(ProviderKind::Nvidia, None, &proxy),
            "https://chat.example.com/api/nvidia"
        );
        assert_eq!(
            resolve_base_url(ProviderKind::LongCat, Some("  "), &app),
            "https://api.longcat.chat/openai"
        );
        assert_eq!(
            resolve_base_url(ProviderKind::Meituan, Some("http://localhost:8080/"), &app),
            "http://localhost:8080"
        );
        assert_eq!(
            resolve_base_url(ProviderKind::Meituan, Some("/api/meituan/"), &app),
            "/api/meituan"
        );
        assert_eq!(
            resolve_base_url(ProviderKind::GoogleGemini, Some("gemini.proxy.dev"), &app),
            "https://gemini.proxy.dev"
        );
    }

    #[test]
    fn vendor_table_matches_kinds() {
        for profile in &VENDOR_PROFILES {
            assert_eq!(profile.kind.profile(), profile);
            assert_eq!(
                profile.chat_path.is_some(),
                profile.kind.compat_vendor().is_some()
            );
        }
    }

    #[test]
    fn layers_override_field_by_field() {
        let global = ModelSettings::default();
        let session = ModelConfigLayer {
            model: Some("gemini-2.5-flash".into()),
            temperature: Some(0.9),
            gemini_thinking_budget: Some(1024),
            extra: HashMap::from([("a".to_string(), Value::from(1))]),
            ..ModelConfigLayer::default()
        };
        let call = ModelConfigLayer {
            max_tokens: Some(800),
            extra: HashMap::from([("b".to_string(), Value::from(2))]),
            ..ModelConfigLayer::model("gemini-3-pro-preview")
        };

        let config = resolve_request_config(&global, &session, &call);
        assert_eq!(config.model, "gemini-3-pro-preview");
        assert_eq!(config.temperature, 0.9);
        assert_eq!(config.top_p, 1.0);
        assert_eq!(config.max_tokens, 800);
        assert_eq!(config.gemini_thinking_budget, Some(1024));
        assert!(config.stream);
        assert_eq!(config.extra.len(), 2);
    }

    #[test]
    fn provider_config_deserializes_with_defaults() {
        let config: ProviderConfig = serde_json::from_str(
            r#"{
                "handle": "gemini",
                "provider": "google_gemini",
                "credential": {"type": "none"},
                "build_mode": {"mode": "proxy"}
            }"#,
        )
        .expect("config");
        assert_eq!(config.provider, ProviderKind::GoogleGemini);
        assert_eq!(
            config.build_mode,
            BuildMode::Proxy {
                origin: String::new()
            }
        );
        assert!(config.extra.is_empty());
    }
}
