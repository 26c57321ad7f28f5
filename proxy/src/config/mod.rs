// SPDX-License-Identifier: MIT
//! Proxy configuration: YAML file, `CLAUDE_PROXY_*` environment overrides,
//! validation, and first-run default-file creation.
//!
//! Loading order: parse the YAML, apply environment overrides, validate.
//! When the file does not exist a commented default is written to the
//! requested path and loading fails with a pointer to it, so the operator
//! edits real values instead of running on placeholders.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ─── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxySettings,
    pub services: Vec<Service>,
    pub difficulty_mapping: HashMap<String, String>,
    #[serde(default)]
    pub evaluator: EvaluatorSettings,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub logging: LogSettings,
}

/// Listener and timeout knobs. All timeouts are whole seconds, matching the
/// config file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_long_timeout")]
    pub read_timeout: u64,
    #[serde(default = "default_long_timeout")]
    pub write_timeout: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "default_long_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_evaluator_timeout")]
    pub evaluator_timeout: u64,
}

impl ProxySettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn evaluator_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluator_timeout)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            read_timeout: default_long_timeout(),
            write_timeout: default_long_timeout(),
            idle_timeout: default_idle_timeout(),
            request_timeout: default_long_timeout(),
            evaluator_timeout: default_evaluator_timeout(),
        }
    }
}

/// One upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Absolute upstream URL including the messages path.
    pub url: String,
    /// Bearer credential sent to this provider.
    pub api_key: String,
    pub role: Role,
    /// Third-party Claude-compatible endpoints often reject the `thinking`
    /// field; set false to have the rewriter strip it.
    #[serde(default = "default_true")]
    pub supports_thinking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Evaluator,
    Executor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Evaluator => f.write_str("evaluator"),
            Role::Executor => f.write_str("executor"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorSettings {
    #[serde(default = "default_evaluator_model")]
    pub model: String,
    #[serde(default = "default_evaluator_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_true")]
    pub include_history: bool,
    #[serde(default = "default_max_history_rounds")]
    pub max_history_rounds: usize,
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            model: default_evaluator_model(),
            max_tokens: default_evaluator_max_tokens(),
            include_history: true,
            max_history_rounds: default_max_history_rounds(),
            prompt_template: default_prompt_template(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Fall back to a synthetic medium difficulty when the evaluator is
    /// unreachable, instead of failing the request.
    #[serde(default)]
    pub evaluator_fallback: bool,
    /// Accepted but intentionally not acted on by the proxying paths.
    #[serde(default)]
    pub service_auto_switch: bool,
    #[serde(default = "default_true")]
    pub request_logging: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            evaluator_fallback: false,
            service_auto_switch: false,
            request_logging: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_output")]
    pub output_path: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output_path: default_log_output(),
        }
    }
}

// ─── Defaults ─────────────────────────────────────────────────────────────────

fn default_port() -> u16 {
    27015
}

fn default_long_timeout() -> u64 {
    1800
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_evaluator_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_evaluator_model() -> String {
    "claude-3-haiku-20240307".to_string()
}

fn default_evaluator_max_tokens() -> u32 {
    100
}

fn default_max_history_rounds() -> usize {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_output() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_prompt_template() -> String {
    DEFAULT_PROMPT_TEMPLATE.to_string()
}

/// The evaluator prompt shipped with the proxy. Placeholders are filled by
/// the evaluator client; the wording stresses scoring the current step, not
/// the overall project.
const DEFAULT_PROMPT_TEMPLATE: &str = r#"你是一个任务复杂度评估专家。请分析以下 Claude API 请求中【当前这一步具体任务】的复杂度，并返回 JSON 格式的结果。

重要说明：
- 请评估【当前这一步操作】的复杂度，而非整体项目的复杂度
- 例如：如果整体任务是"开发复杂电商系统"，但当前步骤是"创建一个配置文件"，应评估为简单任务（1-2级）
- 请聚焦于当前需要执行的具体操作，不要被项目整体规模影响判断

当前任务信息：
- 模型: {{.Model}}
- 消息数量: {{.MessageCount}}
- 当前任务: {{.CurrentTask}}{{.HistoryContext}}

评估标准：
1 级（非常简单）：简单查询、基础问答、信息查找、单行代码、创建简单文件
2 级（简单）：基础分析、简单总结、格式转换、简单函数编写、修改配置
3 级（中等）：代码编写、数据分析、文档生成、模块开发、多文件修改
4 级（复杂）：架构设计、复杂重构、深度分析、多模块集成、算法实现
5 级（非常复杂）：系统设计、多步骤规划任务、创新性解决方案、大型重构

请严格按照以下 JSON 格式返回，不要包含任何其他内容：
{
  "difficulty_level": 数字（必须是1-5之间的整数）
}

你的评估："#;

// ─── Loading ──────────────────────────────────────────────────────────────────

impl Config {
    /// Load a config file, apply `CLAUDE_PROXY_*` overrides, and validate.
    ///
    /// A missing file is not an I/O error: a commented default is written to
    /// `path` and an error explains that it needs editing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            write_default_config(path)?;
            bail!(
                "created default config file at {}; edit it and run again",
                path.display()
            );
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables onto the parsed file. Keys are the YAML
    /// path joined with `_` and uppercased under the `CLAUDE_PROXY_` prefix,
    /// e.g. `CLAUDE_PROXY_PROXY_PORT` or `CLAUDE_PROXY_LOGGING_LEVEL`.
    pub fn apply_env_overrides(&mut self) {
        override_from_env("PROXY_PORT", &mut self.proxy.port);
        override_from_env("PROXY_READ_TIMEOUT", &mut self.proxy.read_timeout);
        override_from_env("PROXY_WRITE_TIMEOUT", &mut self.proxy.write_timeout);
        override_from_env("PROXY_IDLE_TIMEOUT", &mut self.proxy.idle_timeout);
        override_from_env("PROXY_REQUEST_TIMEOUT", &mut self.proxy.request_timeout);
        override_from_env("PROXY_EVALUATOR_TIMEOUT", &mut self.proxy.evaluator_timeout);

        override_from_env("EVALUATOR_MODEL", &mut self.evaluator.model);
        override_from_env("EVALUATOR_MAX_TOKENS", &mut self.evaluator.max_tokens);
        override_from_env("EVALUATOR_INCLUDE_HISTORY", &mut self.evaluator.include_history);
        override_from_env(
            "EVALUATOR_MAX_HISTORY_ROUNDS",
            &mut self.evaluator.max_history_rounds,
        );

        override_from_env(
            "FEATURES_EVALUATOR_FALLBACK",
            &mut self.features.evaluator_fallback,
        );
        override_from_env(
            "FEATURES_SERVICE_AUTO_SWITCH",
            &mut self.features.service_auto_switch,
        );
        override_from_env("FEATURES_REQUEST_LOGGING", &mut self.features.request_logging);

        override_from_env("LOGGING_LEVEL", &mut self.logging.level);
        if let Ok(value) = std::env::var("CLAUDE_PROXY_LOGGING_OUTPUT_PATH") {
            self.logging.output_path = PathBuf::from(value);
        }
    }

    /// Reject configurations the request path cannot serve.
    pub fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            bail!("at least one service must be configured");
        }

        let mut evaluators = 0usize;
        let mut executors = 0usize;
        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            if service.id.is_empty() {
                bail!("service id must not be empty");
            }
            if !seen.insert(service.id.as_str()) {
                bail!("duplicate service id: {}", service.id);
            }
            if service.url.is_empty() {
                bail!("service {} has an empty url", service.id);
            }
            if service.api_key.is_empty() {
                bail!("service {} has an empty api_key", service.id);
            }
            match service.role {
                Role::Evaluator => evaluators += 1,
                Role::Executor => executors += 1,
            }
        }

        if evaluators != 1 {
            bail!("exactly one service must have role=evaluator (found {evaluators})");
        }
        if executors == 0 {
            bail!("at least one service must have role=executor");
        }

        if self.difficulty_mapping.is_empty() {
            bail!("difficulty_mapping must not be empty");
        }
        for (level, id) in &self.difficulty_mapping {
            let Some(service) = self.services.iter().find(|s| &s.id == id) else {
                bail!("difficulty level {level} maps to unknown service id {id}");
            };
            if service.role != Role::Executor {
                bail!("difficulty level {level} maps to non-executor service {id}");
            }
        }

        Ok(())
    }
}

fn override_from_env<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(value) = std::env::var(format!("CLAUDE_PROXY_{key}")) {
        match value.parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!(key, value = %value, "ignoring unparsable environment override"),
        }
    }
}

// ─── Default config file ──────────────────────────────────────────────────────

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create config directory {}", dir.display()))?;
        }
    }

    std::fs::write(path, default_config_file())
        .with_context(|| format!("failed to write default config file {}", path.display()))
}

fn default_config_file() -> String {
    format!(
        r#"# claude-proxy configuration

proxy:
  port: 27015

# Upstream providers. Exactly one evaluator; one or more executors.
services:
  - id: "evaluator-1"
    name: "difficulty evaluator"
    url: "https://api.example.com/v1/messages"
    api_key: "cr_your_evaluator_api_key"
    role: "evaluator"

  - id: "simple-service"
    name: "simple tasks"
    url: "https://simple.example.com/v1/messages"
    api_key: "cr_your_simple_api_key"
    role: "executor"
    supports_thinking: true

  - id: "medium-service"
    name: "medium tasks"
    url: "https://medium.example.com/v1/messages"
    api_key: "cr_your_medium_api_key"
    role: "executor"
    supports_thinking: true

  - id: "complex-service"
    name: "complex tasks"
    url: "https://complex.example.com/v1/messages"
    api_key: "cr_your_complex_api_key"
    role: "executor"
    supports_thinking: true

# Difficulty level (1-5) to executor id.
difficulty_mapping:
  "1": "simple-service"
  "2": "simple-service"
  "3": "medium-service"
  "4": "complex-service"
  "5": "complex-service"

evaluator:
  model: "claude-3-haiku-20240307"
  max_tokens: 100
  include_history: true
  max_history_rounds: 3
  prompt_template: |
{template}

features:
  evaluator_fallback: false  # synthesize level 3 when the evaluator is down
  service_auto_switch: false # reserved, not implemented
  request_logging: true

logging:
  level: "info"
  output_path: "./logs"
"#,
        template = indent_block(DEFAULT_PROMPT_TEMPLATE, "    ")
    )
}

fn indent_block(text: &str, indent: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{indent}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Tests ────────────────────────────────────────────────────────────────────
