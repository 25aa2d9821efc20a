//! 日志初始化
//!
//! 容器自身只通过 `tracing` 宏输出日志，订阅者由应用在启动前安装。
//! 配置可以来自代码、环境变量、TOML 的 `[logging]` 表，或者容器的 `Environment`。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::Environment;
use crate::error::{ContainerError, ContainerResult};

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ContainerError::Config(format!("Invalid log level: {}", other))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 单行紧凑输出（默认）
    Compact,
    Full,
    Json,
    /// 多行输出，适合开发时阅读
    Pretty,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Compact => "compact",
            LogFormat::Full => "full",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormat {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "full" => Ok(LogFormat::Full),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(ContainerError::Config(format!("Invalid log format: {}", other))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 日志配置
///
/// ```toml
/// [logging]
/// level = "info"
/// format = "json"
///
/// [logging.levels]
/// wyvern_core = "debug"
/// wyvern_aop = "trace"
/// ```
///
/// `filter` 给出时完全取代 `level` 与 `levels`，语法与 `RUST_LOG` 相同。
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub show_timestamp: bool,
    /// 输出模块路径
    pub show_target: bool,
    pub show_thread_ids: bool,
    pub show_thread_names: bool,
    /// 按模块覆盖级别
    pub levels: BTreeMap<String, LogLevel>,
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            show_timestamp: true,
            show_target: false,
            show_thread_ids: false,
            show_thread_names: false,
            levels: BTreeMap::new(),
            filter: None,
        }
    }
}

#[derive(Deserialize)]
struct LoggingSection {
    #[serde(default)]
    logging: LoggingConfig,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// 单独设置某个模块的级别
    pub fn module_level(mut self, target: impl Into<String>, level: LogLevel) -> Self {
        self.levels.insert(target.into(), level);
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn show_timestamp(mut self, show: bool) -> Self {
        self.show_timestamp = show;
        self
    }

    pub fn show_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    pub fn show_threads(mut self, ids: bool, names: bool) -> Self {
        self.show_thread_ids = ids;
        self.show_thread_names = names;
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// 读取 `RUST_LOG`、`LOG_LEVEL` 与 `LOG_FORMAT`，无法解析的值被忽略
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var("RUST_LOG") {
            config.filter = Some(filter);
        }
        if let Some(level) = std::env::var("LOG_LEVEL").ok().and_then(|v| v.parse().ok()) {
            config.level = level;
        }
        if let Some(format) = std::env::var("LOG_FORMAT").ok().and_then(|v| v.parse().ok()) {
            config.format = format;
        }
        config
    }

    /// 解析 TOML 文本中的 `[logging]` 表，缺失的字段取默认值
    pub fn from_toml_str(content: &str) -> ContainerResult<Self> {
        toml::from_str::<LoggingSection>(content)
            .map(|section| section.logging)
            .map_err(|e| ContainerError::Config(format!("Invalid logging configuration: {}", e)))
    }

    /// 从容器的 `Environment` 读取 `logging.*` 属性
    ///
    /// 与其他配置源共享优先级，例如 `APP_LOGGING_LEVEL=debug` 会覆盖 TOML 中的值。
    pub fn from_environment(environment: &Environment) -> ContainerResult<Self> {
        let defaults = Self::default();
        let level = match environment.get_string("logging.level") {
            Some(level) => level.parse()?,
            None => defaults.level,
        };
        let format = match environment.get_string("logging.format") {
            Some(format) => format.parse()?,
            None => defaults.format,
        };

        Ok(Self {
            level,
            format,
            show_timestamp: environment.get_bool_or("logging.show_timestamp", defaults.show_timestamp),
            show_target: environment.get_bool_or("logging.show_target", defaults.show_target),
            show_thread_ids: environment.get_bool_or("logging.show_thread_ids", defaults.show_thread_ids),
            show_thread_names: environment
                .get_bool_or("logging.show_thread_names", defaults.show_thread_names),
            levels: defaults.levels,
            filter: environment.get_string("logging.filter"),
        })
    }

    /// 生成 `EnvFilter` 指令，例如 `info,wyvern_core=debug`
    pub fn directives(&self) -> String {
        if let Some(filter) = &self.filter {
            return filter.clone();
        }
        std::iter::once(self.level.to_string())
            .chain(self.levels.iter().map(|(target, level)| format!("{}={}", target, level)))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> ContainerResult<EnvFilter> {
        EnvFilter::try_new(self.directives())
            .map_err(|e| ContainerError::Config(format!("Invalid log filter '{}': {}", self.directives(), e)))
    }

    fn format_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(self.show_target)
            .with_thread_ids(self.show_thread_ids)
            .with_thread_names(self.show_thread_names);

        match (self.format, self.show_timestamp) {
            (LogFormat::Json, _) => layer.json().boxed(),
            (LogFormat::Pretty, _) => layer.pretty().boxed(),
            (LogFormat::Compact, true) => layer.compact().boxed(),
            (LogFormat::Compact, false) => layer.compact().without_time().boxed(),
            (LogFormat::Full, true) => layer.boxed(),
            (LogFormat::Full, false) => layer.without_time().boxed(),
        }
    }

    /// 安装全局订阅者，进程内只能成功一次
    pub fn init(self) -> ContainerResult<()> {
        let filter = self.env_filter()?;
        tracing_subscriber::registry()
            .with(self.format_layer())
            .with(filter)
            .try_init()
            .map_err(|e| ContainerError::LoggingInitFailed(e.to_string()))?;

        tracing::debug!("Logging initialized ({}, format: {})", self.directives(), self.format);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapPropertySource;

    #[test]
    fn test_parse_level_and_format() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!(" warning ".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!(matches!("verbose".parse::<LogLevel>(), Err(ContainerError::Config(_))));
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_directives() {
        assert_eq!(LoggingConfig::new().directives(), "info");

        let config = LoggingConfig::new()
            .level(LogLevel::Warn)
            .module_level("wyvern_core", LogLevel::Debug)
            .module_level("wyvern_aop", LogLevel::Trace);
        assert_eq!(config.directives(), "warn,wyvern_aop=trace,wyvern_core=debug");

        let config = config.filter("wyvern_core::context=trace");
        assert_eq!(config.directives(), "wyvern_core::context=trace");
    }

    #[test]
    fn test_from_toml_str() {
        let config = LoggingConfig::from_toml_str(
            r#"
            [logging]
            level = "warn"
            format = "pretty"
            show_thread_ids = true

            [logging.levels]
            wyvern_core = "trace"
            "#,
        )
        .unwrap();

        assert_eq!(config.level, LogLevel::Warn);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.show_thread_ids);
        assert!(config.show_timestamp);
        assert_eq!(config.levels.get("wyvern_core"), Some(&LogLevel::Trace));

        assert_eq!(LoggingConfig::from_toml_str("").unwrap(), LoggingConfig::default());
        let err = LoggingConfig::from_toml_str("[logging]\nlevel = \"loud\"").unwrap_err();
        assert!(matches!(err, ContainerError::Config(_)));
    }

    #[test]
    fn test_from_environment() {
        let environment = Environment::new();
        environment.add_property_source(Box::new(
            MapPropertySource::new("test")
                .with_property("logging.level", "debug")
                .with_property("logging.format", "json")
                .with_property("logging.show_target", true),
        ));

        let config = LoggingConfig::from_environment(&environment).unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.show_target);
        assert!(config.filter.is_none());

        environment.add_property_source(Box::new(
            MapPropertySource::new("override")
                .with_property("logging.format", "xml")
                .with_priority(60),
        ));
        assert!(LoggingConfig::from_environment(&environment).is_err());
    }
}
