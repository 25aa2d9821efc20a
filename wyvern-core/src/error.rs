//! 容器错误类型
//!
//! 容器自身的错误使用 `ContainerError` 表达；用户提供的工厂、回调、监听器
//! 返回 `anyhow::Result`，其错误作为 `source` 挂在对应的变体上。

use thiserror::Error;

/// 容器操作的统一结果类型
pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

/// 用户回调使用的结果类型
pub use anyhow::Result;

/// 单个被禁用候选者的诊断信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisabledCandidate {
    pub bean: String,
    pub reasons: Vec<String>,
}

impl std::fmt::Display for DisabledCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.bean, self.reasons.join("; "))
    }
}

fn describe_disabled(disabled: &[DisabledCandidate]) -> String {
    if disabled.is_empty() {
        String::new()
    } else {
        let items: Vec<String> = disabled.iter().map(|d| d.to_string()).collect();
        format!("; disabled candidates: [{}]", items.join(", "))
    }
}

fn describe_qualifier(qualifier: &Option<String>) -> String {
    qualifier
        .as_ref()
        .map(|q| format!(" for qualifier {}", q))
        .unwrap_or_default()
}

fn describe_failures(failures: &[(String, anyhow::Error)]) -> String {
    failures
        .iter()
        .map(|(bean, e)| format!("{}: {:#}", bean, e))
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_path(path: &[String]) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" (injection path: {})", path.join(" -> "))
    }
}

/// 容器错误
#[derive(Debug, Error)]
pub enum ContainerError {
    /// 没有满足条件的候选 Bean
    #[error("No bean of type [{bean_type}]{} exists{}{}", describe_qualifier(.qualifier), describe_path(.path), describe_disabled(.disabled))]
    NoSuchBean {
        bean_type: String,
        qualifier: Option<String>,
        path: Vec<String>,
        disabled: Vec<DisabledCandidate>,
    },

    /// 多个候选者且没有 primary
    #[error("Multiple possible bean candidates found for type [{bean_type}]: {}{}", .candidates.join(", "), describe_path(.path))]
    NonUniqueBean {
        bean_type: String,
        candidates: Vec<String>,
        path: Vec<String>,
    },

    /// 循环依赖
    #[error("Circular dependency detected: {}", .path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    /// 条件求值失败（与条件不满足不同，这是致命错误）
    #[error("Failed to evaluate conditions of bean '{bean}': {message}")]
    ConditionEvaluation { bean: String, message: String },

    /// Bean 创建失败（工厂、注入回调或 post-construct 返回错误）
    #[error("Error instantiating bean '{bean}'{}: {source}", describe_path(.path))]
    BeanInstantiation {
        bean: String,
        path: Vec<String>,
        #[source]
        source: anyhow::Error,
    },

    /// 销毁阶段的聚合错误
    #[error("{} bean(s) failed to destroy: {}", .failures.len(), describe_failures(.failures))]
    Destruction { failures: Vec<(String, anyhow::Error)> },

    /// Bean 实例无法转换为请求的类型
    #[error("Bean '{bean}' cannot be viewed as [{expected}]")]
    TypeMismatch { bean: String, expected: String },

    /// 自定义作用域没有激活的实例
    #[error("No active scope instance for scope '{scope}' while resolving bean '{bean}'")]
    NoActiveScope { scope: String, bean: String },

    /// 未注册的作用域
    #[error("Unknown scope '{0}'")]
    UnknownScope(String),

    /// Bean 名称重复
    #[error("Bean definition with name '{0}' already exists")]
    BeanAlreadyExists(String),

    /// 上下文已关闭
    #[error("Application context is closed")]
    ContextClosed,

    /// 事件监听器返回错误
    #[error("Listener '{listener}' failed to handle event '{event}': {source}")]
    EventListener {
        listener: String,
        event: String,
        #[source]
        source: anyhow::Error,
    },

    /// 静态依赖校验失败
    #[error("Dependency validation failed: {0}")]
    DependencyValidationFailed(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 日志初始化失败
    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),
}

impl ContainerError {
    /// 是否为"找不到 Bean"类错误
    pub fn is_no_such_bean(&self) -> bool {
        matches!(self, ContainerError::NoSuchBean { .. })
    }

    /// 是否为循环依赖错误
    pub fn is_circular(&self) -> bool {
        matches!(self, ContainerError::CircularDependency { .. })
    }
}
