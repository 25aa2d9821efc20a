//! 属性配置
//!
//! `Environment` 按优先级查询一组 `PropertySource`，属性条件和日志配置都从这里取值。
//! 所有配置源都使用扁平的点分键，例如 `database.pool.size`。

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{ContainerError, ContainerResult};

/// 配置值
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<ConfigValue>),
    Object(HashMap<String, ConfigValue>),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// 按目标类型读取，字符串会被解析
    pub fn get<T: FromConfigValue>(&self) -> Option<T> {
        T::from_config_value(self)
    }
}

/// 标量按字面值输出，数组以逗号连接；属性条件用它做比较
impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::String(s) => f.write_str(s),
            ConfigValue::Int(i) => write!(f, "{}", i),
            ConfigValue::Float(v) => write!(f, "{}", v),
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Array(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                f.write_str(&rendered.join(","))
            }
            ConfigValue::Object(_) => f.write_str("{..}"),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::String(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<toml::Value> for ConfigValue {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::String(s) => ConfigValue::String(s),
            toml::Value::Integer(i) => ConfigValue::Int(i),
            toml::Value::Float(v) => ConfigValue::Float(v),
            toml::Value::Boolean(b) => ConfigValue::Bool(b),
            toml::Value::Datetime(dt) => ConfigValue::String(dt.to_string()),
            toml::Value::Array(items) => ConfigValue::Array(items.into_iter().map(Into::into).collect()),
            toml::Value::Table(table) => {
                ConfigValue::Object(table.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// 从配置值转换
pub trait FromConfigValue: Sized {
    fn from_config_value(value: &ConfigValue) -> Option<Self>;
}

impl FromConfigValue for String {
    fn from_config_value(value: &ConfigValue) -> Option<Self> {
        value.as_str().map(String::from)
    }
}

impl FromConfigValue for i64 {
    fn from_config_value(value: &ConfigValue) -> Option<Self> {
        match value {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FromConfigValue for f64 {
    fn from_config_value(value: &ConfigValue) -> Option<Self> {
        match value {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(i) => Some(*i as f64),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FromConfigValue for bool {
    fn from_config_value(value: &ConfigValue) -> Option<Self> {
        match value {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

/// 数组，或者逗号分隔的字符串
impl FromConfigValue for Vec<String> {
    fn from_config_value(value: &ConfigValue) -> Option<Self> {
        match value {
            ConfigValue::Array(items) => Some(items.iter().map(ToString::to_string).collect()),
            ConfigValue::String(s) => Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// 配置源
pub trait PropertySource: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Option<ConfigValue>;

    fn keys(&self) -> Vec<String>;

    /// 数字越大越先被查询
    fn priority(&self) -> i32 {
        0
    }
}

/// 按优先级组合的配置源，以及当前激活的 profile
pub struct Environment {
    sources: RwLock<Vec<Box<dyn PropertySource>>>,
    active_profiles: RwLock<Vec<String>>,
    revision: AtomicU64,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<String> = self.sources.read().iter().map(|s| s.name().to_string()).collect();
        f.debug_struct("Environment")
            .field("sources", &sources)
            .field("active_profiles", &*self.active_profiles.read())
            .finish()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            active_profiles: RwLock::new(Vec::new()),
            revision: AtomicU64::new(0),
        }
    }

    /// 每次添加配置源或修改 profile 后递增
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// 同优先级时先添加的先被查询
    pub fn add_property_source(&self, source: Box<dyn PropertySource>) {
        tracing::debug!(
            "Added property source '{}' (priority {})",
            source.name(),
            source.priority()
        );
        let mut sources = self.sources.write();
        let position = sources
            .iter()
            .position(|existing| existing.priority() < source.priority())
            .unwrap_or(sources.len());
        sources.insert(position, source);
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        let sources = self.sources.read();
        let found = sources
            .iter()
            .find_map(|source| source.get(key).map(|value| (source.name().to_string(), value)));
        match found {
            Some((source, value)) => {
                tracing::trace!("Property '{}' resolved from '{}'", key, source);
                Some(value)
            }
            None => None,
        }
    }

    /// 按目标类型读取
    pub fn get_as<T: FromConfigValue>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|value| value.get())
    }

    pub fn get_or<T: FromConfigValue>(&self, key: &str, default: T) -> T {
        self.get_as(key).unwrap_or(default)
    }

    pub fn contains_property(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// 任意值的字面形式
    pub fn get_property(&self, key: &str) -> Option<String> {
        self.get(key).map(|value| value.to_string())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_as(key)
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_or(key, default)
    }

    /// 所有配置源的键，去重后排序
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sources.read().iter().flat_map(|s| s.keys()).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn set_active_profiles(&self, profiles: Vec<String>) {
        tracing::debug!("Active profiles: {:?}", profiles);
        *self.active_profiles.write() = profiles;
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    pub fn get_active_profiles(&self) -> Vec<String> {
        self.active_profiles.read().clone()
    }

    /// `!name` 表示该 profile 未激活
    pub fn accepts_profiles(&self, profile: &str) -> bool {
        let active = self.active_profiles.read();
        match profile.strip_prefix('!') {
            Some(negated) => !active.iter().any(|p| p == negated),
            None => active.iter().any(|p| p == profile),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// 内存配置源
pub struct MapPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl MapPropertySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: HashMap::new(),
            priority: 50,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl PropertySource for MapPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// TOML 配置源，表被展开成点分键
///
/// ```toml
/// [database]
/// url = "postgres://localhost"   # database.url
/// pool = { size = 8 }            # database.pool.size
/// ```
pub struct TomlPropertySource {
    inner: MapPropertySource,
}

impl TomlPropertySource {
    pub fn from_file(path: impl AsRef<Path>) -> ContainerResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ContainerError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content, path.display().to_string())
    }

    pub fn from_toml_str(content: &str, name: impl Into<String>) -> ContainerResult<Self> {
        let name = name.into();
        let table: toml::Table = content
            .parse()
            .map_err(|e| ContainerError::Config(format!("Failed to parse TOML '{}': {}", name, e)))?;

        let mut inner = MapPropertySource::new(name).with_priority(0);
        flatten(String::new(), toml::Value::Table(table), &mut inner.properties);
        Ok(Self { inner })
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.inner.priority = priority;
        self
    }
}

fn flatten(prefix: String, value: toml::Value, out: &mut HashMap<String, ConfigValue>) {
    match value {
        toml::Value::Table(table) => {
            for (key, nested) in table {
                let key = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(key, nested, out);
            }
        }
        leaf => {
            out.insert(prefix, leaf.into());
        }
    }
}

impl PropertySource for TomlPropertySource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.inner.get(key)
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }
}

/// 进程环境变量配置源：`APP_DATABASE_URL` 对应 `database.url`
pub struct EnvironmentPropertySource {
    prefix: String,
    priority: i32,
}

impl EnvironmentPropertySource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            priority: 100,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn variable_for(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.replace(['.', '-'], "_").to_uppercase())
    }

    fn key_for(&self, variable: &str) -> Option<String> {
        variable
            .strip_prefix(&self.prefix)
            .map(|rest| rest.to_lowercase().replace('_', "."))
    }
}

impl PropertySource for EnvironmentPropertySource {
    fn name(&self) -> &str {
        "environment"
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        std::env::var(self.variable_for(key)).ok().map(ConfigValue::String)
    }

    fn keys(&self) -> Vec<String> {
        std::env::vars().filter_map(|(name, _)| self.key_for(&name)).collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}
