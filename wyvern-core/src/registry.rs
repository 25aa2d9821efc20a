//! Bean 定义注册表
//!
//! 构建阶段写入，之后只读：按暴露类型和名称建立索引，记录配置模块与
//! 已知类型名。容器构建完成后注册表不再变化，读取无需加锁。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::bean::{BeanDefinition, BeanType};
use crate::error::{ContainerError, ContainerResult};

/// 配置模块：名称 + 可选的语义化版本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeanConfiguration {
    name: String,
    version: Option<String>,
}

impl BeanConfiguration {
    pub fn new(name: impl Into<String>, version: Option<&str>) -> Self {
        Self {
            name: name.into(),
            version: version.map(String::from),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

/// 链接期提交的 Bean 定义
///
/// 代码生成器为每个 Bean 提交一个工厂函数，`ApplicationContextBuilder::scan_definitions`
/// 收集全部提交。
pub struct BeanDefinitionSubmission {
    pub name: &'static str,
    pub factory: fn() -> BeanDefinition,
}

inventory::collect!(BeanDefinitionSubmission);

/// Bean 定义注册表
#[derive(Debug, Default)]
pub struct BeanDefinitionRegistry {
    definitions: Vec<Arc<BeanDefinition>>,
    by_name: HashMap<String, usize>,
    by_type: HashMap<BeanType, Vec<Arc<BeanDefinition>>>,
    replacing: Vec<Arc<BeanDefinition>>,
    configurations: HashMap<String, BeanConfiguration>,
    known_types: HashSet<String>,
}

impl BeanDefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册定义，名称重复时报错
    pub fn register(&mut self, mut definition: BeanDefinition) -> ContainerResult<Arc<BeanDefinition>> {
        if self.by_name.contains_key(definition.name()) {
            return Err(ContainerError::BeanAlreadyExists(definition.name().to_string()));
        }

        definition.index = self.definitions.len();
        let definition = Arc::new(definition);

        for bean_type in definition.exposed_types() {
            self.known_types.insert(bean_type.name().to_string());
            self.known_types.insert(bean_type.simple_name().to_string());
            let entries = self.by_type.entry(bean_type).or_default();
            if !entries.iter().any(|d| Arc::ptr_eq(d, &definition)) {
                entries.push(Arc::clone(&definition));
            }
        }
        if !definition.replaces().is_empty() {
            self.replacing.push(Arc::clone(&definition));
        }
        self.by_name.insert(definition.name().to_string(), definition.index());
        self.definitions.push(Arc::clone(&definition));

        tracing::debug!(
            "Registered bean definition '{}' ({}, scope: {})",
            definition.name(),
            definition.bean_type(),
            definition.scope()
        );
        Ok(definition)
    }

    /// 注册配置模块
    pub fn register_configuration(&mut self, configuration: BeanConfiguration) {
        tracing::debug!(
            "Registered configuration '{}' (version: {})",
            configuration.name(),
            configuration.version().unwrap_or("none")
        );
        self.configurations
            .insert(configuration.name().to_string(), configuration);
    }

    /// 声明一个已知类型名，供 `Classes` 条件使用
    pub fn register_known_type(&mut self, name: impl Into<String>) {
        self.known_types.insert(name.into());
    }

    /// 暴露 `bean_type` 的所有定义，按注册顺序，不做条件过滤
    pub fn definitions_for(&self, bean_type: &BeanType) -> &[Arc<BeanDefinition>] {
        self.by_type.get(bean_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_definition(&self, name: &str) -> Option<&Arc<BeanDefinition>> {
        self.by_name.get(name).map(|&i| &self.definitions[i])
    }

    pub fn get_bean_configuration(&self, name: &str) -> Option<&BeanConfiguration> {
        self.configurations.get(name)
    }

    pub fn is_known_type(&self, name: &str) -> bool {
        self.known_types.contains(name)
    }

    /// 声明了替换关系的定义
    pub(crate) fn replacing_definitions(&self) -> &[Arc<BeanDefinition>] {
        &self.replacing
    }

    /// 全部定义，按注册顺序
    pub fn definitions(&self) -> &[Arc<BeanDefinition>] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
