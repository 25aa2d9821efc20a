//! 条件求值
//!
//! 每个 Bean 定义携带一组 `Requirement`，全部满足时定义才可用（逻辑与，
//! 空列表直接通过）。条件不满足只是把候选者排除，并记录原因用于诊断；
//! 版本号格式错误、正则错误、未注册的自定义条件属于求值失败，作为错误返回。
//!
//! Bean 存在性条件会递归地对其他定义求值。正在求值中的定义一律视为不存在：
//! 依赖自身类型的 `Beans` 条件直接失败，`MissingBeans(自身类型)` 表示
//! "除自己之外没有该类型的 Bean"。依赖了正在求值定义或自定义条件的结果
//! 不进入缓存；`Environment` 变化后缓存整体失效。

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;

use crate::bean::{BeanDefinition, BeanType};
use crate::config::Environment;
use crate::context::ApplicationContext;
use crate::error::{ContainerError, ContainerResult};
use crate::registry::BeanConfiguration;

/// 属性条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyRequirement {
    name: String,
    value: Option<String>,
    not_equals: Option<String>,
    default_value: Option<String>,
    pattern: Option<String>,
}

impl PropertyRequirement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// 属性值必须等于 `value`
    pub fn equals(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// 属性值必须不等于 `value`；属性缺失时通过
    pub fn not_equals(mut self, value: impl Into<String>) -> Self {
        self.not_equals = Some(value.into());
        self
    }

    /// 属性缺失时使用的值
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// 属性值必须匹配正则
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl From<PropertyRequirement> for Requirement {
    fn from(value: PropertyRequirement) -> Self {
        Requirement::Property(value)
    }
}

/// 条件子句
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// 所有类型名都为容器所知
    Classes(Vec<String>),
    /// 所有类型名都不为容器所知
    MissingClasses(Vec<String>),
    /// 所有类型都有可用的 Bean
    Beans(Vec<BeanType>),
    /// 所有类型都没有可用的 Bean
    MissingBeans(Vec<BeanType>),
    /// 属性条件
    Property(PropertyRequirement),
    /// 属性不存在
    MissingProperty(String),
    /// 配置模块存在，且版本不低于 `min_version`
    Configuration {
        name: String,
        min_version: Option<String>,
    },
    /// 任一 profile 处于激活状态
    Env(Vec<String>),
    /// 所有 profile 都未激活
    NotEnv(Vec<String>),
    /// 以键注册的自定义条件
    Condition(String),
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl Requirement {
    pub fn classes(names: &[&str]) -> Self {
        Requirement::Classes(strings(names))
    }

    pub fn missing_classes(names: &[&str]) -> Self {
        Requirement::MissingClasses(strings(names))
    }

    pub fn bean<T: ?Sized + 'static>() -> Self {
        Requirement::Beans(vec![BeanType::of::<T>()])
    }

    pub fn missing_bean<T: ?Sized + 'static>() -> Self {
        Requirement::MissingBeans(vec![BeanType::of::<T>()])
    }

    /// `Requirement::property("lang").equals("en")` 的起点
    pub fn property(name: impl Into<String>) -> PropertyRequirement {
        PropertyRequirement::new(name)
    }

    pub fn missing_property(name: impl Into<String>) -> Self {
        Requirement::MissingProperty(name.into())
    }

    pub fn configuration(name: impl Into<String>, min_version: Option<&str>) -> Self {
        Requirement::Configuration {
            name: name.into(),
            min_version: min_version.map(String::from),
        }
    }

    pub fn env(profiles: &[&str]) -> Self {
        Requirement::Env(strings(profiles))
    }

    pub fn not_env(profiles: &[&str]) -> Self {
        Requirement::NotEnv(strings(profiles))
    }

    pub fn condition(key: impl Into<String>) -> Self {
        Requirement::Condition(key.into())
    }
}

/// 语义化版本：major.minor.patch，数值比较
///
/// `-` 之后的后缀被忽略；缺失的 minor / patch 视为 0。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemanticVersion {
    major: u64,
    minor: u64,
    patch: u64,
}

impl SemanticVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    pub fn parse(version: &str) -> Result<Self, String> {
        let core = version.trim().split('-').next().unwrap_or_default();
        if core.is_empty() {
            return Err(format!("Invalid semantic version '{}'", version));
        }
        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 3 {
            return Err(format!("Invalid semantic version '{}': too many components", version));
        }
        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("Invalid semantic version '{}': '{}' is not numeric", version, part))?;
        }
        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }

    pub fn is_at_least(&self, other: &SemanticVersion) -> bool {
        self >= other
    }
}

impl FromStr for SemanticVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// 自定义条件
pub trait Condition: Send + Sync {
    fn matches(&self, context: &ConditionContext<'_>) -> bool;
}

impl<F> Condition for F
where
    F: Fn(&ConditionContext<'_>) -> bool + Send + Sync,
{
    fn matches(&self, context: &ConditionContext<'_>) -> bool {
        self(context)
    }
}

/// 一次条件求值的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionOutcome {
    pub eligible: bool,
    pub reasons: Vec<String>,
}

/// 跨递归调用共享的求值状态：正在求值的定义栈
#[derive(Debug, Default)]
pub(crate) struct EvaluationState {
    // (定义的注册序号, 结果是否依赖了正在求值的定义)
    stack: Vec<(usize, bool)>,
}

impl EvaluationState {
    fn position(&self, index: usize) -> Option<usize> {
        self.stack.iter().position(|(i, _)| *i == index)
    }

    /// 跳过正在求值的定义：其上方的所有帧都不可缓存
    fn skip_in_progress(&mut self, position: usize) {
        for frame in self.stack.iter_mut().skip(position + 1) {
            frame.1 = true;
        }
    }

    /// 自定义条件可能读取任意状态，整条求值链都不可缓存
    fn taint_all(&mut self) {
        for frame in self.stack.iter_mut() {
            frame.1 = true;
        }
    }
}

/// 条件求值上下文
///
/// 只在一次求值期间存在。
pub struct ConditionContext<'a> {
    definition: &'a BeanDefinition,
    context: &'a ApplicationContext,
    state: RefCell<&'a mut EvaluationState>,
    failures: RefCell<Vec<String>>,
    error: RefCell<Option<ContainerError>>,
}

impl<'a> ConditionContext<'a> {
    fn new(
        definition: &'a BeanDefinition,
        context: &'a ApplicationContext,
        state: &'a mut EvaluationState,
    ) -> Self {
        Self {
            definition,
            context,
            state: RefCell::new(state),
            failures: RefCell::new(Vec::new()),
            error: RefCell::new(None),
        }
    }

    /// 正在求值的定义
    pub fn definition(&self) -> &BeanDefinition {
        self.definition
    }

    pub fn environment(&self) -> &Environment {
        self.context.environment()
    }

    /// 记录一个失败原因
    pub fn fail(&self, reason: impl Into<String>) {
        self.failures.borrow_mut().push(reason.into());
    }

    /// 类型名是否为容器所知
    pub fn is_known_type(&self, name: &str) -> bool {
        self.context.registry().is_known_type(name)
    }

    pub fn get_bean_configuration(&self, name: &str) -> Option<&BeanConfiguration> {
        self.context.registry().get_bean_configuration(name)
    }

    /// 是否存在可用的 `bean_type` Bean
    ///
    /// 求值出错时返回 `false`，错误在条件返回后上报。
    pub fn contains_bean_type(&self, bean_type: BeanType) -> bool {
        let result = {
            let mut state = self.state.borrow_mut();
            self.context
                .conditions()
                .eligible_candidates(self.context, bean_type, &mut **state)
        };
        match result {
            Ok(candidates) => !candidates.is_empty(),
            Err(e) => {
                self.error.borrow_mut().get_or_insert(e);
                false
            }
        }
    }

    pub fn contains_bean<T: ?Sized + 'static>(&self) -> bool {
        self.contains_bean_type(BeanType::of::<T>())
    }
}

/// 按 `Environment::revision` 划分的结果缓存，配置变化后整体失效
#[derive(Default)]
struct OutcomeCache {
    revision: u64,
    outcomes: HashMap<usize, ConditionOutcome>,
}

/// 条件求值器，持有自定义条件和结果缓存
pub(crate) struct ConditionEvaluator {
    conditions: HashMap<String, Arc<dyn Condition>>,
    cache: RwLock<OutcomeCache>,
}

impl ConditionEvaluator {
    pub(crate) fn new(conditions: HashMap<String, Arc<dyn Condition>>) -> Self {
        Self {
            conditions,
            cache: RwLock::new(OutcomeCache::default()),
        }
    }

    /// 求值一个定义
    pub(crate) fn outcome(
        &self,
        context: &ApplicationContext,
        definition: &BeanDefinition,
        state: &mut EvaluationState,
    ) -> ContainerResult<ConditionOutcome> {
        let environment = context.environment();
        let revision = environment.revision();
        {
            let cache = self.cache.read();
            if cache.revision == revision {
                if let Some(cached) = cache.outcomes.get(&definition.index()) {
                    return Ok(cached.clone());
                }
            }
        }

        state.stack.push((definition.index(), false));
        let result = self.evaluate(context, definition, state);
        let (_, tainted) = state.stack.pop().unwrap_or((definition.index(), true));
        let outcome = result?;

        // 求值期间配置又变了，结果可能已经过期
        if !tainted && environment.revision() == revision {
            let mut cache = self.cache.write();
            if cache.revision < revision {
                tracing::trace!("Environment changed, dropping {} cached condition results", cache.outcomes.len());
                cache.outcomes.clear();
                cache.revision = revision;
            }
            if cache.revision == revision {
                cache.outcomes.insert(definition.index(), outcome.clone());
            }
        }
        if !outcome.eligible {
            tracing::debug!(
                "Bean '{}' is disabled: {}",
                definition.name(),
                outcome.reasons.join("; ")
            );
        }
        Ok(outcome)
    }

    fn evaluate(
        &self,
        context: &ApplicationContext,
        definition: &BeanDefinition,
        state: &mut EvaluationState,
    ) -> ContainerResult<ConditionOutcome> {
        let mut reasons = Vec::new();
        for requirement in definition.requirements() {
            if let Some(reason) = self.check(context, definition, requirement, state)? {
                reasons.push(reason);
                break;
            }
        }
        Ok(ConditionOutcome {
            eligible: reasons.is_empty(),
            reasons,
        })
    }

    /// 检查单个子句，不满足时返回原因
    fn check(
        &self,
        context: &ApplicationContext,
        definition: &BeanDefinition,
        requirement: &Requirement,
        state: &mut EvaluationState,
    ) -> ContainerResult<Option<String>> {
        let failure = |message: String| ContainerError::ConditionEvaluation {
            bean: definition.name().to_string(),
            message,
        };
        let registry = context.registry();
        let environment = context.environment();

        let reason = match requirement {
            Requirement::Classes(names) => names
                .iter()
                .find(|n| !registry.is_known_type(n))
                .map(|n| format!("Required type [{}] is not present", n)),
            Requirement::MissingClasses(names) => names
                .iter()
                .find(|n| registry.is_known_type(n))
                .map(|n| format!("Type [{}] is present", n)),
            Requirement::Beans(types) => {
                let mut missing = None;
                for bean_type in types {
                    if self.eligible_candidates(context, *bean_type, state)?.is_empty() {
                        missing = Some(format!("No bean of type [{}] present", bean_type.simple_name()));
                        break;
                    }
                }
                missing
            }
            Requirement::MissingBeans(types) => {
                let mut present = None;
                for bean_type in types {
                    let candidates = self.eligible_candidates(context, *bean_type, state)?;
                    if let Some(existing) = candidates.first() {
                        present = Some(format!(
                            "Existing bean [{}] of type [{}] registered",
                            existing.name(),
                            bean_type.simple_name()
                        ));
                        break;
                    }
                }
                present
            }
            Requirement::Property(property) => check_property(environment, property).map_err(failure)?,
            Requirement::MissingProperty(name) => environment
                .contains_property(name)
                .then(|| format!("Property [{}] is present", name)),
            Requirement::Configuration { name, min_version } => {
                match registry.get_bean_configuration(name) {
                    None => Some(format!("Required configuration [{}] is not active", name)),
                    Some(configuration) => match min_version {
                        None => None,
                        Some(min) => {
                            let required = SemanticVersion::parse(min).map_err(failure)?;
                            match configuration.version() {
                                None => Some(format!(
                                    "Configuration [{}] has no version, [{}] required",
                                    name, required
                                )),
                                Some(actual) => {
                                    let actual = SemanticVersion::parse(actual).map_err(failure)?;
                                    (!actual.is_at_least(&required)).then(|| {
                                        format!(
                                            "Configuration [{}] version [{}] is lower than required [{}]",
                                            name, actual, required
                                        )
                                    })
                                }
                            }
                        }
                    },
                }
            }
            Requirement::Env(profiles) => (!profiles.iter().any(|p| environment.accepts_profiles(p)))
                .then(|| format!("None of the required environments [{}] are active", profiles.join(", "))),
            Requirement::NotEnv(profiles) => profiles
                .iter()
                .find(|p| environment.accepts_profiles(p))
                .map(|p| format!("Disallowed environment [{}] is active", p)),
            Requirement::Condition(key) => {
                let condition = self
                    .conditions
                    .get(key)
                    .ok_or_else(|| failure(format!("Unknown condition '{}'", key)))?;
                state.taint_all();
                let condition_context = ConditionContext::new(definition, context, state);
                let matched = condition.matches(&condition_context);
                if let Some(error) = condition_context.error.into_inner() {
                    return Err(error);
                }
                let mut failures = condition_context.failures.into_inner();
                if matched {
                    None
                } else if failures.is_empty() {
                    Some(format!("Custom condition [{}] did not match", key))
                } else {
                    Some(failures.remove(0))
                }
            }
        };
        Ok(reason)
    }

    /// 某类型的可用候选者：条件通过，并去掉被可用定义替换的候选者
    pub(crate) fn eligible_candidates(
        &self,
        context: &ApplicationContext,
        bean_type: BeanType,
        state: &mut EvaluationState,
    ) -> ContainerResult<Vec<Arc<BeanDefinition>>> {
        let registry = context.registry();
        let mut eligible = Vec::new();
        for candidate in registry.definitions_for(&bean_type) {
            if self.is_eligible(context, candidate, state)? {
                eligible.push(Arc::clone(candidate));
            }
        }

        let mut active = Vec::with_capacity(eligible.len());
        'candidates: for candidate in eligible {
            for replacing in registry.replacing_definitions() {
                if Arc::ptr_eq(replacing, &candidate) {
                    continue;
                }
                if replacing.replaces().iter().any(|r| r.matches(&candidate))
                    && self.is_eligible(context, replacing, state)?
                {
                    tracing::trace!(
                        "Bean '{}' is replaced by '{}'",
                        candidate.name(),
                        replacing.name()
                    );
                    continue 'candidates;
                }
            }
            active.push(candidate);
        }
        Ok(active)
    }

    fn is_eligible(
        &self,
        context: &ApplicationContext,
        definition: &BeanDefinition,
        state: &mut EvaluationState,
    ) -> ContainerResult<bool> {
        if let Some(position) = state.position(definition.index()) {
            state.skip_in_progress(position);
            return Ok(false);
        }
        Ok(self.outcome(context, definition, state)?.eligible)
    }
}

fn check_property(environment: &Environment, property: &PropertyRequirement) -> Result<Option<String>, String> {
    let value = environment
        .get_property(&property.name)
        .or_else(|| property.default_value.clone());

    if let Some(expected) = &property.value {
        return Ok(match &value {
            Some(actual) if actual == expected => None,
            _ => Some(format!(
                "Required property [{}] with value [{}] not present",
                property.name, expected
            )),
        });
    }

    if let Some(unwanted) = &property.not_equals {
        return Ok(match &value {
            Some(actual) if actual == unwanted => Some(format!(
                "Property [{}] with value [{}] present",
                property.name, unwanted
            )),
            _ => None,
        });
    }

    if let Some(pattern) = &property.pattern {
        let regex = Regex::new(pattern)
            .map_err(|e| format!("Invalid pattern '{}' for property [{}]: {}", pattern, property.name, e))?;
        return Ok(match &value {
            Some(actual) if regex.is_match(actual) => None,
            _ => Some(format!(
                "Property [{}] does not match pattern [{}]",
                property.name, pattern
            )),
        });
    }

    Ok(value
        .is_none()
        .then(|| format!("Required property [{}] not present", property.name)))
}
