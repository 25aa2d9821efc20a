//! 方法匹配器
//!
//! 限定一个类级绑定作用在代理的哪些方法上

use std::sync::Arc;

use regex::Regex;

use crate::invocation::ExecutableMethod;

/// 方法匹配表达式
#[derive(Clone)]
pub enum MethodMatcher {
    /// 匹配所有方法
    All,

    /// 按声明类型名匹配（支持 `*` 通配符）
    TypePattern(String),

    /// 按方法名匹配（支持 `*` 通配符）
    MethodPattern(String),

    /// 同时匹配类型名与方法名
    Execution {
        type_pattern: String,
        method_pattern: String,
    },

    /// 用正则匹配 `Type.method` 签名
    Regex(Regex),

    /// 方法带有指定注解
    Annotated(String),

    Custom(Arc<dyn Fn(&ExecutableMethod) -> bool + Send + Sync>),

    And(Box<MethodMatcher>, Box<MethodMatcher>),

    Or(Box<MethodMatcher>, Box<MethodMatcher>),

    Not(Box<MethodMatcher>),
}

impl MethodMatcher {
    pub fn matches(&self, method: &ExecutableMethod) -> bool {
        match self {
            MethodMatcher::All => true,
            MethodMatcher::TypePattern(pattern) => wildcard_matches(pattern, method.declaring_type()),
            MethodMatcher::MethodPattern(pattern) => wildcard_matches(pattern, method.name()),
            MethodMatcher::Execution {
                type_pattern,
                method_pattern,
            } => {
                wildcard_matches(type_pattern, method.declaring_type())
                    && wildcard_matches(method_pattern, method.name())
            }
            MethodMatcher::Regex(regex) => regex.is_match(&method.signature()),
            MethodMatcher::Annotated(name) => method.annotations().has(name),
            MethodMatcher::Custom(predicate) => predicate(method),
            MethodMatcher::And(left, right) => left.matches(method) && right.matches(method),
            MethodMatcher::Or(left, right) => left.matches(method) || right.matches(method),
            MethodMatcher::Not(inner) => !inner.matches(method),
        }
    }

    pub fn method(pattern: impl Into<String>) -> Self {
        MethodMatcher::MethodPattern(pattern.into())
    }

    pub fn declared_by(pattern: impl Into<String>) -> Self {
        MethodMatcher::TypePattern(pattern.into())
    }

    pub fn annotated(name: impl Into<String>) -> Self {
        MethodMatcher::Annotated(name.into())
    }

    /// 编译正则表达式
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(MethodMatcher::Regex)
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&ExecutableMethod) -> bool + Send + Sync + 'static,
    {
        MethodMatcher::Custom(Arc::new(predicate))
    }

    /// 解析 execution 表达式，例如 `"* OrderService.find*(..)"`
    ///
    /// 只取类型名与方法名，返回类型和参数部分被忽略。
    pub fn execution(expression: &str) -> Self {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        let Some(&method_part) = parts.get(1) else {
            return MethodMatcher::All;
        };
        let method_part = method_part.split('(').next().unwrap_or(method_part);

        match method_part.rsplit_once('.') {
            Some((type_pattern, method_pattern)) => MethodMatcher::Execution {
                type_pattern: type_pattern.to_string(),
                method_pattern: method_pattern.to_string(),
            },
            None => MethodMatcher::MethodPattern(method_part.to_string()),
        }
    }

    pub fn and(self, other: MethodMatcher) -> Self {
        MethodMatcher::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: MethodMatcher) -> Self {
        MethodMatcher::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        MethodMatcher::Not(Box::new(self))
    }
}

impl Default for MethodMatcher {
    fn default() -> Self {
        MethodMatcher::All
    }
}

/// 支持 `*` 通配符的模式匹配
///
/// - `*` 匹配任意字符串
/// - `find*` 以 find 开头
/// - `*Service` 以 Service 结尾
fn wildcard_matches(pattern: &str, target: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == target;
    }

    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    Regex::new(&format!("^{}$", escaped.join(".*")))
        .map(|regex| regex.is_match(target))
        .unwrap_or(false)
}

impl std::fmt::Debug for MethodMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MethodMatcher::All => write!(f, "All"),
            MethodMatcher::TypePattern(p) => write!(f, "TypePattern({})", p),
            MethodMatcher::MethodPattern(p) => write!(f, "MethodPattern({})", p),
            MethodMatcher::Execution {
                type_pattern,
                method_pattern,
            } => write!(f, "Execution({}.{})", type_pattern, method_pattern),
            MethodMatcher::Regex(regex) => write!(f, "Regex({})", regex.as_str()),
            MethodMatcher::Annotated(name) => write!(f, "Annotated(@{})", name),
            MethodMatcher::Custom(_) => write!(f, "Custom(...)"),
            MethodMatcher::And(l, r) => write!(f, "And({:?}, {:?})", l, r),
            MethodMatcher::Or(l, r) => write!(f, "Or({:?}, {:?})", l, r),
            MethodMatcher::Not(e) => write!(f, "Not({:?})", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wyvern_core::AnnotationValue;

    fn find_by_id() -> ExecutableMethod {
        ExecutableMethod::new("OrderService", "find_by_id").parameters(&["id"])
    }

    fn place() -> ExecutableMethod {
        ExecutableMethod::new("OrderService", "place").annotate(AnnotationValue::new("Transactional"))
    }

    #[test]
    fn test_wildcards() {
        assert!(MethodMatcher::method("find*").matches(&find_by_id()));
        assert!(!MethodMatcher::method("find*").matches(&place()));
        assert!(MethodMatcher::declared_by("*Service").matches(&place()));
        assert!(MethodMatcher::method("*").matches(&place()));
        assert!(MethodMatcher::method("place").matches(&place()));
        assert!(!MethodMatcher::method("pla.e").matches(&place()));
    }

    #[test]
    fn test_execution_expression() {
        let matcher = MethodMatcher::execution("* OrderService.find*(..)");
        assert!(matcher.matches(&find_by_id()));
        assert!(!matcher.matches(&place()));
        assert!(MethodMatcher::execution("*").matches(&place()));
        assert!(matches!(
            MethodMatcher::execution("* place(..)"),
            MethodMatcher::MethodPattern(ref p) if p == "place"
        ));
    }

    #[test]
    fn test_combinators_and_annotations() {
        let matcher = MethodMatcher::declared_by("Order*").and(MethodMatcher::annotated("Transactional"));
        assert!(matcher.matches(&place()));
        assert!(!matcher.matches(&find_by_id()));

        let matcher = MethodMatcher::annotated("Transactional").not();
        assert!(matcher.matches(&find_by_id()));

        let matcher = MethodMatcher::regex(r"^OrderService\.find_.*$")
            .unwrap()
            .or(MethodMatcher::custom(|m| m.parameter_names().is_empty()));
        assert!(matcher.matches(&find_by_id()));
        assert!(matcher.matches(&place()));
    }
}
