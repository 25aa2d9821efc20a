//! 注解元数据
//!
//! 编译期生成的 Bean 元数据以值的形式携带"注解"：名称加成员表。
//! 限定符匹配、拦截器绑定、上下文相关的工厂都只通过这些值工作，不依赖反射。

use std::collections::BTreeMap;
use std::fmt;

/// 注解成员值
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnnotationMember {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<AnnotationMember>),
}

impl AnnotationMember {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AnnotationMember::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AnnotationMember::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AnnotationMember::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// 字符串列表；单个字符串视为只有一个元素的列表
    pub fn as_str_list(&self) -> Vec<&str> {
        match self {
            AnnotationMember::Str(s) => vec![s.as_str()],
            AnnotationMember::List(items) => items.iter().filter_map(|m| m.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for AnnotationMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationMember::Str(s) => write!(f, "\"{}\"", s),
            AnnotationMember::Int(i) => write!(f, "{}", i),
            AnnotationMember::Bool(b) => write!(f, "{}", b),
            AnnotationMember::List(items) => {
                let parts: Vec<String> = items.iter().map(|m| m.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<&str> for AnnotationMember {
    fn from(value: &str) -> Self {
        AnnotationMember::Str(value.to_string())
    }
}

impl From<String> for AnnotationMember {
    fn from(value: String) -> Self {
        AnnotationMember::Str(value)
    }
}

impl From<i64> for AnnotationMember {
    fn from(value: i64) -> Self {
        AnnotationMember::Int(value)
    }
}

impl From<bool> for AnnotationMember {
    fn from(value: bool) -> Self {
        AnnotationMember::Bool(value)
    }
}

impl From<&[&str]> for AnnotationMember {
    fn from(value: &[&str]) -> Self {
        AnnotationMember::List(value.iter().map(|s| AnnotationMember::from(*s)).collect())
    }
}

/// 单个注解值，结构相等
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotationValue {
    name: String,
    members: BTreeMap<String, AnnotationMember>,
}

impl AnnotationValue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeMap::new(),
        }
    }

    /// 添加成员
    pub fn member(mut self, key: impl Into<String>, value: impl Into<AnnotationMember>) -> Self {
        self.members.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&AnnotationMember> {
        self.members.get(key)
    }

    /// `value` 成员
    pub fn value(&self) -> Option<&AnnotationMember> {
        self.members.get("value")
    }

    pub fn members(&self) -> impl Iterator<Item = (&String, &AnnotationMember)> {
        self.members.iter()
    }
}

impl fmt::Display for AnnotationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        if !self.members.is_empty() {
            let parts: Vec<String> = self
                .members
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "({})", parts.join(", "))?;
        }
        Ok(())
    }
}

/// 一组注解
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationMetadata {
    annotations: Vec<AnnotationValue>,
}

impl AnnotationMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, annotation: AnnotationValue) {
        self.annotations.push(annotation);
    }

    pub fn has(&self, name: &str) -> bool {
        self.annotations.iter().any(|a| a.name == name)
    }

    pub fn find(&self, name: &str) -> Option<&AnnotationValue> {
        self.annotations.iter().find(|a| a.name == name)
    }

    /// 是否包含结构相等的注解
    pub fn contains(&self, annotation: &AnnotationValue) -> bool {
        self.annotations.iter().any(|a| a == annotation)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnnotationValue> {
        self.annotations.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }
}

impl FromIterator<AnnotationValue> for AnnotationMetadata {
    fn from_iter<I: IntoIterator<Item = AnnotationValue>>(iter: I) -> Self {
        Self {
            annotations: iter.into_iter().collect(),
        }
    }
}
