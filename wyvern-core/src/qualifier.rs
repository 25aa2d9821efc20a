//! 限定符
//!
//! 限定符在同类型的多个候选者中做筛选。它是封闭的枚举，
//! 相等与哈希都是结构化的，可以放进 `BeanIdentifier` 和缓存键里。

use std::fmt;
use std::sync::Arc;

use crate::annotation::AnnotationValue;
use crate::bean::{BeanDefinition, BeanType};

/// 限定符
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// 名称限定：先按 `@Named` 值或 Bean 名称精确匹配（忽略大小写），
    /// 没有结果时按产出类型简单名的前缀匹配
    Named(String),
    /// 候选者携带结构相等的注解
    Annotation(AnnotationValue),
    /// 候选者暴露其中任一类型
    Type(Vec<BeanType>),
    /// 只保留 primary 候选者
    Primary,
    /// 任意一个，取排序后的第一个
    Any,
    /// 依次应用所有限定符
    All(Vec<Qualifier>),
}

impl Qualifier {
    pub fn named(name: impl Into<String>) -> Self {
        Qualifier::Named(name.into())
    }

    pub fn annotation(annotation: AnnotationValue) -> Self {
        Qualifier::Annotation(annotation)
    }

    pub fn by_type<T: ?Sized + 'static>() -> Self {
        Qualifier::Type(vec![BeanType::of::<T>()])
    }

    /// 组合两个限定符
    pub fn and(self, other: Qualifier) -> Self {
        match self {
            Qualifier::All(mut all) => {
                all.push(other);
                Qualifier::All(all)
            }
            first => Qualifier::All(vec![first, other]),
        }
    }

    /// 按此限定符过滤候选者，保持原有顺序
    pub fn reduce(&self, candidates: Vec<Arc<BeanDefinition>>) -> Vec<Arc<BeanDefinition>> {
        match self {
            Qualifier::Named(name) => {
                let exact: Vec<_> = candidates
                    .iter()
                    .filter(|d| {
                        d.qualifier_name()
                            .map_or(false, |q| q.eq_ignore_ascii_case(name))
                            || d.name().eq_ignore_ascii_case(name)
                    })
                    .cloned()
                    .collect();
                if !exact.is_empty() {
                    return exact;
                }
                let lowered = name.to_lowercase();
                candidates
                    .into_iter()
                    .filter(|d| d.bean_type().simple_name().to_lowercase().starts_with(&lowered))
                    .collect()
            }
            Qualifier::Annotation(annotation) => candidates
                .into_iter()
                .filter(|d| d.annotations().contains(annotation))
                .collect(),
            Qualifier::Type(types) => candidates
                .into_iter()
                .filter(|d| types.iter().any(|t| d.exposes(t)))
                .collect(),
            Qualifier::Primary => candidates.into_iter().filter(|d| d.is_primary()).collect(),
            Qualifier::Any => candidates,
            Qualifier::All(qualifiers) => qualifiers
                .iter()
                .fold(candidates, |remaining, q| q.reduce(remaining)),
        }
    }

    fn picks_any(&self) -> bool {
        match self {
            Qualifier::Any => true,
            Qualifier::All(qualifiers) => qualifiers.iter().any(Qualifier::picks_any),
            _ => false,
        }
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::Named(name) => write!(f, "@Named({})", name),
            Qualifier::Annotation(annotation) => write!(f, "{}", annotation),
            Qualifier::Type(types) => {
                let names: Vec<&str> = types.iter().map(|t| t.simple_name()).collect();
                write!(f, "@Type({})", names.join(", "))
            }
            Qualifier::Primary => write!(f, "@Primary"),
            Qualifier::Any => write!(f, "@Any"),
            Qualifier::All(qualifiers) => {
                let parts: Vec<String> = qualifiers.iter().map(|q| q.to_string()).collect();
                write!(f, "{}", parts.join(" "))
            }
        }
    }
}

/// 单值选择的结果
#[derive(Debug)]
pub enum Selection {
    Unique(Arc<BeanDefinition>),
    Unsatisfied,
    Ambiguous(Vec<Arc<BeanDefinition>>),
}

/// 按 order、再按注册顺序排序
pub fn sort_by_order(candidates: &mut [Arc<BeanDefinition>]) {
    candidates.sort_by_key(|d| (d.order(), d.index()));
}

/// 从候选者中选出唯一的 Bean
///
/// 过滤后剩一个即唯一；剩多个时唯一的 primary 胜出，否则为歧义。
pub fn select(candidates: Vec<Arc<BeanDefinition>>, qualifier: Option<&Qualifier>) -> Selection {
    let mut remaining = match qualifier {
        Some(q) => q.reduce(candidates),
        None => candidates,
    };

    match remaining.len() {
        0 => Selection::Unsatisfied,
        1 => Selection::Unique(remaining.remove(0)),
        _ => {
            if qualifier.map_or(false, Qualifier::picks_any) {
                sort_by_order(&mut remaining);
                return Selection::Unique(remaining.remove(0));
            }
            let mut primaries: Vec<_> = remaining.iter().filter(|d| d.is_primary()).cloned().collect();
            if primaries.len() == 1 {
                Selection::Unique(primaries.remove(0))
            } else {
                Selection::Ambiguous(remaining)
            }
        }
    }
}
