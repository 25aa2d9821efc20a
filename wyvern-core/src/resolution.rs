//! 解析上下文
//!
//! 一次顶层查找对应一个 `BeanResolutionContext`：记录正在构造的 Bean
//! 组成的解析路径（用于循环检测和错误信息）、当前激活的自定义作用域实例，
//! 以及每个正在构造的 Bean 解析到的依赖（用于销毁顺序）。

use std::fmt;
use std::sync::Arc;

use crate::bean::{BeanDefinition, BeanType};
use crate::context::ApplicationContext;
use crate::error::ContainerResult;
use crate::injection::InjectionPoint;
use crate::injector::downcast_bean;
use crate::qualifier::Qualifier;
use crate::scope::{BeanIdentifier, ScopeId};

/// 路径上的一段：正在构造的定义，以及它正在解析的注入点
#[derive(Clone)]
pub(crate) struct PathSegment {
    pub(crate) definition: Arc<BeanDefinition>,
    pub(crate) point: Option<String>,
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.point {
            Some(point) => write!(f, "{}.{}", self.definition.name(), point),
            None => write!(f, "{}", self.definition.name()),
        }
    }
}

/// 单次解析的可变状态
pub struct BeanResolutionContext<'a> {
    pub(crate) context: &'a ApplicationContext,
    pub(crate) path: Vec<PathSegment>,
    pub(crate) scopes: Vec<ScopeId>,
    /// 每个正在构造的 Bean 一帧，记录其依赖的标识
    pub(crate) frames: Vec<Vec<BeanIdentifier>>,
    /// 下一个被构造的 Bean 将被注入到的位置
    pub(crate) pending_point: Option<InjectionPoint>,
}

impl<'a> BeanResolutionContext<'a> {
    pub(crate) fn new(context: &'a ApplicationContext, scopes: Vec<ScopeId>) -> Self {
        Self {
            context,
            path: Vec::new(),
            scopes,
            frames: Vec::new(),
            pending_point: None,
        }
    }

    pub fn context(&self) -> &'a ApplicationContext {
        self.context
    }

    /// 激活的自定义作用域实例
    pub fn active_scopes(&self) -> &[ScopeId] {
        &self.scopes
    }

    /// 当前正在构造的定义
    pub fn current_definition(&self) -> Option<&Arc<BeanDefinition>> {
        self.path.last().map(|segment| &segment.definition)
    }

    /// 解析路径的可读形式，最外层在前
    pub fn path(&self) -> Vec<String> {
        self.path.iter().map(PathSegment::to_string).collect()
    }

    pub(crate) fn active_scope(&self, name: &str) -> Option<&ScopeId> {
        self.scopes.iter().rev().find(|id| id.scope() == name)
    }

    /// 在当前路径下解析唯一 Bean，并记录为当前 Bean 的依赖
    pub fn get_bean<T>(&mut self, qualifier: Option<&Qualifier>) -> ContainerResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let bean_type = BeanType::of::<T>();
        let value = self.resolve_one(bean_type, qualifier)?;
        downcast_bean::<T>(value, bean_type.name())
    }

    /// 解析所有满足 `filter` 的可用候选者，按 order 排序
    ///
    /// 代理工厂用它按绑定注解挑选拦截器 Bean。
    pub fn get_beans_of_type_where<T, F>(&mut self, filter: F) -> ContainerResult<Vec<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&BeanDefinition) -> bool,
    {
        let bean_type = BeanType::of::<T>();
        let mut beans = Vec::new();
        for definition in self.ordered_candidates(bean_type, None)? {
            if !filter(&definition) {
                continue;
            }
            let value = self.instance_as(&definition, &bean_type)?;
            beans.push(downcast_bean::<T>(value, definition.name())?);
        }
        Ok(beans)
    }
}

impl fmt::Debug for BeanResolutionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanResolutionContext")
            .field("path", &self.path())
            .field("scopes", &self.scopes)
            .finish()
    }
}
