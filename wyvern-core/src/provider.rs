//! 延迟查找
//!
//! `BeanProvider<T>` 在注入时不解析依赖，每次调用时才向容器查找，
//! 可用于打破构造期的循环或按需获取原型 Bean。

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use crate::bean::BeanType;
use crate::context::ApplicationContext;
use crate::error::{ContainerError, ContainerResult};
use crate::qualifier::Qualifier;
use crate::scope::ScopeId;

#[derive(Clone)]
pub(crate) struct ProviderSeed {
    pub(crate) context: Weak<ApplicationContext>,
    pub(crate) bean_type: BeanType,
    pub(crate) qualifier: Option<Qualifier>,
    pub(crate) scopes: Vec<ScopeId>,
}

/// 对某类型 Bean 的延迟句柄
pub struct BeanProvider<T: ?Sized> {
    seed: ProviderSeed,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> BeanProvider<T> {
    pub(crate) fn new(seed: ProviderSeed) -> Self {
        Self {
            seed,
            _marker: PhantomData,
        }
    }

    fn context(&self) -> ContainerResult<Arc<ApplicationContext>> {
        self.seed.context.upgrade().ok_or(ContainerError::ContextClosed)
    }

    /// 解析唯一的 Bean
    pub fn get(&self) -> ContainerResult<Arc<T>> {
        self.context()?
            .lookup::<T>(self.seed.qualifier.as_ref(), &self.seed.scopes)
    }

    /// 解析 Bean，不存在时返回 `None`
    pub fn find(&self) -> ContainerResult<Option<Arc<T>>> {
        match self.get() {
            Ok(bean) => Ok(Some(bean)),
            Err(e) if e.is_no_such_bean() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 是否存在可用的候选者
    pub fn is_present(&self) -> bool {
        self.context()
            .and_then(|ctx| ctx.find_candidates_qualified(self.seed.bean_type, self.seed.qualifier.as_ref()))
            .map(|candidates| !candidates.is_empty())
            .unwrap_or(false)
    }

    /// 解析所有候选者，按 order 排序
    pub fn all(&self) -> ContainerResult<Vec<Arc<T>>> {
        self.context()?
            .lookup_all::<T>(self.seed.qualifier.as_ref(), &self.seed.scopes)
    }
}

impl<T: ?Sized> Clone for BeanProvider<T> {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> fmt::Debug for BeanProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanProvider")
            .field("bean_type", &self.seed.bean_type)
            .field("qualifier", &self.seed.qualifier)
            .finish()
    }
}
