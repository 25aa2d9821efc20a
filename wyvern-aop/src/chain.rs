//! 每个方法的拦截器调度表
//!
//! 在代理构造时一次性算好：每个方法对应一条按 `order()` 排好序的拦截器链，
//! 调用时直接查表。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use wyvern_core::{InterceptorBinding, InterceptorKind};

use crate::interceptor::MethodInterceptor;
use crate::invocation::ExecutableMethod;
use crate::pointcut::MethodMatcher;

/// 类级绑定及其作用的方法范围
#[derive(Debug, Clone)]
pub struct Advisor {
    binding: InterceptorBinding,
    matcher: MethodMatcher,
}

impl Advisor {
    pub fn new(binding: InterceptorBinding, matcher: MethodMatcher) -> Self {
        Self { binding, matcher }
    }

    pub fn binding(&self) -> &InterceptorBinding {
        &self.binding
    }

    pub fn applies_to(&self, method: &ExecutableMethod) -> bool {
        self.matcher.matches(method)
    }
}

/// 一个方法的拦截器链
pub struct MethodChain {
    method: ExecutableMethod,
    interceptors: Vec<Arc<dyn MethodInterceptor>>,
}

impl MethodChain {
    pub fn method(&self) -> &ExecutableMethod {
        &self.method
    }

    pub fn interceptors(&self) -> &[Arc<dyn MethodInterceptor>] {
        &self.interceptors
    }
}

/// 方法名到拦截器链的调度表
#[derive(Default)]
pub struct DispatchTable {
    chains: HashMap<String, MethodChain>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接给出方法的拦截器，按 `order()` 排序（同序保持给定顺序）
    pub fn method(mut self, method: ExecutableMethod, mut interceptors: Vec<Arc<dyn MethodInterceptor>>) -> Self {
        interceptors.sort_by_key(|i| i.order());
        self.chains.insert(
            method.name().to_string(),
            MethodChain { method, interceptors },
        );
        self
    }

    /// 按绑定组装调度表
    ///
    /// 方法命中的绑定包括：匹配器覆盖此方法的类级绑定，以及方法自身注解的名称。
    /// `interceptors` 是绑定名称到拦截器 Bean 的映射。
    pub fn build(
        methods: &[ExecutableMethod],
        advisors: &[Advisor],
        interceptors: &HashMap<String, Vec<Arc<dyn MethodInterceptor>>>,
    ) -> Self {
        let mut table = Self::new();
        for method in methods {
            let mut bindings: Vec<&str> = advisors
                .iter()
                .filter(|a| a.applies_to(method))
                .map(|a| a.binding().annotation())
                .collect();
            bindings.extend(method.annotations().iter().map(|a| a.name()));

            let mut chain: Vec<Arc<dyn MethodInterceptor>> = Vec::new();
            for binding in bindings {
                for interceptor in interceptors.get(binding).into_iter().flatten() {
                    if !chain.iter().any(|existing| same_interceptor(existing, interceptor)) {
                        chain.push(Arc::clone(interceptor));
                    }
                }
            }
            tracing::trace!(
                "Method {} has {} interceptor(s)",
                method.signature(),
                chain.len()
            );
            table = table.method(method.clone(), chain);
        }
        table
    }

    pub fn chain(&self, method: &str) -> Option<&MethodChain> {
        self.chains.get(method)
    }

    pub fn interceptor_count(&self, method: &str) -> usize {
        self.chains.get(method).map_or(0, |c| c.interceptors.len())
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, chain) in &self.chains {
            let names: Vec<&str> = chain.interceptors.iter().map(|i| i.name()).collect();
            map.entry(name, &names);
        }
        map.finish()
    }
}

fn same_interceptor(a: &Arc<dyn MethodInterceptor>, b: &Arc<dyn MethodInterceptor>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// 是否存在引介绑定
pub(crate) fn has_introduction(advisors: &[Advisor]) -> bool {
    advisors
        .iter()
        .any(|a| a.binding().kind() == InterceptorKind::Introduction)
}
