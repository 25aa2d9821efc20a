//! 拦截器 SPI
//!
//! 拦截器本身就是 Bean：实现 `MethodInterceptor`，以 `dyn MethodInterceptor`
//! 暴露，并通过 `@InterceptorBean(value = [...])` 注解声明它服务的绑定名称。

use std::fmt;

use wyvern_core::{AnnotationValue, BeanDefinition};

use crate::invocation::{MethodInvocationContext, ReturnValue};

/// 标记拦截器 Bean 的注解名称
pub const INTERCEPTOR_BEAN: &str = "InterceptorBean";

/// 方法拦截器
///
/// 不调用 `context.proceed()` 即为短路，返回值直接交给调用者。
/// 错误原样向外传播，除非外层拦截器自己处理。
pub trait MethodInterceptor: Send + Sync {
    fn intercept(&self, context: &mut MethodInvocationContext<'_>) -> anyhow::Result<ReturnValue>;

    /// 执行顺序，越小越靠外
    fn order(&self) -> i32 {
        0
    }

    fn name(&self) -> &str {
        "MethodInterceptor"
    }
}

/// 构造 `@InterceptorBean` 注解
pub fn interceptor_binding(bindings: &[&str]) -> AnnotationValue {
    AnnotationValue::new(INTERCEPTOR_BEAN).member("value", bindings)
}

/// 定义是否为服务 `binding` 的拦截器 Bean
pub fn binds(definition: &BeanDefinition, binding: &str) -> bool {
    definition
        .annotations()
        .find(INTERCEPTOR_BEAN)
        .and_then(|annotation| annotation.value())
        .map_or(false, |value| value.as_str_list().contains(&binding))
}

/// 基于闭包的拦截器
pub struct FnInterceptor<F>
where
    F: Fn(&mut MethodInvocationContext<'_>) -> anyhow::Result<ReturnValue> + Send + Sync,
{
    name: String,
    order: i32,
    callback: F,
}

impl<F> FnInterceptor<F>
where
    F: Fn(&mut MethodInvocationContext<'_>) -> anyhow::Result<ReturnValue> + Send + Sync,
{
    pub fn new(name: impl Into<String>, order: i32, callback: F) -> Self {
        Self {
            name: name.into(),
            order,
            callback,
        }
    }
}

impl<F> MethodInterceptor for FnInterceptor<F>
where
    F: Fn(&mut MethodInvocationContext<'_>) -> anyhow::Result<ReturnValue> + Send + Sync,
{
    fn intercept(&self, context: &mut MethodInvocationContext<'_>) -> anyhow::Result<ReturnValue> {
        (self.callback)(context)
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> fmt::Debug for FnInterceptor<F>
where
    F: Fn(&mut MethodInvocationContext<'_>) -> anyhow::Result<ReturnValue> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnInterceptor")
            .field("name", &self.name)
            .field("order", &self.order)
            .finish()
    }
}
