//! Wyvern AOP - 方法拦截支持
//!
//! 在容器之上提供环绕与引介两种拦截：
//! - 拦截器本身是 Bean，通过 `@InterceptorBean(value = [...])` 声明服务的绑定
//! - 代理在构造时按绑定组装每个方法的拦截器链，调用时直接查表
//! - 拦截器可以短路、修改参数、重复 `proceed()`，或换一个目标继续执行
//! - 引介代理没有目标，未被处理的方法返回 `UnhandledIntroduction`

pub mod aspect;
pub mod chain;
pub mod error;
pub mod error_info;
pub mod interceptor;
pub mod invocation;
pub mod pointcut;
pub mod proxy;

// 重新导出核心类型
pub use aspect::{MethodTimings, TimingInterceptor, TracingInterceptor, TIMED, TRACED};
pub use chain::{Advisor, DispatchTable, MethodChain};
pub use error::InterceptionError;
pub use error_info::ErrorInfo;
pub use interceptor::{binds, interceptor_binding, FnInterceptor, MethodInterceptor, INTERCEPTOR_BEAN};
pub use invocation::{ExecutableMethod, MethodInvocationContext, ParameterValues, ReturnValue, Value};
pub use pointcut::MethodMatcher;
pub use proxy::{Intercepted, InterceptedBeanExt, ProxySpec};

/// 预导入模块
pub mod prelude {
    pub use crate::aspect::{TimingInterceptor, TracingInterceptor, TIMED, TRACED};
    pub use crate::interceptor::{FnInterceptor, MethodInterceptor};
    pub use crate::invocation::{ExecutableMethod, MethodInvocationContext, ParameterValues, ReturnValue};
    pub use crate::params;
    pub use crate::pointcut::MethodMatcher;
    pub use crate::proxy::{Intercepted, InterceptedBeanExt, ProxySpec};
}
