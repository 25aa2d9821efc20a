//! 代理构造
//!
//! 代理是手写（或由代码生成器生成）的转发类型，内部持有 `Intercepted<T>`：
//!
//! ```rust,ignore
//! struct OrderServiceProxy(Intercepted<OrderServiceImpl>);
//!
//! impl OrderService for OrderServiceProxy {
//!     fn place(&self, id: u64) -> anyhow::Result<Receipt> {
//!         self.0.invoke("place", params!["id" => id], |target, p| target.place(p.cloned("id")?))
//!     }
//! }
//!
//! BeanDefinition::builder(|| Ok(OrderServiceImpl::default()))
//!     .intercepted(spec, OrderServiceProxy)
//!     .exposes_proxy(|p: Arc<OrderServiceProxy>| p as Arc<dyn OrderService>)
//!     .build()
//! ```
//!
//! 代理工厂在目标初始化完成后运行：按绑定名称解析拦截器 Bean，构造调度表，
//! 再把 `Intercepted<T>` 交给转发类型。

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use wyvern_core::{
    BeanDefinitionBuilder, BeanRef, BeanResolutionContext, ContainerError, ContainerResult, Exposure,
    InterceptorBinding, ProxyFactory,
};

use crate::chain::{has_introduction, Advisor, DispatchTable};
use crate::error::InterceptionError;
use crate::interceptor::{binds, interceptor_binding, MethodInterceptor};
use crate::invocation::{ExecutableMethod, MethodInvocationContext, ParameterValues, ReturnValue};
use crate::pointcut::MethodMatcher;

/// 代理声明：代理转发的方法以及类级绑定
#[derive(Debug, Clone, Default)]
pub struct ProxySpec {
    methods: Vec<ExecutableMethod>,
    advisors: Vec<Advisor>,
}

impl ProxySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// 声明一个被代理的方法
    pub fn method(mut self, method: ExecutableMethod) -> Self {
        self.methods.push(method);
        self
    }

    /// 作用在所有方法上的环绕绑定
    pub fn around(self, annotation: impl Into<String>) -> Self {
        self.around_matching(annotation, MethodMatcher::All)
    }

    /// 只作用在匹配方法上的环绕绑定
    pub fn around_matching(mut self, annotation: impl Into<String>, matcher: MethodMatcher) -> Self {
        self.advisors
            .push(Advisor::new(InterceptorBinding::around(annotation), matcher));
        self
    }

    /// 引介绑定，作用在所有方法上
    pub fn introduction(mut self, annotation: impl Into<String>) -> Self {
        self.advisors.push(Advisor::new(
            InterceptorBinding::introduction(annotation),
            MethodMatcher::All,
        ));
        self
    }

    pub fn methods(&self) -> &[ExecutableMethod] {
        &self.methods
    }

    pub fn is_introduction(&self) -> bool {
        has_introduction(&self.advisors)
    }

    /// 记录在 Bean 定义上的绑定
    pub fn bindings(&self) -> Vec<InterceptorBinding> {
        self.advisors.iter().map(|a| a.binding().clone()).collect()
    }

    /// 可能需要拦截器的绑定名称：类级绑定加上方法注解
    fn binding_names(&self) -> BTreeSet<String> {
        self.advisors
            .iter()
            .map(|a| a.binding().annotation().to_string())
            .chain(
                self.methods
                    .iter()
                    .flat_map(|m| m.annotations().iter().map(|a| a.name().to_string())),
            )
            .collect()
    }

    /// 在目标 Bean 的解析路径下查找拦截器 Bean 并组装调度表
    pub fn dispatch_table(&self, resolution: &mut BeanResolutionContext<'_>) -> ContainerResult<DispatchTable> {
        let mut interceptors: HashMap<String, Vec<Arc<dyn MethodInterceptor>>> = HashMap::new();
        for name in self.binding_names() {
            let found = resolution
                .get_beans_of_type_where::<dyn MethodInterceptor, _>(|definition| binds(definition, &name))?;
            if !found.is_empty() {
                tracing::debug!("Resolved {} interceptor(s) for binding @{}", found.len(), name);
                interceptors.insert(name, found);
            }
        }
        Ok(DispatchTable::build(&self.methods, &self.advisors, &interceptors))
    }
}

/// 被拦截的目标及其调度表
///
/// 引介代理没有目标；链上没有拦截器给出结果时调用失败。
pub struct Intercepted<T: Send + Sync + 'static> {
    bean_name: String,
    target: Option<Arc<T>>,
    table: DispatchTable,
}

impl<T: Send + Sync + 'static> Intercepted<T> {
    pub fn new(bean_name: impl Into<String>, target: Option<Arc<T>>, table: DispatchTable) -> Self {
        Self {
            bean_name: bean_name.into(),
            target,
            table,
        }
    }

    pub fn bean_name(&self) -> &str {
        &self.bean_name
    }

    pub fn target(&self) -> Option<&Arc<T>> {
        self.target.as_ref()
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// 经过拦截器链调用方法
    ///
    /// `call` 是对目标的真实调用，链尾（或 `proceed_with` 换了目标之后）才会执行。
    pub fn invoke<R, F>(&self, method: &str, parameters: ParameterValues, call: F) -> anyhow::Result<R>
    where
        R: Send + Sync + 'static,
        F: Fn(&T, &ParameterValues) -> anyhow::Result<R>,
    {
        let chain = self.table.chain(method).ok_or_else(|| InterceptionError::UnknownMethod {
            bean: self.bean_name.clone(),
            method: method.to_string(),
        })?;

        if chain.interceptors().is_empty() {
            if let Some(target) = &self.target {
                return call(&**target, &parameters);
            }
        }

        let invoker = |bean: &BeanRef, parameters: &ParameterValues| -> anyhow::Result<ReturnValue> {
            let target = (**bean).downcast_ref::<T>().ok_or_else(|| InterceptionError::TargetType {
                method: method.to_string(),
                expected: std::any::type_name::<T>(),
            })?;
            call(target, parameters).map(|value| Box::new(value) as ReturnValue)
        };

        let mut context = MethodInvocationContext::new(
            &self.bean_name,
            chain.method(),
            self.target.as_ref().map(|t| Arc::clone(t) as BeanRef),
            parameters,
            chain.interceptors(),
            Some(&invoker),
        );
        restore(context.proceed()?, method)
    }

    /// 引介方法：没有可转发的实现，结果完全由拦截器给出
    pub fn invoke_introduction<R>(&self, method: &str, parameters: ParameterValues) -> anyhow::Result<R>
    where
        R: Send + Sync + 'static,
    {
        let chain = self.table.chain(method).ok_or_else(|| InterceptionError::UnknownMethod {
            bean: self.bean_name.clone(),
            method: method.to_string(),
        })?;
        let mut context = MethodInvocationContext::new(
            &self.bean_name,
            chain.method(),
            None,
            parameters,
            chain.interceptors(),
            None,
        );
        restore(context.proceed()?, method)
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Intercepted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intercepted")
            .field("bean", &self.bean_name)
            .field("target", &std::any::type_name::<T>())
            .field("introduction", &self.target.is_none())
            .field("table", &self.table)
            .finish()
    }
}

/// 在 Bean 定义上声明代理与拦截器
pub trait InterceptedBeanExt<T: Send + Sync + 'static>: Sized {
    /// 环绕代理：`wrap` 把 `Intercepted<T>` 包装成转发类型
    fn intercepted<P, F>(self, spec: ProxySpec, wrap: F) -> Self
    where
        P: Send + Sync + 'static,
        F: Fn(Intercepted<T>) -> P + Send + Sync + 'static;

    /// 引介代理：忽略构造出的实例；`D` 是拦截器可以用 `proceed_with` 转交的实现类型
    fn introduction<D, P, F>(self, spec: ProxySpec, wrap: F) -> Self
    where
        D: Send + Sync + 'static,
        P: Send + Sync + 'static,
        F: Fn(Intercepted<D>) -> P + Send + Sync + 'static;

    /// 以代理类型 `P` 暴露为 `I`；查找 `I` 时拿到的是代理
    fn exposes_proxy<P, I, F>(self, convert: F) -> Self
    where
        P: Send + Sync + 'static,
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<P>) -> Arc<I> + Send + Sync + 'static;

    /// 把此 Bean 声明为拦截器，服务 `bindings` 中的绑定名称
    fn interceptor_bean(self, bindings: &[&str]) -> Self
    where
        T: MethodInterceptor;
}

impl<T: Send + Sync + 'static> InterceptedBeanExt<T> for BeanDefinitionBuilder<T> {
    fn intercepted<P, F>(self, spec: ProxySpec, wrap: F) -> Self
    where
        P: Send + Sync + 'static,
        F: Fn(Intercepted<T>) -> P + Send + Sync + 'static,
    {
        let bindings = spec.bindings();
        let factory: ProxyFactory = Arc::new(
            move |target: &BeanRef, resolution: &mut BeanResolutionContext<'_>| -> ContainerResult<BeanRef> {
                let bean_name = proxied_bean_name(resolution);
                let target = Arc::clone(target)
                    .downcast::<T>()
                    .map_err(|_| ContainerError::TypeMismatch {
                        bean: bean_name.clone(),
                        expected: std::any::type_name::<T>().to_string(),
                    })?;
                let table = spec.dispatch_table(resolution)?;
                tracing::debug!("Created proxy for bean '{}' ({} method(s))", bean_name, table.len());
                Ok(Arc::new(wrap(Intercepted::new(bean_name, Some(target), table))) as BeanRef)
            },
        );
        self.proxy_factory(bindings, factory)
    }

    fn introduction<D, P, F>(self, spec: ProxySpec, wrap: F) -> Self
    where
        D: Send + Sync + 'static,
        P: Send + Sync + 'static,
        F: Fn(Intercepted<D>) -> P + Send + Sync + 'static,
    {
        let bindings = spec.bindings();
        let factory: ProxyFactory = Arc::new(
            move |_target: &BeanRef, resolution: &mut BeanResolutionContext<'_>| -> ContainerResult<BeanRef> {
                let bean_name = proxied_bean_name(resolution);
                let table = spec.dispatch_table(resolution)?;
                tracing::debug!("Created introduction proxy for bean '{}'", bean_name);
                Ok(Arc::new(wrap(Intercepted::<D>::new(bean_name, None, table))) as BeanRef)
            },
        );
        self.proxy_factory(bindings, factory)
    }

    fn exposes_proxy<P, I, F>(self, convert: F) -> Self
    where
        P: Send + Sync + 'static,
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<P>) -> Arc<I> + Send + Sync + 'static,
    {
        self.expose(Exposure::of::<P, I, F>(convert))
    }

    fn interceptor_bean(self, bindings: &[&str]) -> Self
    where
        T: MethodInterceptor,
    {
        self.exposes(|interceptor: Arc<T>| interceptor as Arc<dyn MethodInterceptor>)
            .annotate(interceptor_binding(bindings))
    }
}

/// 把擦除的返回值还原为方法声明的类型
fn restore<R: Send + Sync + 'static>(value: ReturnValue, method: &str) -> anyhow::Result<R> {
    value.downcast::<R>().map(|value| *value).map_err(|_| {
        InterceptionError::ReturnType {
            method: method.to_string(),
            expected: std::any::type_name::<R>(),
        }
        .into()
    })
}

fn proxied_bean_name(resolution: &BeanResolutionContext<'_>) -> String {
    resolution
        .current_definition()
        .map(|definition| definition.name().to_string())
        .unwrap_or_default()
}
