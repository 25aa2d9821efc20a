use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::RwLock;

use crate::bean::{BeanDefinition, BeanType};
use crate::condition::{Condition, ConditionEvaluator};
use crate::config::{Environment, PropertySource};
use crate::error::{ContainerError, ContainerResult};
use crate::event::{
    ApplicationEventMulticaster, ApplicationShutdownEvent, ApplicationStartedEvent, BeanCreatedEvent,
    BeanDestroyedEvent, Event, EventListener, FnEventListener, SimpleApplicationEventMulticaster,
};
use crate::injection::Cardinality;
use crate::injector::downcast_bean;
use crate::lifecycle::BeanPostProcessor;
use crate::provider::{BeanProvider, ProviderSeed};
use crate::qualifier::{sort_by_order, Qualifier};
use crate::registry::{BeanConfiguration, BeanDefinitionRegistry, BeanDefinitionSubmission};
use crate::resolution::BeanResolutionContext;
use crate::scope::{BeanIdentifier, ContextualScope, CreatedBean, CustomScope, Scope, ScopeId, ScopeMap};

/// Shutdown hook类型
pub type ShutdownHook = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// 查找结果：定义 + 实例
pub struct BeanRegistration<T: ?Sized> {
    pub definition: Arc<BeanDefinition>,
    pub bean: Arc<T>,
}

impl<T: ?Sized> BeanRegistration<T> {
    pub fn name(&self) -> &str {
        self.definition.name()
    }
}

/// 自定义作用域实例的句柄
///
/// 由 `begin_scope` 创建，`end_scope` 结束；句柄本身不持有 Bean。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeHandle {
    id: ScopeId,
}

impl ScopeHandle {
    pub fn id(&self) -> &ScopeId {
        &self.id
    }
}

/// 应用上下文
///
/// ApplicationContext 是容器的核心，持有 Bean 定义注册表、Environment、
/// 条件求值器、作用域和事件多播器。构建完成后注册表不再变化。
pub struct ApplicationContext {
    /// 应用名称（用于事件）
    name: String,

    /// 自身的弱引用，供 `BeanProvider` 延迟查找
    this: Weak<ApplicationContext>,

    registry: BeanDefinitionRegistry,

    /// 配置环境
    environment: Arc<Environment>,

    conditions: ConditionEvaluator,

    /// 单例作用域
    singletons: ScopeMap,

    custom_scopes: HashMap<String, Arc<dyn CustomScope>>,

    /// Bean 后置处理器列表（按 order 排序）
    post_processors: Vec<Arc<dyn BeanPostProcessor>>,

    multicaster: SimpleApplicationEventMulticaster,

    /// Shutdown hooks
    shutdown_hooks: RwLock<Vec<ShutdownHook>>,

    eager_init_singletons: bool,
    started: AtomicBool,
    closed: AtomicBool,
    next_scope_id: AtomicU64,
}

impl ApplicationContext {
    pub fn builder() -> ApplicationContextBuilder {
        ApplicationContextBuilder::new()
    }

    /// 应用名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 获取 Environment
    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// Bean 定义注册表
    pub fn registry(&self) -> &BeanDefinitionRegistry {
        &self.registry
    }

    pub(crate) fn conditions(&self) -> &ConditionEvaluator {
        &self.conditions
    }

    pub(crate) fn singletons(&self) -> &ScopeMap {
        &self.singletons
    }

    pub(crate) fn custom_scope(&self, name: &str) -> Option<&Arc<dyn CustomScope>> {
        self.custom_scopes.get(name)
    }

    pub(crate) fn post_processors(&self) -> &[Arc<dyn BeanPostProcessor>] {
        &self.post_processors
    }

    pub(crate) fn downgrade(&self) -> Weak<ApplicationContext> {
        self.this.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> ContainerResult<()> {
        if self.is_closed() {
            Err(ContainerError::ContextClosed)
        } else {
            Ok(())
        }
    }

    fn resolver(&self, scopes: &[ScopeId]) -> ContainerResult<BeanResolutionContext<'_>> {
        self.ensure_open()?;
        Ok(BeanResolutionContext::new(self, scopes.to_vec()))
    }

    // ==================== 查找 ====================

    pub(crate) fn lookup<T>(&self, qualifier: Option<&Qualifier>, scopes: &[ScopeId]) -> ContainerResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.resolver(scopes)?.get_bean::<T>(qualifier)
    }

    pub(crate) fn lookup_optional<T>(
        &self,
        qualifier: Option<&Qualifier>,
        scopes: &[ScopeId],
    ) -> ContainerResult<Option<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let bean_type = BeanType::of::<T>();
        self.resolver(scopes)?
            .resolve_optional(bean_type, qualifier)?
            .map(|value| downcast_bean::<T>(value, bean_type.name()))
            .transpose()
    }

    pub(crate) fn lookup_all<T>(&self, qualifier: Option<&Qualifier>, scopes: &[ScopeId]) -> ContainerResult<Vec<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let bean_type = BeanType::of::<T>();
        self.resolver(scopes)?
            .resolve_all(bean_type, qualifier)?
            .into_iter()
            .map(|value| downcast_bean::<T>(value, bean_type.name()))
            .collect()
    }

    fn lookup_registrations<T>(
        &self,
        qualifier: Option<&Qualifier>,
        scopes: &[ScopeId],
    ) -> ContainerResult<Vec<BeanRegistration<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let bean_type = BeanType::of::<T>();
        let mut resolver = self.resolver(scopes)?;
        let mut registrations = Vec::new();
        for definition in resolver.ordered_candidates(bean_type, qualifier)? {
            let value = resolver.instance_as(&definition, &bean_type)?;
            registrations.push(BeanRegistration {
                bean: downcast_bean::<T>(value, definition.name())?,
                definition,
            });
        }
        Ok(registrations)
    }

    /// 通过类型获取唯一的 Bean
    ///
    /// ```rust,ignore
    /// let greeter = context.get_bean::<dyn Greeter>()?;
    /// ```
    pub fn get_bean<T>(&self) -> ContainerResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.lookup::<T>(None, &[])
    }

    /// 通过类型和限定符获取 Bean
    pub fn get_bean_qualified<T>(&self, qualifier: &Qualifier) -> ContainerResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.lookup::<T>(Some(qualifier), &[])
    }

    /// 获取 Bean，不存在时返回 `None`；多个候选者仍然报错
    pub fn find_bean<T>(&self, qualifier: Option<&Qualifier>) -> ContainerResult<Option<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.lookup_optional::<T>(qualifier, &[])
    }

    /// 获取某类型的所有 Bean，按 order、注册顺序排序
    pub fn get_beans_of_type<T>(&self) -> ContainerResult<Vec<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.lookup_all::<T>(None, &[])
    }

    /// 获取某类型的所有 Bean 及其定义
    pub fn get_bean_registrations<T>(&self, qualifier: Option<&Qualifier>) -> ContainerResult<Vec<BeanRegistration<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.lookup_registrations::<T>(qualifier, &[])
    }

    /// 获取延迟查找句柄
    pub fn get_provider<T>(&self, qualifier: Option<Qualifier>) -> BeanProvider<T>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        BeanProvider::new(ProviderSeed {
            context: self.downgrade(),
            bean_type: BeanType::of::<T>(),
            qualifier,
            scopes: Vec::new(),
        })
    }

    /// 是否存在可用的 `T` 类型 Bean
    pub fn contains_bean<T>(&self) -> bool
    where
        T: ?Sized + 'static,
    {
        self.find_candidates(BeanType::of::<T>())
            .map(|candidates| !candidates.is_empty())
            .unwrap_or(false)
    }

    /// 某类型的可用定义：条件通过、替换关系已生效，按注册顺序
    pub fn find_candidates(&self, bean_type: BeanType) -> ContainerResult<Vec<Arc<BeanDefinition>>> {
        self.find_candidates_qualified(bean_type, None)
    }

    /// 可用定义再经限定符过滤
    pub fn find_candidates_qualified(
        &self,
        bean_type: BeanType,
        qualifier: Option<&Qualifier>,
    ) -> ContainerResult<Vec<Arc<BeanDefinition>>> {
        let candidates = self.resolver(&[])?.eligible(bean_type)?;
        Ok(match qualifier {
            Some(qualifier) => qualifier.reduce(candidates),
            None => candidates,
        })
    }

    /// 选出会被注入的定义，没有候选者时返回 `None`
    pub fn find_bean_definition<T>(&self, qualifier: Option<&Qualifier>) -> ContainerResult<Option<Arc<BeanDefinition>>>
    where
        T: ?Sized + 'static,
    {
        self.resolver(&[])?
            .select_definition(BeanType::of::<T>(), qualifier)
    }

    /// 按名称查找定义，不做条件过滤
    pub fn get_definition(&self, name: &str) -> Option<&Arc<BeanDefinition>> {
        self.registry.get_definition(name)
    }

    pub fn get_bean_configuration(&self, name: &str) -> Option<&BeanConfiguration> {
        self.registry.get_bean_configuration(name)
    }

    /// 按定义创建一个新实例，不放入任何作用域
    ///
    /// 调用者负责在不再需要时调用 `destroy_bean`。
    pub fn create_bean(&self, definition: &Arc<BeanDefinition>) -> ContainerResult<Arc<CreatedBean>> {
        let mut resolver = self.resolver(&[])?;
        let identifier = BeanIdentifier::for_definition(definition, 0);
        let created = Arc::new(resolver.create(definition, identifier)?);
        self.bean_created(&created);
        Ok(created)
    }

    /// 销毁一个实例；单例会同时从作用域中移除
    pub fn destroy_bean(&self, bean: &Arc<CreatedBean>) -> ContainerResult<()> {
        if let Some(cached) = self.singletons.get(bean.identifier()) {
            if Arc::ptr_eq(&cached, bean) {
                self.singletons.remove(bean.identifier());
            }
        }
        match self.destroy_one(bean) {
            Some(failure) => Err(ContainerError::Destruction {
                failures: vec![failure],
            }),
            None => Ok(()),
        }
    }

    fn destroy_one(&self, bean: &CreatedBean) -> Option<(String, anyhow::Error)> {
        let definition = bean.definition();
        match bean.destroy() {
            Ok(true) => {
                tracing::debug!("Destroyed bean '{}'", definition.name());
                self.publish_internal(&BeanDestroyedEvent::new(definition.name(), definition.bean_type()));
                None
            }
            Ok(false) => None,
            Err(e) => {
                tracing::warn!("Pre-destroy callback of bean '{}' failed: {:#}", definition.name(), e);
                Some((definition.name().to_string(), e))
            }
        }
    }

    fn destroy_all(&self, beans: Vec<Arc<CreatedBean>>, failures: &mut Vec<(String, anyhow::Error)>) {
        for bean in beans {
            if let Some(failure) = self.destroy_one(&bean) {
                failures.push(failure);
            }
        }
    }

    // ==================== 作用域 ====================

    /// 开始一个自定义作用域实例
    pub fn begin_scope(&self, scope: &str) -> ContainerResult<ScopeHandle> {
        self.ensure_open()?;
        let custom = self
            .custom_scope(scope)
            .ok_or_else(|| ContainerError::UnknownScope(scope.to_string()))?;
        let id = ScopeId::new(scope, self.next_scope_id.fetch_add(1, Ordering::Relaxed));
        custom.begin(&id)?;
        tracing::debug!("Began scope {}", id);
        Ok(ScopeHandle { id })
    }

    /// 在作用域实例内查找
    ///
    /// ```rust,ignore
    /// let request = context.begin_scope("request")?;
    /// let cart = context.within(&request).get_bean::<ShoppingCart>()?;
    /// context.end_scope(request)?;
    /// ```
    pub fn within(&self, handle: &ScopeHandle) -> ScopedLookup<'_> {
        ScopedLookup {
            context: self,
            scopes: vec![handle.id.clone()],
        }
    }

    /// 结束作用域实例，按依赖者在前的顺序销毁其中的 Bean
    pub fn end_scope(&self, handle: ScopeHandle) -> ContainerResult<()> {
        let custom = self
            .custom_scope(handle.id.scope())
            .ok_or_else(|| ContainerError::UnknownScope(handle.id.scope().to_string()))?;
        let mut failures = Vec::new();
        if let Some(map) = custom.remove(&handle.id) {
            self.destroy_all(map.close(), &mut failures);
        }
        tracing::debug!("Ended scope {}", handle.id);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ContainerError::Destruction { failures })
        }
    }

    // ==================== 事件 ====================

    /// 同步发布事件，第一个监听器错误返回给调用者
    pub fn publish_event(&self, event: &dyn Event) -> ContainerResult<()> {
        self.multicaster.multicast_event(event)
    }

    /// 容器内部事件：监听器错误只记录
    fn publish_internal(&self, event: &dyn Event) {
        if let Err(e) = self.multicaster.multicast_event(event) {
            tracing::warn!("Failed to publish {}: {}", event.event_name(), e);
        }
    }

    pub(crate) fn bean_created(&self, bean: &CreatedBean) {
        if self.multicaster.listener_count() == 0 {
            return;
        }
        let definition = bean.definition();
        self.publish_internal(&BeanCreatedEvent::new(
            definition.name(),
            definition.bean_type(),
            Arc::clone(bean.bean()),
        ));
    }

    /// 注册事件监听器
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.multicaster.add_listener(listener);
    }

    /// 以闭包注册监听器，只接收 `E`（及声明 `E` 为父类型的事件）
    pub fn add_listener_fn<E, F>(&self, name: impl Into<String>, callback: F)
    where
        E: ?Sized + 'static,
        F: Fn(&dyn Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.multicaster.add_listener(Arc::new(FnEventListener::new(
            name,
            Some(BeanType::of::<E>()),
            callback,
        )));
    }

    // ==================== 生命周期 ====================

    /// 注册 shutdown hook
    ///
    /// Shutdown hook 会在应用关闭时按注册顺序执行
    pub fn register_shutdown_hook<F>(&self, hook: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut hooks = self.shutdown_hooks.write();
        hooks.push(Box::new(hook));
        tracing::debug!("Registered shutdown hook, total: {}", hooks.len());
    }

    /// 静态校验依赖图
    ///
    /// 检查可用定义的必需依赖是否存在、依赖之间是否成环。
    /// `BeanProvider` 注入点是延迟的，不参与成环检测。
    pub fn validate_dependencies(&self) -> ContainerResult<()> {
        use crate::utils::dependency::DependencyGraph;

        let resolver = self.resolver(&[])?;
        let mut graph = DependencyGraph::new();

        for definition in self.registry.definitions() {
            let active = resolver.eligible(definition.bean_type())?;
            if !active.iter().any(|d| Arc::ptr_eq(d, definition)) {
                continue;
            }

            let mut edges = Vec::new();
            for point in definition.injection_points() {
                let bean_type = point.bean_type();
                match point.cardinality() {
                    Cardinality::One => match resolver.select_definition(bean_type, point.qualifier()) {
                        Ok(Some(target)) => edges.push(target.name().to_string()),
                        Ok(None) => {
                            let missing = match point.qualifier() {
                                Some(q) => format!("{} {}", bean_type.simple_name(), q),
                                None => bean_type.simple_name().to_string(),
                            };
                            edges.push(missing);
                        }
                        // 歧义留到运行期报告
                        Err(ContainerError::NonUniqueBean { .. }) => {}
                        Err(e) => return Err(e),
                    },
                    Cardinality::Optional | Cardinality::Many => {
                        let mut targets = resolver.eligible(bean_type)?;
                        if let Some(q) = point.qualifier() {
                            targets = q.reduce(targets);
                        }
                        edges.extend(targets.iter().map(|d| d.name().to_string()));
                    }
                    Cardinality::Provider => {}
                }
            }
            graph.add_node(definition.name(), edges);
        }

        graph
            .validate()
            .map_err(|e| ContainerError::DependencyValidationFailed(e.to_string()))?;

        tracing::info!("Dependency validation passed for {} bean(s)", graph.len());
        Ok(())
    }

    /// 启动上下文
    ///
    /// 1. 校验依赖图
    /// 2. 注册实现了 `EventListener` 的 Bean
    /// 3. 创建 eager Bean
    /// 4. 发布 `ApplicationStartedEvent`
    pub fn start(&self) -> ContainerResult<()> {
        self.ensure_open()?;
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let started_at = Instant::now();
        tracing::info!("Starting application context '{}'", self.name);

        self.validate_dependencies()?;

        let listeners = self.get_bean_registrations::<dyn EventListener>(None)?;
        for registration in listeners {
            tracing::debug!("Registering listener bean '{}'", registration.name());
            self.multicaster.add_listener(registration.bean);
        }

        let mut resolver = self.resolver(&[])?;
        let mut eager = Vec::new();
        for definition in self.registry.definitions() {
            let wanted = definition.is_eager()
                || (self.eager_init_singletons && definition.scope() == &Scope::Singleton);
            if !wanted {
                continue;
            }
            let active = resolver.eligible(definition.bean_type())?;
            if active.iter().any(|d| Arc::ptr_eq(d, definition)) {
                eager.push(Arc::clone(definition));
            }
        }
        sort_by_order(&mut eager);
        for definition in &eager {
            if let Scope::Custom(_) = definition.scope() {
                tracing::warn!("Skipping eager init of '{}': custom scoped", definition.name());
                continue;
            }
            resolver.get_created(definition)?;
        }

        let elapsed = started_at.elapsed();
        tracing::info!(
            "Application context '{}' started in {:?} ({} eager bean(s))",
            self.name,
            elapsed,
            eager.len()
        );
        self.publish_event(&ApplicationStartedEvent::new(self.name.clone(), elapsed))
    }

    /// 关闭上下文
    ///
    /// 发布关闭事件、执行 shutdown hooks，然后先关闭自定义作用域、再关闭单例作用域。
    /// 每个 Bean 的 pre-destroy 都会被尝试，所有失败汇总在 `Destruction` 中返回。
    pub fn close(&self) -> ContainerResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!("Closing application context '{}'", self.name);

        self.publish_internal(&ApplicationShutdownEvent::new(self.name.clone()));

        let hooks = std::mem::take(&mut *self.shutdown_hooks.write());
        tracing::debug!("Executing {} shutdown hook(s)", hooks.len());
        for (idx, hook) in hooks.iter().enumerate() {
            match hook() {
                Ok(()) => tracing::debug!("Shutdown hook {} executed successfully", idx + 1),
                Err(e) => tracing::warn!("Shutdown hook {} failed: {}", idx + 1, e),
            }
        }

        let mut failures = Vec::new();
        let mut scope_names: Vec<&String> = self.custom_scopes.keys().collect();
        scope_names.sort();
        for name in scope_names {
            for map in self.custom_scopes[name].drain() {
                self.destroy_all(map.close(), &mut failures);
            }
        }
        self.destroy_all(self.singletons.close(), &mut failures);
        self.multicaster.remove_all_listeners();

        tracing::info!("Application context '{}' closed", self.name);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ContainerError::Destruction { failures })
        }
    }
}

impl std::fmt::Debug for ApplicationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationContext")
            .field("name", &self.name)
            .field("definitions", &self.registry.len())
            .field("singletons", &self.singletons)
            .field("started", &self.is_started())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 在一个或多个作用域实例内的查找视图
pub struct ScopedLookup<'a> {
    context: &'a ApplicationContext,
    scopes: Vec<ScopeId>,
}

impl<'a> ScopedLookup<'a> {
    /// 同时激活另一个作用域实例
    pub fn and(mut self, handle: &ScopeHandle) -> Self {
        self.scopes.push(handle.id.clone());
        self
    }

    pub fn get_bean<T>(&self) -> ContainerResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.context.lookup::<T>(None, &self.scopes)
    }

    pub fn get_bean_qualified<T>(&self, qualifier: &Qualifier) -> ContainerResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.context.lookup::<T>(Some(qualifier), &self.scopes)
    }

    pub fn find_bean<T>(&self, qualifier: Option<&Qualifier>) -> ContainerResult<Option<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.context.lookup_optional::<T>(qualifier, &self.scopes)
    }

    pub fn get_beans_of_type<T>(&self) -> ContainerResult<Vec<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.context.lookup_all::<T>(None, &self.scopes)
    }

    /// 延迟句柄，记住当前激活的作用域实例
    pub fn get_provider<T>(&self, qualifier: Option<Qualifier>) -> BeanProvider<T>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        BeanProvider::new(ProviderSeed {
            context: self.context.downgrade(),
            bean_type: BeanType::of::<T>(),
            qualifier,
            scopes: self.scopes.clone(),
        })
    }
}

/// 应用上下文构建器
pub struct ApplicationContextBuilder {
    name: String,
    registry: BeanDefinitionRegistry,
    environment: Arc<Environment>,
    conditions: HashMap<String, Arc<dyn Condition>>,
    custom_scopes: HashMap<String, Arc<dyn CustomScope>>,
    post_processors: Vec<Arc<dyn BeanPostProcessor>>,
    eager_init_singletons: bool,
    error: Option<ContainerError>,
}

impl ApplicationContextBuilder {
    pub fn new() -> Self {
        Self {
            name: "application".to_string(),
            registry: BeanDefinitionRegistry::new(),
            environment: Arc::new(Environment::new()),
            conditions: HashMap::new(),
            custom_scopes: HashMap::new(),
            post_processors: Vec::new(),
            eager_init_singletons: false,
            error: None,
        }
    }

    /// 设置应用名称
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 注册 Bean 定义；名称重复的错误在 `build` 时返回
    pub fn register(mut self, definition: BeanDefinition) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.registry.register(definition) {
                self.error = Some(e);
            }
        }
        self
    }

    /// 注册所有通过 `inventory::submit!` 提交的定义
    pub fn scan_definitions(mut self) -> Self {
        let mut count = 0;
        for submission in inventory::iter::<BeanDefinitionSubmission> {
            tracing::debug!("  ├─ Found submitted bean definition: {}", submission.name);
            self = self.register((submission.factory)());
            count += 1;
        }
        tracing::info!("Definition scan completed, found {} submission(s)", count);
        self
    }

    /// 添加配置源到 Environment
    pub fn property_source(self, source: Box<dyn PropertySource>) -> Self {
        self.environment.add_property_source(source);
        self
    }

    /// 设置激活的 profiles
    pub fn active_profiles(self, profiles: &[&str]) -> Self {
        self.environment
            .set_active_profiles(profiles.iter().map(|p| p.to_string()).collect());
        self
    }

    /// 注册配置模块
    pub fn configuration(mut self, name: impl Into<String>, version: Option<&str>) -> Self {
        self.registry
            .register_configuration(BeanConfiguration::new(name, version));
        self
    }

    /// 声明一个已知类型名
    pub fn known_type(mut self, name: impl Into<String>) -> Self {
        self.registry.register_known_type(name);
        self
    }

    /// 以 `key` 注册自定义条件
    pub fn condition(mut self, key: impl Into<String>, condition: impl Condition + 'static) -> Self {
        self.conditions.insert(key.into(), Arc::new(condition));
        self
    }

    /// 注册自定义作用域
    pub fn custom_scope(mut self, scope: Arc<dyn CustomScope>) -> Self {
        self.custom_scopes.insert(scope.name().to_string(), scope);
        self
    }

    /// 注册以句柄区分实例的作用域，例如 "request"
    pub fn contextual_scope(self, name: &str) -> Self {
        self.custom_scope(Arc::new(ContextualScope::new(name)))
    }

    /// 注册 BeanPostProcessor
    pub fn bean_post_processor(mut self, processor: Arc<dyn BeanPostProcessor>) -> Self {
        self.post_processors.push(processor);
        self
    }

    /// 启动时创建所有单例，而不仅是标记为 eager 的 Bean
    pub fn eager_init_singletons(mut self, eager: bool) -> Self {
        self.eager_init_singletons = eager;
        self
    }

    /// 构建上下文
    pub fn build(self) -> ContainerResult<Arc<ApplicationContext>> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut post_processors = self.post_processors;
        post_processors.sort_by_key(|p| p.order());

        tracing::info!(
            "Building application context '{}' with {} bean definition(s)",
            self.name,
            self.registry.len()
        );

        Ok(Arc::new_cyclic(|this| ApplicationContext {
            name: self.name,
            this: this.clone(),
            registry: self.registry,
            environment: self.environment,
            conditions: ConditionEvaluator::new(self.conditions),
            singletons: ScopeMap::new("singleton", 0),
            custom_scopes: self.custom_scopes,
            post_processors,
            multicaster: SimpleApplicationEventMulticaster::new(),
            shutdown_hooks: RwLock::new(Vec::new()),
            eager_init_singletons: self.eager_init_singletons,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            next_scope_id: AtomicU64::new(1),
        }))
    }
}

impl Default for ApplicationContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::AnnotationValue;
    use crate::bean::Replaces;
    use crate::condition::{ConditionContext, Requirement};
    use crate::config::MapPropertySource;
    use crate::event::BeanEvent;
    use crate::injection::{Arguments, InjectionPoint};
    use parking_lot::Mutex;
    use std::any::Any;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct EnglishGreeter;
    struct FrenchGreeter;

    impl Greeter for EnglishGreeter {
        fn greet(&self) -> String {
            "Hello".to_string()
        }
    }

    impl Greeter for FrenchGreeter {
        fn greet(&self) -> String {
            "Bonjour".to_string()
        }
    }

    fn greeters(lang: &str) -> Arc<ApplicationContext> {
        ApplicationContext::builder()
            .property_source(Box::new(MapPropertySource::new("test").with_property("lang", lang)))
            .register(
                BeanDefinition::builder(|| Ok(EnglishGreeter))
                    .named("en")
                    .exposes(|g: Arc<EnglishGreeter>| g as Arc<dyn Greeter>)
                    .requires(Requirement::property("lang").equals("en").into())
                    .build(),
            )
            .register(
                BeanDefinition::builder(|| Ok(FrenchGreeter))
                    .named("fr")
                    .exposes(|g: Arc<FrenchGreeter>| g as Arc<dyn Greeter>)
                    .requires(Requirement::property("lang").equals("fr").into())
                    .build(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_condition_excludes_candidate_entirely() {
        let context = greeters("en");

        let english = context
            .get_bean_qualified::<dyn Greeter>(&Qualifier::named("en"))
            .unwrap();
        assert_eq!(english.greet(), "Hello");
        assert_eq!(context.get_bean::<dyn Greeter>().unwrap().greet(), "Hello");

        let err = context
            .get_bean_qualified::<dyn Greeter>(&Qualifier::named("fr"))
            .err()
            .unwrap();
        assert!(err.is_no_such_bean());
        match err {
            ContainerError::NoSuchBean { qualifier, disabled, .. } => {
                assert_eq!(qualifier.as_deref(), Some("@Named(fr)"));
                assert_eq!(disabled.len(), 1);
                assert_eq!(disabled[0].bean, "fr");
                assert!(disabled[0].reasons[0].contains("lang"));
            }
            other => panic!("unexpected error: {}", other),
        }

        let context = greeters("fr");
        assert_eq!(context.get_bean::<dyn Greeter>().unwrap().greet(), "Bonjour");
    }

    trait Cache: Send + Sync {
        fn backend(&self) -> &'static str;
    }

    struct MemoryCache;
    struct RedisCache;

    impl Cache for MemoryCache {
        fn backend(&self) -> &'static str {
            "memory"
        }
    }

    impl Cache for RedisCache {
        fn backend(&self) -> &'static str {
            "redis"
        }
    }

    fn caches(redis_enabled: bool) -> Arc<ApplicationContext> {
        let mut properties = MapPropertySource::new("test");
        if redis_enabled {
            properties = properties.with_property("cache.redis.url", "redis://localhost");
        }
        ApplicationContext::builder()
            .property_source(Box::new(properties))
            .register(
                BeanDefinition::builder(|| Ok(MemoryCache))
                    .exposes(|c: Arc<MemoryCache>| c as Arc<dyn Cache>)
                    .build(),
            )
            .register(
                BeanDefinition::builder(|| Ok(RedisCache))
                    .exposes(|c: Arc<RedisCache>| c as Arc<dyn Cache>)
                    .replaces(Replaces::bean::<MemoryCache>())
                    .requires(Requirement::property("cache.redis.url").into())
                    .build(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_eligible_replacement_hides_original() {
        let context = caches(true);
        assert_eq!(context.get_bean::<dyn Cache>().unwrap().backend(), "redis");
        assert_eq!(context.get_beans_of_type::<dyn Cache>().unwrap().len(), 1);

        let err = context.get_bean::<MemoryCache>().err().unwrap();
        match err {
            ContainerError::NoSuchBean { disabled, .. } => {
                assert_eq!(disabled[0].bean, "memoryCache");
                assert_eq!(disabled[0].reasons, vec!["Replaced by another bean".to_string()]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_ineligible_replacement_keeps_original() {
        let context = caches(false);
        assert_eq!(context.get_bean::<dyn Cache>().unwrap().backend(), "memory");
        assert!(context.contains_bean::<MemoryCache>());
        assert!(!context.contains_bean::<RedisCache>());
    }

    struct Pool {
        id: usize,
    }

    #[test]
    fn test_singleton_is_created_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let context = ApplicationContext::builder()
            .register(
                BeanDefinition::builder(move || {
                    Ok(Pool {
                        id: counter.fetch_add(1, Ordering::SeqCst),
                    })
                })
                .build(),
            )
            .build()
            .unwrap();

        let first = context.get_bean::<Pool>().unwrap();
        let second = context.get_bean::<Pool>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_singleton_resolution_builds_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let context = ApplicationContext::builder()
            .register(
                BeanDefinition::builder(move || {
                    let id = counter.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    Ok(Pool { id })
                })
                .build(),
            )
            .build()
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let context = Arc::clone(&context);
            handles.push(tokio::task::spawn_blocking(move || context.get_bean::<Pool>()));
        }
        let mut pools = Vec::new();
        for handle in handles {
            pools.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(pools.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(pools[0].id, 0);
    }

    #[test]
    fn test_prototype_instances_are_distinct() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let context = ApplicationContext::builder()
            .register(
                BeanDefinition::builder(move || {
                    Ok(Pool {
                        id: counter.fetch_add(1, Ordering::SeqCst),
                    })
                })
                .prototype()
                .build(),
            )
            .build()
            .unwrap();

        let first = context.get_bean::<Pool>().unwrap();
        let second = context.get_bean::<Pool>().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!((first.id, second.id), (0, 1));
    }

    trait Engine: Send + Sync {
        fn cylinders(&self) -> u32;
    }

    struct V6Engine;
    struct V8Engine;

    impl Engine for V6Engine {
        fn cylinders(&self) -> u32 {
            6
        }
    }

    impl Engine for V8Engine {
        fn cylinders(&self) -> u32 {
            8
        }
    }

    #[derive(Default)]
    struct Vehicle {
        engine: Option<Arc<dyn Engine>>,
    }

    fn engines() -> ApplicationContextBuilder {
        ApplicationContext::builder()
            .register(
                BeanDefinition::builder(|| Ok(V6Engine))
                    .named("v6")
                    .exposes(|e: Arc<V6Engine>| e as Arc<dyn Engine>)
                    .annotate(AnnotationValue::new("Cylinders").member("value", 6i64))
                    .build(),
            )
            .register(
                BeanDefinition::builder(|| Ok(V8Engine))
                    .named("v8")
                    .order(-1)
                    .exposes(|e: Arc<V8Engine>| e as Arc<dyn Engine>)
                    .annotate(AnnotationValue::new("Cylinders").member("value", 8i64))
                    .build(),
            )
    }

    fn vehicle(point: InjectionPoint) -> BeanDefinition {
        BeanDefinition::builder(|| Ok(Vehicle::default()))
            .inject_field(point, |vehicle: &mut Vehicle, value| {
                vehicle.engine = Some(value.into_bean::<dyn Engine>()?);
                Ok(())
            })
            .build()
    }

    #[test]
    fn test_named_qualifier_selects_engine() {
        let context = engines()
            .register(vehicle(InjectionPoint::bean::<dyn Engine>("engine").named("v8")))
            .build()
            .unwrap();

        let vehicle = context.get_bean::<Vehicle>().unwrap();
        assert_eq!(vehicle.engine.as_ref().map(|e| e.cylinders()), Some(8));

        let v6 = context
            .get_bean_qualified::<dyn Engine>(&Qualifier::annotation(
                AnnotationValue::new("Cylinders").member("value", 6i64),
            ))
            .unwrap();
        assert_eq!(v6.cylinders(), 6);
    }

    #[test]
    fn test_ambiguous_engine_is_an_error() {
        let context = engines()
            .register(vehicle(InjectionPoint::bean::<dyn Engine>("engine")))
            .build()
            .unwrap();

        let err = context.get_bean::<Vehicle>().err().unwrap();
        match err {
            ContainerError::NonUniqueBean { candidates, path, .. } => {
                assert_eq!(candidates, vec!["v8".to_string(), "v6".to_string()]);
                assert_eq!(path, vec!["vehicle.engine".to_string()]);
            }
            other => panic!("unexpected error: {}", other),
        }

        let any = context
            .get_bean_qualified::<dyn Engine>(&Qualifier::Any)
            .unwrap();
        assert_eq!(any.cylinders(), 8);
        let all: Vec<u32> = context
            .get_beans_of_type::<dyn Engine>()
            .unwrap()
            .iter()
            .map(|e| e.cylinders())
            .collect();
        assert_eq!(all, vec![8, 6]);
    }

    #[test]
    fn test_primary_breaks_tie() {
        let context = ApplicationContext::builder()
            .register(
                BeanDefinition::builder(|| Ok(V6Engine))
                    .exposes(|e: Arc<V6Engine>| e as Arc<dyn Engine>)
                    .build(),
            )
            .register(
                BeanDefinition::builder(|| Ok(V8Engine))
                    .primary()
                    .exposes(|e: Arc<V8Engine>| e as Arc<dyn Engine>)
                    .build(),
            )
            .build()
            .unwrap();

        assert_eq!(context.get_bean::<dyn Engine>().unwrap().cylinders(), 8);
        let definition = context.find_bean_definition::<dyn Engine>(None).unwrap();
        assert_eq!(definition.map(|d| d.name().to_string()), Some("v8Engine".to_string()));
    }

    #[test]
    fn test_unsatisfied_dependency_names_type_and_path() {
        let context = ApplicationContext::builder()
            .register(vehicle(InjectionPoint::bean::<dyn Engine>("engine")))
            .build()
            .unwrap();

        let err = context.get_bean::<Vehicle>().err().unwrap();
        let message = err.to_string();
        assert!(err.is_no_such_bean());
        assert!(message.contains("Engine"), "{}", message);
        assert!(message.contains("vehicle.engine"), "{}", message);

        assert!(context.find_bean::<dyn Engine>(None).unwrap().is_none());
    }

    #[test]
    fn test_optional_and_collection_injection() {
        struct Garage {
            spare: Option<Arc<dyn Engine>>,
            engines: Vec<Arc<dyn Engine>>,
        }

        let context = engines()
            .register(
                BeanDefinition::constructed(
                    vec![
                        InjectionPoint::optional::<dyn Engine>("spare").named("v12"),
                        InjectionPoint::all::<dyn Engine>("engines"),
                    ],
                    |args| {
                        Ok(Garage {
                            spare: args.optional::<dyn Engine>(0)?,
                            engines: args.all::<dyn Engine>(1)?,
                        })
                    },
                )
                .build(),
            )
            .build()
            .unwrap();

        let garage = context.get_bean::<Garage>().unwrap();
        assert!(garage.spare.is_none());
        let cylinders: Vec<u32> = garage.engines.iter().map(|e| e.cylinders()).collect();
        assert_eq!(cylinders, vec![8, 6]);
    }

    struct NodeA;
    struct NodeB;

    #[test]
    fn test_circular_dependency_reports_path() {
        let context = ApplicationContext::builder()
            .register(
                BeanDefinition::constructed(vec![InjectionPoint::bean::<NodeB>("b")], |args| {
                    args.bean::<NodeB>(0)?;
                    Ok(NodeA)
                })
                .named("a")
                .build(),
            )
            .register(
                BeanDefinition::constructed(vec![InjectionPoint::bean::<NodeA>("a")], |args| {
                    args.bean::<NodeA>(0)?;
                    Ok(NodeB)
                })
                .named("b")
                .build(),
            )
            .build()
            .unwrap();

        let err = context.get_bean::<NodeA>().err().unwrap();
        assert!(err.is_circular());
        match err {
            ContainerError::CircularDependency { path } => {
                assert_eq!(path, vec!["a.b", "b.a", "a"]);
            }
            other => panic!("unexpected error: {}", other),
        }

        let validation = context.validate_dependencies().unwrap_err();
        assert!(matches!(validation, ContainerError::DependencyValidationFailed(_)));
    }

    struct Left {
        right: Option<Arc<Right>>,
    }

    struct Right {
        left: Option<Arc<Left>>,
    }

    #[test]
    fn test_singleton_cycle_across_threads_fails_instead_of_blocking() {
        // 两个构造函数在屏障处会合，保证两端同时处于构造中；只在首次构造时等待
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let (left_barrier, right_barrier) = (Arc::clone(&barrier), Arc::clone(&barrier));
        let left_waited = Arc::new(AtomicBool::new(false));
        let right_waited = Arc::new(AtomicBool::new(false));

        let context = ApplicationContext::builder()
            .register(
                BeanDefinition::builder(move || {
                    if !left_waited.swap(true, Ordering::SeqCst) {
                        left_barrier.wait();
                    }
                    Ok(Left { right: None })
                })
                .inject_field(InjectionPoint::bean::<Right>("right"), |left: &mut Left, value| {
                    left.right = Some(value.into_bean::<Right>()?);
                    Ok(())
                })
                .build(),
            )
            .register(
                BeanDefinition::builder(move || {
                    if !right_waited.swap(true, Ordering::SeqCst) {
                        right_barrier.wait();
                    }
                    Ok(Right { left: None })
                })
                .inject_field(InjectionPoint::bean::<Left>("left"), |right: &mut Right, value| {
                    right.left = Some(value.into_bean::<Left>()?);
                    Ok(())
                })
                .build(),
            )
            .build()
            .unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let left_context = Arc::clone(&context);
        let left_tx = tx.clone();
        std::thread::spawn(move || {
            let _ = left_tx.send(left_context.get_bean::<Left>().map(|left| left.right.is_some()));
        });
        let right_context = Arc::clone(&context);
        std::thread::spawn(move || {
            let _ = tx.send(right_context.get_bean::<Right>().map(|right| right.left.is_some()));
        });

        for _ in 0..2 {
            let result = rx
                .recv_timeout(Duration::from_secs(5))
                .expect("singleton creation is still blocked");
            assert!(result.unwrap_err().is_circular());
        }
        assert!(context.singletons().created().is_empty());
    }

    struct Parent {
        child: BeanProvider<Child>,
    }

    struct Child {
        parent: Arc<Parent>,
    }

    #[test]
    fn test_provider_defers_lookup() {
        let context = ApplicationContext::builder()
            .register(
                BeanDefinition::constructed(vec![InjectionPoint::provider::<Child>("child")], |args| {
                    Ok(Parent {
                        child: args.provider::<Child>(0)?,
                    })
                })
                .build(),
            )
            .register(
                BeanDefinition::constructed(vec![InjectionPoint::bean::<Parent>("parent")], |args| {
                    Ok(Child {
                        parent: args.bean::<Parent>(0)?,
                    })
                })
                .build(),
            )
            .build()
            .unwrap();

        context.validate_dependencies().unwrap();
        let parent = context.get_bean::<Parent>().unwrap();
        assert!(parent.child.is_present());
        let child = parent.child.get().unwrap();
        assert!(Arc::ptr_eq(&child.parent, &parent));
        assert_eq!(parent.child.all().unwrap().len(), 1);

        let missing = context.get_provider::<dyn Engine>(None);
        assert!(!missing.is_present());
        assert!(missing.find().unwrap().is_none());
    }

    struct Config;
    struct Database;
    struct Service;

    fn layered(log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<ApplicationContext> {
        let config_log = Arc::clone(log);
        let database_log = Arc::clone(log);
        let service_log = Arc::clone(log);
        ApplicationContext::builder()
            .register(
                BeanDefinition::builder(|| Ok(Config))
                    .pre_destroy(move |_: &Config| {
                        config_log.lock().push("config");
                        Ok(())
                    })
                    .build(),
            )
            .register(
                BeanDefinition::constructed(vec![InjectionPoint::bean::<Config>("config")], |args| {
                    args.bean::<Config>(0)?;
                    Ok(Database)
                })
                .pre_destroy(move |_: &Database| {
                    database_log.lock().push("database");
                    Ok(())
                })
                .build(),
            )
            .register(
                BeanDefinition::constructed(
                    vec![
                        InjectionPoint::bean::<Config>("config"),
                        InjectionPoint::bean::<Database>("database"),
                    ],
                    |args| {
                        args.bean::<Config>(0)?;
                        args.bean::<Database>(1)?;
                        Ok(Service)
                    },
                )
                .pre_destroy(move |_: &Service| {
                    service_log.lock().push("service");
                    Ok(())
                })
                .build(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_close_destroys_dependents_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let context = layered(&log);

        context.get_bean::<Service>().unwrap();
        context.close().unwrap();

        assert_eq!(*log.lock(), vec!["service", "database", "config"]);
        assert!(matches!(
            context.get_bean::<Config>(),
            Err(ContainerError::ContextClosed)
        ));
        context.close().unwrap();
    }

    #[test]
    fn test_destruction_failures_are_aggregated() {
        let survivor_destroyed = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&survivor_destroyed);
        let context = ApplicationContext::builder()
            .register(
                BeanDefinition::builder(|| Ok(NodeA))
                    .pre_destroy(|_: &NodeA| Err(anyhow::anyhow!("socket already closed")))
                    .build(),
            )
            .register(
                BeanDefinition::builder(|| Ok(NodeB))
                    .pre_destroy(move |_: &NodeB| {
                        flag.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .build(),
            )
            .register(
                BeanDefinition::builder(|| Ok(Config))
                    .pre_destroy(|_: &Config| Err(anyhow::anyhow!("flush failed")))
                    .build(),
            )
            .eager_init_singletons(true)
            .build()
            .unwrap();

        context.start().unwrap();
        let err = context.close().unwrap_err();
        match err {
            ContainerError::Destruction { failures } => {
                let names: Vec<&str> = failures.iter().map(|(name, _)| name.as_str()).collect();
                assert_eq!(names, vec!["config", "nodeA"]);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(survivor_destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_destroy_bean_evicts_singleton() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let context = layered(&log);

        let first = context.get_bean::<Config>().unwrap();
        let created = context.singletons().created();
        let config = created
            .iter()
            .find(|b| b.definition().name() == "config")
            .cloned()
            .unwrap();
        context.destroy_bean(&config).unwrap();
        assert_eq!(*log.lock(), vec!["config"]);

        let second = context.get_bean::<Config>().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_create_bean_is_untracked() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let context = layered(&log);
        let definition = Arc::clone(context.get_definition("database").unwrap());

        let created = context.create_bean(&definition).unwrap();
        assert!(created.as_type::<Database>().is_some());
        let singleton = context.get_bean::<Database>().unwrap();
        assert!(!Arc::ptr_eq(&created.downcast::<Database>().unwrap(), &singleton));

        context.destroy_bean(&created).unwrap();
        assert_eq!(*log.lock(), vec!["database"]);
    }

    struct Cart {
        items: Mutex<Vec<String>>,
    }

    #[test]
    fn test_request_scope_per_handle() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&destroyed);
        let context = ApplicationContext::builder()
            .contextual_scope("request")
            .register(
                BeanDefinition::builder(|| {
                    Ok(Cart {
                        items: Mutex::new(Vec::new()),
                    })
                })
                .scope(Scope::custom("request"))
                .pre_destroy(move |_: &Cart| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .build(),
            )
            .build()
            .unwrap();

        assert!(matches!(
            context.get_bean::<Cart>(),
            Err(ContainerError::NoActiveScope { .. })
        ));
        assert!(matches!(
            context.begin_scope("session"),
            Err(ContainerError::UnknownScope(_))
        ));

        let first = context.begin_scope("request").unwrap();
        let second = context.begin_scope("request").unwrap();

        let cart = context.within(&first).get_bean::<Cart>().unwrap();
        cart.items.lock().push("book".to_string());
        let same = context.within(&first).get_bean::<Cart>().unwrap();
        let other = context.within(&second).get_bean::<Cart>().unwrap();
        assert!(Arc::ptr_eq(&cart, &same));
        assert!(!Arc::ptr_eq(&cart, &other));
        assert!(other.items.lock().is_empty());

        let stale = first.clone();
        context.end_scope(first).unwrap();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);

        assert!(matches!(
            context.within(&stale).get_bean::<Cart>(),
            Err(ContainerError::NoActiveScope { .. })
        ));
        context.end_scope(stale).unwrap();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);

        context.close().unwrap();
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    }

    struct Logger {
        owner: String,
    }

    struct OrderService {
        logger: Arc<Logger>,
    }

    #[test]
    fn test_constructor_sees_injection_point() {
        let context = ApplicationContext::builder()
            .register(
                BeanDefinition::constructed(Vec::new(), |args| {
                    let owner = args
                        .injection_point()
                        .and_then(|p| p.declaring_bean())
                        .unwrap_or("root")
                        .to_string();
                    Ok(Logger { owner })
                })
                .prototype()
                .build(),
            )
            .register(
                BeanDefinition::constructed(vec![InjectionPoint::bean::<Logger>("logger")], |args| {
                    Ok(OrderService {
                        logger: args.bean::<Logger>(0)?,
                    })
                })
                .build(),
            )
            .build()
            .unwrap();

        assert_eq!(context.get_bean::<OrderService>().unwrap().logger.owner, "orderService");
        assert_eq!(context.get_bean::<Logger>().unwrap().owner, "root");
    }

    trait Plugin: Send + Sync {
        fn slot(&self) -> &str;
    }

    struct AuthPlugin {
        slot: String,
    }

    struct MetricsPlugin {
        slot: String,
    }

    impl Plugin for AuthPlugin {
        fn slot(&self) -> &str {
            &self.slot
        }
    }

    impl Plugin for MetricsPlugin {
        fn slot(&self) -> &str {
            &self.slot
        }
    }

    fn slot_of(args: &Arguments) -> String {
        args.injection_point()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "root".to_string())
    }

    #[test]
    fn test_collection_members_see_injection_point() {
        struct Host {
            plugins: Vec<Arc<dyn Plugin>>,
        }

        let context = ApplicationContext::builder()
            .register(
                BeanDefinition::constructed(Vec::new(), |args| Ok(AuthPlugin { slot: slot_of(args) }))
                    .exposes(|p: Arc<AuthPlugin>| p as Arc<dyn Plugin>)
                    .prototype()
                    .build(),
            )
            .register(
                BeanDefinition::constructed(Vec::new(), |args| Ok(MetricsPlugin { slot: slot_of(args) }))
                    .exposes(|p: Arc<MetricsPlugin>| p as Arc<dyn Plugin>)
                    .prototype()
                    .build(),
            )
            .register(
                BeanDefinition::constructed(vec![InjectionPoint::all::<dyn Plugin>("plugins")], |args| {
                    Ok(Host {
                        plugins: args.all::<dyn Plugin>(0)?,
                    })
                })
                .build(),
            )
            .build()
            .unwrap();

        let host = context.get_bean::<Host>().unwrap();
        let slots: Vec<&str> = host.plugins.iter().map(|p| p.slot()).collect();
        assert_eq!(slots, vec!["host.plugins", "host.plugins"]);
        assert_eq!(context.get_bean::<AuthPlugin>().unwrap().slot(), "root");
    }

    trait Clock: Send + Sync {
        fn name(&self) -> &'static str;
    }

    struct SystemClock;
    struct FixedClock;

    impl Clock for SystemClock {
        fn name(&self) -> &'static str {
            "system"
        }
    }

    impl Clock for FixedClock {
        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn clocks(with_fixed: bool) -> Arc<ApplicationContext> {
        let mut builder = ApplicationContext::builder().register(
            BeanDefinition::builder(|| Ok(SystemClock))
                .exposes(|c: Arc<SystemClock>| c as Arc<dyn Clock>)
                .requires(Requirement::missing_bean::<dyn Clock>())
                .build(),
        );
        if with_fixed {
            builder = builder.register(
                BeanDefinition::builder(|| Ok(FixedClock))
                    .exposes(|c: Arc<FixedClock>| c as Arc<dyn Clock>)
                    .build(),
            );
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_missing_bean_of_own_type_means_no_other() {
        assert_eq!(clocks(false).get_bean::<dyn Clock>().unwrap().name(), "system");
        assert_eq!(clocks(true).get_bean::<dyn Clock>().unwrap().name(), "fixed");
    }

    #[test]
    fn test_bean_requiring_own_type_is_disabled() {
        let context = ApplicationContext::builder()
            .register(
                BeanDefinition::builder(|| Ok(SystemClock))
                    .exposes(|c: Arc<SystemClock>| c as Arc<dyn Clock>)
                    .requires(Requirement::bean::<dyn Clock>())
                    .build(),
            )
            .build()
            .unwrap();
        assert!(!context.contains_bean::<dyn Clock>());
    }

    #[derive(Default)]
    struct Dashboard {
        clock: Option<Arc<dyn Clock>>,
        pool: Option<Arc<Pool>>,
        calls: Vec<String>,
    }

    #[test]
    fn test_fields_are_injected_before_methods_in_declaration_order() {
        let context = ApplicationContext::builder()
            .register(
                BeanDefinition::builder(|| Ok(SystemClock))
                    .exposes(|c: Arc<SystemClock>| c as Arc<dyn Clock>)
                    .build(),
            )
            .register(BeanDefinition::builder(|| Ok(Pool { id: 7 })).build())
            .register(BeanDefinition::builder(|| Ok(Config)).build())
            .register(
                BeanDefinition::builder(|| {
                    Ok(Dashboard {
                        calls: vec!["new".to_string()],
                        ..Dashboard::default()
                    })
                })
                .inject_field(InjectionPoint::bean::<dyn Clock>("clock"), |d: &mut Dashboard, value| {
                    d.clock = Some(value.into_bean::<dyn Clock>()?);
                    d.calls.push("field:clock".to_string());
                    Ok(())
                })
                .inject_field(InjectionPoint::bean::<Pool>("pool"), |d: &mut Dashboard, value| {
                    d.pool = Some(value.into_bean::<Pool>()?);
                    d.calls.push("field:pool".to_string());
                    Ok(())
                })
                .inject_method("describe", Vec::new(), |d: &mut Dashboard, _| {
                    let clock = d
                        .clock
                        .as_ref()
                        .map(|c| c.name())
                        .ok_or_else(|| anyhow::anyhow!("clock not injected"))?;
                    d.calls.push(format!("method:describe({})", clock));
                    Ok(())
                })
                .inject_method(
                    "register",
                    vec![InjectionPoint::bean::<Config>("config")],
                    |d: &mut Dashboard, args| {
                        args.bean::<Config>(0)?;
                        let pool = d
                            .pool
                            .as_ref()
                            .map(|p| p.id)
                            .ok_or_else(|| anyhow::anyhow!("pool not injected"))?;
                        d.calls.push(format!("method:register({})", pool));
                        Ok(())
                    },
                )
                .build(),
            )
            .build()
            .unwrap();

        let dashboard = context.get_bean::<Dashboard>().unwrap();
        assert_eq!(
            dashboard.calls,
            vec![
                "new",
                "field:clock",
                "field:pool",
                "method:describe(system)",
                "method:register(7)",
            ]
        );
    }

    #[test]
    fn test_configuration_and_custom_conditions() {
        let context = ApplicationContext::builder()
            .configuration("data", Some("2.1.0"))
            .property_source(Box::new(
                MapPropertySource::new("test").with_property("feature.enabled", true),
            ))
            .condition("feature", |ctx: &ConditionContext<'_>| {
                ctx.environment().get_bool_or("feature.enabled", false)
            })
            .register(
                BeanDefinition::builder(|| Ok(NodeA))
                    .requires(Requirement::configuration("data", Some("2.0.0")))
                    .requires(Requirement::condition("feature"))
                    .build(),
            )
            .register(
                BeanDefinition::builder(|| Ok(NodeB))
                    .requires(Requirement::configuration("data", Some("3.0.0")))
                    .build(),
            )
            .register(
                BeanDefinition::builder(|| Ok(Config))
                    .requires(Requirement::configuration("data", Some("two")))
                    .build(),
            )
            .build()
            .unwrap();

        assert!(context.get_bean::<NodeA>().is_ok());
        let err = context.get_bean::<NodeB>().err().unwrap();
        assert!(err.to_string().contains("lower than required"), "{}", err);
        assert!(matches!(
            context.get_bean::<Config>(),
            Err(ContainerError::ConditionEvaluation { .. })
        ));
        assert_eq!(
            context.get_bean_configuration("data").and_then(|c| c.version()),
            Some("2.1.0")
        );
    }

    #[test]
    fn test_property_condition_follows_environment_changes() {
        let context = ApplicationContext::builder()
            .register(
                BeanDefinition::builder(|| Ok(NodeA))
                    .requires(Requirement::property("feature.on").equals("true").into())
                    .build(),
            )
            .build()
            .unwrap();

        assert!(context.find_bean::<NodeA>(None).unwrap().is_none());

        context.environment().add_property_source(Box::new(
            MapPropertySource::new("runtime").with_property("feature.on", true),
        ));
        assert!(context.find_bean::<NodeA>(None).unwrap().is_some());
    }

    #[test]
    fn test_custom_condition_is_evaluated_on_every_lookup() {
        let enabled = Arc::new(AtomicBool::new(false));
        let switch = Arc::clone(&enabled);
        let context = ApplicationContext::builder()
            .condition("switch", move |_: &ConditionContext<'_>| switch.load(Ordering::SeqCst))
            .register(
                BeanDefinition::builder(|| Ok(NodeB))
                    .requires(Requirement::condition("switch"))
                    .build(),
            )
            .register(
                BeanDefinition::builder(|| Ok(Config))
                    .requires(Requirement::bean::<NodeB>())
                    .build(),
            )
            .build()
            .unwrap();

        assert!(!context.contains_bean::<NodeB>());
        assert!(!context.contains_bean::<Config>());

        enabled.store(true, Ordering::SeqCst);
        assert!(context.contains_bean::<NodeB>());
        assert!(context.contains_bean::<Config>());
    }

    struct AuditListener {
        seen: Mutex<Vec<String>>,
    }

    impl EventListener for AuditListener {
        fn on_event(&self, event: &dyn Event) -> anyhow::Result<()> {
            self.seen.lock().push(event.event_name().to_string());
            Ok(())
        }

        fn listener_name(&self) -> &str {
            "audit"
        }
    }

    #[test]
    fn test_start_registers_listener_beans_and_creates_eager_beans() {
        let context = ApplicationContext::builder()
            .name("shop")
            .register(
                BeanDefinition::builder(|| {
                    Ok(AuditListener {
                        seen: Mutex::new(Vec::new()),
                    })
                })
                .exposes(|l: Arc<AuditListener>| l as Arc<dyn EventListener>)
                .build(),
            )
            .register(BeanDefinition::builder(|| Ok(Pool { id: 7 })).eager().build())
            .build()
            .unwrap();

        context.start().unwrap();
        assert!(context.is_started());

        let audit = context.get_bean::<AuditListener>().unwrap();
        assert_eq!(
            *audit.seen.lock(),
            vec!["BeanCreatedEvent".to_string(), "ApplicationStartedEvent".to_string()]
        );
        assert_eq!(context.get_bean::<Pool>().unwrap().id, 7);
    }

    #[test]
    fn test_bean_event_listener_sees_creation_and_destruction() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let context = ApplicationContext::builder()
            .register(BeanDefinition::builder(|| Ok(Pool { id: 1 })).build())
            .build()
            .unwrap();
        context.add_listener_fn::<dyn BeanEvent, _>("bean-events", move |event: &dyn Event| {
            sink.lock().push(event.event_name().to_string());
            Ok(())
        });

        context.get_bean::<Pool>().unwrap();
        context.close().unwrap();

        assert_eq!(
            *log.lock(),
            vec!["BeanCreatedEvent".to_string(), "BeanDestroyedEvent".to_string()]
        );
    }

    #[test]
    fn test_publish_event_returns_listener_error() {
        let context = ApplicationContext::builder().build().unwrap();
        context.add_listener_fn::<ApplicationStartedEvent, _>("failing", |_: &dyn Event| {
            Err(anyhow::anyhow!("boom"))
        });

        let err = context
            .publish_event(&ApplicationStartedEvent::new("app", Duration::ZERO))
            .unwrap_err();
        assert!(matches!(err, ContainerError::EventListener { .. }));
        assert!(context
            .publish_event(&ApplicationShutdownEvent::new("app"))
            .is_ok());
    }

    struct Recording {
        names: Mutex<Vec<String>>,
    }

    impl BeanPostProcessor for Recording {
        fn post_process_after_initialization(
            &self,
            _bean: &crate::bean::BeanRef,
            definition: &BeanDefinition,
        ) -> anyhow::Result<()> {
            self.names.lock().push(definition.name().to_string());
            Ok(())
        }
    }

    struct Tagging;

    impl BeanPostProcessor for Tagging {
        fn post_process_before_initialization(
            &self,
            bean: &mut (dyn Any + Send + Sync),
            _definition: &BeanDefinition,
        ) -> anyhow::Result<()> {
            if let Some(logger) = bean.downcast_mut::<Logger>() {
                logger.owner.push_str("@tagged");
            }
            Ok(())
        }

        fn order(&self) -> i32 {
            1
        }
    }

    #[test]
    fn test_post_processors_run_around_initialization() {
        let recording = Arc::new(Recording {
            names: Mutex::new(Vec::new()),
        });
        let context = ApplicationContext::builder()
            .bean_post_processor(Arc::clone(&recording) as Arc<dyn BeanPostProcessor>)
            .bean_post_processor(Arc::new(Tagging))
            .register(
                BeanDefinition::builder(|| {
                    Ok(Logger {
                        owner: "app".to_string(),
                    })
                })
                .post_construct(|logger: &mut Logger| {
                    assert!(logger.owner.ends_with("@tagged"));
                    Ok(())
                })
                .build(),
            )
            .build()
            .unwrap();

        assert_eq!(context.get_bean::<Logger>().unwrap().owner, "app@tagged");
        assert_eq!(*recording.names.lock(), vec!["logger".to_string()]);
    }

    #[test]
    fn test_start_fails_on_missing_dependency() {
        let context = ApplicationContext::builder()
            .register(vehicle(InjectionPoint::bean::<dyn Engine>("engine")))
            .build()
            .unwrap();

        let err = context.start().unwrap_err();
        match err {
            ContainerError::DependencyValidationFailed(message) => {
                assert!(message.contains("vehicle"), "{}", message);
                assert!(message.contains("Engine"), "{}", message);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_duplicate_registration_fails_build() {
        let result = ApplicationContext::builder()
            .register(BeanDefinition::builder(|| Ok(NodeA)).named("node").build())
            .register(BeanDefinition::builder(|| Ok(NodeB)).named("node").build())
            .build();
        assert!(matches!(result, Err(ContainerError::BeanAlreadyExists(_))));
    }

    #[test]
    fn test_factory_error_is_wrapped_with_bean_name() {
        let context = ApplicationContext::builder()
            .register(
                BeanDefinition::builder(|| -> anyhow::Result<Pool> { Err(anyhow::anyhow!("no connection")) })
                    .named("pool")
                    .build(),
            )
            .build()
            .unwrap();

        let err = context.get_bean::<Pool>().err().unwrap();
        assert!(matches!(err, ContainerError::BeanInstantiation { ref bean, .. } if bean == "pool"));
        assert!(err.to_string().contains("no connection"));
        assert!(context.get_bean::<Pool>().is_err());
    }
}
