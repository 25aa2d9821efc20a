//! Bean 定义
//!
//! `BeanDefinition` 是一个 Bean 的静态描述：产出类型、暴露的类型、作用域、
//! 限定信息、条件、替换关系、注入点以及生命周期回调。定义在构建阶段由
//! `BeanDefinitionBuilder` 生成，注册后以 `Arc<BeanDefinition>` 形式只读共享。

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;

use crate::annotation::{AnnotationMetadata, AnnotationValue};
use crate::condition::Requirement;
use crate::error::ContainerResult;
use crate::injection::{AnyBox, Arguments, InjectionPoint, Injected};
use crate::resolution::BeanResolutionContext;
use crate::scope::Scope;
use crate::utils::naming::{simple_type_name, to_camel_case};

/// 类型擦除后的 Bean 实例
pub type BeanRef = Arc<dyn Any + Send + Sync>;

/// 运行时类型标识
///
/// 相等性只看 `TypeId`，名称用于诊断和限定符匹配。
#[derive(Clone, Copy)]
pub struct BeanType {
    id: TypeId,
    name: &'static str,
}

impl BeanType {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// 完整类型名
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 去掉模块路径的类型名
    pub fn simple_name(&self) -> &'static str {
        simple_type_name(self.name)
    }
}

impl PartialEq for BeanType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BeanType {}

impl Hash for BeanType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for BeanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Display for BeanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

type CastFn = Arc<dyn Fn(&BeanRef) -> Option<AnyBox> + Send + Sync>;

/// Bean 对外暴露的一个类型以及从实例到该类型的转换
///
/// 转换结果总是装箱的 `Arc<I>`。
#[derive(Clone)]
pub struct Exposure {
    bean_type: BeanType,
    cast: CastFn,
}

impl Exposure {
    /// 把 `Arc<S>` 暴露为 `Arc<I>`
    pub fn of<S, I, F>(convert: F) -> Self
    where
        S: Send + Sync + 'static,
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<S>) -> Arc<I> + Send + Sync + 'static,
    {
        Self {
            bean_type: BeanType::of::<I>(),
            cast: Arc::new(move |bean: &BeanRef| {
                Arc::clone(bean)
                    .downcast::<S>()
                    .ok()
                    .map(|concrete| Box::new(convert(concrete)) as AnyBox)
            }),
        }
    }

    /// 以自身类型暴露
    pub fn itself<S: Send + Sync + 'static>() -> Self {
        Self::of::<S, S, _>(|bean| bean)
    }

    pub fn bean_type(&self) -> BeanType {
        self.bean_type
    }

    /// 实例不是此转换的源类型时返回 `None`
    pub fn cast(&self, bean: &BeanRef) -> Option<AnyBox> {
        (self.cast)(bean)
    }
}

impl fmt::Debug for Exposure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exposure({})", self.bean_type)
    }
}

/// 替换关系：此定义生效时，被匹配的定义不再作为候选者
///
/// 给出的条件必须全部满足。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replaces {
    bean_type: Option<BeanType>,
    name: Option<String>,
    factory: Option<String>,
}

impl Replaces {
    pub fn bean<T: ?Sized + 'static>() -> Self {
        Self {
            bean_type: Some(BeanType::of::<T>()),
            ..Self::default()
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn factory(factory: impl Into<String>) -> Self {
        Self {
            factory: Some(factory.into()),
            ..Self::default()
        }
    }

    /// 追加名称条件
    pub fn and_named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 追加工厂条件
    pub fn and_factory(mut self, factory: impl Into<String>) -> Self {
        self.factory = Some(factory.into());
        self
    }

    /// 判断候选定义是否被替换
    pub fn matches(&self, candidate: &BeanDefinition) -> bool {
        if self.bean_type.is_none() && self.name.is_none() && self.factory.is_none() {
            return false;
        }
        if let Some(bean_type) = &self.bean_type {
            if !candidate.exposes(bean_type) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            let by_name = candidate.name() == name
                || candidate.qualifier_name().map_or(false, |q| q == name);
            if !by_name {
                return false;
            }
        }
        if let Some(factory) = &self.factory {
            if candidate.factory() != Some(factory.as_str()) {
                return false;
            }
        }
        true
    }
}

/// 拦截器绑定的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterceptorKind {
    /// 环绕通知，最终调用目标方法
    Around,
    /// 引介通知，没有目标，由拦截器提供实现
    Introduction,
}

/// 拦截器绑定：绑定注解名称 + 种类
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterceptorBinding {
    annotation: String,
    kind: InterceptorKind,
}

impl InterceptorBinding {
    pub fn around(annotation: impl Into<String>) -> Self {
        Self {
            annotation: annotation.into(),
            kind: InterceptorKind::Around,
        }
    }

    pub fn introduction(annotation: impl Into<String>) -> Self {
        Self {
            annotation: annotation.into(),
            kind: InterceptorKind::Introduction,
        }
    }

    pub fn annotation(&self) -> &str {
        &self.annotation
    }

    pub fn kind(&self) -> InterceptorKind {
        self.kind
    }
}

type ConstructorFn = Arc<dyn Fn(&mut Arguments) -> anyhow::Result<AnyBox> + Send + Sync>;
type FieldFn = Arc<dyn Fn(&mut (dyn Any + Send + Sync), Injected) -> anyhow::Result<()> + Send + Sync>;
type MethodFn =
    Arc<dyn Fn(&mut (dyn Any + Send + Sync), &mut Arguments) -> anyhow::Result<()> + Send + Sync>;
type PostConstructFn = Arc<dyn Fn(&mut (dyn Any + Send + Sync)) -> anyhow::Result<()> + Send + Sync>;
type PreDestroyFn = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> anyhow::Result<()> + Send + Sync>;

/// 代理工厂：拿到初始化完成的目标实例，返回代理实例
///
/// 解析上下文用于查找拦截器 Bean，与目标 Bean 共享同一条解析路径。
pub type ProxyFactory =
    Arc<dyn Fn(&BeanRef, &mut BeanResolutionContext<'_>) -> ContainerResult<BeanRef> + Send + Sync>;

/// 字段注入
#[derive(Clone)]
pub(crate) struct FieldInjection {
    pub(crate) point: InjectionPoint,
    pub(crate) apply: FieldFn,
}

/// 方法注入
#[derive(Clone)]
pub(crate) struct MethodInjection {
    pub(crate) name: String,
    pub(crate) points: Vec<InjectionPoint>,
    pub(crate) apply: MethodFn,
}

/// Bean 定义
pub struct BeanDefinition {
    pub(crate) name: String,
    pub(crate) bean_type: BeanType,
    pub(crate) exposures: Vec<Exposure>,
    pub(crate) scope: Scope,
    pub(crate) qualifier_name: Option<String>,
    pub(crate) annotations: AnnotationMetadata,
    pub(crate) primary: bool,
    pub(crate) order: i32,
    pub(crate) eager: bool,
    pub(crate) requirements: Vec<Requirement>,
    pub(crate) replaces: Vec<Replaces>,
    pub(crate) factory: Option<String>,
    pub(crate) constructor_points: Vec<InjectionPoint>,
    pub(crate) constructor: ConstructorFn,
    pub(crate) fields: Vec<FieldInjection>,
    pub(crate) methods: Vec<MethodInjection>,
    pub(crate) post_construct: Vec<PostConstructFn>,
    pub(crate) pre_destroy: Vec<PreDestroyFn>,
    pub(crate) interceptor_bindings: Vec<InterceptorBinding>,
    pub(crate) proxy_factory: Option<ProxyFactory>,
    /// 注册顺序，由注册表填写
    pub(crate) index: usize,
}

impl BeanDefinition {
    /// 无依赖的 Bean
    pub fn builder<T, F>(factory: F) -> BeanDefinitionBuilder<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::constructed(Vec::new(), move |_: &mut Arguments| factory())
    }

    /// 构造函数注入的 Bean：`points` 按参数顺序解析后交给 `factory`
    pub fn constructed<T, F>(points: Vec<InjectionPoint>, factory: F) -> BeanDefinitionBuilder<T>
    where
        T: Send + Sync + 'static,
        F: Fn(&mut Arguments) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        BeanDefinitionBuilder::new(points, factory)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 产出类型
    pub fn bean_type(&self) -> BeanType {
        self.bean_type
    }

    pub fn exposed_types(&self) -> impl Iterator<Item = BeanType> + '_ {
        self.exposures.iter().map(Exposure::bean_type)
    }

    /// 是否可以作为 `bean_type` 被注入
    pub fn exposes(&self, bean_type: &BeanType) -> bool {
        self.exposures.iter().any(|e| &e.bean_type == bean_type)
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// `@Named` 限定值
    pub fn qualifier_name(&self) -> Option<&str> {
        self.qualifier_name.as_deref()
    }

    pub fn annotations(&self) -> &AnnotationMetadata {
        &self.annotations
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn is_eager(&self) -> bool {
        self.eager
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn replaces(&self) -> &[Replaces] {
        &self.replaces
    }

    /// 声明此 Bean 的工厂名称
    pub fn factory(&self) -> Option<&str> {
        self.factory.as_deref()
    }

    pub fn interceptor_bindings(&self) -> &[InterceptorBinding] {
        &self.interceptor_bindings
    }

    pub fn is_proxied(&self) -> bool {
        self.proxy_factory.is_some()
    }

    /// 注册顺序
    pub fn index(&self) -> usize {
        self.index
    }

    /// 所有注入点：构造参数、字段、注入方法参数
    pub fn injection_points(&self) -> impl Iterator<Item = &InjectionPoint> + '_ {
        self.constructor_points
            .iter()
            .chain(self.fields.iter().map(|f| &f.point))
            .chain(self.methods.iter().flat_map(|m| m.points.iter()))
    }

    /// 依次尝试代理与目标，把实例转换为 `bean_type`
    pub(crate) fn cast(
        &self,
        target: &BeanRef,
        proxy: Option<&BeanRef>,
        bean_type: &BeanType,
    ) -> Option<AnyBox> {
        let matching = || self.exposures.iter().filter(move |e| &e.bean_type == bean_type);
        if let Some(proxy) = proxy {
            if let Some(value) = matching().find_map(|e| e.cast(proxy)) {
                return Some(value);
            }
        }
        matching().find_map(|e| e.cast(target))
    }

    pub(crate) fn run_pre_destroy(&self, target: &BeanRef) -> anyhow::Result<()> {
        for callback in &self.pre_destroy {
            callback(&**target)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("name", &self.name)
            .field("bean_type", &self.bean_type)
            .field("scope", &self.scope)
            .field("qualifier_name", &self.qualifier_name)
            .field("primary", &self.primary)
            .field("order", &self.order)
            .field("requirements", &self.requirements)
            .field("proxied", &self.proxy_factory.is_some())
            .finish()
    }
}

impl fmt::Display for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.bean_type.simple_name())
    }
}

fn downcast_mut<'a, T: 'static>(bean: &'a mut (dyn Any + Send + Sync)) -> anyhow::Result<&'a mut T> {
    bean.downcast_mut::<T>()
        .ok_or_else(|| anyhow!("Bean instance is not a {}", std::any::type_name::<T>()))
}

/// `BeanDefinition` 构建器
///
/// ```rust,ignore
/// let definition = BeanDefinition::constructed(
///     vec![InjectionPoint::bean::<dyn Engine>("engine").named("v8")],
///     |args| Ok(Vehicle { engine: args.bean::<dyn Engine>(0)? }),
/// )
/// .exposes(|v: Arc<Vehicle>| v as Arc<dyn Drivable>)
/// .pre_destroy(|v: &Vehicle| v.park())
/// .build();
/// ```
pub struct BeanDefinitionBuilder<T> {
    definition: BeanDefinition,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> BeanDefinitionBuilder<T> {
    fn new<F>(points: Vec<InjectionPoint>, factory: F) -> Self
    where
        F: Fn(&mut Arguments) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let bean_type = BeanType::of::<T>();
        Self {
            definition: BeanDefinition {
                name: String::new(),
                bean_type,
                exposures: vec![Exposure::itself::<T>()],
                scope: Scope::Singleton,
                qualifier_name: None,
                annotations: AnnotationMetadata::new(),
                primary: false,
                order: 0,
                eager: false,
                requirements: Vec::new(),
                replaces: Vec::new(),
                factory: None,
                constructor_points: points,
                constructor: Arc::new(move |args: &mut Arguments| {
                    factory(args).map(|bean| Box::new(bean) as AnyBox)
                }),
                fields: Vec::new(),
                methods: Vec::new(),
                post_construct: Vec::new(),
                pre_destroy: Vec::new(),
                interceptor_bindings: Vec::new(),
                proxy_factory: None,
                index: 0,
            },
            _marker: PhantomData,
        }
    }

    /// 设置 `@Named` 限定值，同时作为 Bean 名称
    pub fn named(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.definition.name = name.clone();
        self.definition.qualifier_name = Some(name);
        self
    }

    /// 只设置 Bean 名称（唯一标识），不作为限定值
    pub fn id(mut self, name: impl Into<String>) -> Self {
        self.definition.name = name.into();
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.definition.scope = scope;
        self
    }

    pub fn prototype(self) -> Self {
        self.scope(Scope::Prototype)
    }

    pub fn primary(mut self) -> Self {
        self.definition.primary = true;
        self
    }

    /// 排序值，越小越靠前
    pub fn order(mut self, order: i32) -> Self {
        self.definition.order = order;
        self
    }

    /// 上下文启动时立即创建
    pub fn eager(mut self) -> Self {
        self.definition.eager = true;
        self
    }

    pub fn requires(mut self, requirement: Requirement) -> Self {
        self.definition.requirements.push(requirement);
        self
    }

    pub fn replaces(mut self, replaces: Replaces) -> Self {
        self.definition.replaces.push(replaces);
        self
    }

    /// 记录声明此 Bean 的工厂
    pub fn declared_by(mut self, factory: impl Into<String>) -> Self {
        self.definition.factory = Some(factory.into());
        self
    }

    pub fn annotate(mut self, annotation: AnnotationValue) -> Self {
        self.definition.annotations.add(annotation);
        self
    }

    /// 以另一个类型（通常是 trait object）暴露此 Bean
    pub fn exposes<I, F>(mut self, convert: F) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static,
    {
        self.definition.exposures.push(Exposure::of::<T, I, F>(convert));
        self
    }

    /// 添加任意暴露，代理类型的暴露也通过它注册
    pub fn expose(mut self, exposure: Exposure) -> Self {
        self.definition.exposures.push(exposure);
        self
    }

    /// 字段注入，在构造之后、方法注入之前执行
    pub fn inject_field<F>(mut self, point: InjectionPoint, apply: F) -> Self
    where
        F: Fn(&mut T, Injected) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.definition.fields.push(FieldInjection {
            point,
            apply: Arc::new(move |bean: &mut (dyn Any + Send + Sync), value: Injected| {
                apply(downcast_mut::<T>(bean)?, value)
            }),
        });
        self
    }

    /// 方法注入，按声明顺序在字段注入之后执行
    pub fn inject_method<F>(mut self, name: impl Into<String>, points: Vec<InjectionPoint>, apply: F) -> Self
    where
        F: Fn(&mut T, &mut Arguments) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.definition.methods.push(MethodInjection {
            name: name.into(),
            points,
            apply: Arc::new(move |bean: &mut (dyn Any + Send + Sync), args: &mut Arguments| {
                apply(downcast_mut::<T>(bean)?, args)
            }),
        });
        self
    }

    /// 注入完成后调用
    pub fn post_construct<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.definition
            .post_construct
            .push(Arc::new(move |bean: &mut (dyn Any + Send + Sync)| {
                callback(downcast_mut::<T>(bean)?)
            }));
        self
    }

    /// 作用域关闭或显式销毁时调用
    pub fn pre_destroy<F>(mut self, callback: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.definition.pre_destroy.push(Arc::new(move |bean: &(dyn Any + Send + Sync)| {
            let bean = bean
                .downcast_ref::<T>()
                .ok_or_else(|| anyhow!("Bean instance is not a {}", std::any::type_name::<T>()))?;
            callback(bean)
        }));
        self
    }

    /// 设置代理工厂及其拦截器绑定
    pub fn proxy_factory(mut self, bindings: Vec<InterceptorBinding>, factory: ProxyFactory) -> Self {
        self.definition.interceptor_bindings = bindings;
        self.definition.proxy_factory = Some(factory);
        self
    }

    pub fn build(mut self) -> BeanDefinition {
        if self.definition.name.is_empty() {
            self.definition.name = to_camel_case(self.definition.bean_type.simple_name());
        }
        let name = self.definition.name.clone();
        for point in &mut self.definition.constructor_points {
            point.declared_by(&name);
        }
        for field in &mut self.definition.fields {
            field.point.declared_by(&name);
        }
        for method in &mut self.definition.methods {
            for point in &mut method.points {
                point.declared_by(&name);
            }
        }
        self.definition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct EnglishGreeter;

    impl Greeter for EnglishGreeter {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    #[test]
    fn test_default_name_and_exposures() {
        let definition = BeanDefinition::builder(|| Ok(EnglishGreeter))
            .exposes(|g: Arc<EnglishGreeter>| g as Arc<dyn Greeter>)
            .build();

        assert_eq!(definition.name(), "englishGreeter");
        assert_eq!(definition.bean_type().simple_name(), "EnglishGreeter");
        assert!(definition.exposes(&BeanType::of::<EnglishGreeter>()));
        assert!(definition.exposes(&BeanType::of::<dyn Greeter>()));
        assert!(definition.qualifier_name().is_none());
        assert_eq!(definition.scope(), &Scope::Singleton);
    }

    #[test]
    fn test_cast_to_trait_object() {
        let definition = BeanDefinition::builder(|| Ok(EnglishGreeter))
            .exposes(|g: Arc<EnglishGreeter>| g as Arc<dyn Greeter>)
            .build();
        let target: BeanRef = Arc::new(EnglishGreeter);

        let boxed = definition
            .cast(&target, None, &BeanType::of::<dyn Greeter>())
            .expect("exposed as Greeter");
        let greeter = boxed.downcast::<Arc<dyn Greeter>>().expect("Arc<dyn Greeter>");
        assert_eq!(greeter.greet(), "hello");

        assert!(definition.cast(&target, None, &BeanType::of::<String>()).is_none());
    }

    #[test]
    fn test_named_sets_name_and_qualifier() {
        let definition = BeanDefinition::builder(|| Ok(EnglishGreeter)).named("en").build();
        assert_eq!(definition.name(), "en");
        assert_eq!(definition.qualifier_name(), Some("en"));
    }

    #[test]
    fn test_replaces_requires_all_criteria() {
        let original = BeanDefinition::builder(|| Ok(EnglishGreeter))
            .named("en")
            .declared_by("greeterFactory")
            .build();

        assert!(Replaces::bean::<EnglishGreeter>().matches(&original));
        assert!(Replaces::named("en").matches(&original));
        assert!(Replaces::factory("greeterFactory").matches(&original));
        assert!(Replaces::bean::<EnglishGreeter>().and_named("en").matches(&original));
        assert!(!Replaces::bean::<EnglishGreeter>().and_named("fr").matches(&original));
        assert!(!Replaces::default().matches(&original));
    }

    #[test]
    fn test_pre_destroy_sees_concrete_type() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let definition = BeanDefinition::builder(|| Ok(EnglishGreeter))
            .pre_destroy(move |g: &EnglishGreeter| {
                assert_eq!(g.greet(), "hello");
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .build();

        let target: BeanRef = Arc::new(EnglishGreeter);
        definition.run_pre_destroy(&target).unwrap();
        assert!(called.load(Ordering::SeqCst));
    }
}
