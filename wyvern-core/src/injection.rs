//! 注入点
//!
//! 注入点描述依赖被消费的位置：构造参数、字段或注入方法的参数。
//! 每个注入点在创建时就单态化出一个打包函数，把解析结果装成
//! `Arc<I>` / `Option<Arc<I>>` / `Vec<Arc<I>>` / `BeanProvider<I>`，
//! 因此 Bean 的工厂闭包拿到的都是强类型的值。

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;

use crate::annotation::{AnnotationMetadata, AnnotationValue};
use crate::bean::BeanType;
use crate::provider::{BeanProvider, ProviderSeed};
use crate::qualifier::Qualifier;

/// 类型擦除后的值
pub type AnyBox = Box<dyn Any + Send + Sync>;

/// 注入的基数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// 恰好一个，缺失即错误
    One,
    /// 零或一个
    Optional,
    /// 全部候选者，按 order 排序
    Many,
    /// 延迟查找
    Provider,
}

/// 解析器产出的未打包结果
pub(crate) enum Resolved {
    One(AnyBox),
    Optional(Option<AnyBox>),
    Many(Vec<AnyBox>),
    Provider(ProviderSeed),
}

type PackFn = fn(Resolved) -> AnyBox;

/// 依赖被消费的位置
#[derive(Clone)]
pub struct InjectionPoint {
    name: String,
    declaring_bean: Option<String>,
    bean_type: BeanType,
    qualifier: Option<Qualifier>,
    cardinality: Cardinality,
    annotations: AnnotationMetadata,
    pack: PackFn,
}

impl InjectionPoint {
    fn new<I>(name: impl Into<String>, cardinality: Cardinality) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            declaring_bean: None,
            bean_type: BeanType::of::<I>(),
            qualifier: None,
            cardinality,
            annotations: AnnotationMetadata::new(),
            pack: pack::<I>,
        }
    }

    /// 必需的单个依赖，注入为 `Arc<I>`
    pub fn bean<I>(name: impl Into<String>) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        Self::new::<I>(name, Cardinality::One)
    }

    /// 可选依赖，注入为 `Option<Arc<I>>`
    pub fn optional<I>(name: impl Into<String>) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        Self::new::<I>(name, Cardinality::Optional)
    }

    /// 集合依赖，注入为 `Vec<Arc<I>>`
    pub fn all<I>(name: impl Into<String>) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        Self::new::<I>(name, Cardinality::Many)
    }

    /// 延迟依赖，注入为 `BeanProvider<I>`
    pub fn provider<I>(name: impl Into<String>) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        Self::new::<I>(name, Cardinality::Provider)
    }

    /// 设置限定符
    pub fn qualified(mut self, qualifier: Qualifier) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    /// `@Named` 限定符的简写
    pub fn named(self, name: impl Into<String>) -> Self {
        self.qualified(Qualifier::named(name))
    }

    /// 为注入点添加注解
    pub fn annotate(mut self, annotation: AnnotationValue) -> Self {
        self.annotations.add(annotation);
        self
    }

    pub(crate) fn declared_by(&mut self, bean: &str) {
        self.declaring_bean = Some(bean.to_string());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 声明此注入点的 Bean 名称
    pub fn declaring_bean(&self) -> Option<&str> {
        self.declaring_bean.as_deref()
    }

    pub fn bean_type(&self) -> BeanType {
        self.bean_type
    }

    pub fn qualifier(&self) -> Option<&Qualifier> {
        self.qualifier.as_ref()
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn annotations(&self) -> &AnnotationMetadata {
        &self.annotations
    }

    pub(crate) fn pack(&self, resolved: Resolved) -> Injected {
        Injected {
            point: self.name.clone(),
            value: (self.pack)(resolved),
        }
    }
}

impl fmt::Debug for InjectionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionPoint")
            .field("name", &self.name)
            .field("declaring_bean", &self.declaring_bean)
            .field("bean_type", &self.bean_type)
            .field("qualifier", &self.qualifier)
            .field("cardinality", &self.cardinality)
            .finish()
    }
}

impl fmt::Display for InjectionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.declaring_bean {
            Some(bean) => write!(f, "{}.{}", bean, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

fn unbox<I: ?Sized + Send + Sync + 'static>(value: AnyBox) -> Option<Arc<I>> {
    value.downcast::<Arc<I>>().ok().map(|b| *b)
}

fn pack<I: ?Sized + Send + Sync + 'static>(resolved: Resolved) -> AnyBox {
    match resolved {
        Resolved::One(value) => value,
        Resolved::Optional(value) => Box::new(value.and_then(unbox::<I>)),
        Resolved::Many(values) => {
            Box::new(values.into_iter().filter_map(unbox::<I>).collect::<Vec<Arc<I>>>())
        }
        Resolved::Provider(seed) => Box::new(BeanProvider::<I>::new(seed)),
    }
}

/// 单个已解析的注入值
pub struct Injected {
    point: String,
    value: AnyBox,
}

impl Injected {
    /// 按具体类型取出
    pub fn into_value<V: Send + Sync + 'static>(self) -> anyhow::Result<V> {
        let point = self.point;
        self.value.downcast::<V>().map(|b| *b).map_err(|_| {
            anyhow!(
                "Injection point '{}' does not hold a value of type {}",
                point,
                std::any::type_name::<V>()
            )
        })
    }

    pub fn into_bean<I: ?Sized + Send + Sync + 'static>(self) -> anyhow::Result<Arc<I>> {
        self.into_value::<Arc<I>>()
    }

    pub fn into_optional<I: ?Sized + Send + Sync + 'static>(self) -> anyhow::Result<Option<Arc<I>>> {
        self.into_value::<Option<Arc<I>>>()
    }

    pub fn into_all<I: ?Sized + Send + Sync + 'static>(self) -> anyhow::Result<Vec<Arc<I>>> {
        self.into_value::<Vec<Arc<I>>>()
    }

    pub fn into_provider<I: ?Sized + Send + Sync + 'static>(self) -> anyhow::Result<BeanProvider<I>> {
        self.into_value::<BeanProvider<I>>()
    }
}

/// 构造函数或注入方法的实参
///
/// 按注入点声明顺序存放，每个位置只能取一次。
pub struct Arguments {
    values: Vec<Option<Injected>>,
    injection_point: Option<InjectionPoint>,
}

impl Arguments {
    pub(crate) fn new(values: Vec<Injected>, injection_point: Option<InjectionPoint>) -> Self {
        Self {
            values: values.into_iter().map(Some).collect(),
            injection_point,
        }
    }

    fn take(&mut self, index: usize) -> anyhow::Result<Injected> {
        self.values
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| anyhow!("Argument {} is missing or was already taken", index))
    }

    pub fn value<V: Send + Sync + 'static>(&mut self, index: usize) -> anyhow::Result<V> {
        self.take(index)?.into_value::<V>()
    }

    pub fn bean<I: ?Sized + Send + Sync + 'static>(&mut self, index: usize) -> anyhow::Result<Arc<I>> {
        self.take(index)?.into_bean::<I>()
    }

    pub fn optional<I: ?Sized + Send + Sync + 'static>(
        &mut self,
        index: usize,
    ) -> anyhow::Result<Option<Arc<I>>> {
        self.take(index)?.into_optional::<I>()
    }

    pub fn all<I: ?Sized + Send + Sync + 'static>(&mut self, index: usize) -> anyhow::Result<Vec<Arc<I>>> {
        self.take(index)?.into_all::<I>()
    }

    pub fn provider<I: ?Sized + Send + Sync + 'static>(
        &mut self,
        index: usize,
    ) -> anyhow::Result<BeanProvider<I>> {
        self.take(index)?.into_provider::<I>()
    }

    /// 当前 Bean 被注入到的位置
    ///
    /// 直接通过上下文查找时为 `None`。上下文相关的工厂用它读取外层注解。
    pub fn injection_point(&self) -> Option<&InjectionPoint> {
        self.injection_point.as_ref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
