//! 依赖解析与 Bean 构造
//!
//! 查找流程：候选者 → 条件过滤与替换 → 限定符选择 → 作用域缓存或构造。
//! 构造流程：构造参数（深度优先）→ 构造函数 → 字段注入 → 方法注入 →
//! 后置处理器（初始化前）→ post-construct → 代理 → 后置处理器（初始化后）。

use std::sync::Arc;

use crate::bean::{BeanDefinition, BeanRef, BeanType};
use crate::condition::EvaluationState;
use crate::error::{ContainerError, ContainerResult, DisabledCandidate};
use crate::injection::{AnyBox, Arguments, Cardinality, Injected, InjectionPoint, Resolved};
use crate::provider::ProviderSeed;
use crate::qualifier::{select, sort_by_order, Qualifier, Selection};
use crate::resolution::{BeanResolutionContext, PathSegment};
use crate::scope::{BeanIdentifier, CreatedBean, Scope, ScopeMap};

/// 把装箱的 `Arc<T>` 取出
pub(crate) fn downcast_bean<T>(value: AnyBox, bean: &str) -> ContainerResult<Arc<T>>
where
    T: ?Sized + Send + Sync + 'static,
{
    value
        .downcast::<Arc<T>>()
        .map(|boxed| *boxed)
        .map_err(|_| ContainerError::TypeMismatch {
            bean: bean.to_string(),
            expected: std::any::type_name::<T>().to_string(),
        })
}

impl<'a> BeanResolutionContext<'a> {
    /// 条件通过且未被替换的候选者，按注册顺序
    pub(crate) fn eligible(&self, bean_type: BeanType) -> ContainerResult<Vec<Arc<BeanDefinition>>> {
        let mut state = EvaluationState::default();
        self.context
            .conditions()
            .eligible_candidates(self.context, bean_type, &mut state)
    }

    /// 经限定符过滤并按 order 排序的候选者
    pub(crate) fn ordered_candidates(
        &self,
        bean_type: BeanType,
        qualifier: Option<&Qualifier>,
    ) -> ContainerResult<Vec<Arc<BeanDefinition>>> {
        let mut candidates = self.eligible(bean_type)?;
        if let Some(qualifier) = qualifier {
            candidates = qualifier.reduce(candidates);
        }
        sort_by_order(&mut candidates);
        Ok(candidates)
    }

    /// 选出唯一定义；没有候选者时返回 `None`，歧义时报错
    pub(crate) fn select_definition(
        &self,
        bean_type: BeanType,
        qualifier: Option<&Qualifier>,
    ) -> ContainerResult<Option<Arc<BeanDefinition>>> {
        match select(self.eligible(bean_type)?, qualifier) {
            Selection::Unique(definition) => Ok(Some(definition)),
            Selection::Unsatisfied => Ok(None),
            Selection::Ambiguous(mut candidates) => {
                sort_by_order(&mut candidates);
                Err(ContainerError::NonUniqueBean {
                    bean_type: bean_type.name().to_string(),
                    candidates: candidates.iter().map(|d| d.name().to_string()).collect(),
                    path: self.path(),
                })
            }
        }
    }

    fn disabled_candidates(&self, bean_type: BeanType) -> ContainerResult<Vec<DisabledCandidate>> {
        let active = self.eligible(bean_type)?;
        let mut state = EvaluationState::default();
        let mut disabled = Vec::new();
        for definition in self.context.registry().definitions_for(&bean_type) {
            if active.iter().any(|a| Arc::ptr_eq(a, definition)) {
                continue;
            }
            let outcome = self
                .context
                .conditions()
                .outcome(self.context, definition, &mut state)?;
            let reasons = if outcome.eligible {
                vec!["Replaced by another bean".to_string()]
            } else {
                outcome.reasons
            };
            disabled.push(DisabledCandidate {
                bean: definition.name().to_string(),
                reasons,
            });
        }
        Ok(disabled)
    }

    pub(crate) fn no_such_bean(&self, bean_type: BeanType, qualifier: Option<&Qualifier>) -> ContainerError {
        match self.disabled_candidates(bean_type) {
            Ok(disabled) => ContainerError::NoSuchBean {
                bean_type: bean_type.name().to_string(),
                qualifier: qualifier.map(|q| q.to_string()),
                path: self.path(),
                disabled,
            },
            Err(e) => e,
        }
    }

    /// 解析唯一 Bean，结果为装箱的 `Arc<I>`
    pub(crate) fn resolve_one(
        &mut self,
        bean_type: BeanType,
        qualifier: Option<&Qualifier>,
    ) -> ContainerResult<AnyBox> {
        tracing::trace!("Resolving bean of type [{}]", bean_type.simple_name());
        let definition = self
            .select_definition(bean_type, qualifier)?
            .ok_or_else(|| self.no_such_bean(bean_type, qualifier))?;
        self.instance_as(&definition, &bean_type)
    }

    /// 没有候选者时返回 `None`；歧义仍是错误
    pub(crate) fn resolve_optional(
        &mut self,
        bean_type: BeanType,
        qualifier: Option<&Qualifier>,
    ) -> ContainerResult<Option<AnyBox>> {
        match self.select_definition(bean_type, qualifier)? {
            Some(definition) => self.instance_as(&definition, &bean_type).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn resolve_all(
        &mut self,
        bean_type: BeanType,
        qualifier: Option<&Qualifier>,
    ) -> ContainerResult<Vec<AnyBox>> {
        let candidates = self.ordered_candidates(bean_type, qualifier)?;
        let mut values = Vec::with_capacity(candidates.len());
        for definition in candidates {
            values.push(self.instance_as(&definition, &bean_type)?);
        }
        Ok(values)
    }

    /// 取得定义的实例并转换为 `bean_type`
    pub(crate) fn instance_as(
        &mut self,
        definition: &Arc<BeanDefinition>,
        bean_type: &BeanType,
    ) -> ContainerResult<AnyBox> {
        let created = self.get_created(definition)?;
        created.cast(bean_type).ok_or_else(|| ContainerError::TypeMismatch {
            bean: definition.name().to_string(),
            expected: bean_type.name().to_string(),
        })
    }

    /// 按作用域取得或构造实例，并记录为当前 Bean 的依赖
    pub(crate) fn get_created(&mut self, definition: &Arc<BeanDefinition>) -> ContainerResult<Arc<CreatedBean>> {
        if let Some(position) = self
            .path
            .iter()
            .position(|segment| Arc::ptr_eq(&segment.definition, definition))
        {
            let mut cycle: Vec<String> = self.path[position..].iter().map(PathSegment::to_string).collect();
            cycle.push(definition.name().to_string());
            return Err(ContainerError::CircularDependency { path: cycle });
        }

        let context = self.context;
        match definition.scope() {
            Scope::Singleton => self.get_scoped(context.singletons(), definition),
            Scope::Prototype => {
                let identifier = BeanIdentifier::for_definition(definition, 0);
                let created = Arc::new(self.create(definition, identifier)?);
                context.bean_created(&created);
                // 原型不被跟踪，其依赖计入所有者
                if let Some(frame) = self.frames.last_mut() {
                    frame.extend(created.dependencies().iter().cloned());
                }
                Ok(created)
            }
            Scope::Custom(name) => {
                let scope = context
                    .custom_scope(name)
                    .ok_or_else(|| ContainerError::UnknownScope(name.clone()))?;
                let no_active_scope = || ContainerError::NoActiveScope {
                    scope: name.clone(),
                    bean: definition.name().to_string(),
                };
                let id = self.active_scope(name).cloned().ok_or_else(no_active_scope)?;
                // 已结束的句柄不会重新创建 map
                let map = scope.scope_map(&id)?.ok_or_else(no_active_scope)?;
                self.get_scoped(&map, definition)
            }
        }
    }

    fn get_scoped(&mut self, map: &ScopeMap, definition: &Arc<BeanDefinition>) -> ContainerResult<Arc<CreatedBean>> {
        let identifier = BeanIdentifier::for_definition(definition, map.discriminator());
        let (created, created_now) =
            map.get_or_create(&identifier, || self.create(definition, identifier.clone()))?;
        if created_now {
            self.context.bean_created(&created);
        } else {
            tracing::trace!("Using cached bean '{}' from scope '{}'", definition.name(), map.name());
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.push(identifier);
        }
        Ok(created)
    }

    /// 构造一个新实例，不做缓存
    pub(crate) fn create(
        &mut self,
        definition: &Arc<BeanDefinition>,
        identifier: BeanIdentifier,
    ) -> ContainerResult<CreatedBean> {
        let injected_into = self.pending_point.take();
        self.path.push(PathSegment {
            definition: Arc::clone(definition),
            point: None,
        });
        self.frames.push(Vec::new());

        let result = self.instantiate(definition, injected_into);

        let dependencies = self.frames.pop().unwrap_or_default();
        self.path.pop();
        let (target, proxy) = result?;

        tracing::debug!(
            "Created bean '{}' (scope: {}, {} dependencies)",
            definition.name(),
            definition.scope(),
            dependencies.len()
        );
        Ok(CreatedBean::new(
            identifier,
            Arc::clone(definition),
            target,
            proxy,
            dependencies,
        ))
    }

    fn instantiate(
        &mut self,
        definition: &Arc<BeanDefinition>,
        injected_into: Option<InjectionPoint>,
    ) -> ContainerResult<(BeanRef, Option<BeanRef>)> {
        let mut values = Vec::with_capacity(definition.constructor_points.len());
        for point in &definition.constructor_points {
            values.push(self.resolve_point(point)?);
        }
        let mut arguments = Arguments::new(values, injected_into);
        let mut instance = (definition.constructor)(&mut arguments)
            .map_err(|e| self.instantiation_error(definition, e))?;

        for field in &definition.fields {
            let value = self.resolve_point(&field.point)?;
            (field.apply)(&mut *instance, value).map_err(|e| {
                let e = e.context(format!("field injection '{}' failed", field.point.name()));
                self.instantiation_error(definition, e)
            })?;
        }

        for method in &definition.methods {
            let mut values = Vec::with_capacity(method.points.len());
            for point in &method.points {
                values.push(self.resolve_point(point)?);
            }
            let mut arguments = Arguments::new(values, None);
            (method.apply)(&mut *instance, &mut arguments).map_err(|e| {
                let e = e.context(format!("injection method '{}' failed", method.name));
                self.instantiation_error(definition, e)
            })?;
        }

        let context = self.context;
        let processors = context.post_processors();
        for processor in processors {
            processor
                .post_process_before_initialization(&mut *instance, definition)
                .map_err(|e| self.instantiation_error(definition, e))?;
        }

        for callback in &definition.post_construct {
            callback(&mut *instance).map_err(|e| {
                let e = e.context("post-construct callback failed");
                self.instantiation_error(definition, e)
            })?;
        }

        let target: BeanRef = Arc::from(instance);
        let proxy = match &definition.proxy_factory {
            Some(factory) => Some(factory(&target, self)?),
            None => None,
        };

        let exposed = proxy.as_ref().unwrap_or(&target);
        for processor in processors {
            processor
                .post_process_after_initialization(exposed, definition)
                .map_err(|e| self.instantiation_error(definition, e))?;
        }

        Ok((target, proxy))
    }

    fn instantiation_error(&self, definition: &BeanDefinition, source: anyhow::Error) -> ContainerError {
        ContainerError::BeanInstantiation {
            bean: definition.name().to_string(),
            path: self.path(),
            source,
        }
    }

    /// 解析一个注入点并按其基数打包
    pub(crate) fn resolve_point(&mut self, point: &InjectionPoint) -> ContainerResult<Injected> {
        if let Some(segment) = self.path.last_mut() {
            segment.point = Some(point.name().to_string());
        }
        let result = self.resolve_point_value(point);
        if let Some(segment) = self.path.last_mut() {
            segment.point = None;
        }
        self.pending_point = None;
        result.map(|resolved| point.pack(resolved))
    }

    fn resolve_point_value(&mut self, point: &InjectionPoint) -> ContainerResult<Resolved> {
        let bean_type = point.bean_type();
        let qualifier = point.qualifier();
        match point.cardinality() {
            Cardinality::One => {
                self.pending_point = Some(point.clone());
                self.resolve_one(bean_type, qualifier).map(Resolved::One)
            }
            Cardinality::Optional => {
                self.pending_point = Some(point.clone());
                self.resolve_optional(bean_type, qualifier)
                    .map(Resolved::Optional)
            }
            Cardinality::Many => {
                let candidates = self.ordered_candidates(bean_type, qualifier)?;
                let mut values = Vec::with_capacity(candidates.len());
                for definition in candidates {
                    self.pending_point = Some(point.clone());
                    values.push(self.instance_as(&definition, &bean_type)?);
                }
                Ok(Resolved::Many(values))
            }
            Cardinality::Provider => Ok(Resolved::Provider(ProviderSeed {
                context: self.context.downgrade(),
                bean_type,
                qualifier: qualifier.cloned(),
                scopes: self.scopes.clone(),
            })),
        }
    }
}
