// wyvern-core: 编译期元数据驱动的依赖注入容器
//
// 提供类型安全的依赖注入功能，支持：
// - 单例、原型和命名的自定义作用域
// - 构造函数、字段和方法注入，可选 / 集合 / 延迟注入
// - 条件装配（类型、Bean、属性、配置版本、环境、自定义条件）与替换
// - 限定符（名称、注解、类型、primary）
// - 生命周期管理（post-construct / pre-destroy，按依赖逆序销毁）
// - 同步事件发布

pub mod annotation;
pub mod bean;
pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod injection;
mod injector;
pub mod lifecycle;
pub mod logging;
pub mod provider;
pub mod qualifier;
pub mod registry;
pub mod resolution;
pub mod scope;
pub mod utils;

// 重新导出常用类型
pub use annotation::{AnnotationMember, AnnotationMetadata, AnnotationValue};
pub use bean::{
    BeanDefinition, BeanDefinitionBuilder, BeanRef, BeanType, Exposure, InterceptorBinding,
    InterceptorKind, ProxyFactory, Replaces,
};
pub use condition::{
    Condition, ConditionContext, ConditionOutcome, PropertyRequirement, Requirement, SemanticVersion,
};
pub use config::{
    ConfigValue, Environment, EnvironmentPropertySource, FromConfigValue, MapPropertySource, PropertySource,
    TomlPropertySource,
};
pub use context::{
    ApplicationContext, ApplicationContextBuilder, BeanRegistration, ScopeHandle, ScopedLookup,
    ShutdownHook,
};
pub use error::{ContainerError, ContainerResult, DisabledCandidate, Result};
pub use event::{
    ApplicationEventMulticaster, ApplicationShutdownEvent, ApplicationStartedEvent, BeanCreatedEvent,
    BeanDestroyedEvent, BeanEvent, Event, EventListener, FnEventListener,
    SimpleApplicationEventMulticaster, TypedEventListener, TypedEventListenerAdapter,
};
pub use injection::{AnyBox, Arguments, Cardinality, Injected, InjectionPoint};
pub use lifecycle::BeanPostProcessor;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use provider::BeanProvider;
pub use qualifier::Qualifier;
pub use registry::{BeanConfiguration, BeanDefinitionRegistry, BeanDefinitionSubmission};
pub use resolution::BeanResolutionContext;
pub use scope::{
    BeanIdentifier, BeanState, ContextualScope, CreatedBean, CustomScope, Scope, ScopeId, ScopeMap,
};

// 导出 inventory，供代码生成器提交定义
pub use inventory;

/// Prelude 模块，包含常用的 traits 和类型
pub mod prelude {
    pub use crate::annotation::AnnotationValue;
    pub use crate::bean::{BeanDefinition, BeanType, Replaces};
    pub use crate::condition::{Condition, ConditionContext, Requirement};
    pub use crate::config::{Environment, MapPropertySource, PropertySource, TomlPropertySource};
    pub use crate::context::{ApplicationContext, ApplicationContextBuilder, ScopeHandle};
    pub use crate::error::{ContainerError, ContainerResult};
    pub use crate::event::{Event, EventListener, TypedEventListener};
    pub use crate::injection::{Arguments, InjectionPoint};
    pub use crate::lifecycle::BeanPostProcessor;
    pub use crate::provider::BeanProvider;
    pub use crate::qualifier::Qualifier;
    pub use crate::scope::Scope;

    pub use std::sync::Arc;
}
