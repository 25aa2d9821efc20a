//! 同步事件
//!
//! 事件按运行时类型分发：监听器声明的类型等于事件类型、等于事件声明的某个父类型，
//! 或者是根类型 `dyn Event` 时，监听器会收到此事件。

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;

use crate::bean::{BeanRef, BeanType};
use crate::error::{ContainerError, ContainerResult};

/// 所有事件的根类型
pub trait Event: Any + Send + Sync {
    fn event_name(&self) -> &str;

    fn timestamp(&self) -> SystemTime;

    /// 事件相关的 Bean 实例
    fn source(&self) -> Option<BeanRef> {
        None
    }

    /// 声明的父类型，监听父类型的监听器也会收到此事件
    fn parent_types(&self) -> Vec<BeanType> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any;
}

/// Bean 生命周期事件的父类型
pub trait BeanEvent: Event {
    fn bean_name(&self) -> &str;

    fn bean_type(&self) -> BeanType;
}

/// 事件是否属于 `event_type`（自身类型或声明的父类型）
pub fn is_event_of_type(event: &dyn Event, event_type: &BeanType) -> bool {
    event.as_any().type_id() == event_type.id() || event.parent_types().contains(event_type)
}

/// 为带 `timestamp` 字段的结构实现 `Event`，事件名取结构名
macro_rules! impl_event {
    ($event:ident $(, parents = [$($parent:ty),+])?) => {
        impl Event for $event {
            fn event_name(&self) -> &str {
                stringify!($event)
            }

            fn timestamp(&self) -> SystemTime {
                self.timestamp
            }

            $(
            fn parent_types(&self) -> Vec<BeanType> {
                vec![$(BeanType::of::<$parent>()),+]
            }
            )?

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

macro_rules! impl_bean_event {
    ($event:ident) => {
        impl BeanEvent for $event {
            fn bean_name(&self) -> &str {
                &self.bean_name
            }

            fn bean_type(&self) -> BeanType {
                self.bean_type
            }
        }
    };
}

/// 上下文启动完成，eager Bean 已全部创建
#[derive(Debug, Clone)]
pub struct ApplicationStartedEvent {
    pub context_name: String,
    pub startup_time: Duration,
    pub timestamp: SystemTime,
}

impl ApplicationStartedEvent {
    pub fn new(context_name: impl Into<String>, startup_time: Duration) -> Self {
        Self {
            context_name: context_name.into(),
            startup_time,
            timestamp: SystemTime::now(),
        }
    }
}

impl_event!(ApplicationStartedEvent);

/// 上下文开始关闭，此时 Bean 尚未销毁
#[derive(Debug, Clone)]
pub struct ApplicationShutdownEvent {
    pub context_name: String,
    pub timestamp: SystemTime,
}

impl ApplicationShutdownEvent {
    pub fn new(context_name: impl Into<String>) -> Self {
        Self {
            context_name: context_name.into(),
            timestamp: SystemTime::now(),
        }
    }
}

impl_event!(ApplicationShutdownEvent);

/// Bean 创建完成，携带创建出的实例（有代理时为代理）
pub struct BeanCreatedEvent {
    pub bean_name: String,
    pub bean_type: BeanType,
    pub bean: BeanRef,
    pub timestamp: SystemTime,
}

impl BeanCreatedEvent {
    pub fn new(bean_name: impl Into<String>, bean_type: BeanType, bean: BeanRef) -> Self {
        Self {
            bean_name: bean_name.into(),
            bean_type,
            bean,
            timestamp: SystemTime::now(),
        }
    }
}

impl Event for BeanCreatedEvent {
    fn event_name(&self) -> &str {
        "BeanCreatedEvent"
    }

    fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    fn source(&self) -> Option<BeanRef> {
        Some(Arc::clone(&self.bean))
    }

    fn parent_types(&self) -> Vec<BeanType> {
        vec![BeanType::of::<dyn BeanEvent>()]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl_bean_event!(BeanCreatedEvent);

/// Bean 已销毁，在 pre-destroy 回调之后发布
#[derive(Debug, Clone)]
pub struct BeanDestroyedEvent {
    pub bean_name: String,
    pub bean_type: BeanType,
    pub timestamp: SystemTime,
}

impl BeanDestroyedEvent {
    pub fn new(bean_name: impl Into<String>, bean_type: BeanType) -> Self {
        Self {
            bean_name: bean_name.into(),
            bean_type,
            timestamp: SystemTime::now(),
        }
    }
}

impl_event!(BeanDestroyedEvent, parents = [dyn BeanEvent]);
impl_bean_event!(BeanDestroyedEvent);

/// 事件监听器
///
/// 在发布者的线程上同步执行，返回的错误原样交给发布者
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &dyn Event) -> anyhow::Result<()>;

    fn listener_name(&self) -> &str {
        "AnonymousListener"
    }

    /// 监听的事件类型，`None` 表示所有事件
    fn event_type(&self) -> Option<BeanType> {
        None
    }
}

/// 只接收具体事件类型 `E` 的监听器
pub trait TypedEventListener<E: Event>: Send + Sync {
    fn on_event(&self, event: &E) -> anyhow::Result<()>;

    fn listener_name(&self) -> &str {
        "AnonymousTypedListener"
    }
}

/// 把 `TypedEventListener<E>` 注册为 `EventListener`
pub struct TypedEventListenerAdapter<E: Event, L: TypedEventListener<E>> {
    listener: Arc<L>,
    _phantom: PhantomData<fn(&E)>,
}

impl<E: Event, L: TypedEventListener<E>> TypedEventListenerAdapter<E, L> {
    pub fn new(listener: Arc<L>) -> Self {
        Self {
            listener,
            _phantom: PhantomData,
        }
    }
}

impl<E: Event, L: TypedEventListener<E> + 'static> EventListener for TypedEventListenerAdapter<E, L> {
    fn on_event(&self, event: &dyn Event) -> anyhow::Result<()> {
        match event.as_any().downcast_ref::<E>() {
            Some(typed_event) => self.listener.on_event(typed_event),
            None => Ok(()),
        }
    }

    fn listener_name(&self) -> &str {
        self.listener.listener_name()
    }

    fn event_type(&self) -> Option<BeanType> {
        Some(BeanType::of::<E>())
    }
}

/// 闭包监听器
pub struct FnEventListener<F> {
    name: String,
    event_type: Option<BeanType>,
    callback: F,
}

impl<F> FnEventListener<F>
where
    F: Fn(&dyn Event) -> anyhow::Result<()> + Send + Sync,
{
    /// 监听 `event_type` 及其子类型的事件；`None` 监听全部
    pub fn new(name: impl Into<String>, event_type: Option<BeanType>, callback: F) -> Self {
        Self {
            name: name.into(),
            event_type,
            callback,
        }
    }
}

impl<F> EventListener for FnEventListener<F>
where
    F: Fn(&dyn Event) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &dyn Event) -> anyhow::Result<()> {
        (self.callback)(event)
    }

    fn listener_name(&self) -> &str {
        &self.name
    }

    fn event_type(&self) -> Option<BeanType> {
        self.event_type
    }
}

/// 把事件分发给匹配的监听器
pub trait ApplicationEventMulticaster: Send + Sync {
    fn add_listener(&self, listener: Arc<dyn EventListener>);

    /// 按名称移除
    fn remove_listener(&self, listener_name: &str);

    fn remove_all_listeners(&self);

    /// 按注册顺序在当前线程上依次调用匹配的监听器
    ///
    /// 第一个返回错误的监听器终止广播，错误返回给发布者
    fn multicast_event(&self, event: &dyn Event) -> ContainerResult<()>;

    fn listener_count(&self) -> usize;
}

/// 同步多播器
#[derive(Default)]
pub struct SimpleApplicationEventMulticaster {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl SimpleApplicationEventMulticaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn supports(listener: &dyn EventListener, event: &dyn Event) -> bool {
        match listener.event_type() {
            None => true,
            Some(event_type) if event_type.id() == TypeId::of::<dyn Event>() => true,
            Some(event_type) => is_event_of_type(event, &event_type),
        }
    }
}

impl ApplicationEventMulticaster for SimpleApplicationEventMulticaster {
    fn add_listener(&self, listener: Arc<dyn EventListener>) {
        tracing::debug!("Added event listener: {}", listener.listener_name());
        self.listeners.write().push(listener);
    }

    fn remove_listener(&self, listener_name: &str) {
        self.listeners
            .write()
            .retain(|l| l.listener_name() != listener_name);
        tracing::debug!("Removed event listener: {}", listener_name);
    }

    fn remove_all_listeners(&self) {
        self.listeners.write().clear();
        tracing::debug!("Removed all event listeners");
    }

    fn multicast_event(&self, event: &dyn Event) -> ContainerResult<()> {
        // 先取快照，监听器内可以再注册监听器
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .filter(|l| Self::supports(l.as_ref(), event))
            .map(Arc::clone)
            .collect();

        tracing::trace!(
            "Multicasting event: {} to {} listener(s)",
            event.event_name(),
            listeners.len()
        );

        for listener in listeners {
            listener
                .on_event(event)
                .map_err(|source| ContainerError::EventListener {
                    listener: listener.listener_name().to_string(),
                    event: event.event_name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(
        name: &str,
        event_type: Option<BeanType>,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn EventListener> {
        let log = Arc::clone(log);
        let label = name.to_string();
        Arc::new(FnEventListener::new(name, event_type, move |event: &dyn Event| {
            log.lock().push(format!("{}:{}", label, event.event_name()));
            Ok(())
        }))
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let multicaster = SimpleApplicationEventMulticaster::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        multicaster.add_listener(recorder("first", None, &log));
        multicaster.add_listener(recorder("second", None, &log));

        multicaster
            .multicast_event(&ApplicationStartedEvent::new("app", Duration::from_millis(5)))
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec!["first:ApplicationStartedEvent", "second:ApplicationStartedEvent"]
        );
    }

    #[test]
    fn test_parent_type_listener_receives_subtypes() {
        let multicaster = SimpleApplicationEventMulticaster::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        multicaster.add_listener(recorder("beans", Some(BeanType::of::<dyn BeanEvent>()), &log));
        multicaster.add_listener(recorder(
            "shutdown",
            Some(BeanType::of::<ApplicationShutdownEvent>()),
            &log,
        ));
        multicaster.add_listener(recorder("root", Some(BeanType::of::<dyn Event>()), &log));

        multicaster
            .multicast_event(&BeanDestroyedEvent::new("pool", BeanType::of::<String>()))
            .unwrap();
        multicaster
            .multicast_event(&ApplicationShutdownEvent::new("app"))
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "beans:BeanDestroyedEvent",
                "root:BeanDestroyedEvent",
                "shutdown:ApplicationShutdownEvent",
                "root:ApplicationShutdownEvent",
            ]
        );
    }

    #[test]
    fn test_first_error_stops_fan_out() {
        let multicaster = SimpleApplicationEventMulticaster::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        multicaster.add_listener(Arc::new(FnEventListener::new("failing", None, |_: &dyn Event| {
            Err(anyhow::anyhow!("listener failed"))
        })));
        multicaster.add_listener(recorder("after", None, &log));

        let err = multicaster
            .multicast_event(&ApplicationShutdownEvent::new("app"))
            .unwrap_err();
        assert!(matches!(err, ContainerError::EventListener { ref listener, .. } if listener == "failing"));
        assert!(log.lock().is_empty());
    }

    struct StartupCounter {
        count: Mutex<u32>,
    }

    impl TypedEventListener<ApplicationStartedEvent> for StartupCounter {
        fn on_event(&self, event: &ApplicationStartedEvent) -> anyhow::Result<()> {
            assert_eq!(event.context_name, "app");
            *self.count.lock() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_typed_listener_adapter_filters_by_type() {
        let multicaster = SimpleApplicationEventMulticaster::new();
        let counter = Arc::new(StartupCounter { count: Mutex::new(0) });
        multicaster.add_listener(Arc::new(TypedEventListenerAdapter::new(Arc::clone(&counter))));

        multicaster
            .multicast_event(&ApplicationShutdownEvent::new("app"))
            .unwrap();
        multicaster
            .multicast_event(&ApplicationStartedEvent::new("app", Duration::from_millis(1)))
            .unwrap();

        assert_eq!(*counter.count.lock(), 1);
        multicaster.remove_listener("AnonymousTypedListener");
        assert_eq!(multicaster.listener_count(), 0);
    }
}
