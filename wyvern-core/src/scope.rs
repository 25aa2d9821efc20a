//! 作用域与作用域 map
//!
//! 每个作用域实例持有一个 `ScopeMap`：`BeanIdentifier -> CreatedBean`。
//! 单例作用域在容器生命周期内只有一个 map；自定义作用域按外部提供的
//! 句柄各自持有一个 map，作用域开始时创建，结束时销毁。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Mutex, RwLock};

use crate::bean::{BeanDefinition, BeanRef, BeanType};
use crate::error::{ContainerError, ContainerResult};
use crate::injection::AnyBox;
use crate::qualifier::Qualifier;
use crate::utils::dependency::destruction_order;

/// Bean 的作用域
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// 单例模式 - 容器中只有一个实例
    #[default]
    Singleton,

    /// 原型模式 - 每次请求都创建新实例，容器不跟踪
    Prototype,

    /// 命名的自定义作用域，例如 "request"
    Custom(String),
}

impl Scope {
    pub fn custom(name: impl Into<String>) -> Self {
        Scope::Custom(name.into())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Singleton => write!(f, "singleton"),
            Scope::Prototype => write!(f, "prototype"),
            Scope::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// 作用域实例的标识：作用域名称 + 句柄编号
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeId {
    scope: String,
    id: u64,
}

impl ScopeId {
    pub fn new(scope: impl Into<String>, id: u64) -> Self {
        Self {
            scope: scope.into(),
            id,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.scope, self.id)
    }
}

/// 作用域 map 中的键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BeanIdentifier {
    bean_type: BeanType,
    qualifier: Option<Qualifier>,
    discriminator: u64,
}

impl BeanIdentifier {
    pub fn new(bean_type: BeanType, qualifier: Option<Qualifier>, discriminator: u64) -> Self {
        Self {
            bean_type,
            qualifier,
            discriminator,
        }
    }

    /// 某个定义在某个作用域实例中的标识
    pub fn for_definition(definition: &BeanDefinition, discriminator: u64) -> Self {
        Self::new(
            definition.bean_type(),
            Some(Qualifier::named(definition.name())),
            discriminator,
        )
    }

    pub fn bean_type(&self) -> BeanType {
        self.bean_type
    }

    pub fn qualifier(&self) -> Option<&Qualifier> {
        self.qualifier.as_ref()
    }

    pub fn discriminator(&self) -> u64 {
        self.discriminator
    }
}

impl fmt::Display for BeanIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bean_type.simple_name())?;
        if let Some(q) = &self.qualifier {
            write!(f, " {}", q)?;
        }
        Ok(())
    }
}

/// Bean 实例的生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeanState {
    Uncreated,
    UnderConstruction,
    Constructed,
    Destroyed,
}

/// 已创建的 Bean
pub struct CreatedBean {
    identifier: BeanIdentifier,
    definition: Arc<BeanDefinition>,
    target: BeanRef,
    proxy: Option<BeanRef>,
    dependencies: Vec<BeanIdentifier>,
    state: Mutex<BeanState>,
}

impl CreatedBean {
    pub(crate) fn new(
        identifier: BeanIdentifier,
        definition: Arc<BeanDefinition>,
        target: BeanRef,
        proxy: Option<BeanRef>,
        dependencies: Vec<BeanIdentifier>,
    ) -> Self {
        Self {
            identifier,
            definition,
            target,
            proxy,
            dependencies,
            state: Mutex::new(BeanState::Constructed),
        }
    }

    pub fn identifier(&self) -> &BeanIdentifier {
        &self.identifier
    }

    pub fn definition(&self) -> &Arc<BeanDefinition> {
        &self.definition
    }

    /// 原始实例
    pub fn target(&self) -> &BeanRef {
        &self.target
    }

    pub fn proxy(&self) -> Option<&BeanRef> {
        self.proxy.as_ref()
    }

    /// 对外可见的实例：有代理时为代理
    pub fn bean(&self) -> &BeanRef {
        self.proxy.as_ref().unwrap_or(&self.target)
    }

    /// 构造期间解析到的、被跟踪的依赖
    pub fn dependencies(&self) -> &[BeanIdentifier] {
        &self.dependencies
    }

    pub fn state(&self) -> BeanState {
        *self.state.lock()
    }

    /// 以暴露的类型查看实例，结果为装箱的 `Arc<I>`
    pub fn cast(&self, bean_type: &BeanType) -> Option<AnyBox> {
        self.definition.cast(&self.target, self.proxy.as_ref(), bean_type)
    }

    /// 以暴露的类型取得强类型引用
    pub fn as_type<I: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<I>> {
        self.cast(&BeanType::of::<I>())
            .and_then(|value| value.downcast::<Arc<I>>().ok())
            .map(|value| *value)
    }

    /// 以具体类型查看原始实例
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.target).downcast::<T>().ok()
    }

    /// 执行 pre-destroy 回调；已销毁时返回 `Ok(false)`
    pub(crate) fn destroy(&self) -> anyhow::Result<bool> {
        {
            let mut state = self.state.lock();
            if *state == BeanState::Destroyed {
                return Ok(false);
            }
            *state = BeanState::Destroyed;
        }
        self.definition.run_pre_destroy(&self.target)?;
        Ok(true)
    }
}

impl fmt::Debug for CreatedBean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatedBean")
            .field("identifier", &self.identifier)
            .field("definition", &self.definition.name())
            .field("proxied", &self.proxy.is_some())
            .field("dependencies", &self.dependencies)
            .field("state", &self.state())
            .finish()
    }
}

struct Slot {
    label: String,
    cell: OnceCell<Arc<CreatedBean>>,
    builder: Mutex<Option<ThreadId>>,
}

impl Slot {
    fn new(label: String) -> Self {
        Self {
            label,
            cell: OnceCell::new(),
            builder: Mutex::new(None),
        }
    }
}

/// 线程 → 它正阻塞等待的槽位
///
/// 所有作用域 map 共用一张表，跨作用域的等待环同样能被发现。
/// 加锁顺序：先本表，再槽位的 `builder`。
static WAITS: Lazy<Mutex<HashMap<ThreadId, Arc<Slot>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// 沿 "槽位 → 构造线程 → 该线程等待的槽位" 前进，回到 `current` 时返回环上的槽位
fn wait_cycle(waits: &HashMap<ThreadId, Arc<Slot>>, slot: &Arc<Slot>, current: ThreadId) -> Option<Vec<String>> {
    let mut path = vec![slot.label.clone()];
    let mut next = Arc::clone(slot);
    for _ in 0..=waits.len() {
        let builder = (*next.builder.lock())?;
        if builder == current {
            path.push(slot.label.clone());
            return Some(path);
        }
        next = Arc::clone(waits.get(&builder)?);
        path.push(next.label.clone());
    }
    None
}

/// 一个作用域实例的 Bean 表
///
/// 每个标识最多构造一次：并发的首次访问中只有一个线程执行构造，
/// 其余线程阻塞等待并拿到同一个实例。构造失败时槽位保持为空，下次访问重试。
pub struct ScopeMap {
    name: String,
    discriminator: u64,
    slots: Mutex<HashMap<BeanIdentifier, Arc<Slot>>>,
    created: Mutex<Vec<Arc<CreatedBean>>>,
    closed: AtomicBool,
}

impl ScopeMap {
    pub fn new(name: impl Into<String>, discriminator: u64) -> Self {
        Self {
            name: name.into(),
            discriminator,
            slots: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 写入 `BeanIdentifier` 的作用域实例区分值
    pub fn discriminator(&self) -> u64 {
        self.discriminator
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn slot(&self, identifier: &BeanIdentifier) -> Arc<Slot> {
        let mut slots = self.slots.lock();
        Arc::clone(
            slots
                .entry(identifier.clone())
                .or_insert_with(|| Arc::new(Slot::new(identifier.to_string()))),
        )
    }

    /// 取出已存在的实例，或调用 `create` 构造
    ///
    /// 返回值的第二项表示本次调用是否执行了构造。等待的槽位最终由当前线程
    /// 自己构造（同一线程重入，或经由其他线程的等待链回到当前线程）时返回
    /// 循环依赖错误，而不是阻塞。构造期间作用域被关闭时，新实例立即销毁，
    /// 返回 `ContextClosed`。
    pub fn get_or_create<F>(
        &self,
        identifier: &BeanIdentifier,
        create: F,
    ) -> ContainerResult<(Arc<CreatedBean>, bool)>
    where
        F: FnOnce() -> ContainerResult<CreatedBean>,
    {
        if self.is_closed() {
            return Err(ContainerError::ContextClosed);
        }

        let slot = self.slot(identifier);
        if let Some(existing) = slot.cell.get() {
            return Ok((Arc::clone(existing), false));
        }

        let current = thread::current().id();
        {
            let mut waits = WAITS.lock();
            if let Some(path) = wait_cycle(&waits, &slot, current) {
                return Err(ContainerError::CircularDependency { path });
            }
            waits.insert(current, Arc::clone(&slot));
        }

        let mut created_now = false;
        let result = slot.cell.get_or_try_init(|| {
            {
                let mut waits = WAITS.lock();
                waits.remove(&current);
                *slot.builder.lock() = Some(current);
            }
            let result = create();
            *slot.builder.lock() = None;
            let created = Arc::new(result?);
            created_now = true;
            Ok::<_, ContainerError>(created)
        });
        WAITS.lock().remove(&current);
        let bean = result?;

        if created_now {
            let mut created = self.created.lock();
            if self.is_closed() {
                drop(created);
                tracing::debug!("Scope '{}' closed while creating {}", self.name, identifier);
                if let Err(e) = bean.destroy() {
                    tracing::warn!("Failed to destroy bean {}: {}", identifier, e);
                }
                return Err(ContainerError::ContextClosed);
            }
            created.push(Arc::clone(bean));
            tracing::trace!("Scope '{}' cached bean {}", self.name, identifier);
        }
        Ok((Arc::clone(bean), created_now))
    }

    pub fn get(&self, identifier: &BeanIdentifier) -> Option<Arc<CreatedBean>> {
        let slots = self.slots.lock();
        slots.get(identifier).and_then(|slot| slot.cell.get().cloned())
    }

    pub fn state(&self, identifier: &BeanIdentifier) -> BeanState {
        let slot = match self.slots.lock().get(identifier) {
            Some(slot) => Arc::clone(slot),
            None => return BeanState::Uncreated,
        };
        if let Some(bean) = slot.cell.get() {
            return bean.state();
        }
        if slot.builder.lock().is_some() {
            BeanState::UnderConstruction
        } else {
            BeanState::Uncreated
        }
    }

    /// 按创建顺序列出已创建的 Bean
    pub fn created(&self) -> Vec<Arc<CreatedBean>> {
        self.created.lock().clone()
    }

    /// 移除单个 Bean，之后的访问会重新构造
    pub fn remove(&self, identifier: &BeanIdentifier) -> Option<Arc<CreatedBean>> {
        let slot = self.slots.lock().remove(identifier)?;
        let bean = slot.cell.get().cloned()?;
        self.created.lock().retain(|b| !Arc::ptr_eq(b, &bean));
        Some(bean)
    }

    /// 关闭作用域，按"依赖者在前"的顺序返回需要销毁的 Bean
    pub fn close(&self) -> Vec<Arc<CreatedBean>> {
        self.closed.store(true, Ordering::Release);
        let beans = std::mem::take(&mut *self.created.lock());
        self.slots.lock().clear();

        let positions: HashMap<&BeanIdentifier, usize> = beans
            .iter()
            .enumerate()
            .map(|(i, b)| (b.identifier(), i))
            .collect();
        let edges: Vec<Vec<usize>> = beans
            .iter()
            .map(|b| {
                b.dependencies()
                    .iter()
                    .filter_map(|d| positions.get(d).copied())
                    .collect()
            })
            .collect();

        destruction_order(&edges)
            .into_iter()
            .map(|i| Arc::clone(&beans[i]))
            .collect()
    }
}

impl fmt::Debug for ScopeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeMap")
            .field("name", &self.name)
            .field("discriminator", &self.discriminator)
            .field("created", &self.created.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 自定义作用域
///
/// 容器通过它为每个作用域实例取得 `ScopeMap`。作用域结束时由容器关闭对应的 map。
pub trait CustomScope: Send + Sync {
    /// 作用域名称，与 `Scope::Custom` 中的名称对应
    fn name(&self) -> &str;

    /// 开始一个作用域实例并创建它的 map
    fn begin(&self, id: &ScopeId) -> ContainerResult<Arc<ScopeMap>>;

    /// 取得仍然存活的作用域实例的 map；未开始或已结束时为 `None`
    fn scope_map(&self, id: &ScopeId) -> ContainerResult<Option<Arc<ScopeMap>>>;

    /// 结束一个作用域实例
    fn remove(&self, id: &ScopeId) -> Option<Arc<ScopeMap>>;

    /// 容器关闭时取出所有仍然存活的作用域实例
    fn drain(&self) -> Vec<Arc<ScopeMap>>;
}

/// 以外部句柄为键的作用域，例如请求作用域
pub struct ContextualScope {
    name: String,
    maps: RwLock<HashMap<u64, Arc<ScopeMap>>>,
}

impl ContextualScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            maps: RwLock::new(HashMap::new()),
        }
    }

    /// 存活的作用域实例数量
    pub fn active_count(&self) -> usize {
        self.maps.read().len()
    }

    fn check_name(&self, id: &ScopeId) -> ContainerResult<()> {
        if id.scope() == self.name {
            Ok(())
        } else {
            Err(ContainerError::UnknownScope(id.scope().to_string()))
        }
    }
}

impl CustomScope for ContextualScope {
    fn name(&self) -> &str {
        &self.name
    }

    fn begin(&self, id: &ScopeId) -> ContainerResult<Arc<ScopeMap>> {
        self.check_name(id)?;
        let mut maps = self.maps.write();
        let map = maps.entry(id.id()).or_insert_with(|| {
            tracing::debug!("Created scope instance {}", id);
            Arc::new(ScopeMap::new(self.name.clone(), id.id()))
        });
        Ok(Arc::clone(map))
    }

    fn scope_map(&self, id: &ScopeId) -> ContainerResult<Option<Arc<ScopeMap>>> {
        self.check_name(id)?;
        Ok(self.maps.read().get(&id.id()).cloned())
    }

    fn remove(&self, id: &ScopeId) -> Option<Arc<ScopeMap>> {
        self.maps.write().remove(&id.id())
    }

    fn drain(&self) -> Vec<Arc<ScopeMap>> {
        let mut maps = self.maps.write();
        let mut ids: Vec<u64> = maps.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| maps.remove(&id)).collect()
    }
}
