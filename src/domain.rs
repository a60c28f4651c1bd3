use crate::error::{HazardError, HazardResult};
use crate::garbage::{Deleter, RetiredRecord};
use crate::hazard::HazardPointer;
use crate::registry::{MapRegistry, ProtectionRegistry};
use crate::state::{ProtectionCell, RegistryConfig};
use crate::sync::{Arc, AtomicUsize, Mutex, Ordering, current_thread_id};
use std::boxed::Box;
use tracing::{info, trace, warn};

/// Builder for configuring a `HazardDomain`.
///
/// - `cells_per_thread`: how many hazard pointers one thread may hold at once
/// - `max_expected_threads`: used to size the retire threshold
/// - `auto_reclaim`: whether `retire` scans inline once the threshold is reached
/// - `cleanup_interval`: how often idle thread entries are dropped
///
/// # Example
/// ```
/// use hazptr_domain::HazardDomain;
///
/// let domain = HazardDomain::builder()
///     .cells_per_thread(2)
///     .max_expected_threads(4)
///     .build();
///
/// assert_eq!(domain.config().retire_threshold(), 9);
/// ```
///
/// 用于配置 `HazardDomain` 的构建器。
pub struct HazardDomainBuilder {
    config: RegistryConfig,
}

impl HazardDomainBuilder {
    /// Create a new builder with default settings.
    /// 创建一个带有默认设置的新构建器。
    #[inline]
    pub fn new() -> Self {
        Self {
            config: RegistryConfig::default(),
        }
    }

    /// Set the number of cells each thread may hold concurrently.
    ///
    /// Clamped to at least 1. Default: `5`
    ///
    /// 设置每个线程可同时持有的单元数量。至少为 1。
    #[inline]
    pub fn cells_per_thread(mut self, cells: usize) -> Self {
        self.config.cells_per_thread = cells.max(1);
        self
    }

    /// Set the number of threads expected to hold hazard pointers concurrently.
    ///
    /// The retire threshold is `cells_per_thread × max_expected_threads + 1`.
    /// Setting this below the real concurrency delays reclamation but never
    /// frees a protected object.
    ///
    /// Clamped to at least 1. Default: `16`
    ///
    /// 设置预期并发持有危险指针的线程数。
    /// 退休阈值为 `cells_per_thread × max_expected_threads + 1`。
    /// 设置得低于实际并发度只会延迟回收，不会释放受保护的对象。
    #[inline]
    pub fn max_expected_threads(mut self, threads: usize) -> Self {
        self.config.max_expected_threads = threads.max(1);
        self
    }

    /// Enable or disable the inline scan triggered by `retire`.
    ///
    /// With automatic reclamation off, nothing is reclaimed until
    /// [`HazardDomain::reclaim`] is called.
    ///
    /// Default: `true`
    ///
    /// 启用或禁用由 `retire` 触发的内联扫描。
    /// 关闭自动回收后，在调用 [`HazardDomain::reclaim`] 之前不会回收任何内容。
    #[inline]
    pub fn auto_reclaim(mut self, enabled: bool) -> Self {
        self.config.auto_reclaim = enabled;
        self
    }

    /// Set the cleanup interval for idle thread entries.
    ///
    /// Set to `0` to disable periodic cleanup.
    ///
    /// Default: `16`
    ///
    /// 设置空闲线程条目的清理间隔。设置为 `0` 可禁用。
    #[inline]
    pub fn cleanup_interval(mut self, interval: usize) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    /// Build the `HazardDomain` backed by a [`MapRegistry`].
    /// 使用 [`MapRegistry`] 后端构建 `HazardDomain`。
    #[inline]
    pub fn build(self) -> HazardDomain {
        self.build_with_backend::<MapRegistry>()
    }

    /// Build the `HazardDomain` backed by the registry type `R`.
    /// 使用注册表类型 `R` 作为后端构建 `HazardDomain`。
    pub fn build_with_backend<R: ProtectionRegistry + 'static>(self) -> HazardDomain {
        let registry: Box<dyn ProtectionRegistry> = Box::new(R::with_config(self.config));
        HazardDomain {
            shared: Arc::new(DomainShared {
                registry: Mutex::new(registry),
                outstanding: AtomicUsize::new(0),
                config: self.config,
            }),
        }
    }
}

impl Default for HazardDomainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct DomainShared {
    /// The coordination lock. Every create, retire, scan and backend swap goes
    /// through it; `protect` never does.
    registry: Mutex<Box<dyn ProtectionRegistry>>,
    /// Live handles issued by this domain.
    outstanding: AtomicUsize,
    config: RegistryConfig,
}

/// A hazard pointer reclamation domain.
///
/// `HazardDomain` is the only way to create [`HazardPointer`]s. It owns one
/// [`ProtectionRegistry`] and serializes every allocation, retirement and scan
/// on a single lock, resolving the calling thread's identity on the way in.
///
/// `HazardDomain` is `Clone` and can be shared across threads. Clones refer to
/// the same registry; separately built domains are fully independent.
///
/// **Scalability**: the coordination lock is coarse-grained and shared by all
/// threads' `create` and `retire` traffic. Only `protect` and `empty` avoid it.
///
/// **Typical Usage**:
/// ```
/// use hazptr_domain::{Deleter, HazardDomain};
/// use std::sync::atomic::{AtomicPtr, Ordering};
///
/// let domain = HazardDomain::new();
/// let shared = AtomicPtr::new(Box::into_raw(Box::new(42u64)));
///
/// // Reader
/// let mut reader = domain.create().unwrap();
/// let value = reader.protect(&shared);
/// assert_eq!(unsafe { *value }, 42);
/// drop(reader);
///
/// // Writer: unlink, then retire
/// let mut writer = domain
///     .create_with_deleter(unsafe { Deleter::drop_box::<u64>() })
///     .unwrap();
/// writer.protect(&shared);
/// shared.store(std::ptr::null_mut(), Ordering::SeqCst);
/// assert!(writer.retire());
/// assert_eq!(domain.reclaim(), 1);
/// ```
///
/// 危险指针回收域。
/// `HazardDomain` 是创建 [`HazardPointer`] 的唯一途径。它拥有一个 [`ProtectionRegistry`]，
/// 并在单个锁上串行化所有分配、退休和扫描，同时解析调用线程的标识。
/// `HazardDomain` 是 `Clone` 的，可以在线程间共享。克隆体引用同一个注册表；
/// 单独构建的域彼此完全独立。
/// **可扩展性**：协调锁是粗粒度的，由所有线程的 `create` 和 `retire` 共享。
/// 只有 `protect` 和 `empty` 不经过它。
#[derive(Clone)]
pub struct HazardDomain {
    shared: Arc<DomainShared>,
}

impl HazardDomain {
    /// Create a new domain with default settings.
    /// 使用默认设置创建一个新域。
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for configuring the domain.
    /// 创建一个用于配置域的构建器。
    #[inline]
    pub fn builder() -> HazardDomainBuilder {
        HazardDomainBuilder::new()
    }

    /// Create a hazard pointer with no deleter.
    ///
    /// Retiring such a handle only clears its cell.
    ///
    /// 创建一个没有删除器的危险指针。退休这样的句柄只会清空其单元。
    #[inline]
    pub fn create(&self) -> HazardResult<HazardPointer> {
        self.create_inner(None)
    }

    /// Create a hazard pointer whose retirements are reclaimed by `deleter`.
    ///
    /// Fails with [`HazardError::ResourceExhausted`] if the calling thread
    /// already holds `cells_per_thread` live handles.
    ///
    /// 创建一个危险指针，其退休的地址由 `deleter` 回收。
    #[inline]
    pub fn create_with_deleter(&self, deleter: Deleter) -> HazardResult<HazardPointer> {
        self.create_inner(Some(deleter))
    }

    fn create_inner(&self, deleter: Option<Deleter>) -> HazardResult<HazardPointer> {
        let thread = current_thread_id();
        let mut registry = self.shared.registry.lock();

        let cell = registry.acquire(thread).inspect_err(|err| {
            warn!(?thread, error = %err, "hazard pointer allocation failed");
        })?;
        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        drop(registry);

        trace!(?thread, "hazard pointer created");
        Ok(HazardPointer::new(cell, self.clone(), deleter))
    }

    /// Clear `cell` and append its address to the calling thread's retire list.
    ///
    /// Returns `false` if the cell was already unused.
    pub(crate) fn retire(&self, cell: &ProtectionCell, deleter: Deleter) -> bool {
        let thread = current_thread_id();
        let mut registry = self.shared.registry.lock();

        let address = cell.take();
        if address.is_null() {
            return false;
        }
        registry.retire(thread, RetiredRecord::new(address, deleter));
        true
    }

    pub(crate) fn handle_released(&self) {
        self.shared.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    /// Scan now and reclaim every retired record no cell protects.
    ///
    /// Returns the number of records reclaimed. Safe to call at any time,
    /// including when nothing is pending.
    ///
    /// 立即扫描并回收所有不受任何单元保护的已退休记录。返回回收的记录数。
    pub fn reclaim(&self) -> usize {
        self.shared.registry.lock().reclaim_unprotected()
    }

    /// Number of retired records still waiting for reclamation.
    pub fn pending_count(&self) -> usize {
        self.shared.registry.lock().pending()
    }

    /// Number of live hazard pointers issued by this domain.
    #[inline]
    pub fn outstanding_handles(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    #[inline]
    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    /// Whether `self` and `other` are clones of the same domain.
    #[inline]
    pub fn same_domain(&self, other: &HazardDomain) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Install a fresh registry of type `R` and return the previous one.
    ///
    /// Only allowed at a quiescent point: fails with
    /// [`HazardError::BackendInUse`] while any handle from this domain is alive.
    /// Records still pending in the returned registry are reclaimed when it is
    /// dropped.
    ///
    /// 安装一个类型为 `R` 的新注册表并返回之前的注册表。
    /// 只允许在静止点执行：只要本域的任何句柄仍存活，就会以
    /// [`HazardError::BackendInUse`] 失败。
    pub fn set_backend<R: ProtectionRegistry + 'static>(
        &self,
    ) -> HazardResult<Box<dyn ProtectionRegistry>> {
        self.replace_backend(Box::new(R::with_config(self.shared.config)))
    }

    /// Install `backend` and return the previous registry.
    ///
    /// Same quiescence requirement as [`set_backend`](Self::set_backend). On
    /// failure `backend` is dropped and the active registry stays in place.
    pub fn replace_backend(
        &self,
        backend: Box<dyn ProtectionRegistry>,
    ) -> HazardResult<Box<dyn ProtectionRegistry>> {
        let mut registry = self.shared.registry.lock();

        let outstanding = self.shared.outstanding.load(Ordering::Acquire);
        if outstanding > 0 {
            warn!(outstanding, "protection registry swap refused");
            return Err(HazardError::BackendInUse { outstanding });
        }

        let previous = std::mem::replace(&mut *registry, backend);
        info!(pending = previous.pending(), "protection registry swapped");
        Ok(previous)
    }
}

impl Default for HazardDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HazardDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HazardDomain")
            .field("config", &self.shared.config)
            .field("outstanding", &self.outstanding_handles())
            .finish()
    }
}
