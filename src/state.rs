use crate::sync::{AtomicBool, AtomicPtr, Ordering};
use std::ptr;

/// Default number of protection cells each thread may hold at once.
/// 每个线程可同时持有的保护单元的默认数量。
pub(crate) const DEFAULT_CELLS_PER_THREAD: usize = 5;

/// Default number of threads expected to hold hazard pointers concurrently.
/// Only used to size the retire threshold.
/// 预期并发持有危险指针的默认线程数，仅用于计算退休阈值。
pub(crate) const DEFAULT_MAX_EXPECTED_THREADS: usize = 16;

/// Default interval for dropping idle thread entries (in scans).
/// 清理空闲线程条目的默认间隔（以扫描次数为单位）。
pub(crate) const DEFAULT_CLEANUP_INTERVAL: usize = 16;

/// A single published-address slot owned by one thread.
///
/// The cell holds either null ("unused") or the address its owner is currently
/// protecting. Only the handle bound to the cell writes the value; any thread
/// running a scan reads it.
///
/// Cache-aligned to prevent false sharing between owners.
///
/// 由单个线程拥有的发布地址槽。
/// 单元要么为空（"未使用"），要么保存其所有者当前保护的地址。
/// 只有绑定到该单元的句柄写入值；任何执行扫描的线程都会读取它。
/// 缓存对齐以防止所有者之间的伪共享。
#[derive(Debug)]
#[repr(align(64))]
pub struct ProtectionCell {
    value: AtomicPtr<()>,
    claimed: AtomicBool,
}

impl ProtectionCell {
    /// Create a new unused, unclaimed cell.
    /// 创建一个新的未使用、未被占用的单元。
    pub fn new() -> Self {
        Self {
            value: AtomicPtr::new(ptr::null_mut()),
            claimed: AtomicBool::new(false),
        }
    }

    /// The address currently published in this cell, or null.
    #[inline]
    pub fn load(&self) -> *mut () {
        self.value.load(Ordering::SeqCst)
    }

    /// Whether the cell holds the unused sentinel.
    #[inline]
    pub fn is_unused(&self) -> bool {
        self.load().is_null()
    }

    /// Whether a live handle is currently bound to this cell.
    #[inline]
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Bind this cell to a new handle. Returns `false` if it is already bound.
    ///
    /// Registries call this under the domain lock, so a plain check-then-store
    /// is enough; release happens without the lock and only ever flips to `false`.
    ///
    /// 将此单元绑定到新句柄。如果已被绑定则返回 `false`。
    pub fn try_claim(&self) -> bool {
        if self.claimed.load(Ordering::Acquire) {
            return false;
        }
        self.claimed.store(true, Ordering::Release);
        true
    }

    #[inline]
    pub(crate) fn publish(&self, address: *mut ()) {
        self.value.store(address, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn clear(&self) {
        self.value.store(ptr::null_mut(), Ordering::Release);
    }

    /// Clear the cell and return what it held.
    #[inline]
    pub(crate) fn take(&self) -> *mut () {
        self.value.swap(ptr::null_mut(), Ordering::AcqRel)
    }

    #[inline]
    pub(crate) fn release(&self) {
        self.claimed.store(false, Ordering::Release);
    }
}

impl Default for ProtectionCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed options handed to a protection registry at construction.
///
/// 构造时传递给保护注册表的固定选项。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Capacity of concurrently live handles per thread.
    /// 每个线程可同时存活的句柄容量。
    pub cells_per_thread: usize,
    /// Expected upper bound on threads holding handles at the same time.
    /// 同时持有句柄的线程数的预期上限。
    pub max_expected_threads: usize,
    /// Whether `retire` scans inline once the pending records reach the threshold.
    /// 待回收记录达到阈值时 `retire` 是否内联扫描。
    pub auto_reclaim: bool,
    /// Drop idle thread entries every N scans. `0` disables cleanup.
    /// 每 N 次扫描清理一次空闲线程条目。`0` 表示禁用。
    pub cleanup_interval: usize,
}

impl RegistryConfig {
    /// Retire-list length at which a scan is triggered.
    ///
    /// Must exceed `cells_per_thread × concurrent threads` for a scan to be
    /// guaranteed to find something reclaimable. Undersizing only delays
    /// reclamation.
    ///
    /// 触发扫描的退休列表长度。
    /// 必须大于 `cells_per_thread × 并发线程数`，扫描才能保证找到可回收的记录。
    /// 阈值过小只会延迟回收。
    #[inline]
    pub fn retire_threshold(&self) -> usize {
        self.cells_per_thread
            .saturating_mul(self.max_expected_threads)
            .saturating_add(1)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cells_per_thread: DEFAULT_CELLS_PER_THREAD,
            max_expected_threads: DEFAULT_MAX_EXPECTED_THREADS,
            auto_reclaim: true,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}
