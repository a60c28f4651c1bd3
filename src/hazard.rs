use crate::domain::HazardDomain;
use crate::garbage::Deleter;
use crate::state::ProtectionCell;
use crate::sync::{Arc, AtomicPtr, Ordering, spin_loop};
use tracing::trace;

/// Lifecycle of a [`HazardPointer`].
///
/// `Created` → `Protecting` → `Retired`. Dropping a handle in any state
/// releases it; nothing leads back to `Created`.
///
/// There is no `Released` variant: release is terminal and only happens in
/// `Drop`, after which no handle is left to report a state. The domain
/// observes it through [`HazardDomain::outstanding_handles`](crate::HazardDomain::outstanding_handles)
/// and the freed cell capacity.
///
/// 危险指针的生命周期。
/// 没有 `Released` 变体：释放是终态，只发生在 `Drop` 中，之后已没有句柄可以报告状态。
/// 域通过 `outstanding_handles` 和被释放的单元容量观察到它。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HazardState {
    /// Bound to a cell, nothing published yet.
    Created,
    /// At least one `protect` has completed.
    Protecting,
    /// Handed off for retirement; the cell is cleared for good.
    Retired,
}

/// A capability over exactly one protection cell.
///
/// Obtained from [`HazardDomain::create`] or [`HazardDomain::create_with_deleter`].
/// Use [`protect`](Self::protect) to publish the address read from an atomic
/// pointer; as long as the address stays published, no scan in the same domain
/// will reclaim it. The handle is movable but not clonable.
///
/// **Progress**: `protect` is lock-free, not wait-free. Under adversarial
/// contention on the source pointer it may retry indefinitely.
///
/// 对恰好一个保护单元的能力。
/// 通过 [`HazardDomain::create`] 或 [`HazardDomain::create_with_deleter`] 获得。
/// 使用 [`protect`](Self::protect) 发布从原子指针读到的地址；
/// 只要地址保持发布状态，同一域内的扫描就不会回收它。句柄可以移动但不能克隆。
/// **进度保证**：`protect` 是无锁的，而非无等待的。
/// 在源指针的对抗性竞争下，它可能无限重试。
#[must_use]
pub struct HazardPointer {
    cell: Arc<ProtectionCell>,
    domain: HazardDomain,
    deleter: Option<Deleter>,
    state: HazardState,
}

impl HazardPointer {
    pub(crate) fn new(
        cell: Arc<ProtectionCell>,
        domain: HazardDomain,
        deleter: Option<Deleter>,
    ) -> Self {
        Self {
            cell,
            domain,
            deleter,
            state: HazardState::Created,
        }
    }

    /// Protect the value currently stored in `src` and return it.
    ///
    /// Loads `src`, publishes the loaded address into this handle's cell, then
    /// loads `src` again; repeats until both loads agree. The returned address
    /// was the value of `src` at an instant after it was published, so a
    /// concurrent retirement of that address will see the cell and defer.
    ///
    /// A null result leaves the cell unused.
    ///
    /// # Panics
    /// Panics if the handle has already been retired.
    ///
    /// 保护 `src` 当前存储的值并返回它。
    /// 加载 `src`，将加载到的地址发布到本句柄的单元中，然后再次加载 `src`；
    /// 重复直到两次加载一致。返回的地址是 `src` 在发布之后某一时刻的值，
    /// 因此对该地址的并发退休会看到此单元并推迟回收。
    pub fn protect<T>(&mut self, src: &AtomicPtr<T>) -> *mut T {
        assert!(
            self.state != HazardState::Retired,
            "BUG: protect called on a retired HazardPointer. \
             A retired handle cannot publish addresses again."
        );

        let mut ptr = src.load(Ordering::Acquire);
        loop {
            self.cell.publish(ptr.cast());
            let reread = src.load(Ordering::SeqCst);
            if reread == ptr {
                break;
            }
            ptr = reread;
            spin_loop();
        }

        self.state = HazardState::Protecting;
        ptr
    }

    /// Protect the value stored in `src` and dereference it.
    ///
    /// The reference lives as long as the exclusive borrow of this handle.
    /// Returns `None` if the protected pointer is null.
    ///
    /// # Safety
    ///
    /// 1. The value loaded from `src` is a valid `&T`, or null.
    /// 2. That value is only ever freed by retiring it through this handle's domain.
    ///
    /// 保护 `src` 中的值并解引用。
    /// # 安全性
    /// 1. 从 `src` 加载的值是有效的 `&T` 或空指针。
    /// 2. 该值只会通过本句柄所属域的退休操作释放。
    pub unsafe fn protect_ref<'hp, T: Sync>(&'hp mut self, src: &AtomicPtr<T>) -> Option<&'hp T> {
        let ptr = self.protect(src);
        // SAFETY: the caller guarantees validity; the cell now keeps it from being reclaimed.
        unsafe { ptr.as_ref() }
    }

    /// Whether the cell currently holds the unused sentinel.
    #[inline]
    pub fn empty(&self) -> bool {
        self.cell.is_unused()
    }

    #[inline]
    pub fn state(&self) -> HazardState {
        self.state
    }

    /// The domain this handle was created in.
    #[inline]
    pub fn domain(&self) -> &HazardDomain {
        &self.domain
    }

    /// Hand the protected address to the domain for deferred reclamation.
    ///
    /// The cell is cleared and the address, together with the handle's deleter,
    /// is appended to the calling thread's retire list. The deleter runs exactly
    /// once, in some later scan, once no cell holds the address. This call may
    /// itself run that scan if the domain's pending records have reached the threshold.
    ///
    /// Returns `false` without scheduling anything if the handle was already
    /// retired, holds no address, or has no deleter (the cell is still cleared).
    /// Repeated calls are therefore harmless.
    ///
    /// 将受保护的地址交给域进行延迟回收。
    /// 清空单元，并将地址连同句柄的删除器追加到调用线程的退休列表。
    /// 当没有单元持有该地址时，删除器会在之后的某次扫描中恰好运行一次。
    /// 如果域中待回收记录达到阈值，此调用本身可能执行该扫描。
    /// 如果句柄已被退休、未持有地址或没有删除器，则返回 `false` 且不调度任何内容。
    pub fn retire(&mut self) -> bool {
        if self.state == HazardState::Retired {
            trace!("retire on an already retired hazard pointer ignored");
            return false;
        }
        self.state = HazardState::Retired;

        match &self.deleter {
            Some(deleter) => self.domain.retire(&self.cell, deleter.clone()),
            None => {
                trace!("hazard pointer without deleter retired; nothing scheduled");
                self.cell.clear();
                false
            }
        }
    }

    /// Publish an address the caller has already unlinked and owns.
    pub(crate) fn adopt(&mut self, address: *mut ()) {
        debug_assert!(self.state != HazardState::Retired);
        self.cell.publish(address);
        self.state = HazardState::Protecting;
    }
}

impl std::fmt::Debug for HazardPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HazardPointer")
            .field("protected", &self.cell.load())
            .field("state", &self.state)
            .field("has_deleter", &self.deleter.is_some())
            .finish()
    }
}

impl Drop for HazardPointer {
    /// Clear the cell and give it back to the registry. No deleter is scheduled.
    /// 清空单元并将其归还注册表。不会调度删除器。
    #[inline]
    fn drop(&mut self) {
        self.cell.clear();
        self.cell.release();
        self.domain.handle_released();
    }
}
