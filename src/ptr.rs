use crate::domain::HazardDomain;
use crate::error::HazardResult;
use crate::garbage::Deleter;
use crate::hazard::HazardPointer;
use crate::sync::{AtomicPtr, Ordering};
use std::boxed::Box;
use std::marker::PhantomData;

/// A hazard-protected owning pointer bound to one domain.
///
/// `ProtectedPtr<T>` owns a heap value behind an atomic pointer. Readers load
/// it through one of their own [`HazardPointer`]s; writers replace it with
/// [`store`](Self::store), which retires the previous value into the same
/// domain.
///
/// **Safety Contract**:
/// - `load()` only accepts handles created by the domain this pointer is bound
///   to, and panics otherwise.
/// - The reference returned by `load()` is bound to both the handle borrow and
///   the pointer borrow.
///
/// **Typical Usage**:
/// ```
/// use hazptr_domain::{HazardDomain, ProtectedPtr};
///
/// let domain = HazardDomain::new();
/// let shared = ProtectedPtr::new(42i32, &domain);
///
/// // Reader thread:
/// let mut hp = domain.create().unwrap();
/// assert_eq!(shared.load(&mut hp), Some(&42));
/// drop(hp);
///
/// // Writer thread:
/// shared.store(100i32).unwrap();
/// domain.reclaim();
/// ```
///
/// 一个绑定到单个域、受危险指针保护的拥有型指针。
/// `ProtectedPtr<T>` 在原子指针后面拥有一个堆上的值。读者通过自己的 [`HazardPointer`] 加载它；
/// 写者通过 [`store`](Self::store) 替换它，旧值会被退休到同一个域。
/// **安全合约**：
/// - `load()` 只接受由本指针所绑定的域创建的句柄，否则会 panic。
/// - `load()` 返回的引用同时受句柄借用和指针借用的约束。
pub struct ProtectedPtr<T> {
    ptr: AtomicPtr<T>,
    domain: HazardDomain,
    _owns: PhantomData<T>,
}

impl<T: Send + Sync + 'static> ProtectedPtr<T> {
    /// Create a new protected pointer in `domain`, initialized with the given value.
    /// 在 `domain` 中创建一个新的受保护指针，初始化为给定的值。
    #[inline]
    pub fn new(data: T, domain: &HazardDomain) -> Self {
        Self {
            ptr: AtomicPtr::new(Box::into_raw(Box::new(data))),
            domain: domain.clone(),
            _owns: PhantomData,
        }
    }

    /// Protect the current value through `hp` and return a reference to it.
    ///
    /// # Panics
    /// Panics if `hp` was created by a different domain, or has been retired.
    ///
    /// 通过 `hp` 保护当前值并返回其引用。
    /// # Panics
    /// 如果 `hp` 由其他域创建或已被退休，则 panic。
    #[inline]
    pub fn load<'a>(&'a self, hp: &'a mut HazardPointer) -> Option<&'a T> {
        assert!(
            self.domain.same_domain(hp.domain()),
            "BUG: ProtectedPtr loaded through a HazardPointer from another domain."
        );
        // SAFETY:
        // 1. Every pointer stored here comes from `Box::into_raw` and is never null
        //    until the `ProtectedPtr` is dropped.
        // 2. Replaced values are only freed by retiring them into `self.domain`,
        //    which is also `hp`'s domain.
        unsafe { hp.protect_ref(&self.ptr) }
    }

    /// Replace the value and retire the old one.
    ///
    /// The old value is unlinked with a `SeqCst` swap, published into a
    /// temporary hazard pointer, and retired through it; it is dropped once no
    /// reader protects it. This temporary handle counts against the calling
    /// thread's capacity, so the call fails with
    /// [`HazardError::ResourceExhausted`](crate::HazardError::ResourceExhausted)
    /// (leaving the current value in place) if the thread has no free cell.
    ///
    /// 替换值并退休旧值。
    /// 旧值通过 `SeqCst` 交换被摘除，发布到一个临时危险指针中并通过它退休；
    /// 当没有读者保护它时才会被 drop。临时句柄占用调用线程的容量，
    /// 因此如果线程没有空闲单元，调用会失败（当前值保持不变）。
    pub fn store(&self, data: T) -> HazardResult<()> {
        // SAFETY: only addresses produced by `Box::<T>::into_raw` are ever stored here.
        let deleter = unsafe { Deleter::drop_box::<T>() };
        let mut hp = self.domain.create_with_deleter(deleter)?;

        let new_ptr = Box::into_raw(Box::new(data));
        let old_ptr = self.ptr.swap(new_ptr, Ordering::SeqCst);

        if !old_ptr.is_null() {
            hp.adopt(old_ptr.cast());
            hp.retire();
        }
        Ok(())
    }

    #[inline]
    pub fn domain(&self) -> &HazardDomain {
        &self.domain
    }
}

impl<T> std::fmt::Debug for ProtectedPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ptr = self.ptr.load(Ordering::Relaxed);
        f.debug_tuple("ProtectedPtr").field(&ptr).finish()
    }
}

impl<T> Drop for ProtectedPtr<T> {
    /// When a `ProtectedPtr` is dropped, it drops the current value.
    ///
    /// No borrow of the pointer can be alive here, so no reader can still
    /// hold a reference obtained through `load()`.
    ///
    /// 当 `ProtectedPtr` 被 drop 时，它会 drop 当前值。
    /// 此时不可能存在对该指针的借用，因此没有读者仍持有通过 `load()` 获得的引用。
    #[inline]
    fn drop(&mut self) {
        let ptr = self.ptr.load(Ordering::Relaxed);
        if !ptr.is_null() {
            unsafe {
                drop(Box::from_raw(ptr));
            }
        }
    }
}
