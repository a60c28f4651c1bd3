use std::fmt;
use std::sync::Arc;

/// Type-erased destructor callback bound to a hazard pointer at creation.
///
/// It receives the retired address. It may run on any thread, at any point
/// after the retire call, while the domain lock is held: it must not call back
/// into the domain (`create`, `retire`, `reclaim`), or it will deadlock.
///
/// If a deleter panics, the panic propagates out of the scan and its record
/// counts as reclaimed. Records the scan had not reached yet stay pending and
/// are reclaimed by the next scan or when the registry is dropped.
///
/// 创建危险指针时绑定的类型擦除析构回调。
/// 它接收被退休的地址。它可能在任何线程、退休调用之后的任意时刻、
/// 在持有域锁时运行：它不能回调域（`create`、`retire`、`reclaim`），否则会死锁。
/// 如果删除器 panic，panic 会从扫描中传播出去，其记录视为已回收；
/// 扫描尚未处理的记录保持待回收状态，由下一次扫描或注册表 drop 时回收。
#[derive(Clone)]
pub struct Deleter {
    reclaim: Arc<dyn Fn(*mut ()) + Send + Sync>,
}

/// Converts the raw pointer back to Box<T> and drops it.
/// 将原始指针转换回 Box<T> 并将其 drop。
#[inline(always)]
unsafe fn drop_value<T>(ptr: *mut ()) {
    let ptr = ptr as *mut T;
    unsafe {
        drop(Box::from_raw(ptr));
    }
}

impl Deleter {
    /// Wrap an arbitrary reclamation callback.
    #[inline]
    pub fn new<F>(reclaim: F) -> Self
    where
        F: Fn(*mut ()) + Send + Sync + 'static,
    {
        Self {
            reclaim: Arc::new(reclaim),
        }
    }

    /// A deleter that reclaims addresses as `Box<T>`.
    ///
    /// # Safety
    ///
    /// Every address retired through a handle carrying this deleter must come
    /// from `Box::<T>::into_raw` and must not be freed by anything else. `T` is
    /// dropped on whichever thread runs the scan.
    ///
    /// 将地址作为 `Box<T>` 回收的删除器。
    /// # 安全性
    /// 通过携带此删除器的句柄退休的每个地址都必须来自 `Box::<T>::into_raw`，
    /// 且不能被其他任何东西释放。`T` 会在执行扫描的线程上被 drop。
    pub unsafe fn drop_box<T: Send + 'static>() -> Self {
        Self::new(|ptr| unsafe { drop_value::<T>(ptr) })
    }

    #[inline]
    pub(crate) fn invoke(&self, address: *mut ()) {
        (self.reclaim)(address)
    }
}

impl fmt::Debug for Deleter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deleter")
            .field("reclaim", &Arc::as_ptr(&self.reclaim))
            .finish()
    }
}

/// An address that has been retired but not yet reclaimed, with the callback
/// that will reclaim it.
///
/// A record is only reclaimed once no protection cell holds its address.
/// Dropping a record without calling [`RetiredRecord::reclaim`] leaks the
/// address rather than freeing it.
///
/// 已退休但尚未回收的地址，以及将回收它的回调。
/// 只有当没有任何保护单元持有该地址时，记录才会被回收。
pub struct RetiredRecord {
    address: *mut (),
    deleter: Deleter,
}

// SAFETY: the address is only dereferenced by the deleter, which is `Send + Sync`
// and documented to run on arbitrary threads.
unsafe impl Send for RetiredRecord {}

impl RetiredRecord {
    #[inline]
    pub fn new(address: *mut (), deleter: Deleter) -> Self {
        Self { address, deleter }
    }

    #[inline]
    pub fn address(&self) -> *mut () {
        self.address
    }

    /// Invoke the deleter on the retired address, consuming the record.
    #[inline]
    pub fn reclaim(self) {
        self.deleter.invoke(self.address);
    }
}

impl fmt::Debug for RetiredRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RetiredRecord").field(&self.address).finish()
    }
}
