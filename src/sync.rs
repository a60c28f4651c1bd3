#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering, fence};
#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering, fence};

#[cfg(feature = "loom")]
pub use loom::sync::Arc;
#[cfg(not(feature = "loom"))]
pub use std::sync::Arc;

#[cfg(feature = "loom")]
pub use loom::thread::ThreadId;
#[cfg(not(feature = "loom"))]
pub use std::thread::ThreadId;

#[cfg(feature = "loom")]
pub use loom::hint::spin_loop;
#[cfg(not(feature = "loom"))]
pub use std::hint::spin_loop;

#[cfg(not(feature = "loom"))]
pub use antidote::Mutex;

#[cfg(feature = "loom")]
#[derive(Debug, Default)]
pub struct Mutex<T>(loom::sync::Mutex<T>);

#[cfg(feature = "loom")]
impl<T> Mutex<T> {
    pub fn new(t: T) -> Self {
        Self(loom::sync::Mutex::new(t))
    }

    pub fn lock(&self) -> loom::sync::MutexGuard<'_, T> {
        self.0.lock().unwrap()
    }
}

/// Identity of the calling thread, as seen by the registry.
/// 调用线程的标识，供注册表使用。
#[inline]
pub fn current_thread_id() -> ThreadId {
    #[cfg(feature = "loom")]
    {
        loom::thread::current().id()
    }
    #[cfg(not(feature = "loom"))]
    {
        std::thread::current().id()
    }
}
