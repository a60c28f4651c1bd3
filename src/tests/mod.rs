mod concurrent_tests;

use crate::Deleter;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 被析构时计数的测试对象
pub(crate) struct Tracked {
    pub(crate) value: usize,
    drops: Arc<AtomicUsize>,
}

impl Tracked {
    pub(crate) fn new_value(value: usize, drops: &Arc<AtomicUsize>) -> Tracked {
        Tracked {
            value,
            drops: Arc::clone(drops),
        }
    }

    pub(crate) fn boxed(value: usize, drops: &Arc<AtomicUsize>) -> *mut Tracked {
        Box::into_raw(Box::new(Tracked::new_value(value, drops)))
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// 以 `Box<Tracked>` 回收地址的删除器
pub(crate) fn tracked_deleter() -> Deleter {
    unsafe { Deleter::drop_box::<Tracked>() }
}

/// 只计数、不释放的删除器
pub(crate) fn counting_deleter(calls: &Arc<AtomicUsize>) -> Deleter {
    let calls = Arc::clone(calls);
    Deleter::new(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
    })
}
