/// 并发测试模块
/// 测试稳定读取、无释放后使用、多线程容量和端到端场景

use super::{Tracked, tracked_deleter};
use crate::{Deleter, HazardDomain, HazardError, ProtectedPtr};
use std::collections::HashSet;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;

/// 测试1: 并发修改原子指针时，protect 返回的值始终是某一时刻的有效值
#[test]
fn test_protect_returns_stable_value_under_mutation() {
    let domain = HazardDomain::new();
    let drops = Arc::new(AtomicUsize::new(0));
    let values: Vec<*mut Tracked> = (0..8).map(|i| Tracked::boxed(i, &drops)).collect();
    let valid: HashSet<usize> = values.iter().map(|p| *p as usize).collect();
    let valid = Arc::new(valid);

    let atomic = Arc::new(AtomicPtr::new(values[0]));
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let atomic = Arc::clone(&atomic);
        let stop = Arc::clone(&stop);
        let addresses: Vec<usize> = values.iter().map(|p| *p as usize).collect();
        thread::spawn(move || {
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) {
                i = (i + 1) % addresses.len();
                atomic.store(addresses[i] as *mut Tracked, Ordering::SeqCst);
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let domain = domain.clone();
            let atomic = Arc::clone(&atomic);
            let valid = Arc::clone(&valid);
            thread::spawn(move || {
                let mut hp = domain.create().unwrap();
                for _ in 0..10_000 {
                    let protected = hp.protect(&atomic);
                    assert!(valid.contains(&(protected as usize)));
                    assert!(unsafe { (*protected).value } < 8);
                }
            })
        })
        .collect();

    for reader in readers {
        reader.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();

    for value in values {
        unsafe { drop(Box::from_raw(value)) };
    }
    assert_eq!(drops.load(Ordering::SeqCst), 8);
}

/// 节点：删除器把 `freed[id]` 置位后再释放
struct Node {
    id: usize,
}

fn node_deleter(freed: &Arc<Vec<AtomicBool>>) -> Deleter {
    let freed = Arc::clone(freed);
    Deleter::new(move |ptr| {
        let node = unsafe { Box::from_raw(ptr as *mut Node) };
        freed[node.id].store(true, Ordering::SeqCst);
    })
}

/// 测试2: 读者受保护期间对象永不被回收
#[test]
fn test_no_reclamation_while_protected() {
    const UPDATES: usize = 2_000;

    let domain = HazardDomain::builder()
        .cells_per_thread(2)
        .max_expected_threads(5)
        .build();
    let freed: Arc<Vec<AtomicBool>> =
        Arc::new((0..=UPDATES).map(|_| AtomicBool::new(false)).collect());
    let atomic = Arc::new(AtomicPtr::new(Box::into_raw(Box::new(Node { id: 0 }))));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let domain = domain.clone();
            let atomic = Arc::clone(&atomic);
            let freed = Arc::clone(&freed);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut hp = domain.create().unwrap();
                while !done.load(Ordering::Relaxed) {
                    let node = hp.protect(&atomic);
                    let id = unsafe { (*node).id };
                    thread::yield_now();
                    assert!(!freed[id].load(Ordering::SeqCst), "node {id} freed while protected");
                    assert_eq!(unsafe { (*node).id }, id);
                }
            })
        })
        .collect();

    for id in 1..=UPDATES {
        let mut hp = domain.create_with_deleter(node_deleter(&freed)).unwrap();
        hp.protect(&atomic);
        atomic.store(Box::into_raw(Box::new(Node { id })), Ordering::SeqCst);
        assert!(hp.retire());
    }

    done.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    domain.reclaim();
    assert_eq!(domain.pending_count(), 0);
    let reclaimed = freed.iter().filter(|f| f.load(Ordering::SeqCst)).count();
    assert_eq!(reclaimed, UPDATES);
    assert!(!freed[UPDATES].load(Ordering::SeqCst));

    unsafe { drop(Box::from_raw(atomic.load(Ordering::SeqCst))) };
}

/// 测试3: 每个线程都可以同时持有满容量的句柄
#[test]
fn test_capacity_across_threads() {
    const THREADS: usize = 4;
    let domain = HazardDomain::builder().cells_per_thread(3).build();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let domain = domain.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let held: Vec<_> = (0..3).map(|_| domain.create().unwrap()).collect();
                barrier.wait();
                assert_eq!(
                    domain.create().unwrap_err(),
                    HazardError::ResourceExhausted { capacity: 3 }
                );
                barrier.wait();
                drop(held);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(domain.outstanding_handles(), 0);
}

/// 测试4: 端到端场景
/// A 长时间持有保护，B 快速保护后释放，C 在 A 持有期间连续退休十次
#[test]
fn test_long_reader_blocks_reclamation_until_release() {
    let domain = HazardDomain::builder()
        .cells_per_thread(2)
        .max_expected_threads(1)
        .build();
    let drops = Arc::new(AtomicUsize::new(0));
    let object = Tracked::boxed(42, &drops);
    let atomic = Arc::new(AtomicPtr::new(object));
    let object_addr = object as usize;

    let (a_protected_tx, a_protected_rx) = mpsc::channel();
    let (c_done_tx, c_done_rx) = mpsc::channel::<()>();

    let thread_a = {
        let domain = domain.clone();
        let atomic = Arc::clone(&atomic);
        let drops = Arc::clone(&drops);
        thread::spawn(move || {
            let mut hp = domain.create().unwrap();
            let protected = hp.protect(&atomic);
            assert_eq!(protected as usize, object_addr);
            a_protected_tx.send(()).unwrap();

            c_done_rx.recv().unwrap();
            assert_eq!(drops.load(Ordering::SeqCst), 0);
            assert_eq!(unsafe { (*protected).value }, 42);
        })
    };

    a_protected_rx.recv().unwrap();

    let thread_b = {
        let domain = domain.clone();
        let atomic = Arc::clone(&atomic);
        thread::spawn(move || {
            let mut hp = domain.create().unwrap();
            let protected = hp.protect(&atomic);
            assert!(protected as usize == object_addr || protected.is_null());
        })
    };

    let thread_c = {
        let domain = domain.clone();
        let atomic = Arc::clone(&atomic);
        let drops = Arc::clone(&drops);
        thread::spawn(move || {
            let mut hp = domain.create_with_deleter(tracked_deleter()).unwrap();
            hp.protect(&atomic);
            atomic.store(ptr::null_mut(), Ordering::SeqCst);

            let mut scheduled = 0;
            for _ in 0..10 {
                assert!(!hp.empty() || scheduled == 1);
                if hp.retire() {
                    scheduled += 1;
                }
                domain.reclaim();
                assert_eq!(drops.load(Ordering::SeqCst), 0);
            }
            assert_eq!(scheduled, 1);
            c_done_tx.send(()).unwrap();
        })
    };

    thread_b.join().unwrap();
    thread_c.join().unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(domain.pending_count(), 1);

    thread_a.join().unwrap();
    assert_eq!(domain.reclaim(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert_eq!(domain.reclaim(), 0);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// 测试5: ProtectedPtr 一个写者、多个读者
#[test]
fn test_protected_ptr_single_writer_multiple_readers() {
    const STORES: usize = 500;
    let drops = Arc::new(AtomicUsize::new(0));
    let domain = HazardDomain::builder().max_expected_threads(5).build();
    let shared = Arc::new(ProtectedPtr::new(
        Tracked::new_value(0, &drops),
        &domain,
    ));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let domain = domain.clone();
            let shared = Arc::clone(&shared);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut hp = domain.create().unwrap();
                let mut last = 0;
                while !done.load(Ordering::Relaxed) {
                    let value = shared.load(&mut hp).unwrap().value;
                    assert!(value >= last, "single writer values go backwards");
                    last = value;
                }
            })
        })
        .collect();

    for i in 1..=STORES {
        shared.store(Tracked::new_value(i, &drops)).unwrap();
    }
    done.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    domain.reclaim();
    assert_eq!(domain.pending_count(), 0);
    assert_eq!(drops.load(Ordering::SeqCst), STORES);

    drop(shared);
    assert_eq!(drops.load(Ordering::SeqCst), STORES + 1);
}

/// 测试6: 已退出线程的退休记录由其他线程的扫描回收
#[test]
fn test_exited_thread_records_are_reclaimed() {
    let domain = HazardDomain::builder().auto_reclaim(false).build();
    let drops = Arc::new(AtomicUsize::new(0));

    {
        let domain = domain.clone();
        let drops = Arc::clone(&drops);
        thread::spawn(move || {
            for i in 0..3 {
                let atomic = AtomicPtr::new(Tracked::boxed(i, &drops));
                let mut hp = domain.create_with_deleter(tracked_deleter()).unwrap();
                hp.protect(&atomic);
                hp.retire();
            }
        })
        .join()
        .unwrap();
    }

    assert_eq!(domain.pending_count(), 3);
    assert_eq!(domain.reclaim(), 3);
    assert_eq!(drops.load(Ordering::SeqCst), 3);
}

/// 在当前线程上创建、保护并退休一个未受其他句柄保护的对象
fn retire_fresh(domain: &HazardDomain, value: usize, drops: &Arc<AtomicUsize>) {
    let atomic = AtomicPtr::new(Tracked::boxed(value, drops));
    let mut hp = domain.create_with_deleter(tracked_deleter()).unwrap();
    hp.protect(&atomic);
    assert!(hp.retire());
}

/// 测试7: 分散在许多短命线程上的退休（每个线程都低于阈值）仍会触发扫描
#[test]
fn test_retires_spread_across_threads_trigger_scans() {
    const THREADS: usize = 40;
    const PER_THREAD: usize = 10;

    let domain = HazardDomain::new();
    let threshold = domain.config().retire_threshold();
    assert!(PER_THREAD < threshold);
    let drops = Arc::new(AtomicUsize::new(0));

    for t in 0..THREADS {
        let domain = domain.clone();
        let drops = Arc::clone(&drops);
        thread::spawn(move || {
            for i in 0..PER_THREAD {
                retire_fresh(&domain, t * PER_THREAD + i, &drops);
            }
        })
        .join()
        .unwrap();
    }

    let pending = domain.pending_count();
    assert!(pending < threshold, "{pending} records pending, threshold {threshold}");
    assert_eq!(drops.load(Ordering::SeqCst) + pending, THREADS * PER_THREAD);
    assert!(drops.load(Ordering::SeqCst) > 0);
}

/// 测试8: 仅靠退休触发的扫描
/// A 持有保护期间，C 退休该对象，其他线程的退休触发的扫描都跳过它；
/// A 释放后，至多 threshold 次后续退休（不手动 reclaim）就会恰好一次调用其删除器
#[test]
fn test_threshold_scans_reclaim_after_reader_releases() {
    // threshold = 2 * 2 + 1 = 5
    let domain = HazardDomain::builder()
        .cells_per_thread(2)
        .max_expected_threads(2)
        .build();
    let threshold = domain.config().retire_threshold();
    let object_drops = Arc::new(AtomicUsize::new(0));
    let other_drops = Arc::new(AtomicUsize::new(0));
    let atomic = Arc::new(AtomicPtr::new(Tracked::boxed(42, &object_drops)));

    // A: 当前线程持有保护
    let mut reader = domain.create().unwrap();
    let protected = reader.protect(&atomic);

    // C: 摘除并退休
    {
        let domain = domain.clone();
        let atomic = Arc::clone(&atomic);
        thread::spawn(move || {
            let mut hp = domain.create_with_deleter(tracked_deleter()).unwrap();
            hp.protect(&atomic);
            atomic.store(ptr::null_mut(), Ordering::SeqCst);
            assert!(hp.retire());
        })
        .join()
        .unwrap();
    }

    // 三个线程各退休 3 个对象，每个线程都低于阈值，但总数越过阈值
    for t in 0..3 {
        let domain = domain.clone();
        let drops = Arc::clone(&other_drops);
        thread::spawn(move || {
            for i in 0..3 {
                retire_fresh(&domain, t * 3 + i, &drops);
            }
        })
        .join()
        .unwrap();
    }

    assert!(other_drops.load(Ordering::SeqCst) > 0);
    assert_eq!(object_drops.load(Ordering::SeqCst), 0);
    assert_eq!(unsafe { (*protected).value }, 42);

    drop(reader);
    assert_eq!(object_drops.load(Ordering::SeqCst), 0);

    for t in 0..threshold {
        let domain = domain.clone();
        let drops = Arc::clone(&other_drops);
        thread::spawn(move || retire_fresh(&domain, 100 + t, &drops))
            .join()
            .unwrap();
        if object_drops.load(Ordering::SeqCst) == 1 {
            break;
        }
    }

    assert_eq!(object_drops.load(Ordering::SeqCst), 1);
    domain.reclaim();
    assert_eq!(object_drops.load(Ordering::SeqCst), 1);
}
