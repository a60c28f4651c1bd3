use crate::error::{HazardError, HazardResult};
use crate::garbage::RetiredRecord;
use crate::state::{ProtectionCell, RegistryConfig};
use crate::sync::{Arc, Ordering, ThreadId, fence};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::BuildHasherDefault;
use std::mem;
use std::vec::Vec;
use tracing::debug;

/// Storage backend of a [`HazardDomain`](crate::HazardDomain).
///
/// A registry owns every protection cell, indexed by thread, together with each
/// thread's list of retired records. The domain serializes all calls into the
/// registry behind a single lock, so implementations need no internal
/// synchronization for their own bookkeeping. Cells, however, are written by
/// their owners without that lock and must only be read through
/// [`ProtectionCell::load`].
///
/// 危险指针域的存储后端。
/// 注册表拥有所有按线程索引的保护单元，以及每个线程的已退休记录列表。
/// 域通过单个锁串行化所有对注册表的调用，因此实现无需为自身的簿记做内部同步。
/// 但是单元由其所有者在不持锁的情况下写入，只能通过 [`ProtectionCell::load`] 读取。
pub trait ProtectionRegistry: Send {
    /// Construct the registry from the domain's fixed options.
    fn with_config(config: RegistryConfig) -> Self
    where
        Self: Sized;

    /// Bind a free cell of `thread` to a new handle.
    ///
    /// Fails with [`HazardError::ResourceExhausted`] when the thread already
    /// holds `cells_per_thread` live handles.
    fn acquire(&mut self, thread: ThreadId) -> HazardResult<Arc<ProtectionCell>>;

    /// Append a record to `thread`'s retire list, scanning once the records
    /// pending across all threads reach the retire threshold.
    fn retire(&mut self, thread: ThreadId, record: RetiredRecord);

    /// Reclaim every retired record whose address no cell currently holds.
    /// Returns the number of records reclaimed.
    fn reclaim_unprotected(&mut self) -> usize;

    /// Number of retired records still waiting to be reclaimed.
    fn pending(&self) -> usize;
}

#[derive(Debug, Default)]
struct ThreadRecord {
    cells: Vec<Arc<ProtectionCell>>,
    retired: Vec<RetiredRecord>,
}

impl ThreadRecord {
    /// No live handle and nothing left to reclaim.
    fn is_idle(&self) -> bool {
        self.retired.is_empty() && self.cells.iter().all(|cell| !cell.is_claimed())
    }
}

/// Fixed-key hasher: iteration order depends only on the keys inserted.
type ThreadMap = HashMap<ThreadId, ThreadRecord, BuildHasherDefault<DefaultHasher>>;

/// Hash-map backed registry: one growable cell set and one retire list per thread.
///
/// Cells are allocated lazily, up to `cells_per_thread` for each thread. A scan
/// snapshots every published address once, then walks all threads' retire lists,
/// so its cost is roughly `cells + pending records` rather than their product.
///
/// The scan threshold applies to the records pending across all threads, so
/// retirements spread thin over many threads still trigger scans.
///
/// 基于哈希表的注册表：每个线程一个可增长的单元集合和一个退休列表。
/// 单元按需分配，每个线程最多 `cells_per_thread` 个。
/// 扫描先对所有已发布地址做一次快照，然后遍历所有线程的退休列表。
/// 扫描阈值作用于所有线程的待回收记录总数，因此分散在许多线程上的退休同样会触发扫描。
pub struct MapRegistry {
    config: RegistryConfig,
    threads: ThreadMap,
    /// Unprotected records whose deleter has not run yet. Only non-empty
    /// between scans if a deleter panicked.
    unprotected: Vec<RetiredRecord>,
    /// Records in all retire lists plus `unprotected`.
    pending: usize,
    scan_counter: usize,
}

impl MapRegistry {
    /// Number of threads with an entry in the registry.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    fn protected_addresses(&self) -> HashSet<*mut ()> {
        self.threads
            .values()
            .flat_map(|record| record.cells.iter())
            .map(|cell| cell.load())
            .filter(|address| !address.is_null())
            .collect()
    }
}

impl ProtectionRegistry for MapRegistry {
    fn with_config(config: RegistryConfig) -> Self {
        Self {
            config,
            threads: ThreadMap::default(),
            unprotected: Vec::new(),
            pending: 0,
            scan_counter: 0,
        }
    }

    fn acquire(&mut self, thread: ThreadId) -> HazardResult<Arc<ProtectionCell>> {
        let capacity = self.config.cells_per_thread;
        let record = self.threads.entry(thread).or_default();

        if let Some(cell) = record.cells.iter().find(|cell| cell.try_claim()) {
            debug_assert!(cell.is_unused(), "released cell still holds an address");
            return Ok(Arc::clone(cell));
        }

        if record.cells.len() < capacity {
            let cell = Arc::new(ProtectionCell::new());
            cell.try_claim();
            record.cells.push(Arc::clone(&cell));
            return Ok(cell);
        }

        Err(HazardError::ResourceExhausted { capacity })
    }

    fn retire(&mut self, thread: ThreadId, record: RetiredRecord) {
        self.threads.entry(thread).or_default().retired.push(record);
        self.pending += 1;

        if self.config.auto_reclaim && self.pending >= self.config.retire_threshold() {
            self.reclaim_unprotected();
        }
    }

    fn reclaim_unprotected(&mut self) -> usize {
        // Pairs with the SeqCst publish in `HazardPointer::protect`.
        fence(Ordering::SeqCst);
        let protected = self.protected_addresses();

        for record in self.threads.values_mut() {
            let (kept, unprotected): (Vec<_>, Vec<_>) = mem::take(&mut record.retired)
                .into_iter()
                .partition(|candidate| protected.contains(&candidate.address()));
            record.retired = kept;
            self.unprotected.extend(unprotected);
        }

        // A panicking deleter consumes its own record; the rest stay queued
        // for the next scan or for teardown.
        let mut reclaimed = 0;
        while let Some(candidate) = self.unprotected.pop() {
            self.pending -= 1;
            candidate.reclaim();
            reclaimed += 1;
        }

        self.scan_counter += 1;
        let interval = self.config.cleanup_interval;
        if interval > 0 && self.scan_counter % interval == 0 {
            self.threads.retain(|_, record| !record.is_idle());
        }

        debug!(reclaimed, pending = self.pending(), "hazard scan completed");
        reclaimed
    }

    fn pending(&self) -> usize {
        self.pending
    }
}

impl Drop for MapRegistry {
    /// A registry is only dropped at a quiescent point, so every pending
    /// record is unobserved.
    fn drop(&mut self) {
        for retired in self.unprotected.drain(..) {
            retired.reclaim();
        }
        for record in self.threads.values_mut() {
            for retired in record.retired.drain(..) {
                retired.reclaim();
            }
        }
    }
}
