//! Hazard-pointer based safe memory reclamation.
//!
//! Readers publish the address they are about to dereference into a
//! per-thread protection cell; writers that unlink an object retire it
//! instead of freeing it. A retired object is only destroyed by a scan that
//! finds no cell, in any thread, still holding its address.
//!
//! # Components
//!
//! - [`HazardDomain`]: the coordinator. The only way to create hazard pointers;
//!   serializes allocation, retirement and scans on one lock.
//! - [`HazardPointer`]: a capability over one protection cell. `protect` is
//!   lock-free (not wait-free); `retire` hands the protected address off.
//! - [`ProtectionRegistry`]: the swappable storage backend that owns every cell
//!   and retire list and runs the scan. [`MapRegistry`] is the default.
//! - [`ProtectedPtr`]: an owning atomic pointer that loads and replaces its
//!   value through a domain.
//!
//! # Example
//!
//! ```
//! use hazptr_domain::{HazardDomain, ProtectedPtr};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let domain = HazardDomain::builder()
//!     .cells_per_thread(2)
//!     .max_expected_threads(4)
//!     .build();
//! let shared = Arc::new(ProtectedPtr::new(String::from("first"), &domain));
//!
//! let reader = {
//!     let domain = domain.clone();
//!     let shared = Arc::clone(&shared);
//!     thread::spawn(move || {
//!         let mut hp = domain.create().unwrap();
//!         let value = shared.load(&mut hp).unwrap();
//!         assert!(value == "first" || value == "second");
//!     })
//! };
//!
//! shared.store(String::from("second")).unwrap();
//! reader.join().unwrap();
//! domain.reclaim();
//! assert_eq!(domain.pending_count(), 0);
//! ```
//!
//! 基于危险指针的安全内存回收。
//! 读者将即将解引用的地址发布到每线程的保护单元中；摘除对象的写者退休该对象而不是直接释放它。
//! 只有当扫描发现任何线程的任何单元都不再持有其地址时，被退休的对象才会被销毁。

mod domain;
mod error;
mod garbage;
mod hazard;
mod ptr;
mod registry;
mod state;
mod sync;

pub use domain::{HazardDomain, HazardDomainBuilder};
pub use error::{HazardError, HazardResult};
pub use garbage::{Deleter, RetiredRecord};
pub use hazard::{HazardPointer, HazardState};
pub use ptr::ProtectedPtr;
pub use registry::{MapRegistry, ProtectionRegistry};
pub use state::{ProtectionCell, RegistryConfig};

#[cfg(all(test, not(feature = "loom")))]
mod tests;
