use thiserror::Error;

/// Errors reported by a hazard pointer domain.
///
/// All errors are local to the failing call; nothing is retried internally.
///
/// # Examples
///
/// ```
/// use hazptr_domain::{HazardDomain, HazardError};
///
/// let domain = HazardDomain::builder().cells_per_thread(1).build();
/// let _held = domain.create().unwrap();
///
/// assert_eq!(
///     domain.create().unwrap_err(),
///     HazardError::ResourceExhausted { capacity: 1 }
/// );
/// ```
///
/// 危险指针域报告的错误。
/// 所有错误都只影响失败的调用本身，内部不会重试。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HazardError {
    /// The calling thread already holds `capacity` live hazard pointers.
    /// 调用线程已经持有 `capacity` 个存活的危险指针。
    #[error("thread already holds {capacity} live hazard pointers")]
    ResourceExhausted { capacity: usize },
    /// A registry swap was attempted while handles from the current registry are alive.
    /// 在当前注册表仍有存活句柄时尝试替换注册表。
    #[error("cannot swap the protection registry while {outstanding} hazard pointers are outstanding")]
    BackendInUse { outstanding: usize },
}

/// Result type for domain operations.
pub type HazardResult<T> = Result<T, HazardError>;
