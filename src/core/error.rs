//! Error types
//!
//! Every kernel failure is returned as an [`OsError`]; nothing on a failure
//! path panics.

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum OsError {
    // ============ Resource errors ============
    /// Task, wait-list or timer pool exhausted
    ResourceCreationFailed = 10001,

    // ============ ISR errors ============
    /// Function cannot be called from ISR
    CalledFromIsr = 12001,

    // ============ Mutex errors ============
    /// Caller is not the mutex owner
    MutexNotOwner = 22401,
    /// Task already owns the mutex
    MutexOwner = 22402,

    // ============ Notification errors ============
    /// A notification value was still pending and overwriting was forbidden
    NotificationOverwritten = 23001,

    // ============ OS state errors ============
    /// OS is not running
    OsNotRunning = 24201,
    /// OS is already running
    OsRunning = 24202,
    /// Blocking call made outside of a task
    NotInTask = 24205,

    // ============ Pend errors ============
    /// A blocking wait timed out
    DeadlineMissed = 25009,

    // ============ Priority errors ============
    /// Invalid priority
    PrioInvalid = 25203,

    // ============ Queue errors ============
    /// Queue is full
    QueueFull = 26001,
    /// Queue is empty
    QueueEmpty = 26002,
    /// Queue capacity of zero
    QueueSizeInvalid = 26003,

    // ============ Semaphore errors ============
    /// Semaphore overflow
    SemaphoreOverflow = 28101,
    /// Maximum count of zero, or initial count above it
    SemInvalidMax = 28102,

    // ============ State errors ============
    /// Invalid stack size
    StkSizeInvalid = 28208,

    // ============ Task errors ============
    /// Cannot delete idle task
    TaskDelIdle = 29004,
    /// Invalid task
    TaskInvalid = 29007,
    /// Task is not suspended
    TaskNotSuspended = 29011,
    /// Operation not allowed on the calling task itself
    TaskRunning = 29016,
    /// Cannot suspend idle task
    TaskSuspendIdle = 29019,

    // ============ Timer errors ============
    /// Invalid timer handle
    TmrInvalid = 29502,
    /// Invalid timer period
    TmrInvalidPeriod = 29504,
}

/// Result type alias for kernel operations
pub type OsResult<T> = Result<T, OsError>;

impl OsError {
    /// Numeric error code
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Whether the error is an expected outcome of a non-blocking or timed
    /// call rather than a usage error
    #[inline]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            OsError::QueueFull
                | OsError::QueueEmpty
                | OsError::DeadlineMissed
                | OsError::NotificationOverwritten
                | OsError::SemaphoreOverflow
        )
    }
}
