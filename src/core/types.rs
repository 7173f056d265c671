//! Core type definitions
//!
//! These types provide strong typing for kernel primitives.

/// Task priority (higher value = more urgent, 0 is shared with the idle task)
pub type OsPrio = u8;

/// Tick counter type
pub type OsTick = u32;

/// Semaphore counter type
pub type OsSemCtr = u32;

/// Nesting counter
pub type OsNestingCtr = u8;

/// Event flags type
pub type OsFlags = u32;

/// Direct notification word
pub type OsNotifyValue = u32;

/// Timeout that never blocks
pub const NO_WAIT: OsTick = 0;

/// Timeout that blocks until the operation can complete
pub const WAIT_FOREVER: OsTick = OsTick::MAX;

/// Stable handle to a task: an index into the kernel's task arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskHandle(pub(crate) u16);

impl TaskHandle {
    /// Arena slot of this task
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle to a list of tasks waiting on a kernel object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WaitListId(pub(crate) u16);

impl WaitListId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Task state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TaskState {
    /// Task is ready to run
    Ready = 0,
    /// Task is the one currently executing
    Running = 1,
    /// Task is delayed or pending on a kernel object
    Blocked = 2,
    /// Task is suspended
    Suspended = 3,
    /// Task is blocked and suspended
    BlockedSuspended = 4,
    /// Task was deleted
    Deleted = 5,
}

/// What a blocked task is pending on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendOn {
    /// Plain delay
    Nothing,
    /// A queue, semaphore, mutex or event group wait list
    Object(WaitListId),
    /// The task's own notification word
    Notification,
}

/// Pend status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PendStatus {
    /// Pend succeeded
    Ok = 0,
    /// Still waiting
    Pending = 1,
    /// Timeout occurred
    Timeout = 2,
}

/// How a notification merges into the receiving task's notification word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NotifyAction {
    /// Only mark a notification as pending
    NoAction,
    /// OR the bits into the current value
    SetBits(OsNotifyValue),
    /// Add one to the current value
    Increment,
    /// Replace the current value
    SetValueWithOverwrite(OsNotifyValue),
    /// Replace the current value, failing if one is still pending
    SetValueWithoutOverwrite(OsNotifyValue),
}

/// Notification state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum NotifyState {
    NotWaiting = 0,
    Waiting = 1,
    Received = 2,
}

/// Software timer mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerMode {
    /// Fires once, then becomes dormant
    OneShot,
    /// Re-arms itself every period
    AutoReload,
}

/// What a counting semaphore does when given at its maximum count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OverflowPolicy {
    /// Report [`OsError::SemaphoreOverflow`](crate::OsError::SemaphoreOverflow)
    Fail,
    /// Silently keep the count at its maximum
    Drop,
}
