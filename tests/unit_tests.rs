//! Unit tests for core RTOS modules
//!
//! These tests run on the host (not embedded target) to verify
//! the core algorithms work correctly.

#[cfg(test)]
mod prio_tests {
    use tickos::config::CFG_PRIO_MAX;
    use tickos::prio::PrioTable;

    #[test]
    fn test_empty_table() {
        let table = PrioTable::new();
        assert!(table.is_empty());
        assert_eq!(table.get_highest(), None);
    }

    #[test]
    fn test_single_priority() {
        let mut table = PrioTable::new();

        table.insert(5);
        assert!(!table.is_empty());
        assert!(table.is_set(5));
        assert!(!table.is_set(4));
        assert_eq!(table.get_highest(), Some(5));

        table.remove(5);
        assert!(table.is_empty());
    }

    #[test]
    fn test_multiple_priorities() {
        let mut table = PrioTable::new();

        // Insert in random order
        table.insert(20);
        table.insert(5);
        table.insert(10);
        table.insert(0);
        table.insert(15);

        // Highest (largest number) should be 20
        assert_eq!(table.get_highest(), Some(20));

        table.remove(20);
        assert_eq!(table.get_highest(), Some(15));

        table.remove(15);
        assert_eq!(table.get_highest(), Some(10));

        table.remove(10);
        assert_eq!(table.get_highest(), Some(5));

        table.remove(5);
        assert_eq!(table.get_highest(), Some(0));

        table.remove(0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_all_priorities() {
        let mut table = PrioTable::new();

        for i in 0..CFG_PRIO_MAX {
            table.insert(i as u8);
        }

        // Remove from most to least urgent
        for i in (0..CFG_PRIO_MAX).rev() {
            assert_eq!(table.get_highest(), Some(i as u8));
            table.remove(i as u8);
        }

        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_insert_remove() {
        let mut table = PrioTable::new();

        table.insert(10);
        table.insert(10);
        assert_eq!(table.get_highest(), Some(10));

        // The bitmap does not count tasks per priority
        table.remove(10);
        assert!(table.is_empty());
    }
}

#[cfg(test)]
mod error_tests {
    use tickos::error::OsError;

    #[test]
    fn test_error_codes() {
        assert_eq!(OsError::QueueFull.code(), 26001);
        assert_eq!(OsError::QueueEmpty.code(), 26002);
        assert_eq!(OsError::SemaphoreOverflow.code(), 28101);
        assert_ne!(OsError::QueueFull, OsError::QueueEmpty);
    }

    #[test]
    fn test_transient_errors() {
        assert!(OsError::QueueFull.is_transient());
        assert!(OsError::DeadlineMissed.is_transient());
        assert!(OsError::NotificationOverwritten.is_transient());

        assert!(!OsError::CalledFromIsr.is_transient());
        assert!(!OsError::PrioInvalid.is_transient());
    }

    #[test]
    fn test_error_debug() {
        // Ensure errors can be formatted for debugging
        let err = OsError::CalledFromIsr;
        let _ = format!("{:?}", err);
    }
}

#[cfg(test)]
mod types_tests {
    use tickos::types::*;

    #[test]
    fn test_task_state_enum() {
        let state = TaskState::Ready;
        assert_eq!(state, TaskState::Ready);
        assert_ne!(state, TaskState::Blocked);
    }

    #[test]
    fn test_pend_status_enum() {
        let status = PendStatus::Ok;
        assert_eq!(status, PendStatus::Ok);
        assert_ne!(status, PendStatus::Timeout);
    }

    #[test]
    fn test_timeouts() {
        assert_eq!(NO_WAIT, 0);
        assert_eq!(WAIT_FOREVER, OsTick::MAX);
    }
}

#[cfg(test)]
mod config_tests {
    use tickos::config::*;

    #[test]
    fn test_config_values() {
        assert!(CFG_PRIO_MAX >= 8, "Need at least 8 priority levels");
        assert!(CFG_PRIO_MAX <= 256, "Too many priority levels");

        assert!(CFG_STK_SIZE_MIN >= 32, "Stack too small");

        assert!(CFG_TICK_RATE_HZ >= 10, "Tick rate too slow");
        assert!(CFG_TICK_RATE_HZ <= 10000, "Tick rate too fast");

        // Idle is the least urgent priority, the timer service the most
        assert_eq!(CFG_PRIO_IDLE, 0);
        assert_eq!(CFG_TIMER_TASK_PRIO as usize, CFG_PRIO_MAX - 1);
    }

    #[test]
    fn test_ms_to_ticks() {
        assert_eq!(tickos::ms_to_ticks(1000), CFG_TICK_RATE_HZ);
    }
}
