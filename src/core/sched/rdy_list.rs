//! Ready list - doubly linked list of TCBs at a given priority
//!
//! Each priority level has its own ready list. Tasks are added to the
//! tail (FIFO for round-robin) and scheduled from the head.

use crate::task::Tcb;
use crate::types::TaskHandle;

/// Ready list for a single priority level
///
/// Doubly-linked list of tasks ready to run at this priority, threaded
/// through the `next`/`prev` fields of the TCBs in the task arena.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ReadyList {
    head: Option<TaskHandle>,
    tail: Option<TaskHandle>,
    count: usize,
}

impl ReadyList {
    /// Create a new empty ready list
    pub const fn new() -> Self {
        ReadyList {
            head: None,
            tail: None,
            count: 0,
        }
    }

    /// Get head of list (first to be scheduled)
    #[inline]
    pub fn head(&self) -> Option<TaskHandle> {
        self.head
    }

    /// Get tail of list
    #[cfg(test)]
    pub fn tail(&self) -> Option<TaskHandle> {
        self.tail
    }

    /// Check if list is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Insert TCB at the tail of the list (FIFO order)
    ///
    /// The task must not already be in a ready list.
    pub fn insert_tail(&mut self, tasks: &mut [Tcb], id: TaskHandle) {
        let tcb = &mut tasks[id.index()];
        tcb.next = None;
        tcb.prev = self.tail;

        match self.tail {
            // List not empty - link from current tail
            Some(tail) => tasks[tail.index()].next = Some(id),
            // List is empty - this becomes head
            None => self.head = Some(id),
        }

        self.tail = Some(id);
        self.count += 1;
    }

    /// Remove a TCB from the list
    ///
    /// The task must be in this list.
    pub fn remove(&mut self, tasks: &mut [Tcb], id: TaskHandle) {
        let (prev, next) = {
            let tcb = &tasks[id.index()];
            (tcb.prev, tcb.next)
        };

        match prev {
            Some(p) => tasks[p.index()].next = next,
            // This was the head
            None => self.head = next,
        }

        match next {
            Some(n) => tasks[n.index()].prev = prev,
            // This was the tail
            None => self.tail = prev,
        }

        let tcb = &mut tasks[id.index()];
        tcb.prev = None;
        tcb.next = None;

        self.count = self.count.saturating_sub(1);
    }

    /// Move the head to the tail
    ///
    /// Returns `true` if the order changed.
    pub fn rotate(&mut self, tasks: &mut [Tcb]) -> bool {
        match self.head {
            Some(head) if self.count > 1 => {
                self.remove(tasks, head);
                self.insert_tail(tasks, head);
                true
            }
            _ => false,
        }
    }

    /// Iterate over the list from head to tail
    #[cfg(test)]
    pub fn iter<'a>(&self, tasks: &'a [Tcb]) -> impl Iterator<Item = TaskHandle> + 'a {
        let mut cur = self.head;
        core::iter::from_fn(move || {
            let id = cur?;
            cur = tasks[id.index()].next;
            Some(id)
        })
    }
}
