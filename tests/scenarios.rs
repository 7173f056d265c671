//! End-to-end kernel scenarios
//!
//! Each test builds a kernel on the host, creates tasks, and drives the
//! clock by hand with `run()` and `advance()`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tickos::*;

fn started(kernel: &Kernel) {
    kernel.start().unwrap();
    kernel.run();
}

#[cfg(test)]
mod queue_tests {
    use super::*;

    #[test]
    fn test_fifo_and_capacity() {
        let k = Kernel::new();
        let q = Queue::<u32, 3>::create(&k, "q").unwrap();
        assert_eq!(q.capacity(), 3);

        for v in 1..=3 {
            q.try_send(v).unwrap();
        }
        assert!(q.is_full());
        assert_eq!(q.try_send(4), Err(OsError::QueueFull));
        assert_eq!(q.peek(), Some(1));

        assert_eq!(q.try_receive(), Ok(1));
        assert_eq!(q.spaces_available(), 1);
        assert_eq!(q.try_receive(), Ok(2));
        assert_eq!(q.try_receive(), Ok(3));
        assert_eq!(q.try_receive(), Err(OsError::QueueEmpty));
    }

    #[test]
    fn test_receive_no_wait_on_empty() {
        let k = Kernel::new();
        let q = Queue::<u32, 2>::create(&k, "q").unwrap();
        let out = Rc::new(Cell::new(None));

        let (rx, o) = (q.clone(), out.clone());
        k.task_create("rx", 5, 128, move |k| async move {
            let r = rx.receive(NO_WAIT).await;
            o.set(Some((r, k.tick_count())));
        })
        .unwrap();

        started(&k);
        assert_eq!(out.get(), Some((Err(OsError::QueueEmpty), 0)));
    }

    #[test]
    fn test_more_urgent_receiver_preempts_sender() {
        let k = Kernel::new();
        let q = Queue::<u32, 4>::create(&k, "q").unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));

        let (rx, l) = (q.clone(), log.clone());
        k.task_create("high", 10, 128, move |_| async move {
            while let Ok(v) = rx.receive(WAIT_FOREVER).await {
                l.borrow_mut().push(format!("high got {v}"));
            }
        })
        .unwrap();

        let (tx, l) = (q.clone(), log.clone());
        k.task_create("low", 5, 128, move |k| async move {
            l.borrow_mut().push("low before".into());
            tx.send(1, NO_WAIT).await.unwrap();
            l.borrow_mut().push("low after".into());
            k.suspend_self().await.unwrap();
        })
        .unwrap();

        started(&k);
        assert_eq!(*log.borrow(), ["low before", "high got 1", "low after"]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_backpressure_released_by_drain() {
        let k = Kernel::new();
        let q = Queue::<u32, 2>::create(&k, "q").unwrap();
        q.try_send(1).unwrap();
        q.try_send(2).unwrap();
        let result = Rc::new(Cell::new(None));
        let drained = Rc::new(Cell::new(0));

        let (tx, r) = (q.clone(), result.clone());
        k.task_create("producer", 5, 128, move |k| async move {
            let sent = tx.send(3, 50).await;
            r.set(Some((sent, k.tick_count())));
        })
        .unwrap();

        let (rx, d) = (q.clone(), drained.clone());
        k.task_create("consumer", 4, 128, move |k| async move {
            k.delay(30).await.unwrap();
            d.set(rx.receive(NO_WAIT).await.unwrap());
        })
        .unwrap();

        started(&k);
        k.advance(29);
        assert_eq!(result.get(), None);

        k.advance(1);
        assert_eq!(result.get(), Some((Ok(()), 30)));
        assert_eq!(drained.get(), 1);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_backpressure_times_out() {
        let k = Kernel::new();
        let q = Queue::<u32, 1>::create(&k, "q").unwrap();
        q.try_send(1).unwrap();
        let result = Rc::new(Cell::new(None));

        let (tx, r) = (q.clone(), result.clone());
        k.task_create("producer", 5, 128, move |k| async move {
            let sent = tx.send(2, 50).await;
            r.set(Some((sent, k.tick_count())));
        })
        .unwrap();

        started(&k);
        k.advance(49);
        assert_eq!(result.get(), None);

        k.advance(1);
        assert_eq!(result.get(), Some((Err(OsError::QueueFull), 50)));
        assert_eq!(q.peek(), Some(1));
    }

    #[test]
    fn test_task_calls_rejected_in_isr() {
        let k = Kernel::new();
        let q = Queue::<u32, 2>::create(&k, "q").unwrap();

        k.interrupt(|isr| {
            assert_eq!(q.try_send(1), Err(OsError::CalledFromIsr));
            q.send_from_isr(isr, 1).unwrap();
            assert!(!isr.higher_priority_task_woken());
        });
        assert_eq!(q.try_receive(), Ok(1));
    }

    #[test]
    fn test_long_timeout_blocks() {
        let k = Kernel::new();
        let q = Queue::<u32, 1>::create(&k, "q").unwrap();
        q.try_send(1).unwrap();
        let result = Rc::new(Cell::new(None));

        let (tx, r) = (q.clone(), result.clone());
        let producer = k
            .task_create("producer", 5, 128, move |k| async move {
                let sent = tx.send(2, 0xC000_0000).await;
                r.set(Some((sent, k.tick_count())));
            })
            .unwrap();

        started(&k);
        k.advance(100);
        assert_eq!(result.get(), None);
        assert_eq!(k.task_state(producer), Ok(TaskState::Blocked));

        assert_eq!(q.try_receive(), Ok(1));
        k.run();
        assert_eq!(result.get(), Some((Ok(()), 100)));
        assert_eq!(q.peek(), Some(2));
    }
}

#[cfg(test)]
mod sem_tests {
    use super::*;

    /// Give `n` tokens from an interrupt through the channel interface
    fn pump<C: IsrChannel<Item = ()>>(chan: &C, isr: &mut IsrContext<'_>, n: usize) {
        for _ in 0..n {
            chan.send_from_isr(isr, ()).unwrap();
        }
    }

    #[test]
    fn test_binary_give_is_idempotent() {
        let k = Kernel::new();
        let sem = Semaphore::binary(&k, "bin").unwrap();
        assert_eq!(sem.count(), 0);

        sem.try_give().unwrap();
        sem.try_give().unwrap();
        assert_eq!(sem.count(), 1);

        assert_eq!(sem.try_take(), Ok(()));
        assert_eq!(sem.try_take(), Err(OsError::QueueEmpty));
    }

    #[test]
    fn test_counting_overflow() {
        let k = Kernel::new();
        let sem = Semaphore::counting(&k, "cnt", 3, 0).unwrap();

        for _ in 0..3 {
            sem.try_give().unwrap();
        }
        assert_eq!(sem.try_give(), Err(OsError::SemaphoreOverflow));
        assert_eq!(sem.count(), 3);

        for _ in 0..3 {
            sem.try_take().unwrap();
        }
        assert_eq!(sem.try_take(), Err(OsError::QueueEmpty));

        assert_eq!(
            Semaphore::counting(&k, "bad", 2, 3).err(),
            Some(OsError::SemInvalidMax)
        );
    }

    #[test]
    fn test_isr_hand_off() {
        let k = Kernel::new();
        let sem = Semaphore::counting(&k, "irq", 3, 0).unwrap();
        let events = Rc::new(Cell::new(0u32));

        let (s, e) = (sem.clone(), events.clone());
        k.task_create("consumer", 10, 128, move |_| async move {
            loop {
                s.take(WAIT_FOREVER).await.unwrap();
                e.set(e.get() + 1);
            }
        })
        .unwrap();

        started(&k);
        assert_eq!(events.get(), 0);

        let woken = k.interrupt(|isr| {
            pump(&sem, isr, 3);
            isr.higher_priority_task_woken()
        });
        assert!(woken);
        assert!(k.switch_pending());

        k.run();
        assert_eq!(events.get(), 3);
        assert_eq!(sem.count(), 0);
        assert_eq!(k.stats().isr_switch_requests, 1);
    }

    #[test]
    fn test_take_times_out() {
        let k = Kernel::new();
        let sem = Semaphore::binary(&k, "bin").unwrap();
        let result = Rc::new(Cell::new(None));

        let (s, r) = (sem.clone(), result.clone());
        k.task_create("waiter", 5, 128, move |k| async move {
            let taken = s.take(10).await;
            r.set(Some((taken, k.tick_count())));
        })
        .unwrap();

        started(&k);
        k.advance(10);
        assert_eq!(result.get(), Some((Err(OsError::QueueEmpty), 10)));
    }

    #[test]
    fn test_give_after_timeout_is_taken() {
        let k = Kernel::new();
        let sem = Semaphore::binary(&k, "bin").unwrap();
        let result = Rc::new(Cell::new(None));

        let (s, r) = (sem.clone(), result.clone());
        k.task_create("waiter", 5, 128, move |k| async move {
            let taken = s.take(10).await;
            r.set(Some((taken, k.tick_count())));
        })
        .unwrap();

        started(&k);
        k.advance(9);
        assert_eq!(result.get(), None);

        // The timeout readies the waiter; the give lands before it runs
        k.tick();
        k.interrupt(|isr| sem.give_from_isr(isr).unwrap());
        assert_eq!(sem.count(), 1);

        k.run();
        assert_eq!(result.get(), Some((Ok(()), 10)));
        assert_eq!(sem.count(), 0);
    }
}

#[cfg(test)]
mod notify_tests {
    use super::*;

    #[test]
    fn test_set_bits_releases_waiter() {
        let k = Kernel::new();
        let got = Rc::new(Cell::new(None));

        let g = got.clone();
        let waiter = k
            .task_create("waiter", 5, 128, move |k| async move {
                g.set(Some(k.notify_wait(0, u32::MAX, WAIT_FOREVER).await));
            })
            .unwrap();

        started(&k);
        assert_eq!(got.get(), None);

        k.try_notify(waiter, NotifyAction::SetBits(0b100)).unwrap();
        k.try_notify(waiter, NotifyAction::SetBits(0b001)).unwrap();
        k.run();
        assert_eq!(got.get(), Some(Ok(0b101)));
    }

    #[test]
    fn test_without_overwrite_keeps_pending_value() {
        let k = Kernel::new();
        let got = Rc::new(Cell::new(None));

        let g = got.clone();
        let task = k
            .task_create("reader", 5, 128, move |k| async move {
                k.delay(10).await.unwrap();
                g.set(Some(k.notify_wait(0, 0, NO_WAIT).await));
            })
            .unwrap();

        started(&k);
        k.try_notify(task, NotifyAction::SetValueWithoutOverwrite(7)).unwrap();
        assert_eq!(
            k.try_notify(task, NotifyAction::SetValueWithoutOverwrite(8)),
            Err(OsError::NotificationOverwritten)
        );

        k.advance(10);
        assert_eq!(got.get(), Some(Ok(7)));
    }

    #[test]
    fn test_wait_times_out() {
        let k = Kernel::new();
        let got = Rc::new(Cell::new(None));

        let g = got.clone();
        k.task_create("waiter", 5, 128, move |k| async move {
            let r = k.notify_wait(0, 0, 20).await;
            g.set(Some((r, k.tick_count())));
        })
        .unwrap();

        started(&k);
        k.advance(19);
        assert_eq!(got.get(), None);
        k.advance(1);
        assert_eq!(got.get(), Some((Err(OsError::DeadlineMissed), 20)));
    }

    #[test]
    fn test_give_from_isr_counts() {
        let k = Kernel::new();
        let takes = Rc::new(RefCell::new(Vec::new()));

        let t = takes.clone();
        let task = k
            .task_create("counter", 5, 128, move |k| async move {
                while let Ok(v) = k.notify_take(false, WAIT_FOREVER).await {
                    t.borrow_mut().push(v);
                }
            })
            .unwrap();

        started(&k);
        k.interrupt(|isr| {
            k.notify_give_from_isr(isr, task).unwrap();
            k.notify_give_from_isr(isr, task).unwrap();
        });
        k.run();

        // Each take returns the count before it was decremented
        assert_eq!(*takes.borrow(), [2, 1]);
    }

    #[test]
    fn test_increment_and_overwrite() {
        let k = Kernel::new();
        let got = Rc::new(RefCell::new(Vec::new()));

        let g = got.clone();
        let task = k
            .task_create("reader", 5, 128, move |k| async move {
                for _ in 0..2 {
                    let v = k.notify_wait(0, u32::MAX, WAIT_FOREVER).await;
                    g.borrow_mut().push(v);
                }
            })
            .unwrap();

        started(&k);
        for _ in 0..3 {
            k.try_notify(task, NotifyAction::Increment).unwrap();
        }
        k.run();

        k.try_notify(task, NotifyAction::SetValueWithOverwrite(40)).unwrap();
        k.try_notify(task, NotifyAction::SetValueWithOverwrite(42)).unwrap();
        k.run();

        assert_eq!(*got.borrow(), [Ok(3), Ok(42)]);
    }
}

#[cfg(test)]
mod sched_tests {
    use super::*;

    #[test]
    fn test_round_robin_among_equals() {
        let k = Kernel::new();
        let counts = Rc::new([Cell::new(0u32), Cell::new(0u32)]);

        for (i, name) in ["a", "b"].into_iter().enumerate() {
            let c = counts.clone();
            k.task_create(name, 5, 128, move |k| async move {
                loop {
                    c[i].set(c[i].get() + 1);
                    k.yield_now().await.unwrap();
                }
            })
            .unwrap();
        }

        started(&k);
        k.advance(4);
        assert_eq!(counts[0].get(), 5);
        assert_eq!(counts[1].get(), 5);
    }

    #[test]
    fn test_suspend_and_resume() {
        let k = Kernel::new();
        let runs = Rc::new(Cell::new(0u32));

        let r = runs.clone();
        let task = k
            .task_create("ticker", 5, 128, move |k| async move {
                loop {
                    r.set(r.get() + 1);
                    k.delay(1).await.unwrap();
                }
            })
            .unwrap();

        started(&k);
        assert_eq!(runs.get(), 1);

        k.task_suspend(task).unwrap();
        k.advance(5);
        assert_eq!(runs.get(), 1);
        assert_eq!(k.task_state(task), Ok(TaskState::Suspended));

        k.try_task_resume(task).unwrap();
        k.run();
        assert_eq!(runs.get(), 2);
        assert_eq!(k.try_task_resume(task), Err(OsError::TaskNotSuspended));
    }

    #[test]
    fn test_returning_task_is_deleted() {
        let k = Kernel::new();
        let task = k.task_create("once", 5, 128, |_| async {}).unwrap();

        started(&k);
        assert_eq!(k.task_state(task), Ok(TaskState::Deleted));
        assert_eq!(k.task_name(task), Err(OsError::TaskInvalid));
    }

    #[test]
    fn test_create_rejects_bad_arguments() {
        let k = Kernel::new();
        assert_eq!(
            k.task_create("p", CFG_PRIO_MAX as OsPrio, 128, |_| async {}),
            Err(OsError::PrioInvalid)
        );
        assert_eq!(
            k.task_create("s", 5, CFG_STK_SIZE_MIN - 1, |_| async {}),
            Err(OsError::StkSizeInvalid)
        );
    }

    #[test]
    fn test_delay_until_keeps_period() {
        let k = Kernel::new();
        let wakes = Rc::new(RefCell::new(Vec::new()));

        let w = wakes.clone();
        k.task_create("periodic", 5, 128, move |k| async move {
            let mut last = k.tick_count();
            for _ in 0..3 {
                k.delay_until(&mut last, 10).await.unwrap();
                w.borrow_mut().push(k.tick_count());
            }
        })
        .unwrap();

        started(&k);
        k.advance(35);
        assert_eq!(*wakes.borrow(), [10, 20, 30]);
    }

    #[test]
    fn test_lower_priority_runs_when_higher_blocks() {
        let k = Kernel::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        k.task_create("high", 8, 128, move |k| async move {
            l.borrow_mut().push("high");
            k.delay(5).await.unwrap();
            l.borrow_mut().push("high again");
        })
        .unwrap();

        let l = log.clone();
        k.task_create("low", 3, 128, move |k| async move {
            l.borrow_mut().push("low");
            k.suspend_self().await.unwrap();
        })
        .unwrap();

        started(&k);
        assert_eq!(*log.borrow(), ["high", "low"]);
        assert_eq!(k.tick_count(), 0);

        k.advance(5);
        assert_eq!(*log.borrow(), ["high", "low", "high again"]);
    }

    #[test]
    fn test_deleted_handle_stays_invalid() {
        let k = Kernel::new();
        let old = k.task_create("old", 5, 128, |_| async {}).unwrap();

        started(&k);
        assert_eq!(k.task_state(old), Ok(TaskState::Deleted));

        let new = k
            .task_create("new", 5, 128, |k| async move {
                k.suspend_self().await.unwrap();
            })
            .unwrap();
        assert_ne!(old, new);
        assert_eq!(k.task_name(old), Err(OsError::TaskInvalid));
        assert_eq!(
            k.try_notify(old, NotifyAction::Increment),
            Err(OsError::TaskInvalid)
        );
        assert_eq!(k.task_name(new), Ok("new"));
    }

    #[test]
    fn test_idle_hook_runs_only_when_idle() {
        let k = Kernel::new();
        let calls = Rc::new(Cell::new(0u32));

        let c = calls.clone();
        k.set_idle_hook(move || c.set(c.get() + 1));

        let busy = k
            .task_create("busy", 5, 128, |k| async move {
                loop {
                    k.yield_now().await.unwrap();
                }
            })
            .unwrap();

        // The dispatcher stops on a task that already yielded this tick
        started(&k);
        assert_eq!(calls.get(), 0);

        k.task_suspend(busy).unwrap();
        k.run();
        assert_eq!(calls.get(), 1);
    }
}

#[cfg(test)]
mod mutex_tests {
    use super::*;

    #[test]
    fn test_priority_inheritance() {
        let k = Kernel::new();
        let m = Mutex::create(&k, "res", 0u32).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));

        let (mh, l) = (m.clone(), log.clone());
        k.task_create("high", 8, 128, move |k| async move {
            k.delay(1).await.unwrap();
            let mut g = mh.lock(WAIT_FOREVER).await.unwrap();
            *g += 1;
            l.borrow_mut().push("high");
        })
        .unwrap();

        let (ml, l) = (m.clone(), log.clone());
        let low = k
            .task_create("low", 2, 128, move |k| async move {
                let g = ml.lock(WAIT_FOREVER).await.unwrap();
                k.delay(10).await.unwrap();
                g.unlock().await;
                l.borrow_mut().push("low");
                k.suspend_self().await.unwrap();
            })
            .unwrap();

        started(&k);
        assert_eq!(m.owner(), Some(low));

        k.advance(1);
        assert_eq!(k.task_priority(low), Ok(8));
        assert_eq!(m.owner_prio(), Some(8));

        k.advance(9);
        assert_eq!(*log.borrow(), ["high", "low"]);
        assert_eq!(k.task_priority(low), Ok(2));
        assert!(!m.is_owned());
    }

    #[test]
    fn test_try_lock_busy() {
        let k = Kernel::new();
        let m = Mutex::create(&k, "res", ()).unwrap();
        let result = Rc::new(Cell::new(None));

        let (m1, r) = (m.clone(), result.clone());
        k.task_create("holder", 5, 128, move |k| async move {
            let _g = m1.lock(NO_WAIT).await.unwrap();
            r.set(Some(m1.try_lock().err()));
            k.suspend_self().await.unwrap();
        })
        .unwrap();

        started(&k);
        assert_eq!(result.get(), Some(Some(OsError::MutexOwner)));
    }

    #[test]
    fn test_waiter_timeout_drops_inheritance() {
        let k = Kernel::new();
        let m = Mutex::create(&k, "res", ()).unwrap();
        let result = Rc::new(Cell::new(None));

        let (mh, r) = (m.clone(), result.clone());
        k.task_create("high", 8, 128, move |k| async move {
            k.delay(1).await.unwrap();
            let locked = mh.lock(10).await;
            r.set(Some((locked.err(), k.tick_count())));
        })
        .unwrap();

        let ml = m.clone();
        let low = k
            .task_create("low", 2, 128, move |k| async move {
                let _g = ml.lock(WAIT_FOREVER).await.unwrap();
                k.suspend_self().await.unwrap();
            })
            .unwrap();

        started(&k);
        k.advance(1);
        assert_eq!(k.task_priority(low), Ok(8));

        k.advance(10);
        assert_eq!(result.get(), Some((Some(OsError::DeadlineMissed), 11)));
        assert_eq!(k.task_priority(low), Ok(2));
        assert_eq!(m.owner(), Some(low));
    }
}

#[cfg(test)]
mod event_tests {
    use super::*;

    #[test]
    fn test_sync_rendezvous() {
        let k = Kernel::new();
        let ev = EventGroup::create(&k, "sync").unwrap();
        let results = Rc::new(RefCell::new(Vec::new()));

        for (bit, prio) in [(0b001, 5), (0b010, 6), (0b100, 7)] {
            let (e, r) = (ev.clone(), results.clone());
            k.task_create("party", prio, 128, move |_| async move {
                let v = e.sync(bit, 0b111, WAIT_FOREVER).await.unwrap();
                r.borrow_mut().push(v);
            })
            .unwrap();
        }

        started(&k);
        assert_eq!(*results.borrow(), [0b111, 0b111, 0b111]);
        assert_eq!(ev.bits(), 0);
    }

    #[test]
    fn test_wait_any_from_isr() {
        let k = Kernel::new();
        let ev = EventGroup::create(&k, "flags").unwrap();
        let got = Rc::new(Cell::new(None));

        let (e, g) = (ev.clone(), got.clone());
        k.task_create("waiter", 5, 128, move |_| async move {
            g.set(Some(e.wait_bits(0b0110, true, false, WAIT_FOREVER).await));
        })
        .unwrap();

        started(&k);
        k.interrupt(|isr| ev.set_bits_from_isr(isr, 0b1100).unwrap());
        k.run();

        assert_eq!(got.get(), Some(Ok(0b1100)));
        assert_eq!(ev.bits(), 0b1000);
    }

    #[test]
    fn test_wait_all_needs_every_bit() {
        let k = Kernel::new();
        let ev = EventGroup::create(&k, "flags").unwrap();
        let got = Rc::new(Cell::new(None));

        let (e, g) = (ev.clone(), got.clone());
        k.task_create("waiter", 5, 128, move |_| async move {
            g.set(Some(e.wait_bits(0b011, true, true, WAIT_FOREVER).await));
        })
        .unwrap();

        started(&k);
        assert_eq!(ev.try_set_bits(0b001), Ok(0b001));
        k.run();
        assert_eq!(got.get(), None);

        assert_eq!(ev.try_set_bits(0b110), Ok(0b100));
        k.run();
        assert_eq!(got.get(), Some(Ok(0b111)));
        assert_eq!(ev.bits(), 0b100);
    }
}

#[cfg(test)]
mod timer_tests {
    use super::*;

    fn counting_timer(k: &Kernel, mode: TimerMode, fired: &Rc<Cell<u32>>) -> Timer {
        let f = fired.clone();
        Timer::create(k, "tmr", 100, mode, move |_| f.set(f.get() + 1)).unwrap()
    }

    #[test]
    fn test_one_shot_fires_at_period() {
        let k = Kernel::new();
        let fired = Rc::new(Cell::new(0));
        let at = Rc::new(Cell::new(None));

        let (f, a) = (fired.clone(), at.clone());
        let tmr = Timer::create(&k, "once", 100, TimerMode::OneShot, move |t| {
            f.set(f.get() + 1);
            a.set(Some(t.kernel().tick_count()));
        })
        .unwrap();

        started(&k);
        tmr.try_start().unwrap();
        k.run();
        assert!(tmr.is_active());
        assert_eq!(tmr.expiry(), Some(100));

        k.advance(99);
        assert_eq!(fired.get(), 0);

        k.advance(1);
        assert_eq!(fired.get(), 1);
        assert_eq!(at.get(), Some(100));
        assert!(!tmr.is_active());

        k.advance(200);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_auto_reload_fires_each_period() {
        let k = Kernel::new();
        let fired = Rc::new(Cell::new(0));
        let tmr = counting_timer(&k, TimerMode::AutoReload, &fired);

        started(&k);
        tmr.try_start().unwrap();
        k.advance(350);
        assert_eq!(fired.get(), 3);
        assert_eq!(tmr.expiry(), Some(400));
    }

    #[test]
    fn test_stop_and_restart_from_isr() {
        let k = Kernel::new();
        let fired = Rc::new(Cell::new(0));
        let tmr = counting_timer(&k, TimerMode::OneShot, &fired);

        started(&k);
        tmr.try_start().unwrap();
        k.advance(50);
        tmr.try_stop().unwrap();
        k.advance(100);
        assert_eq!(fired.get(), 0);
        assert!(!tmr.is_active());

        // Restarted at tick 150
        k.interrupt(|isr| tmr.start_from_isr(isr).unwrap());
        k.run();
        k.advance(99);
        assert_eq!(fired.get(), 0);
        k.advance(1);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_invalid_period_and_delete() {
        let k = Kernel::new();
        assert_eq!(
            Timer::create(&k, "zero", 0, TimerMode::OneShot, |_| {}).err(),
            Some(OsError::TmrInvalidPeriod)
        );

        let fired = Rc::new(Cell::new(0));
        let tmr = counting_timer(&k, TimerMode::AutoReload, &fired);
        assert_eq!(tmr.try_change_period(0), Err(OsError::TmrInvalidPeriod));

        started(&k);
        tmr.try_start().unwrap();
        tmr.try_delete().unwrap();
        k.run();
        assert_eq!(tmr.try_start(), Err(OsError::TmrInvalid));

        k.advance(300);
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn test_reset_restarts_period() {
        let k = Kernel::new();
        let fired = Rc::new(Cell::new(0));
        let tmr = counting_timer(&k, TimerMode::OneShot, &fired);

        started(&k);
        tmr.try_start().unwrap();
        k.run();

        k.advance(60);
        tmr.try_reset().unwrap();
        k.run();
        assert_eq!(tmr.expiry(), Some(160));

        k.advance(99);
        assert_eq!(fired.get(), 0);
        k.advance(1);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_change_period_rearms_from_now() {
        let k = Kernel::new();
        let fired = Rc::new(Cell::new(0));
        let tmr = counting_timer(&k, TimerMode::AutoReload, &fired);

        started(&k);
        tmr.try_start().unwrap();
        k.advance(150);
        assert_eq!(fired.get(), 1);

        tmr.try_change_period(30).unwrap();
        k.run();
        assert_eq!(tmr.period(), Ok(30));
        assert_eq!(tmr.expiry(), Some(180));

        // 180, 210 and 240
        k.advance(90);
        assert_eq!(fired.get(), 4);
    }

    #[test]
    fn test_command_queue_full() {
        let k = Kernel::new();
        let fired = Rc::new(Cell::new(0));
        let tmr = counting_timer(&k, TimerMode::OneShot, &fired);

        started(&k);
        for _ in 0..CFG_TIMER_QUEUE_LEN {
            tmr.try_start().unwrap();
        }
        assert_eq!(tmr.try_start(), Err(OsError::QueueFull));
        assert_eq!(tmr.try_stop(), Err(OsError::QueueFull));

        k.run();
        assert!(tmr.is_active());
        assert_eq!(tmr.expiry(), Some(100));
        tmr.try_stop().unwrap();
    }

    #[test]
    fn test_deleted_slots_are_recycled() {
        let k = Kernel::new();
        let fired = Rc::new(Cell::new(0));
        started(&k);

        let old: Vec<Timer> = (0..CFG_TIMER_MAX)
            .map(|_| counting_timer(&k, TimerMode::OneShot, &fired))
            .collect();
        assert_eq!(
            Timer::create(&k, "extra", 10, TimerMode::OneShot, |_| {}).err(),
            Some(OsError::ResourceCreationFailed)
        );

        for tmr in &old {
            tmr.try_delete().unwrap();
        }
        k.run();

        let fresh = counting_timer(&k, TimerMode::OneShot, &fired);
        fresh.try_start().unwrap();
        k.run();

        // Old handles never reach the timer now living in their slot
        for tmr in &old {
            assert_eq!(tmr.try_start(), Err(OsError::TmrInvalid));
            assert_eq!(tmr.period(), Err(OsError::TmrInvalid));
            assert!(!tmr.is_active());
        }
        assert!(fresh.is_active());

        k.advance(100);
        assert_eq!(fired.get(), 1);
    }
}

#[cfg(test)]
mod port_tests {
    use super::*;

    /// One tick elapses between any two dispatches
    struct BusyClock;

    impl Port for BusyClock {
        fn wait_for_interrupt(&mut self) {}

        fn take_ticks(&mut self) -> OsTick {
            1
        }
    }

    #[test]
    fn test_tick_wakes_urgent_task_during_busy_exchange() {
        const ROUNDS: u32 = 1000;

        let k = Kernel::new();
        let ping = Queue::<u32, 1>::create(&k, "ping").unwrap();
        let pong = Queue::<u32, 1>::create(&k, "pong").unwrap();
        let exchanged = Rc::new(Cell::new(0u32));
        let woke = Rc::new(Cell::new(None));

        let (x, w) = (exchanged.clone(), woke.clone());
        k.task_create("high", 10, 128, move |k| async move {
            let t0 = k.tick_count();
            k.delay(5).await.unwrap();
            w.set(Some((x.get(), k.tick_count() - t0)));
        })
        .unwrap();

        let (tx, rx, x) = (ping.clone(), pong.clone(), exchanged.clone());
        k.task_create("a", 5, 128, move |_| async move {
            for i in 0..ROUNDS {
                tx.send(i, WAIT_FOREVER).await.unwrap();
                rx.receive(WAIT_FOREVER).await.unwrap();
                x.set(x.get() + 1);
            }
        })
        .unwrap();

        let (rx, tx) = (ping.clone(), pong.clone());
        k.task_create("b", 5, 128, move |_| async move {
            for _ in 0..ROUNDS {
                let v = rx.receive(WAIT_FOREVER).await.unwrap();
                tx.send(v, WAIT_FOREVER).await.unwrap();
            }
        })
        .unwrap();

        k.start().unwrap();
        k.run_with(&mut BusyClock);

        let (seen, slept) = woke.get().unwrap();
        assert_eq!(slept, 5);
        assert!(seen < 10, "woke only after {seen} exchanges");
        assert_eq!(exchanged.get(), ROUNDS);
    }

    /// Board with one peripheral interrupt on line 3
    struct Board {
        latch: Rc<IrqLatch>,
        data_ready: Semaphore,
    }

    impl Port for Board {
        fn wait_for_interrupt(&mut self) {}

        fn take_ticks(&mut self) -> OsTick {
            1
        }

        fn dispatch_irqs(&mut self, isr: &mut IsrContext<'_>) {
            if self.latch.take() & (1 << 3) != 0 {
                self.data_ready.give_from_isr(isr).unwrap();
            }
        }
    }

    #[test]
    fn test_latched_irq_runs_before_interrupted_task_resumes() {
        let k = Kernel::new();
        let latch = Rc::new(IrqLatch::new());
        let sem = Semaphore::binary(&k, "rdy").unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));

        let (s, l) = (sem.clone(), log.clone());
        k.task_create("handler", 10, 128, move |_| async move {
            loop {
                s.take(WAIT_FOREVER).await.unwrap();
                l.borrow_mut().push("irq");
            }
        })
        .unwrap();

        let (irq, l) = (latch.clone(), log.clone());
        k.task_create("worker", 5, 128, move |k| async move {
            l.borrow_mut().push("pend");
            irq.pend(3);
            k.yield_now().await.unwrap();
            l.borrow_mut().push("resumed");
        })
        .unwrap();

        let mut board = Board {
            latch,
            data_ready: sem,
        };
        k.start().unwrap();
        k.run_with(&mut board);

        assert_eq!(*log.borrow(), ["pend", "irq", "resumed"]);
        assert_eq!(k.stats().isr_switch_requests, 1);
    }
}
