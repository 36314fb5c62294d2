use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use crate::error::{Error, Result};

/// Work item executed on the loop thread with exclusive access to the
/// actor's state.
pub type LoopTask<C> = Box<dyn FnOnce(&mut C) + Send>;

struct QueueState<C> {
    events: VecDeque<LoopTask<C>>,
    timers: VecDeque<LoopTask<C>>,
    running: bool,
    thread: Option<ThreadId>,
}

struct LoopShared<C> {
    state: Mutex<QueueState<C>>,
    available: Condvar,
}

/// Single-writer event loop: one thread owns the state, everyone else
/// enqueues. Both queues drain on every wakeup, events before timers, each
/// item exactly once. A panicking task is logged and the loop continues.
pub struct ActorLoop<C: Send + 'static> {
    shared: Arc<LoopShared<C>>,
    worker: Option<JoinHandle<()>>,
    name: String,
}

/// Cheap clonable handle for enqueueing work from other threads.
pub struct LoopHandle<C: Send + 'static> {
    shared: Arc<LoopShared<C>>,
}

impl<C: Send + 'static> Clone for LoopHandle<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<C: Send + 'static> ActorLoop<C> {
    /// Takes ownership of the state and starts the loop thread.
    pub fn start(name: impl Into<String>, mut state: C) -> Self {
        let name = name.into();
        let shared = Arc::new(LoopShared {
            state: Mutex::new(QueueState { events: VecDeque::new(), timers: VecDeque::new(), running: true, thread: None }),
            available: Condvar::new(),
        });

        let loop_shared = Arc::clone(&shared);
        let loop_name = name.clone();
        let worker = std::thread::spawn(move || {
            loop_shared.state.lock().thread = Some(std::thread::current().id());
            log::info!("Actor loop '{}' up.", loop_name);

            loop {
                let batch: Vec<LoopTask<C>> = {
                    let mut guard = loop_shared.state.lock();
                    while guard.running && guard.events.is_empty() && guard.timers.is_empty() {
                        loop_shared.available.wait(&mut guard);
                    }
                    if !guard.running && guard.events.is_empty() && guard.timers.is_empty() {
                        break;
                    }
                    // Events first, timers second, in arrival order.
                    let queues = &mut *guard;
                    queues.events.drain(..).chain(queues.timers.drain(..)).collect()
                };

                for task in batch {
                    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| task(&mut state)));
                    if outcome.is_err() {
                        log::error!("Event on actor loop '{}' panicked; loop continues.", loop_name);
                    }
                }
            }
            log::info!("Actor loop '{}' drained and stopped.", loop_name);
        });

        Self { shared, worker: Some(worker), name }
    }

    pub fn handle(&self) -> LoopHandle<C> {
        LoopHandle { shared: Arc::clone(&self.shared) }
    }

    /// Stops the loop after the queues drain and joins the thread.
    pub fn stop(&mut self) {
        {
            let mut queues = self.shared.state.lock();
            if !queues.running {
                return;
            }
            queues.running = false;
        }
        self.shared.available.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Actor loop '{}' thread panicked during shutdown.", self.name);
            }
        }
    }
}

impl<C: Send + 'static> Drop for ActorLoop<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<C: Send + 'static> LoopHandle<C> {
    pub fn queue_event(&self, task: LoopTask<C>) {
        let mut queues = self.shared.state.lock();
        if !queues.running {
            log::warn!("Event dropped: actor loop is stopped.");
            return;
        }
        queues.events.push_back(task);
        drop(queues);
        self.shared.available.notify_one();
    }

    pub fn queue_timer(&self, task: LoopTask<C>) {
        let mut queues = self.shared.state.lock();
        if !queues.running {
            log::warn!("Timer dropped: actor loop is stopped.");
            return;
        }
        queues.timers.push_back(task);
        drop(queues);
        self.shared.available.notify_one();
    }

    pub fn is_loop_thread(&self) -> bool {
        self.shared.state.lock().thread == Some(std::thread::current().id())
    }

    /// Synchronously runs `task` on the loop and returns its result.
    ///
    /// Calling this from the loop thread itself would deadlock waiting on
    /// our own queue; on-thread code already holds `&mut C` and calls the
    /// state directly, so that misuse is rejected as a state error.
    pub fn execute_and_wait<R, F>(&self, task: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut C) -> R + Send + 'static,
    {
        if self.is_loop_thread() {
            return Err(Error::InvalidState(
                "execute_and_wait invoked on the actor thread; call the kernel directly".to_string(),
            ));
        }
        let completion: Arc<(Mutex<Option<R>>, Condvar)> = Arc::new((Mutex::new(None), Condvar::new()));
        let signal = Arc::clone(&completion);

        let wrapper: LoopTask<C> = Box::new(move |state| {
            let result = task(state);
            let (slot, condvar) = &*signal;
            *slot.lock() = Some(result);
            condvar.notify_all();
        });

        // Enqueue under the lock so the running check and the push are one
        // step; a task accepted here is guaranteed to run even if stop is
        // racing, because the loop drains its queues before exiting.
        {
            let mut queues = self.shared.state.lock();
            if !queues.running {
                return Err(Error::InvalidState("actor loop is stopped".to_string()));
            }
            queues.events.push_back(wrapper);
        }
        self.shared.available.notify_one();

        let (slot, condvar) = &*completion;
        let mut guard = slot.lock();
        while guard.is_none() {
            condvar.wait(&mut guard);
        }
        guard.take().ok_or_else(|| Error::Internal("completion signalled without a result".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        ticks: Vec<&'static str>,
    }

    #[test]
    fn events_drain_before_timers() {
        let actor_loop = ActorLoop::start("test", Counter::default());
        let handle = actor_loop.handle();

        // Queue a timer first, then an event; the event must still run
        // first within one drain.
        {
            let mut queues = actor_loop.shared.state.lock();
            queues.timers.push_back(Box::new(|c: &mut Counter| c.ticks.push("timer")));
            queues.events.push_back(Box::new(|c: &mut Counter| c.ticks.push("event")));
        }
        actor_loop.shared.available.notify_one();

        let order = handle.execute_and_wait(|c| c.ticks.clone()).unwrap();
        assert_eq!(order, vec!["event", "timer"]);
    }

    #[test]
    fn execute_and_wait_returns_result() {
        let actor_loop = ActorLoop::start("test", Counter::default());
        let handle = actor_loop.handle();

        handle.queue_event(Box::new(|c| c.ticks.push("one")));
        let count = handle.execute_and_wait(|c| c.ticks.len()).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn panicking_event_does_not_kill_the_loop() {
        let actor_loop = ActorLoop::start("test", Counter::default());
        let handle = actor_loop.handle();

        handle.queue_event(Box::new(|_| panic!("boom")));
        handle.queue_event(Box::new(|c| c.ticks.push("after")));

        let survived = handle.execute_and_wait(|c| c.ticks.clone()).unwrap();
        assert_eq!(survived, vec!["after"]);
    }

    #[test]
    fn stop_drains_pending_work() {
        let mut actor_loop = ActorLoop::start("test", Counter::default());
        let handle = actor_loop.handle();
        for _ in 0..16 {
            handle.queue_event(Box::new(|c| c.ticks.push("x")));
        }
        actor_loop.stop();
        // Events after stop are dropped, not queued.
        handle.queue_event(Box::new(|c| c.ticks.push("late")));
    }
}
