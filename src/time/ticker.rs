use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration as StdDuration;

use crate::error::{Error, Result};
use crate::time::actor_clock::ActorClock;

/// Anything that wants cycle notifications. Actors implement this by
/// enqueueing a tick event on their own loop; the callback must return
/// promptly since one slow tickable delays all of them.
pub trait Tickable: Send + Sync {
    fn name(&self) -> String;
    fn external_tick(&self, cycle: i64);
}

struct TickerState {
    /// Last cycle delivered to tickables, -1 before the first delivery.
    current_cycle: i64,
    running: bool,
    tickables: Vec<Arc<dyn Tickable>>,
}

/// Monotonic cycle source for the whole process.
///
/// In automatic mode a background thread derives the cycle from the wall
/// clock on every firing, so a late or missed firing produces a gap in the
/// delivered cycle numbers rather than drift; tickables reconcile gaps
/// themselves. In manual mode nothing happens until `tick()` is called.
pub struct Ticker {
    clock: ActorClock,
    manual: bool,
    state: Arc<Mutex<TickerState>>,
    wakeup: Arc<Condvar>,
    worker: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn new(clock: ActorClock, manual: bool) -> Self {
        Self {
            clock,
            manual,
            state: Arc::new(Mutex::new(TickerState { current_cycle: -1, running: false, tickables: Vec::new() })),
            wakeup: Arc::new(Condvar::new()),
            worker: None,
        }
    }

    pub fn clock(&self) -> &ActorClock {
        &self.clock
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    pub fn add_tickable(&self, tickable: Arc<dyn Tickable>) {
        let mut state = self.state.lock();
        log::debug!("Registering tickable '{}'.", tickable.name());
        state.tickables.push(tickable);
    }

    pub fn remove_tickable(&self, name: &str) {
        let mut state = self.state.lock();
        state.tickables.retain(|t| t.name() != name);
    }

    pub fn current_cycle(&self) -> i64 {
        self.state.lock().current_cycle
    }

    /// Pins the cycle counter, usually to re-align a manual ticker before a
    /// test scenario. Rejected once cycles have been delivered past it.
    pub fn set_current_cycle(&self, cycle: i64) -> Result<()> {
        let mut state = self.state.lock();
        if state.current_cycle > cycle {
            return Err(Error::InvalidState(format!(
                "cannot rewind ticker from cycle {} to {}",
                state.current_cycle, cycle
            )));
        }
        state.current_cycle = cycle;
        Ok(())
    }

    /// Starts the background firing thread. No-op in manual mode.
    pub fn start(&mut self) {
        {
            let mut state = self.state.lock();
            if state.running {
                return;
            }
            state.running = true;
        }

        if self.manual {
            log::info!("Ticker in manual mode; cycles advance only via tick().");
            return;
        }

        log::info!("Ticker starting. Cycle length {} ms.", self.clock.cycle_millis);

        let clock = self.clock.clone();
        let state = Arc::clone(&self.state);
        let wakeup = Arc::clone(&self.wakeup);

        self.worker = Some(std::thread::spawn(move || {
            loop {
                let (delivery, tickables) = {
                    let mut guard = state.lock();
                    if !guard.running {
                        break;
                    }
                    wakeup.wait_for(&mut guard, StdDuration::from_millis(clock.cycle_millis));
                    if !guard.running {
                        break;
                    }

                    // Cycle comes from the wall clock on every firing, so a
                    // missed firing shows up as a gap instead of drift.
                    let cycle = clock.cycle(Utc::now());
                    if cycle <= guard.current_cycle {
                        continue;
                    }
                    guard.current_cycle = cycle;
                    (cycle, guard.tickables.clone())
                };

                deliver(delivery, &tickables);
            }
        }));
    }

    /// Manual advance: one cycle per call.
    pub fn tick(&self) {
        let (cycle, tickables) = {
            let mut state = self.state.lock();
            state.current_cycle += 1;
            (state.current_cycle, state.tickables.clone())
        };

        deliver(cycle, &tickables);
    }

    /// Stops the firing thread and waits for it to exit.
    pub fn stop(&mut self) {
        {
            let mut state = self.state.lock();
            state.running = false;
        }
        self.wakeup.notify_all();

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Ticker worker thread panicked during shutdown.");
            }
        }
        log::info!("Ticker stopped at cycle {}.", self.current_cycle());
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn deliver(cycle: i64, tickables: &[Arc<dyn Tickable>]) {
    for tickable in tickables {
        tickable.external_tick(cycle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct RecordingTickable {
        seen: PlMutex<Vec<i64>>,
    }

    impl Tickable for RecordingTickable {
        fn name(&self) -> String {
            "recorder".to_string()
        }

        fn external_tick(&self, cycle: i64) {
            self.seen.lock().push(cycle);
        }
    }

    fn manual_ticker() -> Ticker {
        Ticker::new(ActorClock::new(0, 1000).unwrap(), true)
    }

    #[test]
    fn manual_ticks_are_monotone_from_zero() {
        let ticker = manual_ticker();
        let recorder = Arc::new(RecordingTickable { seen: PlMutex::new(Vec::new()) });
        ticker.add_tickable(recorder.clone());

        ticker.tick();
        ticker.tick();
        ticker.tick();

        assert_eq!(*recorder.seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn set_current_cycle_cannot_rewind() {
        let ticker = manual_ticker();
        ticker.tick();
        ticker.tick();
        assert!(ticker.set_current_cycle(0).is_err());
        assert!(ticker.set_current_cycle(10).is_ok());
        ticker.tick();
        assert_eq!(ticker.current_cycle(), 11);
    }

    #[test]
    fn tick_at_the_end_of_time_still_delivers() {
        let ticker = manual_ticker();
        let recorder = Arc::new(RecordingTickable { seen: PlMutex::new(Vec::new()) });
        ticker.add_tickable(recorder.clone());

        ticker.set_current_cycle(i64::MAX - 1).unwrap();
        ticker.tick();
        assert_eq!(*recorder.seen.lock(), vec![i64::MAX]);
    }

    #[test]
    fn tick_across_a_gap_delivers_the_gap_end() {
        let ticker = manual_ticker();
        let recorder = Arc::new(RecordingTickable { seen: PlMutex::new(Vec::new()) });
        ticker.add_tickable(recorder.clone());

        ticker.set_current_cycle(4).unwrap();
        ticker.tick();
        assert_eq!(*recorder.seen.lock(), vec![5]);
    }
}
