use std::sync::{Condvar, Mutex, MutexGuard};

/// Coalesces concurrent calls: while one call is running, later callers block and
/// receive a clone of its result instead of starting their own.
pub(crate) struct SingleFlight<T: Clone> {
    state: Mutex<FlightState<T>>,
    done: Condvar,
}

struct FlightState<T> {
    in_flight: bool,
    generation: u64,
    last: Option<T>,
}

impl<T: Clone> SingleFlight<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(FlightState {
                in_flight: false,
                generation: 0,
                last: None,
            }),
            done: Condvar::new(),
        }
    }

    pub(crate) fn run<F: FnOnce() -> T>(&self, work: F) -> T {
        let mut state = self.lock();
        while state.in_flight {
            let generation = state.generation;
            while state.in_flight && state.generation == generation {
                state = self
                    .done
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            if let Some(shared) = state.last.clone() {
                return shared;
            }
            // The leader unwound without a result. The first waiter back under the lock
            // leads the retry; the rest wait for it.
        }
        state.in_flight = true;
        state.last = None;
        drop(state);

        let mut landing = Landing { flight: self, value: None };
        let value = work();
        landing.value = Some(value.clone());
        value
    }

    fn lock(&self) -> MutexGuard<'_, FlightState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Publishes the leader's result and wakes waiters, also when `work` panics.
struct Landing<'a, T: Clone> {
    flight: &'a SingleFlight<T>,
    value: Option<T>,
}

impl<T: Clone> Drop for Landing<'_, T> {
    fn drop(&mut self) {
        let mut state = self.flight.lock();
        state.in_flight = false;
        state.generation = state.generation.wrapping_add(1);
        state.last = self.value.take();
        self.flight.done.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn concurrent_callers_share_one_run() {
        let flight = Arc::new(SingleFlight::<usize>::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let leader = {
            let flight = flight.clone();
            let runs = runs.clone();
            thread::spawn(move || {
                flight.run(|| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    let _ = release_rx.recv();
                    42
                })
            })
        };
        while runs.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let flight = flight.clone();
                let runs = runs.clone();
                thread::spawn(move || {
                    flight.run(|| {
                        runs.fetch_add(1, Ordering::SeqCst);
                        0
                    })
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(100));
        release_tx.send(()).unwrap();

        assert_eq!(leader.join().unwrap(), 42);
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_leader_does_not_strand_waiters() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let panicked = {
            let flight = flight.clone();
            thread::spawn(move || flight.run(|| panic!("load blew up"))).join()
        };
        assert!(panicked.is_err());
        assert_eq!(flight.run(|| 7), 7);
    }

    #[test]
    fn one_waiter_takes_over_from_a_panicking_leader() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let leader = {
            let flight = flight.clone();
            let runs = runs.clone();
            thread::spawn(move || {
                flight.run(|| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    let _ = release_rx.recv();
                    panic!("load blew up")
                })
            })
        };
        while runs.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let flight = flight.clone();
                let runs = runs.clone();
                thread::spawn(move || {
                    flight.run(|| {
                        runs.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        9
                    })
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(100));
        release_tx.send(()).unwrap();

        assert!(leader.join().is_err());
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), 9);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn sequential_calls_run_again() {
        let flight = SingleFlight::<u32>::new();
        assert_eq!(flight.run(|| 1), 1);
        assert_eq!(flight.run(|| 2), 2);
    }
}
