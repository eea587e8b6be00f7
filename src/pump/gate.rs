use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Serializes detection: at most one job holds the gate.
///
/// `try_acquire` hands out a guard that travels with the detection job and clears the
/// gate when dropped, whether the job succeeded, failed or unwound.
#[derive(Clone, Debug, Default)]
pub struct ProcessingGate {
    busy: Arc<AtomicBool>,
}

impl ProcessingGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<GateGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GateGuard {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Force the gate open. Only for teardown, after the detection worker has stopped.
    pub(crate) fn reset(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Proof of holding the processing gate.
#[derive(Debug)]
pub struct GateGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_guard_at_a_time() {
        let gate = ProcessingGate::new();
        let guard = gate.try_acquire().expect("gate starts open");
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());

        drop(guard);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn guard_clears_gate_on_unwind() {
        let gate = ProcessingGate::new();
        let worker_gate = gate.clone();
        let outcome = std::thread::spawn(move || {
            let _guard = worker_gate.try_acquire();
            panic!("detector crashed");
        })
        .join();

        assert!(outcome.is_err());
        assert!(!gate.is_busy());
    }
}
