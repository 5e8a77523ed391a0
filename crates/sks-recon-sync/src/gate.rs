//! Reader/mutator coordination for the prefix tree.
//!
//! Sessions read the tree under a [`ReadGuard`]. Queued inserts and removes
//! are applied by a single mutator that waits for every reader to leave,
//! then holds a [`MutationGuard`] while it drains the queue. While a mutation
//! runs, or while the recovery consumer is behind, new readers are refused.
//!
//! The first reader admitted after each mutation is told to schedule the
//! next one, so exactly one mutator is pending at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct GateState {
    readers: usize,
    mutating: bool,
    full: bool,
    mutation_scheduled: bool,
}

/// Admission control between reconciliation sessions and tree mutation.
#[derive(Debug, Default)]
pub struct ReconGate {
    state: Mutex<GateState>,
    released: Notify,
}

impl ReconGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a reader, unless a mutation is running or the gate is full.
    ///
    /// Returns the guard and whether the caller must schedule a mutator.
    pub fn try_acquire(self: &Arc<Self>) -> Option<(ReadGuard, bool)> {
        let mut state = self.lock();
        if state.mutating || state.full {
            return None;
        }
        state.readers += 1;
        let schedule = !state.mutation_scheduled;
        state.mutation_scheduled = true;
        Some((
            ReadGuard {
                gate: Arc::clone(self),
            },
            schedule,
        ))
    }

    /// Wait until no reader or other mutation is active, then start mutating.
    pub async fn begin_mutation(self: &Arc<Self>) -> MutationGuard {
        loop {
            let released = self.released.notified();
            {
                let mut state = self.lock();
                if state.readers == 0 && !state.mutating {
                    state.mutating = true;
                    state.mutation_scheduled = false;
                    return MutationGuard {
                        gate: Arc::clone(self),
                    };
                }
            }
            released.await;
        }
    }

    /// Refuse readers until the next mutation completes.
    pub fn mark_full(&self) {
        self.lock().full = true;
    }

    pub fn readers(&self) -> usize {
        self.lock().readers
    }

    pub fn is_mutating(&self) -> bool {
        self.lock().mutating
    }

    pub fn is_full(&self) -> bool {
        self.lock().full
    }
}

/// Held by a session while it reads the tree.
#[derive(Debug)]
pub struct ReadGuard {
    gate: Arc<ReconGate>,
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        {
            let mut state = self.gate.lock();
            state.readers = state.readers.saturating_sub(1);
        }
        self.gate.released.notify_waiters();
    }
}

/// Held by the mutator while it changes the tree.
#[derive(Debug)]
pub struct MutationGuard {
    gate: Arc<ReconGate>,
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        {
            let mut state = self.gate.lock();
            state.mutating = false;
            state.full = false;
        }
        self.gate.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_reader_schedules_mutation() {
        let gate = ReconGate::new();
        let (a, schedule_a) = gate.try_acquire().unwrap();
        let (b, schedule_b) = gate.try_acquire().unwrap();
        assert!(schedule_a);
        assert!(!schedule_b);
        assert_eq!(gate.readers(), 2);
        drop(a);
        drop(b);
        assert_eq!(gate.readers(), 0);
    }

    #[tokio::test]
    async fn test_mutation_waits_for_readers() {
        let gate = ReconGate::new();
        let (reader, _) = gate.try_acquire().unwrap();

        let mutator = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move {
                let _guard = gate.begin_mutation().await;
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!mutator.is_finished());
        assert!(!gate.is_mutating());

        drop(reader);
        tokio::time::timeout(Duration::from_secs(5), mutator)
            .await
            .unwrap()
            .unwrap();
        assert!(!gate.is_mutating());
    }

    #[tokio::test]
    async fn test_readers_refused_while_mutating() {
        let gate = ReconGate::new();
        let guard = gate.begin_mutation().await;
        assert!(gate.is_mutating());
        assert!(gate.try_acquire().is_none());

        drop(guard);
        let (_reader, schedule) = gate.try_acquire().unwrap();
        assert!(schedule);
    }

    #[tokio::test]
    async fn test_mutations_are_serialized() {
        let gate = ReconGate::new();
        let first = gate.begin_mutation().await;

        let second = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move {
                let _guard = gate.begin_mutation().await;
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(5), second)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_full_until_mutation_completes() {
        let gate = ReconGate::new();
        gate.mark_full();
        assert!(gate.try_acquire().is_none());

        drop(gate.begin_mutation().await);
        assert!(!gate.is_full());
        assert!(gate.try_acquire().is_some());
    }
}
