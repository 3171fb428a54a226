// src/cuckoo/barrier.rs - Reusable thread barrier

//! Reusable generation-counted rendezvous for the trimming workers.
//!
//! All workers call [`Barrier::wait`] between passes; the last arrival bumps
//! the generation counter and wakes the rest, which return once they observe
//! a generation different from the one they captured on entry. The barrier
//! resets itself and is reused for every pass of a solve. All participants
//! must keep arriving: a worker that stops calling `wait` stalls the others,
//! so workers are written to never panic or return early.

use std::sync::{Condvar, Mutex};

struct State {
    count: usize,
    generation: u64,
}

/// N-way reusable barrier
pub struct Barrier {
    threads: usize,
    state: Mutex<State>,
    cv: Condvar,
}

impl Barrier {
    /// Create a barrier for `threads` participants
    pub fn new(threads: usize) -> Self {
        Self {
            threads,
            state: Mutex::new(State {
                count: threads,
                generation: 0,
            }),
            cv: Condvar::new(),
        }
    }

    /// Block until all participants have arrived
    pub fn wait(&self) {
        let mut state = self.state.lock().unwrap();
        let generation = state.generation;
        state.count -= 1;
        if state.count == 0 {
            state.generation += 1;
            state.count = self.threads;
            self.cv.notify_all();
        } else {
            while state.generation == generation {
                state = self.cv.wait(state).unwrap();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_single_thread_never_blocks() {
        let barrier = Barrier::new(1);
        for _ in 0..10 {
            barrier.wait();
        }
    }

    #[test]
    fn test_phases_are_separated() {
        const THREADS: usize = 4;
        const GENERATIONS: usize = 50;

        let barrier = Barrier::new(THREADS);
        let arrived = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for gen in 0..GENERATIONS {
                        arrived.fetch_add(1, Ordering::SeqCst);
                        barrier.wait();
                        // every participant must have arrived in this phase
                        assert!(arrived.load(Ordering::SeqCst) >= (gen + 1) * THREADS);
                    }
                });
            }
        });

        assert_eq!(arrived.load(Ordering::SeqCst), THREADS * GENERATIONS);
    }
}
