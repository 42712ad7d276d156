//! Cyclic barrier for a fixed number of parties.
//!
//! A [`Barrier`] blocks callers of [`Barrier::wait`] until exactly `parties`
//! of them have arrived, then releases all of them together and starts a new
//! generation. A generation can instead be broken (timeout, abort or an
//! abandoned arrival), in which case every party of that generation fails
//! with [`ErrorKind::BarrierBroken`] until [`Barrier::reset`] is called.
//!
//! Each generation owns its own watch channel. Releasing or breaking a
//! generation settles its channel and installs a fresh one, so a slow waiter
//! always observes the outcome of its own generation even if later
//! generations have already come and gone.
//!
//! Arrival indices are assigned when a generation is released, from the order
//! of the parties still present at that point. A party withdrawn under
//! [`AbandonPolicy::Withdraw`] therefore leaves no gap in the indices.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::{counter, gauge};
use rendezvous_config::shared::AbandonPolicy;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{ErrorKind, RendezvousResult};
use crate::metrics::{
    RENDEZVOUS_BARRIER_BREAKS_TOTAL, RENDEZVOUS_BARRIER_RELEASES_TOTAL,
    RENDEZVOUS_PARTIES_WAITING,
};
use crate::{bail, rendezvous_error};

/// Options fixed at barrier creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierOptions {
    /// Number of parties that must arrive before a generation is released.
    pub parties: usize,
    /// What happens when a blocked party goes away.
    pub abandon_policy: AbandonPolicy,
}

impl BarrierOptions {
    /// Creates options for `parties` parties with the default abandon policy.
    pub fn new(parties: usize) -> Self {
        Self {
            parties,
            abandon_policy: AbandonPolicy::default(),
        }
    }
}

/// Snapshot of a barrier's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierStatus {
    pub parties: usize,
    pub n_waiting: usize,
    pub broken: bool,
    pub generation: u64,
}

/// Outcome of one generation as published on its gate.
#[derive(Debug, Clone, PartialEq, Eq)]
enum GateState {
    Filling,
    /// Tickets of the released parties in arrival order.
    Released(Arc<[u64]>),
    Broken,
}

impl GateState {
    fn is_filling(&self) -> bool {
        matches!(self, GateState::Filling)
    }
}

#[derive(Debug)]
struct State {
    /// Tickets of the parties blocked in the current generation, in arrival order.
    waiting: Vec<u64>,
    next_ticket: u64,
    generation: u64,
    broken: bool,
    gate: watch::Sender<GateState>,
}

impl State {
    /// Settles the current gate with `outcome` and opens a fresh one.
    fn settle_and_advance(&mut self, outcome: GateState) {
        self.gate.send_replace(outcome);
        self.gate = new_gate();
        self.generation += 1;
        self.waiting.clear();
        self.next_ticket = 0;
        self.broken = false;
    }

    /// Marks the current generation as broken. Returns `false` if it already was.
    fn break_generation(&mut self) -> bool {
        if self.broken {
            return false;
        }

        self.broken = true;
        self.waiting.clear();
        self.gate.send_replace(GateState::Broken);
        counter!(RENDEZVOUS_BARRIER_BREAKS_TOTAL).increment(1);

        true
    }
}

fn new_gate() -> watch::Sender<GateState> {
    let (tx, _) = watch::channel(GateState::Filling);
    tx
}

/// Cyclic barrier for a fixed number of parties.
#[derive(Debug)]
pub struct Barrier {
    options: BarrierOptions,
    state: Mutex<State>,
}

impl Barrier {
    /// Creates a barrier in generation 0 with no arrivals.
    ///
    /// # Panics
    ///
    /// Panics if `options.parties` is zero.
    pub fn new(options: BarrierOptions) -> Self {
        assert!(options.parties > 0, "a barrier needs at least one party");

        Self {
            options,
            state: Mutex::new(State {
                waiting: Vec::new(),
                next_ticket: 0,
                generation: 0,
                broken: false,
                gate: new_gate(),
            }),
        }
    }

    /// Returns the number of parties required to release a generation.
    pub fn parties(&self) -> usize {
        self.options.parties
    }

    /// Returns the number of parties currently blocked in the filling generation.
    pub fn n_waiting(&self) -> usize {
        self.lock_state().waiting.len()
    }

    /// Returns whether the current generation is broken.
    pub fn is_broken(&self) -> bool {
        self.lock_state().broken
    }

    /// Returns the current generation number.
    pub fn generation(&self) -> u64 {
        self.lock_state().generation
    }

    /// Returns a consistent snapshot of all counters.
    pub fn status(&self) -> BarrierStatus {
        let state = self.lock_state();

        BarrierStatus {
            parties: self.options.parties,
            n_waiting: state.waiting.len(),
            broken: state.broken,
            generation: state.generation,
        }
    }

    /// Waits until all parties of the current generation have arrived.
    ///
    /// Returns the 0-based arrival index of the caller among the parties
    /// released with it; the party that completes the generation gets
    /// `parties - 1`. When
    /// `timeout` elapses first, the whole generation is broken and every party
    /// in it, including the caller, gets [`ErrorKind::BarrierBroken`].
    ///
    /// Dropping the returned future before it completes abandons the arrival
    /// according to the barrier's [`AbandonPolicy`].
    pub async fn wait(&self, timeout: Option<Duration>) -> RendezvousResult<usize> {
        let (ticket, generation, mut gate) = {
            let mut state = self.lock_state();

            if state.broken {
                bail!(
                    ErrorKind::BarrierBroken,
                    "Barrier is broken",
                    format!("generation {} was broken before this arrival", state.generation)
                );
            }

            let ticket = state.next_ticket;
            state.next_ticket += 1;

            let index = state.waiting.len();
            state.waiting.push(ticket);

            if index + 1 == self.options.parties {
                debug!(
                    generation = state.generation,
                    parties = self.options.parties,
                    "last party arrived, releasing barrier"
                );
                let released = Arc::from(std::mem::take(&mut state.waiting));
                state.settle_and_advance(GateState::Released(released));
                counter!(RENDEZVOUS_BARRIER_RELEASES_TOTAL).increment(1);

                return Ok(index);
            }

            (ticket, state.generation, state.gate.subscribe())
        };

        debug!(generation, ticket, "party waiting on barrier");

        let mut arrival = Arrival::new(self, generation, ticket);
        let outcome = match timeout {
            Some(timeout) => {
                let waited = tokio::time::timeout(timeout, wait_for_gate(&mut gate)).await;
                match waited {
                    Ok(outcome) => outcome,
                    Err(_) => self.on_timeout(generation, &gate),
                }
            }
            None => wait_for_gate(&mut gate).await,
        };
        arrival.settle();

        match outcome {
            GateState::Released(released) => match released.iter().position(|t| *t == ticket) {
                Some(index) => Ok(index),
                None => bail!(
                    ErrorKind::Unknown,
                    "Released party is missing from its generation",
                    format!("ticket {ticket} of generation {generation}")
                ),
            },
            GateState::Broken | GateState::Filling => Err(rendezvous_error!(
                ErrorKind::BarrierBroken,
                "Barrier is broken",
                format!("generation {generation} was broken while waiting")
            )),
        }
    }

    /// Breaks the current generation.
    ///
    /// Parties blocked in it and parties arriving later fail with
    /// [`ErrorKind::BarrierBroken`] until [`Barrier::reset`] is called.
    pub fn abort(&self) {
        let mut state = self.lock_state();
        if state.break_generation() {
            warn!(generation = state.generation, "barrier aborted");
        }
    }

    /// Starts a fresh generation with no arrivals.
    ///
    /// Parties still blocked in the current generation fail with
    /// [`ErrorKind::BarrierBroken`].
    pub fn reset(&self) {
        let mut state = self.lock_state();

        if !state.waiting.is_empty() {
            state.break_generation();
        }

        let previous = state.generation;
        state.settle_and_advance(GateState::Broken);
        debug!(
            previous_generation = previous,
            generation = state.generation,
            "barrier reset"
        );
    }

    /// Handles an elapsed wait timeout for `generation`.
    fn on_timeout(&self, generation: u64, gate: &watch::Receiver<GateState>) -> GateState {
        let mut state = self.lock_state();

        // The gate may have settled between the timer firing and taking the lock.
        let current = gate.borrow().clone();
        if !current.is_filling() {
            return current;
        }

        if state.break_generation() {
            warn!(generation, "barrier wait timed out, breaking generation");
        }

        GateState::Broken
    }

    /// Applies the abandon policy to the arrival `ticket` of `generation`
    /// whose wait was cancelled.
    fn abandon(&self, generation: u64, ticket: u64) {
        let mut state = self.lock_state();

        if state.generation != generation || state.broken {
            return;
        }

        match self.options.abandon_policy {
            AbandonPolicy::Break => {
                if state.break_generation() {
                    warn!(generation, "waiting party abandoned barrier, breaking generation");
                }
            }
            AbandonPolicy::Withdraw => {
                state.waiting.retain(|waiting| *waiting != ticket);
                debug!(
                    generation,
                    ticket,
                    n_waiting = state.waiting.len(),
                    "waiting party abandoned barrier, withdrawing arrival"
                );
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Waits until the gate of a generation settles.
async fn wait_for_gate(gate: &mut watch::Receiver<GateState>) -> GateState {
    match gate.wait_for(|state| !state.is_filling()).await {
        Ok(state) => state.clone(),
        // The sender is only replaced after it was settled, so a closed channel
        // without a settled value cannot be a release.
        Err(_) => GateState::Broken,
    }
}

/// Tracks one blocked party so that cancellation can be detected on drop.
struct Arrival<'a> {
    barrier: &'a Barrier,
    generation: u64,
    ticket: u64,
    settled: bool,
}

impl<'a> Arrival<'a> {
    fn new(barrier: &'a Barrier, generation: u64, ticket: u64) -> Self {
        gauge!(RENDEZVOUS_PARTIES_WAITING).increment(1.0);

        Self {
            barrier,
            generation,
            ticket,
            settled: false,
        }
    }

    fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for Arrival<'_> {
    fn drop(&mut self) {
        gauge!(RENDEZVOUS_PARTIES_WAITING).decrement(1.0);

        if !self.settled {
            self.barrier.abandon(self.generation, self.ticket);
        }
    }
}
