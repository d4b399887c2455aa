//! Per-site run exclusion
//!
//! Each site gets its own slot. A slot records whether a run is in flight and
//! lets later callers either wait for that run's outcome or learn that they were
//! turned away. Slots of different sites never share a lock.

use crate::orchestrator::{PipelineError, PipelineRun};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

pub type RunOutcome = Result<PipelineRun, PipelineError>;

#[derive(Default)]
struct SlotState {
    in_flight: Option<watch::Receiver<Option<RunOutcome>>>,
}

#[derive(Default)]
pub struct SiteSlot {
    state: Mutex<SlotState>,
    cancel: AtomicBool,
}

impl SiteSlot {
    fn state(&self) -> MutexGuard<'_, SlotState> {
        // A panic while holding this lock cannot leave the state half-written
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.state().in_flight.is_some()
    }

    /// Takes ownership of the slot, or joins the run already in flight
    pub fn enter(self: &Arc<Self>) -> Entry {
        let mut state = self.state();
        if let Some(rx) = &state.in_flight {
            return Entry::Joined(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        state.in_flight = Some(rx);
        self.cancel.store(false, Ordering::SeqCst);
        Entry::Owner(SlotOwner {
            slot: Arc::clone(self),
            tx: Some(tx),
        })
    }

    pub fn request_cancel(&self) -> bool {
        let state = self.state();
        if state.in_flight.is_some() {
            self.cancel.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

pub enum Entry {
    Owner(SlotOwner),
    Joined(watch::Receiver<Option<RunOutcome>>),
}

/// Exclusive right to run the pipeline for one site
///
/// Dropping the owner without calling `finish` (a panic, or the run future being
/// dropped) frees the slot; waiting callers then see the channel close.
pub struct SlotOwner {
    slot: Arc<SiteSlot>,
    tx: Option<watch::Sender<Option<RunOutcome>>>,
}

impl SlotOwner {
    pub fn is_cancelled(&self) -> bool {
        self.slot.is_cancelled()
    }

    /// Frees the slot and hands the outcome to every waiting caller
    pub fn finish(mut self, outcome: RunOutcome) -> RunOutcome {
        self.release();
        if let Some(tx) = self.tx.take() {
            // Nobody waiting is fine
            let _ = tx.send(Some(outcome.clone()));
        }
        outcome
    }

    fn release(&self) {
        self.slot.state().in_flight = None;
        self.slot.cancel.store(false, Ordering::SeqCst);
    }
}

impl Drop for SlotOwner {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.release();
        }
    }
}

/// Lookup of site slots
#[derive(Default)]
pub struct RunRegistry {
    slots: Mutex<HashMap<String, Arc<SiteSlot>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot of `site_id`, created on first use
    pub fn slot(&self, site_id: &str) -> Arc<SiteSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(slots.entry(site_id.to_string()).or_default())
    }

    pub fn is_running(&self, site_id: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.get(site_id).map(|s| s.is_running()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PipelineStage;
    use crate::orchestrator::RunStatus;
    use chrono::Utc;

    fn run(id: i64) -> PipelineRun {
        PipelineRun {
            id,
            site_id: "shop".to_string(),
            fingerprint: None,
            status: RunStatus::Succeeded,
            stage: PipelineStage::Committed,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            failure: None,
            artifacts: None,
            reused_run: None,
        }
    }

    #[tokio::test]
    async fn test_second_caller_joins_and_receives_outcome() {
        let registry = RunRegistry::new();
        let slot = registry.slot("shop");

        let Entry::Owner(owner) = slot.enter() else {
            panic!("first caller must own the slot");
        };
        let Entry::Joined(mut rx) = registry.slot("shop").enter() else {
            panic!("second caller must join");
        };
        assert!(registry.is_running("shop"));

        let _ = owner.finish(Ok(run(7)));
        let outcome = rx.wait_for(|o| o.is_some()).await.unwrap().clone();
        assert_eq!(outcome.unwrap().unwrap().id, 7);
        assert!(!registry.is_running("shop"));
    }

    #[test]
    fn test_sites_do_not_share_slots() {
        let registry = RunRegistry::new();
        let _owner = match registry.slot("a").enter() {
            Entry::Owner(owner) => owner,
            Entry::Joined(_) => panic!("unexpected join"),
        };
        assert!(matches!(registry.slot("b").enter(), Entry::Owner(_)));
    }

    #[test]
    fn test_dropped_owner_frees_slot() {
        let registry = RunRegistry::new();
        let slot = registry.slot("shop");
        let entry = slot.enter();
        let Entry::Joined(rx) = slot.enter() else {
            panic!("expected join");
        };
        drop(entry);
        assert!(rx.has_changed().is_err());
        assert!(matches!(slot.enter(), Entry::Owner(_)));
    }

    #[test]
    fn test_cancel_only_applies_to_running_slot() {
        let registry = RunRegistry::new();
        let slot = registry.slot("shop");
        assert!(!slot.request_cancel());

        let Entry::Owner(owner) = slot.enter() else {
            panic!("expected owner");
        };
        assert!(slot.request_cancel());
        assert!(owner.is_cancelled());
        let _ = owner.finish(Ok(run(1)));
        assert!(!slot.is_cancelled());
    }
}
