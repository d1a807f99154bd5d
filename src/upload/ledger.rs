// SPDX-License-Identifier: GPL-3.0-only

//! Per-slot upload state

use super::UploadOutcome;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UploadState {
    #[default]
    Pending,
    Uploaded(String),
    Failed,
}

impl UploadState {
    pub fn url(&self) -> Option<&str> {
        match self {
            UploadState::Uploaded(url) => Some(url),
            _ => None,
        }
    }
}

/// Upload outcomes indexed by slot
///
/// Arrival order is irrelevant; a later outcome for a slot replaces the
/// earlier one.
#[derive(Debug, Clone, Default)]
pub struct UploadLedger {
    slots: Vec<UploadState>,
}

impl UploadLedger {
    pub fn new(slots: usize) -> Self {
        Self {
            slots: vec![UploadState::Pending; slots],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn record(&mut self, outcome: UploadOutcome) {
        let Some(state) = self.slots.get_mut(outcome.slot) else {
            warn!(slot = outcome.slot, slots = self.slots.len(), "Upload outcome for unknown slot");
            return;
        };
        *state = match outcome.url {
            Some(url) => UploadState::Uploaded(url),
            None => UploadState::Failed,
        };
    }

    pub fn state(&self, slot: usize) -> Option<&UploadState> {
        self.slots.get(slot)
    }

    pub fn states(&self) -> &[UploadState] {
        &self.slots
    }

    pub fn pending_slots(&self) -> Vec<usize> {
        self.slots_where(|s| *s == UploadState::Pending)
    }

    pub fn failed_slots(&self) -> Vec<usize> {
        self.slots_where(|s| *s == UploadState::Failed)
    }

    fn slots_where(&self, pred: impl Fn(&UploadState) -> bool) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| pred(s))
            .map(|(i, _)| i)
            .collect()
    }

    /// Nothing pending
    pub fn is_settled(&self) -> bool {
        !self.slots.contains(&UploadState::Pending)
    }

    /// Every slot uploaded
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|s| matches!(s, UploadState::Uploaded(_)))
    }

    /// Copy of `len` slots starting at `start`, renumbered from zero
    pub fn slice(&self, start: usize, len: usize) -> UploadLedger {
        let slots = (start..start + len)
            .map(|slot| self.slots.get(slot).cloned().unwrap_or_default())
            .collect();
        UploadLedger { slots }
    }

    /// Back to all pending
    pub fn reset(&mut self) {
        self.slots.fill(UploadState::Pending);
    }

    /// Record outcomes from `outcomes` until settled, the channel closes or
    /// `timeout` elapses. Returns whether the ledger settled.
    pub async fn drain(
        &mut self,
        outcomes: &mut mpsc::UnboundedReceiver<UploadOutcome>,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_settled() {
            match tokio::time::timeout_at(deadline, outcomes.recv()).await {
                Ok(Some(outcome)) => self.record(outcome),
                Ok(None) | Err(_) => break,
            }
        }
        self.is_settled()
    }
}
