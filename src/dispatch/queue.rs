//! FIFO of operations waiting for the worker

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tracing::debug;

use super::{OperationFailure, OperationId, OperationKind, OperationOutcome, OperationRequest};

/// One caller waiting on a queued entry
#[derive(Debug)]
pub(crate) struct Waiter {
    pub id: OperationId,
    pub responder: oneshot::Sender<OperationOutcome>,
}

/// A queued entry; coalesced refreshes share one entry with several waiters
#[derive(Debug)]
pub(crate) struct QueuedOperation {
    pub id: OperationId,
    pub request: OperationRequest,
    pub waiters: Vec<Waiter>,
}

impl QueuedOperation {
    /// Deliver the outcome to every waiter, each under its own id
    pub fn complete(self, outcome: &OperationOutcome) {
        for waiter in self.waiters {
            let delivered = match outcome {
                Ok(report) => {
                    let mut report = report.clone();
                    report.id = waiter.id;
                    Ok(report)
                }
                Err(failure) => Err(failure.clone()),
            };
            // The caller may have dropped its handle
            let _ = waiter.responder.send(delivered);
        }
    }
}

#[derive(Debug)]
pub(crate) enum Enqueued {
    New,
    /// Joined the queued refresh with this id
    Joined(OperationId),
}

#[derive(Debug, Default)]
pub(crate) struct OperationQueue {
    pending: VecDeque<QueuedOperation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Append in FIFO order
    ///
    /// A refresh whose scope equals the last queued refresh joins it
    /// instead of adding another entry.
    pub fn push(
        &mut self,
        id: OperationId,
        request: OperationRequest,
        responder: oneshot::Sender<OperationOutcome>,
    ) -> Enqueued {
        if let (OperationRequest::Refresh(scope), Some(last)) = (&request, self.pending.back_mut()) {
            if matches!(&last.request, OperationRequest::Refresh(queued) if queued == scope) {
                debug!("refresh {} joins queued refresh {}", id, last.id);
                last.waiters.push(Waiter { id, responder });
                return Enqueued::Joined(last.id);
            }
        }

        self.pending.push_back(QueuedOperation {
            id,
            request,
            waiters: vec![Waiter { id, responder }],
        });
        Enqueued::New
    }

    pub fn pop_front(&mut self) -> Option<QueuedOperation> {
        self.pending.pop_front()
    }

    /// Cancel one waiter; the entry goes away once nobody waits on it
    ///
    /// Returns the kind of the cancelled operation, `None` when `id` is not
    /// queued.
    pub fn cancel(&mut self, id: OperationId) -> Option<OperationKind> {
        let index = self
            .pending
            .iter()
            .position(|entry| entry.waiters.iter().any(|w| w.id == id))?;

        let entry = &mut self.pending[index];
        let kind = entry.request.kind();
        if let Some(pos) = entry.waiters.iter().position(|w| w.id == id) {
            let waiter = entry.waiters.remove(pos);
            let _ = waiter.responder.send(Err(OperationFailure::cancelled(id)));
        }
        if entry.waiters.is_empty() {
            self.pending.remove(index);
        }
        Some(kind)
    }

    /// Cancel everything still queued; returns every dropped waiter
    pub fn cancel_all(&mut self) -> Vec<(OperationId, OperationKind)> {
        let mut cancelled = Vec::new();
        for entry in self.pending.drain(..) {
            let kind = entry.request.kind();
            for waiter in entry.waiters {
                let _ = waiter.responder.send(Err(OperationFailure::cancelled(waiter.id)));
                cancelled.push((waiter.id, kind));
            }
        }
        cancelled
    }
}
