//! Drain orchestration.
//!
//! One drain cycle walks every pending mutation in FIFO order, routes its
//! type to a server path, submits it, and records the per-mutation outcome.
//! Failures are independent: a mutation that cannot be delivered never
//! blocks the ones behind it, and nothing thrown here ever reaches the
//! trigger source — the caller learns the result from the returned
//! [`DrainSummary`] (or the pending count).
//!
//! There is no backoff between mutations inside a cycle; the next retry
//! opportunity is the next trigger (reconnect, startup, or a manual
//! refresh). Reconnect events are frequent relative to mutation volume, so
//! the coarse policy holds up in the field.

use crate::connectivity::{ConnectivityMonitor, Subscription};
use crate::queue::MutationQueue;
use crate::transport::SyncTransport;
use crate::types::Mutation;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Static mapping from mutation type to server POST path.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, String>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes for the guide app's producers.
    pub fn guide_defaults() -> Self {
        let mut table = Self::new();
        table.insert("attendance_check_in", "/guide/attendance/check-in");
        table.insert("attendance_check_out", "/guide/attendance/check-out");
        table.insert("manifest_boarding", "/guide/manifest/boarding");
        table.insert("manifest_return", "/guide/manifest/return");
        table.insert("document_upload", "/guide/documents/upload");
        table
    }

    pub fn insert(&mut self, mutation_type: &str, path: &str) {
        self.routes
            .insert(mutation_type.to_string(), path.to_string());
    }

    pub fn resolve(&self, mutation_type: &str) -> Option<&str> {
        self.routes.get(mutation_type).map(String::as_str)
    }
}

/// What happened to one mutation during a drain cycle.
#[derive(Debug, Clone)]
pub enum MutationOutcome {
    /// Server acknowledged; the mutation is marked synced.
    Synced { id: i64 },
    /// Submission failed this cycle; the mutation stays pending.
    Failed { id: i64, reason: String },
    /// No request was attempted (no route); the mutation stays pending.
    Skipped { id: i64, reason: String },
}

impl MutationOutcome {
    pub fn id(&self) -> i64 {
        match self {
            MutationOutcome::Synced { id }
            | MutationOutcome::Failed { id, .. }
            | MutationOutcome::Skipped { id, .. } => *id,
        }
    }
}

/// Aggregate result of one drain cycle. A cycle with failures is
/// success-with-partial-progress, not an error.
#[derive(Debug, Default)]
pub struct DrainSummary {
    pub outcomes: Vec<MutationOutcome>,
}

impl DrainSummary {
    pub fn synced_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, MutationOutcome::Synced { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, MutationOutcome::Failed { .. }))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, MutationOutcome::Skipped { .. }))
            .count()
    }
}

/// Drains the mutation queue against the server, one mutation at a time.
pub struct SyncManager {
    queue: MutationQueue,
    transport: Arc<dyn SyncTransport>,
    routes: RouteTable,
    /// Move a mutation to the dead-letter collection after this many
    /// consecutive unroutable cycles. `None` leaves it pending forever.
    dead_letter_after: Option<u32>,
    draining: AtomicBool,
}

impl SyncManager {
    pub fn new(queue: MutationQueue, transport: Arc<dyn SyncTransport>, routes: RouteTable) -> Self {
        Self {
            queue,
            transport,
            routes,
            dead_letter_after: None,
            draining: AtomicBool::new(false),
        }
    }

    /// Enable dead-lettering of unroutable mutations after `cycles`
    /// consecutive skips.
    pub fn with_dead_letter_after(mut self, cycles: Option<u32>) -> Self {
        self.dead_letter_after = cycles;
        self
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    /// Run one drain cycle. Single-flight: if a cycle is already in
    /// progress the trigger is a no-op and `None` is returned. `Err` is
    /// reserved for storage failures while listing the queue; per-mutation
    /// delivery failures are folded into the summary.
    pub async fn drain(&self) -> Result<Option<DrainSummary>> {
        if self.draining.swap(true, Ordering::SeqCst) {
            debug!("drain already in progress, ignoring trigger");
            return Ok(None);
        }
        let _guard = DrainGuard(&self.draining);

        let pending = self.queue.list_pending()?;
        if pending.is_empty() {
            debug!("nothing pending");
            return Ok(Some(DrainSummary::default()));
        }

        let mut summary = DrainSummary::default();
        for mutation in pending {
            let outcome = match self.routes.resolve(&mutation.mutation_type) {
                None => self.handle_unroutable(&mutation).await,
                Some(path) => match self.transport.submit(path, &mutation.payload).await {
                    Ok(()) => match self.queue.mark_synced(mutation.id) {
                        Ok(()) => MutationOutcome::Synced { id: mutation.id },
                        // The server accepted it but the flag write failed:
                        // the next cycle resubmits and the server dedups on
                        // the natural key.
                        Err(e) => {
                            warn!(id = mutation.id, error = %e, "synced but bookkeeping failed, will resubmit");
                            MutationOutcome::Failed {
                                id: mutation.id,
                                reason: format!("synced but bookkeeping failed: {}", e),
                            }
                        }
                    },
                    Err(e) => {
                        warn!(
                            id = mutation.id,
                            mutation_type = %mutation.mutation_type,
                            error = %e,
                            "mutation submission failed, leaving pending"
                        );
                        MutationOutcome::Failed {
                            id: mutation.id,
                            reason: e.to_string(),
                        }
                    }
                },
            };
            summary.outcomes.push(outcome);
        }

        info!(
            synced = summary.synced_count(),
            failed = summary.failed_count(),
            skipped = summary.skipped_count(),
            "drain cycle complete"
        );
        Ok(Some(summary))
    }

    async fn handle_unroutable(&self, mutation: &Mutation) -> MutationOutcome {
        let reason = format!("no route for type '{}'", mutation.mutation_type);
        warn!(id = mutation.id, %reason, "skipping mutation");

        match self.queue.note_skipped(mutation.id) {
            Ok(cycles) => {
                if let Some(limit) = self.dead_letter_after {
                    if cycles >= limit {
                        if let Err(e) = self.queue.dead_letter(mutation.id, &reason) {
                            error!(id = mutation.id, error = %e, "dead-letter move failed");
                        } else {
                            info!(id = mutation.id, cycles, "mutation moved to dead letters");
                        }
                    }
                }
            }
            Err(e) => error!(id = mutation.id, error = %e, "skip bookkeeping failed"),
        }

        MutationOutcome::Skipped {
            id: mutation.id,
            reason,
        }
    }

    /// Drain when the monitor reports online; used at application startup.
    pub async fn drain_if_online(&self, monitor: &ConnectivityMonitor) -> Result<Option<DrainSummary>> {
        if monitor.is_online() {
            self.drain().await
        } else {
            debug!("offline at startup, drain deferred to reconnect");
            Ok(None)
        }
    }

    /// Spawn a drain on every reconnect. The callback itself never blocks
    /// and never propagates errors back into the monitor; drain failures
    /// are logged. Keep the returned subscription alive for as long as the
    /// manager should react to connectivity.
    pub fn watch_connectivity(
        self: &Arc<Self>,
        monitor: &Arc<ConnectivityMonitor>,
    ) -> Subscription {
        let manager = Arc::clone(self);
        let runtime = tokio::runtime::Handle::current();
        monitor.subscribe(move || {
            let manager = Arc::clone(&manager);
            runtime.spawn(async move {
                match manager.drain().await {
                    Ok(Some(summary)) => debug!(
                        synced = summary.synced_count(),
                        failed = summary.failed_count(),
                        "reconnect drain finished"
                    ),
                    Ok(None) => {}
                    Err(e) => error!("reconnect drain failed: {:#}", e),
                }
            });
        })
    }
}

/// Clears the single-flight flag when the cycle ends, even on early return.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
