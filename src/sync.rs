// 🔄 Sync Service - fetch from the provider, reconcile into the store
//
// One periodic task per entity kind, plus an on-demand trigger that runs one
// cycle of each kind in the background. Store work runs on the blocking pool.

use crate::entities::EntityKind;
use crate::reconciliation::{Outcome, Reconciler};
use crate::source::RecordSource;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

pub struct SyncService<S> {
    reconciler: Arc<Reconciler>,
    source: Arc<S>,
    interval: Duration,
}

impl<S: RecordSource> SyncService<S> {
    pub fn new(reconciler: Arc<Reconciler>, source: Arc<S>, interval: Duration) -> Self {
        SyncService {
            reconciler,
            source,
            interval,
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Fetch and reconcile one kind once. `None` when the fetch failed and the
    /// cycle was skipped.
    pub async fn run_cycle(&self, kind: EntityKind) -> Option<Outcome> {
        info!(%kind, "fetching {} from Xtrack", kind.plural());
        let started = Instant::now();

        let raw = match self.source.fetch(kind).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(%kind, error = %format!("{e:#}"), "failed to fetch {}", kind.plural());
                return None;
            }
        };
        let api_time = started.elapsed();
        info!(%kind, count = raw.len(), "{} fetched", kind.plural());

        let reconciler = Arc::clone(&self.reconciler);
        let outcome = match tokio::task::spawn_blocking(move || reconciler.reconcile_kind(kind, &raw)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(%kind, error = %e, "reconcile task aborted");
                return None;
            }
        };
        let save_time = started.elapsed().saturating_sub(api_time);

        info!(
            %kind,
            ok = outcome.ok,
            api_ms = api_time.as_millis() as u64,
            save_ms = save_time.as_millis() as u64,
            "{}",
            outcome.message
        );
        Some(outcome)
    }

    /// Run `kind` now and then every interval until the runtime shuts down.
    pub fn spawn_periodic(self: &Arc<Self>, kind: EntityKind) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.interval);
            // A slow cycle pushes the next one back instead of bursting
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                service.run_cycle(kind).await;
            }
        })
    }

    /// Start one background cycle per kind and return without waiting.
    pub fn trigger(self: &Arc<Self>) -> Vec<JoinHandle<Option<Outcome>>> {
        EntityKind::ALL
            .iter()
            .map(|&kind| {
                let service = Arc::clone(self);
                tokio::spawn(async move { service.run_cycle(kind).await })
            })
            .collect()
    }
}
