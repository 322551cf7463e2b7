//! Background loops: inbound polling and stale-order expiry
//!
//! Interactions of different principals run concurrently on a bounded pool.
//! Interactions of one principal run in arrival order: each batch's events
//! for a principal go to a single task, which first waits for the task that
//! handled that principal's previous batch.

use super::traits::{InboundSource, Ledger, Messenger};
use super::Broker;
use crate::domain::PrincipalId;
use crate::messaging::Inbound;
use crate::orders::OrderLifecycle;
use crate::session::SessionStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Wait after a failed poll before asking again
const POLL_BACKOFF: Duration = Duration::from_secs(2);

/// In-flight interactions get this long to finish on shutdown
const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Feed inbound interactions to the broker until `shutdown` fires
pub async fn run_poller<I, L, M, S>(
    source: Arc<I>,
    broker: Arc<Broker<L, M, S>>,
    workers: usize,
    shutdown: CancellationToken,
) where
    I: InboundSource + 'static,
    L: Ledger + 'static,
    M: Messenger + 'static,
    S: SessionStore + 'static,
{
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();
    // Completion signal of the latest task per principal
    let mut tails: HashMap<PrincipalId, oneshot::Receiver<()>> = HashMap::new();
    tracing::info!(workers, "Poller started");

    loop {
        let batch = tokio::select! {
            () = shutdown.cancelled() => break,
            batch = source.next_batch() => batch,
        };

        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Interaction task panicked");
            }
        }

        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "Polling failed, backing off");
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(POLL_BACKOFF) => continue,
                }
            }
        };

        tails.retain(|_, tail| matches!(tail.try_recv(), Err(TryRecvError::Empty)));

        for (principal, interactions) in group_by_principal(batch) {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let after = tails.remove(&principal);
            let (done, tail) = oneshot::channel();
            tails.insert(principal, tail);

            let broker = broker.clone();
            tasks.spawn(async move {
                if let Some(after) = after {
                    // Err means the earlier task died; its turn is over either way
                    let _ = after.await;
                }
                for inbound in interactions {
                    if let Err(e) = broker.handle(inbound).await {
                        tracing::debug!(
                            principal = %principal,
                            error = %e,
                            "Interaction ended with error"
                        );
                    }
                }
                let _ = done.send(());
                drop(permit);
            });
        }
    }

    tracing::info!(in_flight = tasks.len(), "Poller stopping");
    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(abandoned = tasks.len(), "Abandoning unfinished interactions");
        tasks.abort_all();
    }
}

/// Split a batch per principal, keeping each principal's arrival order
fn group_by_principal(batch: Vec<Inbound>) -> HashMap<PrincipalId, Vec<Inbound>> {
    let mut groups: HashMap<PrincipalId, Vec<Inbound>> = HashMap::new();
    for inbound in batch {
        groups.entry(inbound.principal).or_default().push(inbound);
    }
    groups
}

/// Complete published orders older than `retention`, every `every`
pub async fn run_expiry<L, M>(
    lifecycle: Arc<OrderLifecycle<L, M>>,
    retention: chrono::Duration,
    every: Duration,
    shutdown: CancellationToken,
) where
    L: Ledger + 'static,
    M: Messenger + 'static,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = lifecycle.expire_stale(Utc::now(), retention).await {
            tracing::warn!(error = %e, "Expiry sweep failed");
        }
    }
    tracing::info!("Expiry sweeper stopped");
}
