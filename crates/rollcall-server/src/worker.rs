//! Fixed pool of workers processing inbound actions.
//!
//! Each action is routed to a worker by actor id. One actor's actions are
//! handled in arrival order; different actors proceed in parallel.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use rollcall_core::ActorId;

use crate::action::Inbound;
use crate::error::ServerError;
use crate::orchestrator::Orchestrator;

/// Worker pool configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub workers: usize,
    /// Queued actions per worker before `submit` waits.
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
        }
    }
}

pub struct WorkerPool {
    senders: Vec<mpsc::Sender<Inbound>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(
        orchestrator: Arc<Orchestrator>,
        config: &ServerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let workers = config.workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            senders.push(tx);
            handles.push(tokio::spawn(worker_loop(
                index,
                rx,
                Arc::clone(&orchestrator),
                shutdown.clone(),
            )));
        }

        info!(workers, queue_capacity = config.queue_capacity, "worker pool started");
        Self { senders, handles }
    }

    /// Queue an action. Waits while the target worker's queue is full.
    pub async fn submit(&self, inbound: Inbound) -> Result<(), ServerError> {
        let sender = self
            .senders
            .get(shard(inbound.actor, self.senders.len()))
            .ok_or(ServerError::QueueClosed)?;
        sender.send(inbound).await.map_err(|_| ServerError::QueueClosed)
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Stop accepting actions and wait until every queued one is handled.
    pub async fn drain(self) {
        drop(self.senders);
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "worker task failed");
            }
        }
        debug!("worker pool drained");
    }
}

fn shard(actor: ActorId, workers: usize) -> usize {
    actor.get().rem_euclid(workers.max(1) as i64) as usize
}

async fn worker_loop(
    index: usize,
    mut rx: mpsc::Receiver<Inbound>,
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
) {
    loop {
        let inbound = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(inbound) => inbound,
                None => break,
            },
        };
        orchestrator.process(&inbound).await;
    }
    debug!(worker = index, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::test_support::{event, harness};
    use rollcall_store::RegisterOutcome;

    #[test]
    fn sharding_is_stable_and_in_range() {
        for raw in [-7_i64, 0, 1, 5, 1_000_003] {
            let a = shard(ActorId::new(raw), 4);
            assert!(a < 4);
            assert_eq!(a, shard(ActorId::new(raw), 4));
        }
    }

    #[tokio::test]
    async fn concurrent_registrations_through_the_pool_respect_capacity() {
        let h = harness();
        let id = event(&h, 3);
        let pool = WorkerPool::start(
            h.orchestrator.clone(),
            &ServerConfig {
                workers: 4,
                queue_capacity: 8,
            },
            CancellationToken::new(),
        );

        for n in 0..20 {
            pool.submit(Inbound::new(
                ActorId::new(100 + n),
                format!("p{n}"),
                Action::Register { event_id: id },
            ))
            .await
            .unwrap();
        }
        pool.drain().await;

        assert_eq!(h.ledger.participants_of(id).unwrap().len(), 3);
        let admitted = (0..20)
            .filter(|&n| {
                h.messenger.sent_to(ActorId::new(100 + n))
                    == vec![format!("You are registered for event #{id}.")]
            })
            .count();
        assert_eq!(admitted, 3);
        assert_eq!(h.messenger.sent().len(), 20);
        assert_eq!(
            h.ledger.register(ActorId::new(999), "late", id).unwrap(),
            RegisterOutcome::Full
        );
    }

    #[tokio::test]
    async fn one_actor_is_served_in_order() {
        let h = harness();
        let id = event(&h, 5);
        let pool = WorkerPool::start(
            h.orchestrator.clone(),
            &ServerConfig::default(),
            CancellationToken::new(),
        );
        let actor = ActorId::new(42);

        pool.submit(Inbound::new(actor, "A", Action::Register { event_id: id })).await.unwrap();
        pool.submit(Inbound::new(actor, "A", Action::Unregister { event_id: id })).await.unwrap();
        pool.submit(Inbound::new(actor, "A", Action::Register { event_id: id })).await.unwrap();
        pool.drain().await;

        assert_eq!(
            h.messenger.sent_to(actor),
            vec![
                format!("You are registered for event #{id}."),
                format!("Your registration for event #{id} was cancelled."),
                format!("You are registered for event #{id}."),
            ]
        );
    }

    #[tokio::test]
    async fn submit_after_shutdown_fails() {
        let h = harness();
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::start(
            h.orchestrator.clone(),
            &ServerConfig {
                workers: 1,
                queue_capacity: 1,
            },
            shutdown.clone(),
        );
        shutdown.cancel();
        // Give the worker a chance to observe the cancellation and exit.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let result = pool.submit(Inbound::new(ActorId::new(1), "", Action::ListEvents)).await;
        assert!(matches!(result, Err(ServerError::QueueClosed)));
    }
}
