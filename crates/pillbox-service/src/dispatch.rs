use std::sync::Arc;

use pillbox_delivery::{DeliveryOutcome, DeliveryWorker};
use pillbox_scheduler::FiredJob;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Fans fired jobs out to independent delivery tasks.
///
/// Each job runs in its own task, so a slow or failing delivery never holds
/// up the next one; duplicate fires are absorbed by the worker's status gate.
/// Delivery tasks are owned by the dispatcher and drained before
/// [`run`](Self::run) returns, so shutdown never cuts a send off between the
/// notifier call and the status write.
pub struct Dispatcher {
    worker: Arc<DeliveryWorker>,
    fired_rx: mpsc::Receiver<FiredJob>,
    in_flight: JoinSet<()>,
}

impl Dispatcher {
    pub fn new(worker: Arc<DeliveryWorker>, fired_rx: mpsc::Receiver<FiredJob>) -> Self {
        Self {
            worker,
            fired_rx,
            in_flight: JoinSet::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(notifier = self.worker.notifier_name(), "dispatcher started");
        loop {
            tokio::select! {
                fired = self.fired_rx.recv() => match fired {
                    Some(job) => self.spawn(job),
                    None => {
                        info!("fired-job channel closed, dispatcher exiting");
                        break;
                    }
                },
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!("delivery task failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("dispatcher shutting down");
                        break;
                    }
                }
            }
        }

        if !self.in_flight.is_empty() {
            info!(count = self.in_flight.len(), "waiting for in-flight deliveries");
        }
        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(e) = joined {
                error!("delivery task failed: {e}");
            }
        }
    }

    fn spawn(&mut self, job: FiredJob) {
        let worker = Arc::clone(&self.worker);
        self.in_flight.spawn(async move {
            let key = job.key;
            match worker.deliver(key.reminder_id).await {
                DeliveryOutcome::Aborted => warn!(job_key = %key, "delivery aborted"),
                outcome => debug!(job_key = %key, ?outcome, "delivery finished"),
            }
        });
    }
}
