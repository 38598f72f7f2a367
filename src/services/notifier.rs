//! Callback notification dispatcher
//!
//! After a mutation commits, services enqueue one notification per event
//! batch. A single background worker drains the bounded queue and issues one
//! `GET {base}/{path}` per subscriber and path. Delivery is fire-and-forget:
//! failures are logged and counted, never retried, and never reach the
//! request that caused them. A full queue drops the newest notification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{self, LedgerEvent};
use crate::config::NotifierConfig;
use crate::db::callbacks::{self, Subscriber};
use crate::db::LedgerDb;

/// One batch of paths for a fixed set of subscribers
#[derive(Debug, Clone)]
pub struct Notification {
    pub paths: Vec<String>,
    pub subscribers: Vec<Subscriber>,
}

#[derive(Debug, Default)]
struct NotifierCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of delivery counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NotifierStats {
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Producer side, shared by all services
pub struct Notifier {
    sender: mpsc::Sender<Notification>,
    counters: Arc<NotifierCounters>,
}

/// Consumer side; run exactly one per notifier
pub struct NotifierWorker {
    receiver: mpsc::Receiver<Notification>,
    http_client: reqwest::Client,
    counters: Arc<NotifierCounters>,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> (Self, NotifierWorker) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(NotifierCounters::default());

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build callback client, using defaults");
                reqwest::Client::new()
            });

        (
            Self {
                sender,
                counters: counters.clone(),
            },
            NotifierWorker {
                receiver,
                http_client,
                counters,
            },
        )
    }

    /// Queue a notification without waiting
    pub fn enqueue(&self, paths: Vec<String>, subscribers: Vec<Subscriber>) {
        if subscribers.is_empty() {
            return;
        }
        let notification = Notification { paths, subscribers };
        if let Err(e) = self.sender.try_send(notification) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "worker stopped",
            };
            warn!(reason, "Dropped callback notification");
        }
    }

    /// Announce committed events to every registered callback
    pub fn publish(&self, db: &LedgerDb, events: &[LedgerEvent]) {
        let subscribers = match db.with_conn(callbacks::subscribers) {
            Ok(subscribers) => subscribers,
            Err(e) => {
                warn!(error = %e, "Failed to load callbacks, skipping notification");
                return;
            }
        };
        debug!(events = events.len(), subscribers = subscribers.len(), "Publishing events");
        self.enqueue(events::paths(events), subscribers);
    }

    pub fn stats(&self) -> NotifierStats {
        NotifierStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl NotifierWorker {
    /// Start draining the queue on the current runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Deliver notifications until every [`Notifier`] has been dropped
    pub async fn run(mut self) {
        info!("Callback notifier started");
        while let Some(notification) = self.receiver.recv().await {
            self.deliver(&notification).await;
        }
        info!("Callback notifier stopped");
    }

    async fn deliver(&self, notification: &Notification) {
        for subscriber in &notification.subscribers {
            for path in &notification.paths {
                let url = callback_url(&subscriber.base, path);
                match self.http_client.get(&url).send().await {
                    Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                        debug!(url = %url, "Callback delivered");
                    }
                    Ok(resp) => {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            url = %url,
                            status = %resp.status(),
                            owner = ?subscriber.owner,
                            "Callback answered with unexpected status"
                        );
                    }
                    Err(e) => {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(url = %url, owner = ?subscriber.owner, error = %e, "Callback failed");
                    }
                }
            }
        }
    }
}

/// Join a subscriber base and an event path with exactly one slash
pub fn callback_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
