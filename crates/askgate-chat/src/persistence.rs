//! Background persistence of conversation history and audit logs.
//!
//! Requests hand a [`PersistJob`] to the queue after their response is built
//! and never wait for it. One worker drains the queue, running each job's
//! steps in order: create the session if new, append the message, then append
//! one audit entry per provider log. Failures are logged and dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use askgate_core::types::{Message, ProviderLogEntry};
use askgate_storage::{AuditLogSink, ConversationStore};

/// Everything one request needs recorded.
#[derive(Debug, Clone)]
pub struct PersistJob {
    pub owner: String,
    pub session_id: String,
    /// Set when the request minted the session; the record is created first.
    pub new_session_name: Option<String>,
    pub message: Message,
    pub provider_logs: Vec<ProviderLogEntry>,
}

#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn start(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Jobs that arrived while the channel was full, in submission order.
///
/// While it is non-empty every new job joins the back, so the worker sees
/// jobs in exactly the order they were submitted.
#[derive(Default)]
struct Backlog {
    jobs: VecDeque<PersistJob>,
    draining: bool,
}

/// Handle for submitting jobs to the persistence worker.
#[derive(Clone)]
pub struct PersistenceQueue {
    tx: mpsc::Sender<PersistJob>,
    pending: Arc<Pending>,
    backlog: Arc<Mutex<Backlog>>,
}

impl PersistenceQueue {
    /// Spawn the worker and return a queue handle plus the worker's task.
    ///
    /// The worker exits once every queue handle has been dropped and the
    /// remaining jobs are drained.
    pub fn start(
        conversations: Arc<ConversationStore>,
        audit: Arc<AuditLogSink>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<PersistJob>(capacity.max(1));
        let pending = Arc::new(Pending::default());

        let worker_pending = Arc::clone(&pending);
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                run_job(&conversations, &audit, job).await;
                worker_pending.finish();
            }
            debug!("Persistence worker stopped");
        });

        let queue = Self {
            tx,
            pending,
            backlog: Arc::new(Mutex::new(Backlog::default())),
        };
        (queue, handle)
    }

    /// Queue `job` without waiting for it to be processed or accepted.
    ///
    /// Jobs reach the worker in submission order, including jobs deferred
    /// because the channel was full.
    pub fn submit(&self, job: PersistJob) {
        self.pending.start();
        let mut backlog = lock(&self.backlog);

        let job = if backlog.jobs.is_empty() {
            match self.tx.try_send(job) {
                Ok(()) => return,
                Err(TrySendError::Full(job)) => job,
                Err(TrySendError::Closed(job)) => {
                    error!(
                        owner = %job.owner,
                        session_id = %job.session_id,
                        "Persistence worker gone; dropping job"
                    );
                    self.pending.finish();
                    return;
                }
            }
        } else {
            job
        };

        warn!(
            owner = %job.owner,
            session_id = %job.session_id,
            deferred = backlog.jobs.len() + 1,
            "Persistence queue full; deferring job"
        );
        backlog.jobs.push_back(job);
        if !backlog.draining {
            backlog.draining = true;
            tokio::spawn(forward_backlog(
                self.tx.clone(),
                Arc::clone(&self.backlog),
                Arc::clone(&self.pending),
            ));
        }
    }

    /// Jobs submitted but not yet processed.
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Resolve once every submitted job has been processed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.pending.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Move deferred jobs into the channel one at a time, oldest first, as space
/// frees up. Exits when the backlog is empty.
async fn forward_backlog(
    tx: mpsc::Sender<PersistJob>,
    backlog: Arc<Mutex<Backlog>>,
    pending: Arc<Pending>,
) {
    loop {
        let permit = match tx.reserve().await {
            Ok(permit) => permit,
            Err(_) => {
                let dropped = {
                    let mut queued = lock(&backlog);
                    queued.draining = false;
                    std::mem::take(&mut queued.jobs)
                };
                error!(dropped = dropped.len(), "Persistence worker gone; dropping deferred jobs");
                for _ in dropped {
                    pending.finish();
                }
                return;
            }
        };

        let mut queued = lock(&backlog);
        match queued.jobs.pop_front() {
            Some(job) => permit.send(job),
            None => {
                queued.draining = false;
                return;
            }
        }
    }
}

fn lock(backlog: &Mutex<Backlog>) -> MutexGuard<'_, Backlog> {
    backlog.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_job(conversations: &ConversationStore, audit: &AuditLogSink, job: PersistJob) {
    let PersistJob {
        owner,
        session_id,
        new_session_name,
        message,
        provider_logs,
    } = job;

    if let Some(name) = new_session_name {
        if let Err(e) = conversations
            .create_session(&owner, &session_id, &name)
            .await
        {
            error!(owner = %owner, session_id = %session_id, error = %e, "Failed to create session");
        }
    }

    if let Err(e) = conversations
        .append_message(&owner, &session_id, message)
        .await
    {
        error!(owner = %owner, session_id = %session_id, error = %e, "Failed to append message");
    }

    for entry in provider_logs {
        let provider = entry.provider_identity.clone();
        audit.append(&provider, entry).await;
    }
}
