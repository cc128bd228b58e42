//! Time-ordered delivery scheduler.
//!
//! Deferred deliveries sit in a min-heap keyed by `(due_at, seq)` behind one
//! mutex. A single dispatch thread sleeps on a condvar until the head is due
//! (or forever when the heap is empty), pops every due delivery and submits
//! its send-and-record work to the shared [`WorkerPool`]. Any wake-up re-reads
//! the head, so a new delivery due earlier than the one being waited on is
//! picked up on time.
//!
//! Pending deliveries are held in memory only; whatever is still pending at
//! [`MessageScheduler::stop`] is never sent.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use switchboard_core::config::MalformedTimePolicy;
use switchboard_core::time::parse_timestamp;
use switchboard_storage::MessageStore;

use crate::delivery::{send_and_record, Delivery, DeliveryReport};
use crate::error::SchedulerError;
use crate::pool::{TaskHandle, WorkerPool};

/// Result of a [`MessageScheduler::schedule`] call.
#[derive(Debug)]
pub enum ScheduleOutcome {
    /// Held until `due_at`.
    Pending { due_at: DateTime<Utc> },
    /// Already due; handed straight to the pool.
    DispatchedNow(TaskHandle<DeliveryReport>),
}

struct Pending {
    due_at: DateTime<Utc>,
    seq: u64,
    delivery: Delivery,
}

// BinaryHeap is a max-heap; invert so the earliest (due_at, seq) is on top.
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due_at
            .cmp(&self.due_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.due_at == other.due_at && self.seq == other.seq
    }
}

impl Eq for Pending {}

struct SchedulerState {
    pending: BinaryHeap<Pending>,
    running: bool,
    next_seq: u64,
}

struct Shared {
    state: Mutex<SchedulerState>,
    wake: Condvar,
    pool: Arc<WorkerPool>,
    store: Arc<dyn MessageStore>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Submit the send-and-record work for `delivery` to the pool.
    fn hand_off(&self, delivery: Delivery) -> Result<TaskHandle<DeliveryReport>, SchedulerError> {
        let store = Arc::clone(&self.store);
        let handle = self
            .pool
            .submit(move || send_and_record(&delivery, store.as_ref()))?;
        Ok(handle)
    }
}

pub struct MessageScheduler {
    shared: Arc<Shared>,
    policy: MalformedTimePolicy,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MessageScheduler {
    /// Scheduler that submits due work to `pool` and records sends in `store`.
    /// Call [`start`](Self::start) to begin dispatching.
    pub fn new(pool: Arc<WorkerPool>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState {
                    pending: BinaryHeap::new(),
                    running: false,
                    next_seq: 0,
                }),
                wake: Condvar::new(),
                pool,
                store,
            }),
            policy: MalformedTimePolicy::default(),
            loop_handle: Mutex::new(None),
        }
    }

    pub fn with_policy(mut self, policy: MalformedTimePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> MalformedTimePolicy {
        self.policy
    }

    /// Launch the dispatch thread. No-op while already running.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut slot = self.loop_handle.lock().unwrap_or_else(|e| e.into_inner());
        {
            let mut state = self.shared.lock();
            if state.running {
                return Ok(());
            }
            state.running = true;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("switchboard-scheduler".to_string())
            .spawn(move || dispatch_loop(&shared));

        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                info!("Message scheduler started");
                Ok(())
            }
            Err(e) => {
                self.shared.lock().running = false;
                Err(SchedulerError::Spawn(e))
            }
        }
    }

    /// Signal the dispatch thread to exit and join it. Idempotent.
    ///
    /// Deliveries still pending stay in the heap and are not dispatched.
    pub fn stop(&self) {
        let mut slot = self.loop_handle.lock().unwrap_or_else(|e| e.into_inner());
        {
            let mut state = self.shared.lock();
            if !state.running {
                return;
            }
            state.running = false;
        }
        self.shared.wake.notify_all();

        if let Some(handle) = slot.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("Scheduler thread terminated abnormally");
            }
        }
        info!(pending = self.pending_count(), "Message scheduler stopped");
    }

    /// Schedule `delivery` for the ISO-8601 instant `send_time`.
    ///
    /// An unparseable `send_time` is handled per [`resolve_send_time`](Self::resolve_send_time).
    pub fn schedule(&self, delivery: Delivery, send_time: &str) -> Result<ScheduleOutcome, SchedulerError> {
        let due_at = self.resolve_send_time(send_time)?;
        self.schedule_at(delivery, due_at)
    }

    /// Turn `send_time` into a due instant under this scheduler's policy.
    ///
    /// An unparseable value becomes "now" under
    /// [`MalformedTimePolicy::SendNow`] and fails with
    /// [`SchedulerError::MalformedDueTime`] under [`MalformedTimePolicy::Reject`].
    pub fn resolve_send_time(&self, send_time: &str) -> Result<DateTime<Utc>, SchedulerError> {
        match parse_timestamp(send_time) {
            Ok(due_at) => Ok(due_at),
            Err(e) => match self.policy {
                MalformedTimePolicy::SendNow => {
                    warn!(send_time, error = %e, "Unparseable send time, sending now");
                    Ok(Utc::now())
                }
                MalformedTimePolicy::Reject => Err(SchedulerError::MalformedDueTime(send_time.to_string())),
            },
        }
    }

    /// Schedule `delivery` for `due_at`. Past or present instants are handed
    /// to the pool before this returns, without involving the dispatch thread.
    pub fn schedule_at(&self, delivery: Delivery, due_at: DateTime<Utc>) -> Result<ScheduleOutcome, SchedulerError> {
        let message_id = delivery.message_id;
        let now = Utc::now();

        if due_at <= now {
            info!(message_id, %due_at, "Send time already reached, dispatching immediately");
            let handle = self.shared.hand_off(delivery)?;
            return Ok(ScheduleOutcome::DispatchedNow(handle));
        }

        {
            let mut state = self.shared.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(Pending {
                due_at,
                seq,
                delivery,
            });
        }
        self.shared.wake.notify_all();

        info!(
            message_id,
            %due_at,
            delay_secs = (due_at - now).num_seconds(),
            "Scheduled message for delivery"
        );
        Ok(ScheduleOutcome::Pending { due_at })
    }

    /// Deliveries waiting for their due instant.
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Due instant of the next pending delivery, if any.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().pending.peek().map(|p| p.due_at)
    }
}

impl Drop for MessageScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_loop(shared: &Shared) {
    debug!("Scheduler loop started");
    let mut state = shared.lock();

    while state.running {
        let now = Utc::now();
        match state.pending.peek().map(|head| head.due_at) {
            None => {
                state = shared.wake.wait(state).unwrap_or_else(|e| e.into_inner());
            }
            Some(due_at) if due_at <= now => {
                let Some(next) = state.pending.pop() else {
                    continue;
                };
                drop(state);

                let message_id = next.delivery.message_id;
                debug!(message_id, %due_at, "Handing due delivery to worker pool");
                if let Err(e) = shared.hand_off(next.delivery) {
                    error!(message_id, error = %e, "Dropping due delivery, worker pool rejected it");
                }

                // Re-check immediately so simultaneous due items go back-to-back.
                state = shared.lock();
            }
            Some(due_at) => {
                let timeout = (due_at - now).to_std().unwrap_or(Duration::ZERO);
                state = match shared.wake.wait_timeout(state, timeout) {
                    Ok((guard, _)) => guard,
                    Err(e) => e.into_inner().0,
                };
            }
        }
    }

    debug!("Scheduler loop ended");
}
