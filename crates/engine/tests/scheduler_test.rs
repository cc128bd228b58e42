//! Integration tests for the message scheduler.
//!
//! A recording provider captures every send with the instant it happened,
//! so tests can assert both hand-off order and timing.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};

use switchboard_core::time::format_timestamp;
use switchboard_core::{Direction, MessageRequest, MessageResponse, MessageType};
use switchboard_engine::{
    Delivery, MalformedTimePolicy, MessageScheduler, ScheduleOutcome, SchedulerError, WorkerPool,
};
use switchboard_providers::Provider;
use switchboard_storage::{MemoryStore, MessageStore, NewMessage};

const TIMEOUT: Duration = Duration::from_secs(15);

type Sends = Arc<Mutex<Vec<(String, Instant)>>>;

struct RecordingProvider {
    sends: Sends,
}

impl Provider for RecordingProvider {
    fn send(&self, request: &MessageRequest) -> MessageResponse {
        self.sends
            .lock()
            .unwrap()
            .push((request.body.clone(), Instant::now()));
        MessageResponse::sent("recorded", format!("rec_{}", request.body))
    }
    fn name(&self) -> &str {
        "recording"
    }
    fn supports(&self, _message_type: MessageType) -> bool {
        true
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    scheduler: MessageScheduler,
    provider: Arc<RecordingProvider>,
    sends: Sends,
}

impl Harness {
    fn new() -> Self {
        Self::with_policy(MalformedTimePolicy::SendNow)
    }

    fn with_policy(policy: MalformedTimePolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let store_dyn: Arc<dyn MessageStore> = store.clone();
        let scheduler = MessageScheduler::new(pool, store_dyn).with_policy(policy);
        let sends: Sends = Arc::new(Mutex::new(Vec::new()));
        let provider = Arc::new(RecordingProvider {
            sends: Arc::clone(&sends),
        });
        Self {
            store,
            scheduler,
            provider,
            sends,
        }
    }

    /// Persist an outbound row and build its delivery.
    fn delivery(&self, body: &str) -> Delivery {
        let conversation_id = self.store.find_or_create_conversation("+15550001", "+15550002").unwrap();
        let message_id = self
            .store
            .insert_message(&NewMessage {
                conversation_id,
                from: "+15550001".to_string(),
                to: "+15550002".to_string(),
                message_type: MessageType::Sms,
                body: body.to_string(),
                attachments: "null".to_string(),
                messaging_provider_id: String::new(),
                timestamp: "2024-01-15T14:30:00.000Z".to_string(),
                direction: Direction::Outbound,
                sent_time: None,
            })
            .unwrap();
        Delivery {
            message_id,
            conversation_id,
            from: "+15550001".to_string(),
            to: "+15550002".to_string(),
            message_type: MessageType::Sms,
            body: body.to_string(),
            attachments: "null".to_string(),
            provider_message_id: String::new(),
            timestamp: "2024-01-15T14:30:00.000Z".to_string(),
            provider: self.provider.clone(),
        }
    }

    fn bodies(&self) -> Vec<String> {
        self.sends.lock().unwrap().iter().map(|(b, _)| b.clone()).collect()
    }

    fn wait_for_sends(&self, count: usize) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if self.sends.lock().unwrap().len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

#[test]
fn due_deliveries_are_handed_off_in_due_order() {
    let h = Harness::new();
    h.scheduler.start().unwrap();

    let now = Utc::now();
    for (body, ms) in [("third", 900), ("first", 300), ("second", 600)] {
        let outcome = h
            .scheduler
            .schedule_at(h.delivery(body), now + ChronoDuration::milliseconds(ms))
            .unwrap();
        assert!(matches!(outcome, ScheduleOutcome::Pending { .. }));
    }

    assert!(h.wait_for_sends(3));
    assert_eq!(h.bodies(), vec!["first", "second", "third"]);
}

#[test]
fn past_due_delivery_dispatches_without_the_loop() {
    let h = Harness::new();
    // Loop deliberately not started.
    let past = format_timestamp(Utc::now() - ChronoDuration::seconds(30));
    let delivery = h.delivery("late");
    let message_id = delivery.message_id;

    let outcome = h.scheduler.schedule(delivery, &past).unwrap();
    let ScheduleOutcome::DispatchedNow(handle) = outcome else {
        panic!("expected immediate dispatch");
    };

    let report = handle.wait().unwrap();
    assert!(report.is_sent());
    assert_eq!(h.scheduler.pending_count(), 0);
    assert_eq!(h.bodies(), vec!["late"]);
    assert!(h.store.message(message_id).unwrap().unwrap().sent_time.is_some());
}

#[test]
fn pending_count_tracks_schedule_and_pop() {
    let h = Harness::new();
    let now = Utc::now();

    h.scheduler
        .schedule_at(h.delivery("a"), now + ChronoDuration::milliseconds(400))
        .unwrap();
    assert_eq!(h.scheduler.pending_count(), 1);
    h.scheduler
        .schedule_at(h.delivery("b"), now + ChronoDuration::seconds(60))
        .unwrap();
    assert_eq!(h.scheduler.pending_count(), 2);

    h.scheduler.start().unwrap();
    assert!(h.wait_for_sends(1));
    assert_eq!(h.scheduler.pending_count(), 1);
    assert_eq!(h.bodies(), vec!["a"]);
}

#[test]
fn five_second_delivery_fires_on_time() {
    let h = Harness::new();
    h.scheduler.start().unwrap();

    let scheduled_at = Instant::now();
    let send_at = format_timestamp(Utc::now() + ChronoDuration::seconds(5));
    let delivery = h.delivery("five");
    let message_id = delivery.message_id;
    h.scheduler.schedule(delivery, &send_at).unwrap();
    assert_eq!(h.scheduler.pending_count(), 1);

    assert!(h.wait_for_sends(1));
    let (_, sent_at) = h.sends.lock().unwrap()[0].clone();
    let elapsed = sent_at.duration_since(scheduled_at);
    assert!(elapsed >= Duration::from_millis(4900), "fired early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(5500), "fired late: {elapsed:?}");

    // The worker stamps sent_time right after the provider returns.
    thread::sleep(Duration::from_millis(100));
    assert!(h.store.message(message_id).unwrap().unwrap().sent_time.is_some());
}

#[test]
fn earlier_insertion_wakes_the_loop() {
    let h = Harness::new();
    h.scheduler.start().unwrap();
    let now = Utc::now();

    h.scheduler
        .schedule_at(h.delivery("ten"), now + ChronoDuration::seconds(10))
        .unwrap();
    // Give the loop time to start sleeping on the ten-second head.
    thread::sleep(Duration::from_millis(100));
    let inserted = Instant::now();
    h.scheduler
        .schedule_at(h.delivery("two"), Utc::now() + ChronoDuration::seconds(2))
        .unwrap();

    assert!(h.wait_for_sends(1));
    let (body, sent_at) = h.sends.lock().unwrap()[0].clone();
    assert_eq!(body, "two");
    assert!(sent_at.duration_since(inserted) < Duration::from_millis(2600));
    assert_eq!(h.scheduler.pending_count(), 1);
}

#[test]
fn malformed_time_is_rejected_under_reject_policy() {
    let h = Harness::with_policy(MalformedTimePolicy::Reject);
    h.scheduler.start().unwrap();

    let err = h.scheduler.schedule(h.delivery("bad"), "next tuesday").unwrap_err();
    assert!(matches!(err, SchedulerError::MalformedDueTime(ref s) if s == "next tuesday"));
    assert_eq!(h.scheduler.pending_count(), 0);
    thread::sleep(Duration::from_millis(100));
    assert!(h.bodies().is_empty());
}

#[test]
fn malformed_time_sends_now_by_default() {
    let h = Harness::new();

    let outcome = h.scheduler.schedule(h.delivery("asap"), "not-a-date").unwrap();
    let ScheduleOutcome::DispatchedNow(handle) = outcome else {
        panic!("expected immediate dispatch");
    };
    handle.wait().unwrap();
    assert_eq!(h.bodies(), vec!["asap"]);
}

#[test]
fn stop_discards_pending_deliveries() {
    let h = Harness::new();
    h.scheduler.start().unwrap();
    h.scheduler
        .schedule_at(h.delivery("never"), Utc::now() + ChronoDuration::milliseconds(300))
        .unwrap();

    h.scheduler.stop();
    thread::sleep(Duration::from_millis(500));
    assert!(h.bodies().is_empty());
    assert_eq!(h.scheduler.pending_count(), 1);
}
