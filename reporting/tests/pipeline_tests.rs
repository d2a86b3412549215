//! End-to-end pipeline tests against the in-memory bus and repository.
//!
//! These cover the delivery-contract properties the pipeline promises:
//! idempotency under duplicate delivery, poison-message isolation,
//! per-key ordering, transient-failure redelivery, and skipping of
//! unregistered fact types.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use chrono::{TimeZone, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use user_reporting_core::bus::MessageBus;
use user_reporting_core::envelope::Envelope;
use user_reporting_core::fact::{Fact, UserRegisteredFact};
use user_reporting_core::handler::{FactHandler, HandlerError, HandlerRegistry};
use user_reporting_core::report::ReportRepository;
use user_reporting_reporting::{ConsumerLoop, ConsumerStats, UserRegisteredHandler};
use user_reporting_testing::{InMemoryMessageBus, InMemoryReportRepository};
use uuid::Uuid;

const TOPIC: &str = "user-registrations";

fn fact(username: &str, registered_at: chrono::DateTime<Utc>) -> UserRegisteredFact {
    UserRegisteredFact {
        user_id: Uuid::new_v4(),
        username: username.to_string(),
        email: format!("{username}@x.com"),
        registered_at,
    }
}

/// Spawn a consumer loop wired to the default registration handler.
fn spawn_pipeline(
    bus: &InMemoryMessageBus,
    repo: &Arc<InMemoryReportRepository>,
) -> (ConsumerStats, tokio::sync::watch::Sender<bool>) {
    let mut registry = HandlerRegistry::new();
    registry.register(
        UserRegisteredFact::FACT_TYPE,
        Arc::new(UserRegisteredHandler::new(repo.clone())),
    );

    let (mut consumer, shutdown) =
        ConsumerLoop::new(Arc::new(bus.clone()), Arc::new(registry), TOPIC);
    let stats = consumer.stats();
    tokio::spawn(async move {
        let _ = consumer.run().await;
    });
    (stats, shutdown)
}

/// Poll until the condition holds or the deadline passes.
async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn alice_end_to_end() {
    let bus = InMemoryMessageBus::new();
    let repo = Arc::new(InMemoryReportRepository::new());
    let (_stats, shutdown) = spawn_pipeline(&bus, &repo);

    let registered_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let alice = UserRegisteredFact {
        user_id: Uuid::new_v4(),
        username: "alice".to_string(),
        email: "a@x.com".to_string(),
        registered_at,
    };

    bus.publish(TOPIC, &Envelope::from_fact(&alice).unwrap())
        .await
        .unwrap();

    wait_until(|| repo.len() == 1, "alice to be recorded").await;

    let window_end = Utc.with_ymd_and_hms(2025, 1, 1, 23, 59, 59).unwrap();
    let rows = repo.query_by_window(registered_at, window_end).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, alice.user_id);
    assert_eq!(rows[0].username, "alice");
    assert_eq!(rows[0].email, "a@x.com");
    assert_eq!(rows[0].registered_at, registered_at);

    shutdown.send(true).ok();
}

#[tokio::test]
async fn duplicate_delivery_yields_one_record() {
    let bus = InMemoryMessageBus::new();
    let repo = Arc::new(InMemoryReportRepository::new());
    let (stats, shutdown) = spawn_pipeline(&bus, &repo);

    let u1 = fact("alice", Utc::now());
    let envelope = Envelope::from_fact(&u1).unwrap();

    // Same envelope twice, simulating broker redelivery.
    bus.publish(TOPIC, &envelope).await.unwrap();
    bus.publish(TOPIC, &envelope).await.unwrap();

    wait_until(|| stats.snapshot().handled == 2, "both deliveries handled").await;

    assert_eq!(repo.len(), 1);
    let record = repo.get(u1.user_id).unwrap();
    assert_eq!(record.username, u1.username);

    shutdown.send(true).ok();
}

#[tokio::test]
async fn poison_message_does_not_block_the_subscription() {
    let bus = InMemoryMessageBus::new();
    let repo = Arc::new(InMemoryReportRepository::new());
    let (stats, shutdown) = spawn_pipeline(&bus, &repo);

    bus.publish_bytes(TOPIC, vec![0xba, 0xad, 0xf0, 0x0d]);
    let carol = fact("carol", Utc::now());
    bus.publish(TOPIC, &Envelope::from_fact(&carol).unwrap())
        .await
        .unwrap();

    wait_until(|| repo.len() == 1, "valid envelope behind poison").await;

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.poison, 1);
    assert_eq!(snapshot.handled, 1);
    assert!(repo.get(carol.user_id).is_some());

    shutdown.send(true).ok();
}

#[tokio::test]
async fn transient_failure_releases_and_redelivers() {
    let bus = InMemoryMessageBus::new();
    let repo = Arc::new(InMemoryReportRepository::new());
    repo.fail_next_upserts(2);
    let (stats, shutdown) = spawn_pipeline(&bus, &repo);

    let dave = fact("dave", Utc::now());
    bus.publish(TOPIC, &Envelope::from_fact(&dave).unwrap())
        .await
        .unwrap();

    wait_until(|| repo.len() == 1, "record after redeliveries").await;

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.released, 2);
    assert_eq!(snapshot.handled, 1);

    shutdown.send(true).ok();
}

#[tokio::test]
async fn malformed_fact_payload_is_dropped_not_retried() {
    let bus = InMemoryMessageBus::new();
    let repo = Arc::new(InMemoryReportRepository::new());
    let (stats, shutdown) = spawn_pipeline(&bus, &repo);

    // A valid envelope whose payload is not a valid fact encoding.
    let envelope = Envelope {
        fact_type: UserRegisteredFact::FACT_TYPE.to_string(),
        key: "nobody".to_string(),
        payload: vec![0xff; 3],
        published_at: Utc::now(),
    };
    bus.publish(TOPIC, &envelope).await.unwrap();

    let erin = fact("erin", Utc::now());
    bus.publish(TOPIC, &Envelope::from_fact(&erin).unwrap())
        .await
        .unwrap();

    wait_until(|| repo.len() == 1, "valid envelope behind malformed one").await;

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.rejected, 1);
    assert_eq!(snapshot.handled, 1);
    assert_eq!(snapshot.released, 0, "malformed payloads must not be retried");

    shutdown.send(true).ok();
}

#[tokio::test]
async fn unregistered_fact_type_is_skipped() {
    let bus = InMemoryMessageBus::new();
    let repo = Arc::new(InMemoryReportRepository::new());
    let (stats, shutdown) = spawn_pipeline(&bus, &repo);

    let frank = fact("frank", Utc::now());
    let mut foreign = Envelope::from_fact(&frank).unwrap();
    foreign.fact_type = "SomethingElse.v1".to_string();
    bus.publish(TOPIC, &foreign).await.unwrap();

    let grace = fact("grace", Utc::now());
    bus.publish(TOPIC, &Envelope::from_fact(&grace).unwrap())
        .await
        .unwrap();

    wait_until(|| repo.len() == 1, "valid envelope behind foreign type").await;

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.skipped, 1);
    assert_eq!(snapshot.handled, 1);
    assert!(repo.get(grace.user_id).is_some());
    assert!(repo.get(frank.user_id).is_none());

    shutdown.send(true).ok();
}

/// Records the order in which payloads reach the handler.
struct RecordingHandler {
    seen: Arc<Mutex<Vec<String>>>,
}

impl FactHandler for RecordingHandler {
    fn handle(
        &self,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
        let payload = payload.to_vec();
        Box::pin(async move {
            let fact = UserRegisteredFact::from_bytes(&payload)
                .map_err(|e| HandlerError::Malformed(e.to_string()))?;
            self.seen.lock().unwrap().push(fact.username);
            Ok(())
        })
    }
}

#[tokio::test]
async fn same_key_publish_order_is_handling_order() {
    let bus = InMemoryMessageBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut registry = HandlerRegistry::new();
    registry.register(
        UserRegisteredFact::FACT_TYPE,
        Arc::new(RecordingHandler { seen: seen.clone() }),
    );
    let (mut consumer, shutdown) =
        ConsumerLoop::new(Arc::new(bus.clone()), Arc::new(registry), TOPIC);
    let stats = consumer.stats();
    tokio::spawn(async move {
        let _ = consumer.run().await;
    });

    // Two facts for the same user share a routing key, so they share a
    // partition and must be handled in publish order.
    let user_id = Uuid::new_v4();
    for name in ["first", "second", "third"] {
        let f = UserRegisteredFact {
            user_id,
            username: name.to_string(),
            email: format!("{name}@x.com"),
            registered_at: Utc::now(),
        };
        bus.publish(TOPIC, &Envelope::from_fact(&f).unwrap())
            .await
            .unwrap();
    }

    wait_until(|| stats.snapshot().handled == 3, "all three handled").await;

    assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);

    shutdown.send(true).ok();
}
