use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;
use courier_ack::envelope::request_options;
use courier_ack::publisher::{AttemptError, Error};
use courier_ack::{
    Publisher, PublisherOptions, RetryConfig, Subscriber, SubscriberOptions, decode_payload, retry,
};
use courier_messaging::{Codec, Transport};
use courier_messaging_memory::{MemoryBroker, MemoryTransport};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Job {
    id: u32,
}

/// Starts a consumer that takes `processing` per message and reports what it saw.
async fn spawn_consumer(
    transport: MemoryTransport,
    subject: &str,
    queue_group: &str,
    processing: Duration,
) -> (Subscriber<MemoryTransport>, mpsc::UnboundedReceiver<Job>) {
    let subscriber = Subscriber::new(
        transport,
        subject,
        queue_group,
        SubscriberOptions::default(),
    )
    .await
    .unwrap();
    let mut messages = subscriber.subscribe().await.unwrap();
    let (sender, receiver) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(message) = messages.next().await {
            let job: Job = decode_payload(Codec::Json, &message.payload).unwrap();
            tokio::time::sleep(processing).await;
            let _ = sender.send(job);
        }
    });

    (subscriber, receiver)
}

#[tokio::test(start_paused = true)]
async fn test_single_consumer_acknowledges_within_timeout() {
    let broker = MemoryBroker::new();
    let (_subscriber, mut received) = spawn_consumer(
        broker.connect(),
        "jobs.created",
        "workers",
        Duration::from_millis(50),
    )
    .await;

    let publisher = Publisher::new(
        broker.connect(),
        "jobs.created",
        PublisherOptions::default(),
    )
    .await
    .unwrap();

    let start = Instant::now();
    let acknowledged = publisher
        .request(&Job { id: 1 }, Some(Duration::from_millis(500)), None)
        .await;

    assert!(acknowledged);
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(received.recv().await, Some(Job { id: 1 }));
    assert_eq!(publisher.known_consumers(), vec!["workers"]);
}

#[tokio::test(start_paused = true)]
async fn test_every_group_must_acknowledge() {
    let broker = MemoryBroker::new();
    let mut consumers = Vec::new();
    for group in ["billing", "shipping", "audit"] {
        consumers.push(
            spawn_consumer(broker.connect(), "orders", group, Duration::from_millis(10)).await,
        );
    }

    let publisher = Publisher::new(broker.connect(), "orders", PublisherOptions::default())
        .await
        .unwrap();

    assert!(publisher.request(&Job { id: 7 }, None, None).await);
    assert_eq!(publisher.expected_count(), 3);

    for (_, received) in &mut consumers {
        assert_eq!(received.recv().await, Some(Job { id: 7 }));
        assert!(received.try_recv().is_err());
    }
}

#[tokio::test(start_paused = true)]
async fn test_crashed_consumer_exhausts_retries() {
    let broker = MemoryBroker::new();
    let consumer = broker.connect();
    let (_subscriber, _received) =
        spawn_consumer(consumer.clone(), "jobs.created", "workers", Duration::ZERO).await;

    let publisher = Publisher::new(
        broker.connect(),
        "jobs.created",
        PublisherOptions::default(),
    )
    .await
    .unwrap();
    assert!(publisher.wait_for_consumers().await);

    consumer.close();

    let start = Instant::now();
    let result = publisher
        .request_detailed(&Job { id: 1 }, Some(Duration::from_millis(500)), None)
        .await;
    let elapsed = start.elapsed();

    // 3 timeouts of 500 ms plus backoff of 500 ms and 1000 ms.
    assert!(elapsed >= Duration::from_millis(3000));
    assert!(elapsed < Duration::from_millis(3100));
    assert_matches!(result, Err(Error::Retry(retry::Error::Exhausted(log))) => {
        assert_eq!(log.len(), 3);
        for record in log.iter() {
            assert_matches!(
                &record.error,
                AttemptError::InsufficientAcknowledgements { expected: 1, acknowledged: 0, missing }
                    if missing == &vec!["workers".to_string()]
            );
        }
    });
}

#[tokio::test(start_paused = true)]
async fn test_crashed_consumer_reports_false() {
    let broker = MemoryBroker::new();
    let consumer = broker.connect();
    let (_subscriber, _received) =
        spawn_consumer(consumer.clone(), "jobs", "workers", Duration::ZERO).await;

    let publisher = Publisher::new(broker.connect(), "jobs", PublisherOptions::default())
        .await
        .unwrap();
    assert!(publisher.wait_for_consumers().await);

    consumer.close();

    assert!(
        !publisher
            .request(&Job { id: 2 }, Some(Duration::from_millis(100)), None)
            .await
    );
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_acknowledgements_count_once() {
    let broker = MemoryBroker::new();
    let rogue = broker.connect();

    let publisher = Publisher::new(
        broker.connect(),
        "jobs",
        PublisherOptions {
            retry: RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
            ..PublisherOptions::default()
        },
    )
    .await
    .unwrap();

    for group in ["a", "b"] {
        rogue
            .publish("jobs.consumer.register", Bytes::from(group))
            .await
            .unwrap();
    }

    let mut inbound = rogue.subscribe("jobs", Some("a")).await.unwrap();
    tokio::spawn(async move {
        let message = inbound.next().await.unwrap();
        let options = request_options(Codec::Json, &message.payload)
            .unwrap()
            .unwrap();
        let subject = format!("jobs.akc.{}", options.id);
        for _ in 0..2 {
            rogue.publish(&subject, Bytes::from("a")).await.unwrap();
        }
    });

    let result = publisher
        .request_detailed(&Job { id: 3 }, Some(Duration::from_millis(200)), None)
        .await;

    assert_matches!(result, Err(Error::Retry(retry::Error::Exhausted(log))) => {
        assert_matches!(
            &log.last().unwrap().error,
            AttemptError::InsufficientAcknowledgements { expected: 2, acknowledged: 1, missing }
                if missing == &vec!["b".to_string()]
        );
    });
}

#[tokio::test(start_paused = true)]
async fn test_late_consumer_is_discovered() {
    let broker = MemoryBroker::new();
    let (_first, _) =
        spawn_consumer(broker.connect(), "jobs", "workers", Duration::ZERO).await;

    let publisher = Publisher::new(broker.connect(), "jobs", PublisherOptions::default())
        .await
        .unwrap();
    assert!(publisher.request(&Job { id: 1 }, None, None).await);
    assert_eq!(publisher.expected_count(), 1);

    let (_second, mut received) =
        spawn_consumer(broker.connect(), "jobs", "auditors", Duration::ZERO).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(publisher.expected_count(), 2);
    assert!(publisher.request(&Job { id: 2 }, None, None).await);
    assert_eq!(received.recv().await, Some(Job { id: 2 }));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_message_does_not_end_consumption() {
    let broker = MemoryBroker::new();
    let (_subscriber, mut received) =
        spawn_consumer(broker.connect(), "jobs", "workers", Duration::ZERO).await;

    let publisher = Publisher::new(broker.connect(), "jobs", PublisherOptions::default())
        .await
        .unwrap();
    assert!(publisher.wait_for_consumers().await);

    broker
        .connect()
        .publish("jobs", Bytes::from_static(b"\xff\xfe not json"))
        .await
        .unwrap();

    assert!(publisher.request(&Job { id: 9 }, None, None).await);
    assert_eq!(received.recv().await, Some(Job { id: 9 }));
}
