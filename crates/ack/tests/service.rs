use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use bytes::Bytes;
use courier_ack::client::Error as ClientError;
use courier_ack::service::Error;
use courier_ack::{
    Client, ClientOptions, EventOptions, PublishOptions, RequestOptions, ServiceManager,
    ServiceOptions, decode_payload,
};
use courier_messaging::service_handler::{ServiceHandler, ServiceHandlerError};
use courier_messaging::subscription_handler::{
    Acknowledgement, SubscriptionHandler, SubscriptionHandlerError,
};
use courier_messaging::{Codec, Message, Transport};
use courier_messaging_memory::{MemoryBroker, MemoryTransport};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Job {
    id: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("{0} is odd")]
struct Odd(u32);

impl ServiceHandlerError for Odd {}
impl SubscriptionHandlerError for Odd {}

#[derive(Clone)]
struct Doubler;

#[async_trait]
impl ServiceHandler for Doubler {
    type Error = Odd;
    type Request = Job;
    type Response = u32;

    async fn handle(&self, request: Job, _message: &Message) -> Result<u32, Odd> {
        if request.id % 2 == 1 {
            return Err(Odd(request.id));
        }
        Ok(request.id * 2)
    }
}

#[derive(Clone)]
struct Ping;

#[async_trait]
impl ServiceHandler for Ping {
    type Error = Odd;
    type Request = Value;
    type Response = bool;

    async fn handle(&self, request: Value, _message: &Message) -> Result<bool, Odd> {
        Ok(request == serde_json::json!({}))
    }
}

#[derive(Clone)]
struct Recorder {
    name: &'static str,
    seen: mpsc::UnboundedSender<(&'static str, Job)>,
}

#[async_trait]
impl SubscriptionHandler for Recorder {
    type Error = Odd;

    async fn handle(&self, message: Message) -> Result<(), Odd> {
        let job: Job = decode_payload(Codec::Json, &message.payload).map_err(|_| Odd(0))?;
        let _ = self.seen.send((self.name, job));
        Ok(())
    }
}

/// Acknowledges on its own once the event was recorded.
#[derive(Clone)]
struct SelfAcknowledging(Recorder);

#[async_trait]
impl SubscriptionHandler for SelfAcknowledging {
    type Error = Odd;

    async fn handle(&self, message: Message) -> Result<(), Odd> {
        self.0.handle(message).await
    }

    async fn handle_with_ack(&self, message: Message, ack: Acknowledgement) -> Result<(), Odd> {
        self.handle(message).await?;
        if ack.acknowledge().await {
            Ok(())
        } else {
            Err(Odd(0))
        }
    }
}

fn client(broker: &MemoryBroker) -> Client<MemoryTransport> {
    Client::new(broker.connect(), ClientOptions::default())
}

#[tokio::test(start_paused = true)]
async fn test_request_reply() {
    let broker = MemoryBroker::new();
    let mut manager = ServiceManager::new(broker.connect());
    manager
        .on_request("math.double", ServiceOptions::default(), Doubler)
        .on_request("health.ping", ServiceOptions::default(), Ping);
    manager.start().await.unwrap();

    let client = client(&broker);

    let doubled: u32 = client
        .request("math.double", Some(&Job { id: 20 }), &RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(doubled, 40);

    let pong: bool = client
        .request::<Job, _>("health.ping", None, &RequestOptions::default())
        .await
        .unwrap();
    assert!(pong);

    let failure = client
        .request::<_, u32>("math.double", Some(&Job { id: 21 }), &RequestOptions::default())
        .await;
    assert_matches!(failure, Err(ClientError::Service(message)) if message == "21 is odd");

    let raw = broker
        .connect()
        .request(
            "math.double",
            Bytes::from_static(br#"{"_payload":{"id":3}}"#),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&raw.payload).unwrap();
    assert_eq!(
        body,
        serde_json::json!({"message": "NatsError", "error": "3 is odd"})
    );

    manager.shutdown();
    manager.wait().await;
}

#[tokio::test(start_paused = true)]
async fn test_request_without_service_fails() {
    let broker = MemoryBroker::new();
    let client = client(&broker);

    let result = client
        .request::<Job, u32>(
            "math.double",
            None,
            &RequestOptions {
                timeout: Duration::from_millis(100),
                ..RequestOptions::default()
            },
        )
        .await;

    assert_matches!(result, Err(ClientError::Transport(_)));
}

#[tokio::test(start_paused = true)]
async fn test_events_are_acknowledged_by_every_group() {
    let broker = MemoryBroker::new();
    let (seen, mut events) = mpsc::unbounded_channel();

    let mut manager = ServiceManager::with_queue_group(broker.connect(), "test");
    manager
        .on_event(
            "nats.test.ack",
            EventOptions::default(),
            Recorder {
                name: "first",
                seen: seen.clone(),
            },
        )
        .on_event(
            "nats.test.ack",
            EventOptions {
                queue_group: Some("test2".to_string()),
                ..EventOptions::default()
            },
            Recorder {
                name: "second",
                seen,
            },
        );
    manager.start().await.unwrap();

    let client = client(&broker);
    assert!(
        client
            .publish("nats.test.ack", &Job { id: 1 }, &PublishOptions::default())
            .await
    );

    let publisher = client.publisher("nats.test.ack").await.unwrap();
    assert_eq!(publisher.known_consumers(), vec!["test", "test2"]);

    let mut names = vec![events.recv().await.unwrap().0, events.recv().await.unwrap().0];
    names.sort_unstable();
    assert_eq!(names, ["first", "second"]);

    manager.shutdown();
    manager.shutdown();
    manager.wait().await;
}

#[tokio::test(start_paused = true)]
async fn test_events_without_auto_acknowledge_are_acknowledged_by_the_handler() {
    let broker = MemoryBroker::new();
    let (seen, mut events) = mpsc::unbounded_channel();
    let manual = EventOptions {
        auto_acknowledge: false,
        ..EventOptions::default()
    };

    let mut manager = ServiceManager::new(broker.connect());
    manager
        .on_event(
            "audit",
            manual.clone(),
            Recorder {
                name: "audit",
                seen: seen.clone(),
            },
        )
        .on_event(
            "audit.manual",
            manual,
            SelfAcknowledging(Recorder {
                name: "manual",
                seen,
            }),
        );
    manager.start().await.unwrap();

    let mut options = ClientOptions::default();
    options.publisher.retry.max_attempts = 1;
    let client = Client::new(broker.connect(), options);

    let publish = PublishOptions {
        timeout: Some(Duration::from_millis(100)),
        ..PublishOptions::default()
    };
    assert!(!client.publish("audit", &Job { id: 2 }, &publish).await);
    assert_eq!(events.recv().await.unwrap(), ("audit", Job { id: 2 }));

    assert!(client.publish("audit.manual", &Job { id: 4 }, &publish).await);
    assert_eq!(events.recv().await.unwrap(), ("manual", Job { id: 4 }));

    manager.shutdown();
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let broker = MemoryBroker::new();
    let mut manager = ServiceManager::new(broker.connect());

    manager.start().await.unwrap();

    assert_matches!(manager.start().await, Err(Error::AlreadyStarted));
    manager.shutdown();
    manager.wait().await;
}
