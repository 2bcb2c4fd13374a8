mod common;

use common::{build_context, MockPublisher};
use std::time::Duration;
use tokio::sync::mpsc;
use vigil_devkit::{MessageBuilder, MockMqttClient};
use vigil_kernel::config::KernelConfig;
use vigil_kernel::health::HealthTracker;
use vigil_kernel::models::EventAction;
use vigil_kernel::mqtt::{
    on_connected, on_connection_error, spawn_message_consumer, Inbound, KEEPALIVES_TOPIC, RESULTS_TOPIC,
};
use vigil_kernel::store::Store;

fn inbound(topic: &str, msg: &serde_json::Value) -> Inbound {
    Inbound { topic: topic.to_string(), payload: MessageBuilder::to_bytes(msg) }
}

async fn wait_for_results(health: &HealthTracker, count: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while health.get_health(0, false).results_processed < count {
        assert!(tokio::time::Instant::now() < deadline, "results not processed in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_pair_results_apply_in_publish_order() {
    let ctx = build_context(KernelConfig::default());
    ctx.keepalive("web-01", 100).await;
    let health = HealthTracker::new();

    let (tx, rx) = mpsc::unbounded_channel();
    let consumer = spawn_message_consumer(rx, ctx.ingestor.clone(), health.clone());

    // critical puis ok pour chaque couple, en rafale : le dernier publié doit gagner
    for i in 0..200 {
        let check = format!("http-{i}");
        tx.send(inbound(RESULTS_TOPIC, &MessageBuilder::check_result("web-01", &check, 2, "down", 200)))
            .unwrap();
        tx.send(inbound(RESULTS_TOPIC, &MessageBuilder::check_result("web-01", &check, 0, "up", 201)))
            .unwrap();
    }
    drop(tx);
    consumer.await.unwrap();

    for i in 0..200 {
        assert!(!ctx.store().hexists("events:web-01", &format!("http-{i}")).await.unwrap());
    }
    let dispatched = ctx.dispatched.take();
    assert_eq!(dispatched.len(), 400);
    for pair in dispatched.chunks(2) {
        assert_eq!(pair[0].check.name, pair[1].check.name);
        assert_eq!((pair[0].action, pair[1].action), (EventAction::Create, EventAction::Resolve));
    }
    assert_eq!(health.get_health(0, false).results_processed, 400);
}

#[tokio::test]
async fn test_mock_broker_messages_reach_the_pipeline() {
    let ctx = build_context(KernelConfig::default());
    let health = HealthTracker::new();
    let mock = MockMqttClient::new();
    let mut incoming = mock.setup_receiver();

    on_connected(&MockPublisher(mock.clone()), &health).await;
    assert_eq!(mock.get_subscriptions(), vec![KEEPALIVES_TOPIC, RESULTS_TOPIC]);
    assert_eq!(health.get_health(0, false).mqtt_status, "connected");

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(msg) = incoming.recv().await {
            if tx.send(Inbound { topic: msg.topic, payload: msg.payload }).is_err() {
                break;
            }
        }
    });
    spawn_message_consumer(rx, ctx.ingestor.clone(), health.clone());

    let now = MessageBuilder::now();
    let keepalive = MessageBuilder::keepalive("db-01", &["linux"], now);
    assert!(mock.simulate_incoming(KEEPALIVES_TOPIC, MessageBuilder::to_bytes(&keepalive)).await.unwrap());
    // non souscrit : jamais livré
    assert!(!mock.simulate_incoming("vigil/checks/linux", b"{}".to_vec()).await.unwrap());
    // JSON invalide : ignoré, le consommateur continue
    assert!(mock.simulate_incoming(RESULTS_TOPIC, b"{\"client\":".to_vec()).await.unwrap());

    let critical = MessageBuilder::check_result("db-01", "disk", 2, "full", now);
    let ok = MessageBuilder::check_result("db-01", "disk", 0, "fine", now + 1);
    mock.simulate_incoming(RESULTS_TOPIC, MessageBuilder::to_bytes(&critical)).await.unwrap();
    mock.simulate_incoming(RESULTS_TOPIC, MessageBuilder::to_bytes(&ok)).await.unwrap();

    wait_for_results(&health, 2).await;
    let actions: Vec<EventAction> = ctx.dispatched.take().into_iter().map(|p| p.action).collect();
    assert_eq!(actions, vec![EventAction::Create, EventAction::Resolve]);
    assert!(ctx.store().sismember("clients", "db-01").await.unwrap());
    assert!(ctx.store().hget("events:db-01", "disk").await.unwrap().is_none());
}

#[tokio::test]
async fn test_connection_errors_are_tracked_until_connack() {
    let health = HealthTracker::new();
    let error = rumqttc::ConnectionError::Io(std::io::Error::other("broker down"));

    on_connection_error(&health, &error);
    on_connection_error(&health, &error);
    let snapshot = health.get_health(0, false);
    assert_eq!(snapshot.mqtt_status, "reconnecting");
    assert_eq!(snapshot.mqtt_reconnects, 2);

    // le ConnAck suivant resouscrit les deux canaux
    let mock = MockMqttClient::new();
    on_connected(&MockPublisher(mock.clone()), &health).await;
    assert_eq!(health.get_health(0, false).mqtt_status, "connected");
    assert_eq!(mock.get_subscriptions().len(), 2);
}
