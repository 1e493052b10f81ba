//! Broker behaviour a retrying consumer relies on.

use std::time::Duration;

use messaging::{
    Broker, DeliveryAttempt, InMemoryBroker, Message, QueueSpec, Subscription, TopicSpec,
};

const TOPIC: &str = "order.events";
const QUEUE: &str = "product-service.order-consumer";

async fn declare(broker: &InMemoryBroker) -> Box<dyn messaging::Connection> {
    let conn = broker.connect().await.unwrap();
    conn.declare_topic(&TopicSpec::durable(TOPIC)).await.unwrap();
    conn.declare_queue(&QueueSpec::durable(QUEUE)).await.unwrap();
    conn.bind(QUEUE, TOPIC).await.unwrap();
    conn
}

async fn take(sub: &mut Box<dyn Subscription>) -> messaging::Delivery {
    tokio::time::timeout(Duration::from_secs(1), sub.next())
        .await
        .expect("delivery within a second")
        .unwrap()
}

#[tokio::test]
async fn requeued_copy_goes_to_the_back_with_retry_count() {
    let broker = InMemoryBroker::new();
    let conn = declare(&broker).await;
    conn.publish(TOPIC, Message::persistent(b"first".to_vec()))
        .await
        .unwrap();
    conn.publish(TOPIC, Message::persistent(b"second".to_vec()))
        .await
        .unwrap();

    let mut sub = conn.consume(QUEUE, 1).await.unwrap();
    let first = take(&mut sub).await;
    conn.send(QUEUE, first.message.redelivery()).await.unwrap();
    sub.ack(first.tag).await.unwrap();

    let second = take(&mut sub).await;
    assert_eq!(second.message.body, b"second".to_vec());
    sub.ack(second.tag).await.unwrap();

    let retried = take(&mut sub).await;
    assert_eq!(retried.message.id, first.message.id);
    assert_eq!(retried.message.attempt, DeliveryAttempt { retry_count: 1 });
    assert!(retried.message.persistent);
}

#[tokio::test]
async fn restart_keeps_requeued_persistent_messages() {
    let broker = InMemoryBroker::new();
    let conn = declare(&broker).await;
    conn.publish(TOPIC, Message::persistent(b"order".to_vec()))
        .await
        .unwrap();

    let mut sub = conn.consume(QUEUE, 1).await.unwrap();
    let delivery = take(&mut sub).await;
    broker.restart();

    assert!(sub.next().await.is_err());
    assert!(sub.ack(delivery.tag).await.is_err());

    let conn = declare(&broker).await;
    let mut sub = conn.consume(QUEUE, 1).await.unwrap();
    let again = take(&mut sub).await;
    assert_eq!(again.message.id, delivery.message.id);
    assert!(again.redelivered);
}

#[tokio::test]
async fn publish_wakes_a_blocked_consumer() {
    let broker = InMemoryBroker::new();
    let conn = declare(&broker).await;
    let mut sub = conn.consume(QUEUE, 1).await.unwrap();

    let publisher = broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let conn = publisher.connect().await.unwrap();
        conn.publish(TOPIC, Message::persistent(b"late".to_vec()))
            .await
            .unwrap();
        conn.close().await.unwrap();
    });

    let delivery = take(&mut sub).await;
    assert_eq!(delivery.message.body, b"late".to_vec());
}
