/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use topic_consumer::prelude::*;
use tracing::Span;

const ADDRESS: &str = "127.0.0.1:9092";
const WAIT: Duration = Duration::from_secs(5);

type Delivered = mpsc::UnboundedReceiver<(u32, i64)>;

fn collecting_handler() -> (Arc<dyn MessageHandler>, Delivered) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = Arc::new(move |_span: &Span, message: Message| {
        let _ = tx.send((message.partition, message.offset));
    });
    (handler, rx)
}

fn config(topic: &str, handler: Arc<dyn MessageHandler>) -> ConsumerConfig {
    ConsumerConfig::builder()
        .name("scenario")
        .brokers(vec![ADDRESS.to_string()])
        .topic(topic)
        .handler(handler)
        .recover_delay(Duration::from_millis(20))
        .retry_interval(Duration::from_millis(50))
        .shutdown_timeout(Duration::from_secs(2))
        .build()
}

async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {WAIT:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn receive(rx: &mut Delivered, count: usize) -> Vec<(u32, i64)> {
    let mut delivered = Vec::with_capacity(count);
    for _ in 0..count {
        let next = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("message was not delivered in time")
            .expect("handler channel closed");
        delivered.push(next);
    }
    delivered
}

async fn started_consumer(
    broker: &MemoryBroker,
    topic: &str,
    partitions: u32,
) -> (TopicConsumer, Delivered) {
    broker.create_topic(topic, partitions).await;
    for partition in 0..partitions {
        broker.produce(topic, partition, "before start").await.unwrap();
    }
    let (handler, rx) = collecting_handler();
    let mut consumer = TopicConsumer::new(config(topic, handler), Arc::new(broker.clone()))
        .await
        .unwrap();
    consumer.start().unwrap();
    let expected = partitions as usize;
    eventually(|| async { broker.active_fetchers(topic).await == expected }).await;
    (consumer, rx)
}

#[tokio::test]
async fn orders_scenario_should_suppress_duplicate_offsets_per_partition() {
    let broker = MemoryBroker::new();
    let (mut consumer, mut rx) = started_consumer(&broker, "orders", 2).await;

    for offset in [5, 6, 6, 7] {
        broker.append_at("orders", 0, offset, "p0").await.unwrap();
    }
    for offset in [1, 2, 3] {
        broker.append_at("orders", 1, offset, "p1").await.unwrap();
    }

    let delivered = receive(&mut rx, 6).await;
    let mut by_partition: HashMap<u32, Vec<i64>> = HashMap::new();
    for (partition, offset) in delivered {
        by_partition.entry(partition).or_default().push(offset);
    }
    assert_eq!(by_partition[&0], vec![5, 6, 7]);
    assert_eq!(by_partition[&1], vec![1, 2, 3]);

    consumer.close().await.unwrap();
    let stats = consumer.stats();
    assert_eq!(stats[0].duplicates, 1);
    assert_eq!(stats[1].duplicates, 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn start_should_launch_exactly_one_fetch_loop_per_partition() {
    for partitions in [1u32, 3, 12] {
        let broker = MemoryBroker::new();
        let topic = format!("topic-{partitions}");
        let (mut consumer, _rx) = started_consumer(&broker, &topic, partitions).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.active_fetchers(&topic).await, partitions as usize);
        assert_eq!(broker.open_connections(&topic).await, partitions as usize);
        for partition in 0..partitions {
            assert_eq!(broker.connects(&topic, partition).await.unwrap(), 1);
        }
        let stats = consumer.stats();
        assert_eq!(stats.len(), partitions as usize);
        assert!(stats.iter().all(|s| s.state == WorkerState::Consuming));

        consumer.close().await.unwrap();
    }
}

#[tokio::test]
async fn lookup_should_fail_over_to_next_broker_and_stop_there() {
    let broker = MemoryBroker::new();
    broker.create_topic("orders", 3).await;
    broker.set_down("a:9092", true).await;
    let (handler, _rx) = collecting_handler();
    let config = ConsumerConfig::builder()
        .brokers(vec![
            "a:9092".to_string(),
            "b:9092".to_string(),
            "c:9092".to_string(),
        ])
        .topic("orders")
        .handler(handler)
        .build();

    let mut consumer = TopicConsumer::new(config, Arc::new(broker.clone()))
        .await
        .unwrap();

    assert_eq!(
        broker.lookups().await,
        vec!["a:9092".to_string(), "b:9092".to_string()]
    );
    assert_eq!(consumer.partitions().len(), 3);
    assert!(consumer
        .partitions()
        .iter()
        .all(|p| p.leader.address() == "b:9092"));
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn lookup_should_fail_when_every_broker_fails() {
    let broker = MemoryBroker::new();
    broker.create_topic("orders", 3).await;
    broker.set_down("a:9092", true).await;
    let (handler, _rx) = collecting_handler();
    let config = ConsumerConfig::builder()
        .brokers(vec!["a:9092".to_string(), ADDRESS.to_string()])
        .topic("payments")
        .handler(handler)
        .build();

    let result = TopicConsumer::new(config, Arc::new(broker.clone())).await;

    assert!(matches!(result, Err(ConsumerError::NoPartitionFound)));
    assert_eq!(broker.lookups().await.len(), 2);
    assert_eq!(broker.open_connections("orders").await, 0);
}

#[tokio::test(start_paused = true)]
async fn lookup_should_time_out_hanging_broker() {
    let broker = MemoryBroker::new();
    broker.create_topic("orders", 2).await;
    broker.set_hanging("a:9092", true).await;
    let (handler, _rx) = collecting_handler();
    let config = ConsumerConfig::builder()
        .brokers(vec!["a:9092".to_string(), "b:9092".to_string()])
        .topic("orders")
        .handler(handler)
        .build();

    let started_at = tokio::time::Instant::now();
    let mut consumer = TopicConsumer::new(config, Arc::new(broker.clone()))
        .await
        .unwrap();

    assert!(started_at.elapsed() >= LOOKUP_TIMEOUT);
    assert_eq!(consumer.partitions().len(), 2);
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn worker_should_resume_at_newest_offset_after_fetch_failure() {
    let broker = MemoryBroker::new();
    let (mut consumer, mut rx) = started_consumer(&broker, "orders", 1).await;

    broker.produce("orders", 0, "one").await.unwrap();
    broker.produce("orders", 0, "two").await.unwrap();
    assert_eq!(receive(&mut rx, 2).await, vec![(0, 1), (0, 2)]);

    broker.fail_connects("orders", 0, 1).await.unwrap();
    broker.fail_fetches("orders", 0, 1).await.unwrap();
    let skipped = broker.produce("orders", 0, "during outage").await.unwrap();
    eventually(|| async { consumer.stats()[0].reconnects == 1 }).await;
    let resumed = broker.produce("orders", 0, "after recovery").await.unwrap();

    assert_eq!(receive(&mut rx, 1).await, vec![(0, resumed)]);
    assert_eq!(skipped, 3);
    assert_eq!(resumed, 4);
    let stats = consumer.stats();
    assert_eq!(stats[0].fetch_failures, 1);
    assert_eq!(stats[0].state, WorkerState::Consuming);
    assert!(stats[0].recovering_since.is_none());
    assert_eq!(broker.open_connections("orders").await, 1);

    consumer.close().await.unwrap();
}

#[tokio::test]
async fn worker_should_keep_delivering_in_order_across_many_failures() {
    let broker = MemoryBroker::new();
    let (mut consumer, mut rx) = started_consumer(&broker, "orders", 1).await;

    let mut delivered = Vec::new();
    for round in 0..5 {
        let offset = broker.produce("orders", 0, "value").await.unwrap();
        delivered.extend(receive(&mut rx, 1).await);
        assert_eq!(delivered.last(), Some(&(0, offset)));

        broker.fail_fetches("orders", 0, 1).await.unwrap();
        eventually(|| async { consumer.stats()[0].reconnects == round + 1 }).await;
        eventually(|| async { broker.active_fetchers("orders").await == 1 }).await;
    }

    let offsets: Vec<i64> = delivered.iter().map(|(_, offset)| *offset).collect();
    assert!(offsets.windows(2).all(|pair| pair[0] < pair[1]));
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn close_should_stop_workers_and_release_connections() {
    let broker = MemoryBroker::new();
    let (mut consumer, _rx) = started_consumer(&broker, "orders", 4).await;

    consumer.close().await.unwrap();

    assert!(consumer.is_closing());
    assert_eq!(broker.open_connections("orders").await, 0);
    assert_eq!(broker.active_fetchers("orders").await, 0);
    assert!(consumer
        .stats()
        .iter()
        .all(|s| s.state == WorkerState::Stopped));
}

#[tokio::test]
async fn close_should_stop_worker_that_retries_forever() {
    let broker = MemoryBroker::new();
    let (mut consumer, _rx) = started_consumer(&broker, "orders", 2).await;

    broker.fail_connects("orders", 1, usize::MAX).await.unwrap();
    broker.fail_fetches("orders", 1, 1).await.unwrap();
    eventually(|| async { consumer.stats()[1].failed_attempts >= 3 }).await;
    let stats = consumer.stats();
    assert_eq!(stats[0].state, WorkerState::Consuming);
    assert_eq!(stats[1].state, WorkerState::Recovering);
    assert!(stats[1].recovering_since.is_some());
    assert_eq!(consumer.retry_interval(), Duration::from_millis(50));

    let closed = tokio::time::timeout(Duration::from_secs(1), consumer.close()).await;

    assert!(matches!(closed, Ok(Ok(()))));
    assert!(consumer
        .stats()
        .iter()
        .all(|s| s.state == WorkerState::Stopped));
    assert_eq!(broker.open_connections("orders").await, 0);
}

struct StuckHandler;

impl MessageHandler for StuckHandler {
    fn handle(self: Arc<Self>, _span: Span, _message: Message) -> HandlerFuture {
        Box::pin(std::future::pending())
    }
}

#[tokio::test]
async fn close_should_abort_workers_stuck_in_handler() {
    let broker = MemoryBroker::new();
    broker.create_topic("orders", 2).await;
    let config = ConsumerConfig::builder()
        .brokers(vec![ADDRESS.to_string()])
        .topic("orders")
        .handler(Arc::new(StuckHandler))
        .shutdown_timeout(Duration::from_millis(100))
        .build();
    let mut consumer = TopicConsumer::new(config, Arc::new(broker.clone()))
        .await
        .unwrap();
    consumer.start().unwrap();
    eventually(|| async { broker.active_fetchers("orders").await == 2 }).await;

    // Offset 0 is not above the initial maximum, only "second" reaches the handler.
    broker.produce("orders", 0, "first").await.unwrap();
    broker.produce("orders", 0, "second").await.unwrap();
    eventually(|| async { consumer.stats()[0].delivered == 1 }).await;

    let result = consumer.close().await;

    assert_eq!(result, Err(ConsumerError::ShutdownTimedOut(1)));
    assert_eq!(consumer.stats()[1].state, WorkerState::Stopped);
}

#[tokio::test]
async fn handler_panic_should_only_end_its_own_partition() {
    let broker = MemoryBroker::new();
    broker.create_topic("orders", 2).await;
    broker.produce("orders", 0, "warm-up").await.unwrap();
    broker.produce("orders", 1, "warm-up").await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = Arc::new(move |_span: &Span, message: Message| {
        if message.partition == 0 {
            panic!("poison message at offset {}", message.offset);
        }
        let _ = tx.send((message.partition, message.offset));
    });
    let mut consumer = TopicConsumer::new(config("orders", handler), Arc::new(broker.clone()))
        .await
        .unwrap();
    consumer.start().unwrap();
    eventually(|| async { broker.active_fetchers("orders").await == 2 }).await;

    broker.produce("orders", 0, "poison").await.unwrap();
    eventually(|| async { consumer.stats()[0].state == WorkerState::Failed }).await;
    broker.produce("orders", 1, "fine").await.unwrap();
    broker.produce("orders", 1, "still fine").await.unwrap();

    assert_eq!(receive(&mut rx, 2).await, vec![(1, 1), (1, 2)]);
    assert_eq!(broker.open_connections("orders").await, 1);
    consumer.close().await.unwrap();
    assert_eq!(consumer.stats()[0].state, WorkerState::Failed);
}

#[tokio::test]
async fn blocking_handler_should_only_hold_back_its_own_partition() {
    let broker = MemoryBroker::new();
    broker.create_topic("orders", 2).await;
    broker.produce("orders", 0, "warm-up").await.unwrap();
    broker.produce("orders", 1, "warm-up").await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = Arc::new(move |_span: &Span, message: Message| {
        if message.partition == 0 {
            std::thread::sleep(Duration::from_millis(1500));
        }
        let _ = tx.send((message.partition, message.offset));
    });
    let mut consumer = TopicConsumer::new(config("orders", handler), Arc::new(broker.clone()))
        .await
        .unwrap();
    consumer.start().unwrap();
    eventually(|| async { broker.active_fetchers("orders").await == 2 }).await;

    broker.produce("orders", 0, "slow").await.unwrap();
    eventually(|| async { consumer.stats()[0].delivered == 1 }).await;
    let produced_at = std::time::Instant::now();
    broker.produce("orders", 1, "fast").await.unwrap();

    let delivered = tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("partition 1 was held back by the handler of partition 0");
    assert_eq!(delivered, Some((1, 1)));
    assert!(produced_at.elapsed() < Duration::from_millis(500));

    assert_eq!(receive(&mut rx, 1).await, vec![(0, 1)]);
    consumer.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partitions_should_be_delivered_in_order_independently() {
    const PARTITIONS: u32 = 3;
    const MESSAGES: i64 = 200;
    let broker = MemoryBroker::new();
    let (mut consumer, mut rx) = started_consumer(&broker, "orders", PARTITIONS).await;

    let producers: Vec<_> = (0..PARTITIONS)
        .map(|partition| {
            let broker = broker.clone();
            tokio::spawn(async move {
                for _ in 0..MESSAGES {
                    broker.produce("orders", partition, "payload").await.unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    let delivered = receive(&mut rx, (PARTITIONS as usize) * MESSAGES as usize).await;
    let mut by_partition: HashMap<u32, Vec<i64>> = HashMap::new();
    for (partition, offset) in delivered {
        by_partition.entry(partition).or_default().push(offset);
    }
    for partition in 0..PARTITIONS {
        let expected: Vec<i64> = (1..=MESSAGES).collect();
        assert_eq!(by_partition[&partition], expected);
    }
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn consumer_should_be_created_from_settings_file() {
    let broker = MemoryBroker::new();
    broker.create_topic("orders", 2).await;
    let settings = ConsumerSettings::from_toml_str(
        r#"
        name = "from-file"
        brokers = ["127.0.0.1:9092"]
        topic = "orders"
        max_bytes = "64 KiB"
        retry_interval = "100ms"
        "#,
    )
    .unwrap();
    let (handler, _rx) = collecting_handler();

    let mut consumer = TopicConsumer::new(
        settings.into_config(handler).unwrap(),
        Arc::new(broker.clone()),
    )
    .await
    .unwrap();

    assert_eq!(consumer.name(), Some("from-file"));
    assert_eq!(consumer.topic(), "orders");
    assert_eq!(consumer.retry_interval(), Duration::from_millis(100));
    consumer.close().await.unwrap();
}
