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

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use topic_consumer::prelude::*;
use tracing::{info, warn, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Consumes a topic of an in-memory broker while a producer writes to it and
/// connections are broken at random intervals.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Optional TOML file with consumer settings, the topic and brokers are taken from it.
    #[arg(long)]
    settings: Option<std::path::PathBuf>,

    #[arg(long, default_value = "orders")]
    topic: String,

    #[arg(long, default_value_t = 3)]
    partitions: u32,

    /// Interval between produced messages, per partition.
    #[arg(long, default_value = "250ms")]
    produce_interval: humantime::Duration,

    /// Break every partition connection this often.
    #[arg(long, default_value = "2s")]
    failure_interval: humantime::Duration,

    /// Stop after this long, Ctrl-C stops earlier.
    #[arg(long, default_value = "10s")]
    duration: humantime::Duration,
}

const BROKER_ADDRESS: &str = "127.0.0.1:9092";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    Registry::default()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new("INFO")))
        .init();

    let handler: Arc<dyn MessageHandler> = Arc::new(|_span: &Span, message: Message| {
        info!(
            offset = message.offset,
            "Handling message: {}",
            String::from_utf8_lossy(&message.value)
        );
    });

    let config = match &args.settings {
        Some(path) => ConsumerSettings::from_file(path).await?.into_config(handler)?,
        None => ConsumerConfig::builder()
            .name("topic-tail")
            .brokers(vec![BROKER_ADDRESS.to_string()])
            .topic(args.topic.clone())
            .handler(handler)
            .build(),
    };
    let topic = config.topic.clone();

    let broker = MemoryBroker::new();
    broker.create_topic(&topic, args.partitions).await;

    let mut consumer = TopicConsumer::new(config, Arc::new(broker.clone())).await?;
    consumer.start()?;
    info!(
        "Consuming {} partition(s) of topic: {topic}",
        consumer.partitions().len()
    );

    let producer = tokio::spawn(produce(
        broker.clone(),
        topic.clone(),
        args.partitions,
        *args.produce_interval,
    ));
    let breaker = tokio::spawn(break_connections(
        broker,
        topic,
        args.partitions,
        *args.failure_interval,
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down..."),
        _ = tokio::time::sleep(*args.duration) => info!("Finished, shutting down..."),
    }

    producer.abort();
    breaker.abort();
    if let Err(error) = consumer.close().await {
        warn!("Consumer did not close cleanly: {error}");
    }
    for snapshot in consumer.stats() {
        info!(
            partition = snapshot.partition,
            state = %snapshot.state,
            delivered = snapshot.delivered,
            duplicates = snapshot.duplicates,
            reconnects = snapshot.reconnects,
            last_offset = snapshot.last_offset,
            "Partition summary"
        );
    }
    Ok(())
}

async fn produce(broker: MemoryBroker, topic: String, partitions: u32, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let mut sequence = 0u64;
    loop {
        ticker.tick().await;
        for partition in 0..partitions {
            sequence += 1;
            if let Err(error) = broker
                .produce(&topic, partition, format!("message-{sequence}"))
                .await
            {
                warn!("Failed to produce message: {error}");
            }
        }
    }
}

async fn break_connections(
    broker: MemoryBroker,
    topic: String,
    partitions: u32,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let mut partition = 0;
    loop {
        ticker.tick().await;
        info!("Breaking connection of partition: {partition}");
        if let Err(error) = broker.fail_fetches(&topic, partition, 1).await {
            warn!("Failed to inject failure: {error}");
        }
        partition = (partition + 1) % partitions.max(1);
    }
}
