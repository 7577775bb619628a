//! Demo binary reading back a topic published to an in-memory broker.

mod cli;

use std::time::Duration;

use clap::Parser;
use sublink::{
    Client,
    MessageId,
    ReaderOptions,
    Result,
    memory::{MemoryBroker, OutgoingMessage},
};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let broker = MemoryBroker::new();
    broker.create_topic(&cli.topic, cli.partitions);
    publish(&broker, &cli).await?;

    let client = Client::builder().broker(broker.clone()).build()?;
    let mut reader = client
        .create_reader(
            ReaderOptions::new(cli.topic.as_str())
                .start_message_id(&MessageId::earliest())
                .receiver_queue_size(cli.queue_size),
        )
        .await?;

    let mut read = 0usize;
    while reader.has_next().await {
        let message = reader.next_timeout(READ_TIMEOUT).await?;
        println!(
            "{} {}",
            message.id(),
            String::from_utf8_lossy(message.payload())
        );
        read += 1;
    }
    tracing::info!(topic = %cli.topic, published = cli.messages, read, "topic read back");
    reader.close().await;
    broker.shutdown().await;
    Ok(())
}

async fn publish(broker: &MemoryBroker, cli: &cli::Cli) -> Result<()> {
    let mut producer = broker.producer(&cli.topic);
    for i in 0..cli.messages {
        let payload = format!("hello-{i}");
        match cli.chunk_size {
            Some(size) => {
                producer
                    .send_chunked(OutgoingMessage::new(payload), size)
                    .await?;
            }
            None => {
                producer.send(payload).await?;
            }
        }
    }
    Ok(())
}
