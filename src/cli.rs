//! Command line interface for the `sublink` demo binary.
//!
//! The demo publishes numbered messages to an in-process broker and reads
//! them back through a reader, exercising partition merging and chunk
//! reassembly end to end.

use clap::Parser;

/// Command line arguments for the `sublink` binary.
#[derive(Debug, Parser)]
#[command(
    name = "sublink",
    version,
    about = "Publish to an in-memory broker and read the topic back"
)]
pub struct Cli {
    /// Topic to publish to and read from.
    #[arg(short, long, default_value = "demo")]
    pub topic: String,
    /// Number of partitions; 0 creates an unpartitioned topic.
    #[arg(short, long, default_value_t = 0)]
    pub partitions: u32,
    /// Number of messages to publish.
    #[arg(short, long, default_value_t = 10)]
    pub messages: usize,
    /// Split payloads into chunks of this many bytes.
    #[arg(long)]
    pub chunk_size: Option<usize>,
    /// Receiver queue size of each partition session.
    #[arg(long, default_value_t = 1000)]
    pub queue_size: u32,
}
