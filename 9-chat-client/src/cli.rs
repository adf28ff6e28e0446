use std::time::Duration;

use clap::Parser;

use crate::{
    config::{
        ClientConfig, DEFAULT_BUFFER_CAPACITY, DEFAULT_CONCURRENCY, DEFAULT_QUEUE_CAPACITY,
    },
    endpoint::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TRANSPORT, Endpoint},
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Terminal client for a JSON chat server", long_about = None)]
pub struct ClientArgs {
    /// Username to join with. Prompted for when omitted.
    #[arg(long)]
    pub name: Option<String>,

    /// Host name or address of the chat server.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port of the chat server.
    #[arg(long, default_value = DEFAULT_PORT)]
    pub port: String,

    /// Transport used to reach the server.
    #[arg(long, default_value = DEFAULT_TRANSPORT)]
    pub transport: String,

    /// Largest read from the server, in bytes.
    #[arg(long, default_value_t = DEFAULT_BUFFER_CAPACITY)]
    pub buffer_size: usize,

    /// Writer tasks per destination.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Messages buffered per direction before senders wait.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// How long to wait for the server's greeting, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub handshake_timeout_ms: u64,

    /// Leave without sending a departure message.
    #[arg(long)]
    pub no_departure: bool,
}

impl ClientArgs {
    /// Builds the session configuration for `identity`.
    pub fn to_config(&self, identity: impl Into<String>) -> ClientConfig {
        ClientConfig {
            endpoint: Endpoint::resolve(&self.host, &self.port, &self.transport),
            buffer_capacity: self.buffer_size,
            concurrency: self.concurrency,
            queue_capacity: self.queue_capacity,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            send_departure: !self.no_departure,
            ..ClientConfig::new(identity)
        }
    }
}
