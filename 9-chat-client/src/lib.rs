//! Terminal client for a JSON chat server.
//!
//! The client greets the server, then runs a small pool of tasks that move
//! messages between the connection and the terminal until either side
//! hangs up. Each module focuses on a concrete responsibility:
//!
//! - [`message`] defines the envelope, its JSON encoding and console rendering.
//! - [`frame`] splits incoming bytes into envelopes.
//! - [`endpoint`] resolves the server address with defaults.
//! - [`config`] holds every tunable of a session in one struct.
//! - [`identity`] validates and prompts for the username.
//! - [`handshake`] dials the server and exchanges greetings.
//! - [`bus`] provides the bounded inbound and outbound queues.
//! - [`shutdown`] is the stop signal every task observes.
//! - [`pump`] implements the reader and writer task roles.
//! - [`session`] starts the pool, waits for it and tears the connection down.
//! - [`cli`] and [`client`] wire all of the above to a terminal process.
//!
//! Integration tests drive sessions over in-memory duplex streams and the
//! binary against a throwaway TCP server.

pub mod bus;
pub mod cli;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod frame;
pub mod handshake;
pub mod identity;
pub mod message;
pub mod pump;
pub mod session;
pub mod shutdown;

pub use config::ClientConfig;
pub use handshake::{HandshakeError, HandshakeErrorKind, connect, perform_handshake};
pub use message::{Message, MessageKind};
pub use session::{Session, SessionReport};
pub use shutdown::{ShutdownSignal, StopReason};
