//! Client SDK for Berth rooms.
//!
//! A [`Client`] reserves a seat via the matchmaking HTTP API, opens the
//! room's WebSocket endpoint and hands back a [`Room`]. The room mirrors
//! the server's authoritative state through the `berth-schema` decoder and
//! dispatches change callbacks into application code.
//!
//! ```no_run
//! use berth_sdk::Client;
//! # async fn run(root: std::sync::Arc<berth_sdk::schema::TypeDescriptor>)
//! #     -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new("http://localhost:2567")?;
//! let mut room = client
//!     .join_or_create("battle", serde_json::json!({}), root)
//!     .await?;
//! room.on_state_change(|decoder| {
//!     println!("players online: {:?}", decoder.state().get_by_name("players"));
//! });
//! loop {
//!     room.process_events(); // client tick
//! #   break;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Decoding and every callback run synchronously inside
//! [`Room::process_events`] on the calling thread; only the socket I/O runs
//! on the tokio runtime. A `Room` is deliberately not `Send` — it is part
//! of the single-threaded client-tick unit.

mod auth;
mod client;
pub mod encode;
mod http;
mod matchmake;
mod room;
mod serializer;
mod settings;
mod transport;
mod websocket;

pub use auth::{Auth, AuthData};
pub use client::Client;
pub use self::http::{HttpClient, HttpError};
pub use matchmake::MatchmakeError;
pub use room::Room;
pub use serializer::SchemaSerializer;
pub use settings::{EndpointError, Settings};
pub use transport::{Transport, TransportError, TransportEvent};
pub use websocket::WebSocketTransport;

pub use berth_client_api_messages as messages;
pub use berth_schema as schema;
