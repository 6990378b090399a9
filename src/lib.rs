//! A minimal engine for the [CoAP Protocol][rfc].
//!
//! This library provides the message codec, a per-connection dispatcher and
//!   a small transport facade on top of them: `listen_and_serve` / `serve`
//!   for the serving side and `dial` / `Client` for the requesting side.
//!
//! Features:
//! - CoAP message format [RFC 7252](https://tools.ietf.org/rfc/rfc7252.txt), including
//!   delta-encoded options with extended deltas and lengths
//! - One dispatcher per connection with a heartbeat and a session timeout
//! - Messages carried over TCP, each framed by a 2-byte big-endian length
//!
//! Missing features:
//! - Retransmission, deduplication, block-wise transfer, observe and DTLS
//!
//! # Installation
//!
//! First add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! coap-engine = "0.1"
//! tokio = {version = "^1.32", features = ["full"]}
//! ```
//!
//! # Example
//!
//! ## Server:
//! ```no_run
//! use coap_engine::{handler_fn, listen_and_serve, Code, Config, Message, MessageType};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handler = handler_fn(|peer, request: Message| {
//!         println!("{} from {}", request.code, peer);
//!         if !request.is_confirmable() {
//!             return None;
//!         }
//!         let reply = Message::new(MessageType::Acknowledgement, Code::Content, request.message_id)
//!             .with_token(request.token.clone())
//!             .with_payload(request.path_string());
//!         Some(reply)
//!     });
//!
//!     listen_and_serve("tcp", "127.0.0.1:5683", handler, &Config::default())
//!         .await
//!         .unwrap();
//! }
//! ```
//!
//! ## Client:
//! ```no_run
//! use coap_engine::{dial, Client, Code, Config, Message, MessageType};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut client = dial("tcp", "127.0.0.1:5683", &Config::default()).await.unwrap();
//!
//!     let mut request = Message::new(MessageType::Confirmable, Code::Get, client.next_message_id())
//!         .with_token(Client::<tokio::net::TcpStream>::random_token());
//!     request.set_path_string("/Rust");
//!
//!     let reply = client.send(&request).await.unwrap().unwrap();
//!     println!("Server reply: {}", String::from_utf8_lossy(&reply.payload));
//! }
//! ```
//!
//! [rfc]: https://tools.ietf.org/rfc/rfc7252.txt

#[cfg(test)]
extern crate quickcheck;

pub use self::client::{dial, Client};
pub use self::config::Config;
pub use self::connection::{Connection, Peer, State};
pub use self::error::{Error, FormatError, Result};
pub use self::message::{Code, ContentFormat, Message, MessageType, OptionNumber};
pub use self::server::{handler_fn, listen_and_serve, serve, Handler, Listener};

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod server;
pub mod transport;
