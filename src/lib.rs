//! # frame-echo
//!
//! A bidirectional binary channel exercised by echoing self-describing
//! payloads.
//!
//! ## Architecture
//!
//! - **Message** (`message`): generation, fragment reassembly, validation
//! - **Transport** (`transport`): framed TCP channel that fragments
//!   messages larger than `max_frame_size`
//! - **Endpoints** (`endpoint`): echo (server) and drive (client) state
//!   machines, one per channel
//! - **Session** (`session`): connects, sends a batch, waits for completion
//!
//! ## Example
//!
//! ```ignore
//! use frame_echo::config::Config;
//!
//! #[tokio::main]
//! async fn main() {
//!     let report = frame_echo::session::run_demo(&Config::default()).await.unwrap();
//!     assert!(report.is_complete());
//! }
//! ```

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod server;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::TransportError;
pub use message::Message;
