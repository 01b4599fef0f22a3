//! API layer for shell-relay.
//!
//! ## Endpoints
//!
//! ### Health & Info
//! - `GET /health` - Health check
//! - `GET /api/v1/` - API information
//!
//! ### Relay
//! - `GET /api/v1/servers` - Configured servers (no credentials)
//! - `GET /api/v1/sessions` - Live connections and their states
//! - `POST /api/v1/upload` - Multipart upload to a remote host
//! - `WS /api/v1/ws` - Terminal socket, one connection per socket
//!
//! ## Example
//!
//! ```no_run
//! use shell_relay::api::{ServerConfig, serve};
//!
//! #[tokio::main]
//! async fn main() -> shell_relay::Result<()> {
//!     let config = ServerConfig::new("127.0.0.1", 3001);
//!     serve(config).await
//! }
//! ```

pub mod handlers;
pub mod router;
pub mod types;
pub mod websocket;

pub use handlers::AppState;
pub use router::{create_router, create_router_with_state, serve, serve_with_state, ServerConfig};
pub use types::{ErrorResponse, ListSessionsResponse, SessionSummary, UploadResponse};
