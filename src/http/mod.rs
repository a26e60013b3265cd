//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware pipeline, dispatch)
//!     → request.rs (request ID, peer address)
//!     → assets.rs (static files) | oauth bridge
//!     → error.rs (normalize failures into status + body)
//!     → Send to client
//! ```

pub mod assets;
pub mod error;
pub mod request;
pub mod server;

pub use error::GatewayError;
pub use request::X_REQUEST_ID;
pub use server::{AppState, GatewayServer};
