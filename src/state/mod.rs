//! State module for tracking connection progress
//!
//! # Components
//!
//! - `ConnectionState`: lifecycle of one persistent connection
//!   (idle, connecting, connected, closing, closed)

mod connection_state;

// Re-export main types
pub use connection_state::ConnectionState;
