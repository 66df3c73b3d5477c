//! Byte stream to gRPC message encoding.
//!
//! ## Structure
//!
//! - [`encoder`] - Chunks a storage read into `OpenStreamResponse` messages
//!   terminated by an explicit end marker.

pub mod encoder;
