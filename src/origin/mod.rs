//! Origin Module
//!
//! Minimal synchronous HTTP/1.1 client used to populate the cache from a
//! remote origin named in the request's query string.

mod address;
mod client;

pub use address::{origin_from_query, OriginAddr, DEFAULT_ORIGIN_PORT};
pub use client::{split_body, OriginClient, MAX_HEADER_BYTES};
