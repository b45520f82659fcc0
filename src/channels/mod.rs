//! Inbound channels. Each one turns its wire format into a [`NewMessage`]
//! for the pipeline.
//!
//! [`NewMessage`]: crate::pipeline::types::NewMessage

pub mod raw_email;

pub use raw_email::parse_raw;
