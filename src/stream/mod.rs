//! Event stream framing and message decoding.
//!
//! Raw response chunks go through [`FrameDecoder`], which splits them on line
//! boundaries and groups `data:` lines into frames terminated by a blank
//! line. Each frame's payload is then decoded into a [`StreamMessage`].
//!
//! # Wire format
//!
//! ```text
//! event: update
//! id: 42
//! data: {"type":"data","data":{"cpu":0.42},"eventType":"metrics"}
//!
//! ```
//!
//! Payloads may be wrapped one extra time (`{"data":"{\"type\":...}"}`);
//! the decoder unwraps that transparently.

mod framer;
mod message;

pub use framer::{Frame, FrameDecoder, DEFAULT_MAX_LINE_BYTES};
pub use message::{decode, parse_message, StreamMessage};
