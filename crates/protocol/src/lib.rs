//! homenet-protocol – Nachrichtenmodell und Wire-Framing
//!
//! Dieses Crate kennt weder Rollen noch Sessions. Es definiert die
//! Nachrichten, die zwischen Client und Node ausgetauscht werden, und
//! wie sie auf dem Draht gerahmt werden:
//!
//! ```text
//! +--------+--------+--------+--------+--------+----...----+
//! | Marker | Laenge (u32 little-endian)        | Body      |
//! +--------+--------+--------+--------+--------+----...----+
//! ```

pub mod b64;
pub mod error;
pub mod message;
pub mod wire;

pub use error::WireError;
pub use message::{Message, MessageBody, Request, RequestPayload, Response, ResponsePayload, Status};
pub use wire::{read_message, write_message, FrameCodec};
