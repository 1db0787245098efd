//! adsbcot-core: Mode S decoding, record normalization, and Cursor-on-Target
//! synthesis.
//!
//! No async, no sockets. The gateway binary owns every transport and drives
//! these types from its feed tasks.

pub mod altitude;
pub mod config;
pub mod cot;
pub mod cpr;
pub mod crc;
pub mod decode;
pub mod decoder;
pub mod frame;
pub mod framing;
pub mod icao;
pub mod known_craft;
pub mod record;
pub mod types;

// Re-export commonly used types at crate root
pub use altitude::{AltitudeCache, AltitudeFields};
pub use config::{CotConfig, UidKey};
pub use cot::{synthesize, CotEvent, Rejection};
pub use decoder::{DecoderAdapter, ModeSDecoder, Tracker};
pub use framing::{FrameBuffer, FramingMode, RawFrame};
pub use known_craft::{KnownCraft, KnownCraftRegistry};
pub use record::AircraftRecord;
pub use types::{CotError, Result};
