#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

pub mod decoder;
pub mod encapsulated;
pub mod error;
pub mod message;
pub mod net;

pub use decoder::{DecodeEvent, Decoder, DecoderConfig, MessageFactory};
pub use encapsulated::{Encapsulated, SectionKind};
pub use error::{Error, IcapResult};
pub use message::{IcapMessage, Method, StartLine};
pub use net::EventReader;

///Lib version
pub const LIB_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Supported ICAP protocol version.
pub const ICAP_VERSION: &str = "ICAP/1.0";
