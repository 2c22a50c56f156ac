// Convention from https://serde.rs/conventions.html
mod encode;
mod decode;
mod error;
mod span;

pub use encode::{encode_to_raw, encode_to_string};
pub use decode::{decode_bytes, decode_str};
pub use error::{Error, Result};
pub use span::locate_top_level_key;
