//! Image encoding for request payloads.

mod encode;
mod types;

pub use encode::{decode_base64, decode_to_file, encode_image};
pub use types::{EncodedImage, ImageFormat};
