//! Image codec: `DynamicImage` ⇄ PNG bytes ⇄ base64 data URI.
//!
//! PNG is used throughout because it is lossless; marker colours and thin
//! strokes in handwriting must survive a round-trip untouched. Data URIs are
//! the portable form trees travel in when serialised to JSON.

use crate::error::CodecError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

const DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} image → {} PNG bytes", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// Wrap PNG bytes in a `data:image/png;base64,` URI.
pub fn to_data_uri(png: &[u8]) -> String {
    format!("{DATA_URI_PREFIX}{}", STANDARD.encode(png))
}

/// Encode an image straight to a data URI.
pub fn encode_data_uri(img: &DynamicImage) -> Result<String, CodecError> {
    Ok(to_data_uri(&encode_png(img)?))
}

/// Decode a data URI (any image MIME type) or a bare base64 payload.
pub fn decode_data_uri(s: &str) -> Result<DynamicImage, CodecError> {
    let payload = match s.split_once(',') {
        Some((head, body)) if head.starts_with("data:") => body,
        _ => s,
    };
    let bytes = STANDARD.decode(payload.trim())?;
    decode_bytes(&bytes)
}

/// Decode any supported raster format from memory.
pub fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage, CodecError> {
    Ok(image::load_from_memory(bytes)?)
}

/// Serde adapter for `Option<DynamicImage>` fields stored as data URIs.
pub mod data_uri {
    use image::DynamicImage;
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(img: &Option<DynamicImage>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match img {
            Some(img) => {
                let uri = super::encode_data_uri(img).map_err(S::Error::custom)?;
                serializer.serialize_some(&uri)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DynamicImage>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) if !s.is_empty() => super::decode_data_uri(&s)
                .map(Some)
                .map_err(D::Error::custom),
            _ => Ok(None),
        }
    }
}
