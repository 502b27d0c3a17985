//! Key/value codecs.
//!
//! A codec turns typed keys and values into the byte payloads the external
//! log carries, and back. Sources and sinks get one codec per side injected
//! at construction, so the wire format is the caller's choice.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Error type for codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("decode consumed {consumed} of {len} bytes")]
    TrailingBytes { consumed: usize, len: usize },
}

/// Encode/decode one type.
///
/// `encode` appends to `out` and returns the number of bytes written.
/// `decode` returns the value and the number of bytes consumed; callers that
/// expect a whole-buffer value check `consumed == buf.len()`.
pub trait Codec<T>: Clone {
    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<usize, CodecError>;

    fn decode(&self, buf: &[u8]) -> Result<(T, usize), CodecError>;

    /// Decode, requiring the value to span the whole buffer.
    fn decode_all(&self, buf: &[u8]) -> Result<T, CodecError> {
        let (value, consumed) = self.decode(buf)?;
        if consumed != buf.len() {
            return Err(CodecError::TrailingBytes {
                consumed,
                len: buf.len(),
            });
        }
        Ok(value)
    }
}

/// Human-readable text: UTF-8 strings, decimal integers, `true`/`false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl Codec<String> for TextCodec {
    fn encode(&self, value: &String, out: &mut Vec<u8>) -> Result<usize, CodecError> {
        out.extend_from_slice(value.as_bytes());
        Ok(value.len())
    }

    fn decode(&self, buf: &[u8]) -> Result<(String, usize), CodecError> {
        let s = std::str::from_utf8(buf).map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok((s.to_string(), buf.len()))
    }
}

macro_rules! text_int_codec {
    ($($t:ty),*) => {$(
        impl Codec<$t> for TextCodec {
            fn encode(&self, value: &$t, out: &mut Vec<u8>) -> Result<usize, CodecError> {
                let s = value.to_string();
                out.extend_from_slice(s.as_bytes());
                Ok(s.len())
            }

            fn decode(&self, buf: &[u8]) -> Result<($t, usize), CodecError> {
                let s = std::str::from_utf8(buf)
                    .map_err(|e| CodecError::Decode(e.to_string()))?;
                let v = s
                    .trim()
                    .parse::<$t>()
                    .map_err(|e| CodecError::Decode(format!("{e}: {s:?}")))?;
                Ok((v, buf.len()))
            }
        }
    )*};
}

text_int_codec!(i32, i64, u32, u64);

impl Codec<bool> for TextCodec {
    fn encode(&self, value: &bool, out: &mut Vec<u8>) -> Result<usize, CodecError> {
        let s: &[u8] = if *value { b"true" } else { b"false" };
        out.extend_from_slice(s);
        Ok(s.len())
    }

    fn decode(&self, buf: &[u8]) -> Result<(bool, usize), CodecError> {
        match buf {
            b"true" => Ok((true, buf.len())),
            b"false" => Ok((false, buf.len())),
            other => Err(CodecError::Decode(format!(
                "expected true/false, got {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

impl Codec<()> for TextCodec {
    fn encode(&self, _value: &(), _out: &mut Vec<u8>) -> Result<usize, CodecError> {
        Ok(0)
    }

    fn decode(&self, _buf: &[u8]) -> Result<((), usize), CodecError> {
        // void keys decode from anything, consuming nothing
        Ok(((), 0))
    }
}

/// Fixed-width little-endian integers and length-prefixed strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinCodec;

macro_rules! bin_int_codec {
    ($($t:ty),*) => {$(
        impl Codec<$t> for BinCodec {
            fn encode(&self, value: &$t, out: &mut Vec<u8>) -> Result<usize, CodecError> {
                out.extend_from_slice(&value.to_le_bytes());
                Ok(size_of::<$t>())
            }

            fn decode(&self, buf: &[u8]) -> Result<($t, usize), CodecError> {
                const N: usize = size_of::<$t>();
                let bytes: [u8; N] = buf
                    .get(..N)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| CodecError::Decode(format!(
                        "need {N} bytes, got {}",
                        buf.len()
                    )))?;
                Ok((<$t>::from_le_bytes(bytes), N))
            }
        }
    )*};
}

bin_int_codec!(i32, i64, u32, u64);

impl Codec<String> for BinCodec {
    fn encode(&self, value: &String, out: &mut Vec<u8>) -> Result<usize, CodecError> {
        let len = u32::try_from(value.len())
            .map_err(|_| CodecError::Encode("string longer than u32".to_string()))?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(value.as_bytes());
        Ok(4 + value.len())
    }

    fn decode(&self, buf: &[u8]) -> Result<(String, usize), CodecError> {
        let (len, _) = <Self as Codec<u32>>::decode(self, buf)?;
        let len = len as usize;
        let bytes = buf
            .get(4..4 + len)
            .ok_or_else(|| CodecError::Decode(format!("need {len} payload bytes")))?;
        let s = std::str::from_utf8(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok((s.to_string(), 4 + len))
    }
}

impl Codec<()> for BinCodec {
    fn encode(&self, _value: &(), _out: &mut Vec<u8>) -> Result<usize, CodecError> {
        Ok(0)
    }

    fn decode(&self, _buf: &[u8]) -> Result<((), usize), CodecError> {
        Ok(((), 0))
    }
}

/// JSON for anything serde can handle; the workhorse for composite values
/// such as join pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<usize, CodecError> {
        let bytes = serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))?;
        out.extend_from_slice(&bytes);
        Ok(bytes.len())
    }

    fn decode(&self, buf: &[u8]) -> Result<(T, usize), CodecError> {
        let value = serde_json::from_slice(buf).map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok((value, buf.len()))
    }
}
