//! Deterministic binary encoding used for digests and the wire protocol.
//!
//! # Binary Format
//!
//! - Integers: little-endian, fixed-width; `usize` is written as `u64`
//! - `bool`: one byte, 0 or 1
//! - `String`/`Vec<T>`: `u64` length prefix followed by the contents
//! - `Option<T>`: one tag byte (0 = None, 1 = Some) then the value
//! - `[T; N]`: elements back to back, no prefix
//!
//! Digests of transactions and blocks are computed by encoding straight into
//! a [`HashBuilder`](crate::types::hash::HashBuilder), so any change to these
//! rules changes every hash on the chain.

use stakechain_derive::Error;

/// Destination for encoded bytes: buffers and hashers.
pub trait EncodeSink {
    fn write(&mut self, bytes: &[u8]);
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Counts bytes without storing them, used to size buffers up front.
#[derive(Default)]
pub struct SizeCounter(usize);

impl SizeCounter {
    pub fn len(&self) -> usize {
        self.0
    }
}

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.0 += bytes.len();
    }
}

pub trait Encode {
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Encodes into a buffer allocated with the exact final size.
    fn to_bytes(&self) -> Vec<u8> {
        let mut counter = SizeCounter::default();
        self.encode(&mut counter);
        let mut out = Vec::with_capacity(counter.len());
        self.encode(&mut out);
        out
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid value")]
    InvalidValue,
    #[error("length prefix exceeds {0} elements")]
    LengthOverflow(usize),
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

pub trait Decode: Sized {
    /// Decodes one value and advances `input` past it.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value that must span the whole buffer.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;
        if !input.is_empty() {
            return Err(DecodeError::TrailingBytes(input.len()));
        }
        Ok(value)
    }
}

/// Upper bound on decoded collection lengths; snapshot-sized payloads fit.
pub const MAX_COLLECTION_LEN: usize = 64 * 1024 * 1024;

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

macro_rules! impl_le_int {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn encode<S: EncodeSink>(&self, out: &mut S) {
                    out.write(&self.to_le_bytes());
                }
            }

            impl Decode for $t {
                fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                    let bytes = take(input, std::mem::size_of::<$t>())?;
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    Ok(<$t>::from_le_bytes(buf))
                }
            }
        )*
    };
}

impl_le_int!(u8, u16, u32, u64, u128, i64);

impl Encode for usize {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (*self as u64).encode(out);
    }
}

impl Decode for usize {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let raw = u64::decode(input)?;
        usize::try_from(raw).map_err(|_| DecodeError::LengthOverflow(usize::MAX))
    }
}

fn decode_len(input: &mut &[u8]) -> Result<usize, DecodeError> {
    let len = usize::decode(input)?;
    if len > MAX_COLLECTION_LEN {
        return Err(DecodeError::LengthOverflow(MAX_COLLECTION_LEN));
    }
    Ok(len)
}

impl Encode for bool {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self as u8]);
    }
}

impl Decode for bool {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl Encode for str {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        out.write(self.as_bytes());
    }
}

impl Encode for String {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.as_str().encode(out);
    }
}

impl Decode for String {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = decode_len(input)?;
        let bytes = take(input, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidValue)
    }
}

impl<T: Encode> Encode for [T] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.as_slice().encode(out);
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = decode_len(input)?;
        // Cap the pre-allocation; a hostile prefix must not reserve gigabytes.
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(T::decode(input)?);
        }
        Ok(items)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            None => 0u8.encode(out),
            Some(value) => {
                1u8.encode(out);
                value.encode(out);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(input)?)),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(self);
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = take(input, N)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(bytes);
        Ok(buf)
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (**self).encode(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_little_endian() {
        assert_eq!(0x0102_0304u32.to_bytes(), vec![4, 3, 2, 1]);
        assert_eq!(1u64.to_bytes(), vec![1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn integer_decode_consumes_its_width() {
        let data = [0x34, 0x12, 0xff, 7, 0, 0, 0, 0, 0, 0, 0];
        let mut input = &data[..];
        assert_eq!(u16::decode(&mut input), Ok(0x1234));
        assert_eq!(u8::decode(&mut input), Ok(0xff));
        assert_eq!(i64::decode(&mut input), Ok(7));
        assert!(input.is_empty());
        assert_eq!(u32::decode(&mut input), Err(DecodeError::UnexpectedEof));
        assert_eq!(<[u8; 2]>::from_bytes(&[9, 8]), Ok([9, 8]));
    }

    #[test]
    fn to_bytes_allocates_exact_capacity() {
        let bytes = String::from("hello").to_bytes();
        assert_eq!(bytes.len(), 8 + 5);
        assert_eq!(bytes.capacity(), bytes.len());
    }

    #[test]
    fn str_and_string_encode_identically() {
        assert_eq!("abc".to_bytes(), String::from("abc").to_bytes());
    }

    #[test]
    fn option_uses_tag_byte() {
        assert_eq!(None::<u8>.to_bytes(), vec![0]);
        assert_eq!(Some(7u8).to_bytes(), vec![1, 7]);
        assert_eq!(Option::<u8>::from_bytes(&[2, 7]), Err(DecodeError::InvalidValue));
    }

    #[test]
    fn string_round_trip_preserves_unicode() {
        let text = String::from("grüße");
        assert_eq!(String::from_bytes(&text.to_bytes()).unwrap(), text);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let bytes = vec![1u64, 2, 3].to_bytes();
        let result = Vec::<u64>::from_bytes(&bytes[..bytes.len() - 1]);
        assert_eq!(result, Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = 5u32.to_bytes();
        bytes.push(0);
        assert_eq!(u32::from_bytes(&bytes), Err(DecodeError::TrailingBytes(1)));
    }

    #[test]
    fn decode_rejects_oversized_length_prefix() {
        let bytes = u64::MAX.to_bytes();
        assert!(matches!(
            Vec::<u8>::from_bytes(&bytes),
            Err(DecodeError::LengthOverflow(_))
        ));
    }

    #[test]
    fn bool_rejects_non_binary_byte() {
        assert_eq!(bool::from_bytes(&[2]), Err(DecodeError::InvalidValue));
    }
}
