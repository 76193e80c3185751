//! Primitive wire descriptors.
//!
//! Every wire type here pins little-endian byte order. The reference implementation used
//! the host's native `struct` packing, which is little-endian on every platform that
//! matters in practice; pinning it explicitly is what makes the wire format portable.

use std::io::{self, Write};

use crate::error::{Error, Result};

/// Encodes a value onto a byte sink.
pub trait Encode {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()>;
}

/// Decodes a value from the front of a byte slice.
///
/// On success returns the number of bytes consumed and the decoded value. On a buffer
/// that is too short, returns `Error::IncompleteData` and must not have any other
/// observable effect — callers retry once more bytes arrive.
pub trait Decode: Sized {
    fn decode(buf: &[u8]) -> Result<(usize, Self)>;
}

macro_rules! impl_int_le {
    ($($t:ty),* $(,)?) => {
        $(
            impl Encode for $t {
                fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
                    w.write_all(&self.to_le_bytes())
                }
            }

            impl Decode for $t {
                fn decode(buf: &[u8]) -> Result<(usize, Self)> {
                    const SIZE: usize = std::mem::size_of::<$t>();
                    if buf.len() < SIZE {
                        return Err(Error::IncompleteData);
                    }
                    let mut bytes = [0u8; SIZE];
                    bytes.copy_from_slice(&buf[..SIZE]);
                    Ok((SIZE, <$t>::from_le_bytes(bytes)))
                }
            }
        )*
    };
}

impl_int_le!(u8, u16, u32, i8, i16, i32);

impl Encode for bool {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[*self as u8])
    }
}

impl Decode for bool {
    fn decode(buf: &[u8]) -> Result<(usize, Self)> {
        let (n, byte) = u8::decode(buf)?;
        Ok((n, byte != 0))
    }
}

/// A `cstring` field: bytes up to the first NUL, stored as owned UTF-8-agnostic bytes.
///
/// Never contains a NUL byte; constructing one from data containing a NUL is rejected at
/// encode time, matching the reference implementation's `NullTerminatedStringPrimitive`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CStr0(pub String);

impl CStr0 {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl From<&str> for CStr0 {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CStr0 {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Encode for CStr0 {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        if self.0.as_bytes().contains(&0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cstring payload contains a NUL byte",
            ));
        }
        w.write_all(self.0.as_bytes())?;
        w.write_all(&[0])
    }
}

impl Decode for CStr0 {
    fn decode(buf: &[u8]) -> Result<(usize, Self)> {
        match buf.iter().position(|&b| b == 0) {
            Some(nul) => {
                let s = String::from_utf8_lossy(&buf[..nul]).into_owned();
                Ok((nul + 1, Self(s)))
            }
            None => Err(Error::IncompleteData),
        }
    }
}

/// A `fixed(N)` field: exactly `N` bytes, no length prefix.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FixedBytes<const N: usize>(pub [u8; N]);

impl<const N: usize> Default for FixedBytes<N> {
    fn default() -> Self {
        Self([0u8; N])
    }
}

impl<const N: usize> Encode for FixedBytes<N> {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.0)
    }
}

impl<const N: usize> Decode for FixedBytes<N> {
    fn decode(buf: &[u8]) -> Result<(usize, Self)> {
        if buf.len() < N {
            return Err(Error::IncompleteData);
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&buf[..N]);
        Ok((N, Self(bytes)))
    }
}

/// An `array(T)` field: a `u16` count followed by that many `T` encodings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LenArray<T>(pub Vec<T>);

impl<T> From<Vec<T>> for LenArray<T> {
    fn from(v: Vec<T>) -> Self {
        Self(v)
    }
}

impl<T: Encode> Encode for LenArray<T> {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let count: u16 = self
            .0
            .len()
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "array too long"))?;
        count.encode(w)?;
        for elem in &self.0 {
            elem.encode(w)?;
        }
        Ok(())
    }
}

impl<T: Decode> Decode for LenArray<T> {
    fn decode(buf: &[u8]) -> Result<(usize, Self)> {
        let (mut consumed, count) = u16::decode(buf)?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if consumed >= buf.len() {
                return Err(Error::IncompleteData);
            }
            let (n, item) = T::decode(&buf[consumed..])?;
            consumed += n;
            items.push(item);
        }
        Ok((consumed, Self(items)))
    }
}

/// Encodes an [`Encode`] value into a freshly allocated byte vector.
pub fn encode_to_vec<T: Encode>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value
        .encode(&mut out)
        .expect("encoding into a Vec<u8> is infallible for well-formed values");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_round_trips_little_endian() {
        let mut buf = Vec::new();
        0x0102_0304u32.encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0x04, 0x03, 0x02, 0x01]);
        let (consumed, value) = u32::decode(&buf).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(value, 0x0102_0304);
    }

    #[test]
    fn cstring_rejects_embedded_nul() {
        let s = CStr0::new("bad\0string");
        let mut buf = Vec::new();
        assert!(s.encode(&mut buf).is_err());
    }

    #[test]
    fn cstring_decode_does_not_leak_into_next_field() {
        let mut buf = Vec::new();
        CStr0::new("hello").encode(&mut buf).unwrap();
        42u8.encode(&mut buf).unwrap();

        let (consumed, decoded) = CStr0::decode(&buf).unwrap();
        assert_eq!(decoded.0, "hello");
        let (_, next) = u8::decode(&buf[consumed..]).unwrap();
        assert_eq!(next, 42);
    }

    #[test]
    fn array_len_prefix_does_not_leak() {
        let arr = LenArray(vec![CStr0::new("a"), CStr0::new("bb")]);
        let mut buf = Vec::new();
        arr.encode(&mut buf).unwrap();
        99u8.encode(&mut buf).unwrap();

        let (consumed, decoded) = LenArray::<CStr0>::decode(&buf).unwrap();
        assert_eq!(decoded.0.len(), 2);
        assert_eq!(decoded.0[0].0, "a");
        assert_eq!(decoded.0[1].0, "bb");
        let (_, trailing) = u8::decode(&buf[consumed..]).unwrap();
        assert_eq!(trailing, 99);
    }

    #[test]
    fn short_buffer_reports_incomplete_and_is_retried() {
        let mut buf = Vec::new();
        0xAABBCCDDu32.encode(&mut buf).unwrap();
        buf.truncate(2);
        assert!(matches!(u32::decode(&buf), Err(Error::IncompleteData)));
    }

    #[test]
    fn fixed_bytes_round_trip() {
        let fixed = FixedBytes::<4>([1, 2, 3, 4]);
        let mut buf = Vec::new();
        fixed.encode(&mut buf).unwrap();
        let (consumed, decoded) = FixedBytes::<4>::decode(&buf).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(decoded.0, [1, 2, 3, 4]);
    }
}
