//! Packet direction, the `Packet` trait, and the direction-scoped dispatch enums
//! ("registry") that replace runtime class dispatch with an explicit tagged variant.

use crate::codec::{Decode, Encode};
use crate::error::{Error, Result};

/// Which peer is allowed to send a given packet type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Client -> server.
    Serverbound,
    /// Server -> client.
    Clientbound,
}

/// A packet type: a fixed, ordered field layout bound to one [`Direction`].
///
/// `PID` is the one-byte id assigned at registration (the packet's position within its
/// direction's catalog, see [`crate::packets`]). Changing the declaration order of a
/// catalog is a wire-breaking change; `PID` must stay in lockstep with it.
pub trait Packet: Encode + Decode + Clone + std::fmt::Debug {
    const DIRECTION: Direction;
    const PID: u8;
    const NAME: &'static str;
}

/// Declares a direction-scoped packet enum and its registration-order pid table.
///
/// The macro invocation order *is* the registry: each `$pid` must be the zero-based
/// position of the packet within the list, since registration order is the
/// authoritative source of truth for pids. The explicit literals (rather than an
/// auto-incrementing counter) make a wire-breaking reorder show up as a glaring mismatch
/// in review, and the contiguous-pid tests below catch it mechanically too.
macro_rules! packet_enum {
    ($enum_name:ident, $direction:expr, { $($variant:ident($ty:ty) = $pid:expr),* $(,)? }) => {
        #[derive(Clone, Debug)]
        pub enum $enum_name {
            $($variant($ty)),*
        }

        $(
            impl Packet for $ty {
                const DIRECTION: Direction = $direction;
                const PID: u8 = $pid;
                const NAME: &'static str = stringify!($variant);
            }

            impl From<$ty> for $enum_name {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*

        impl $enum_name {
            /// The full set of registered pids, in declaration order. Exists for tests;
            /// not meant to be called from protocol logic.
            pub fn all_pids() -> Vec<u8> {
                vec![$($pid),*]
            }

            pub fn pid(&self) -> u8 {
                match self {
                    $(Self::$variant(_) => $pid,)*
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => stringify!($variant),)*
                }
            }

            /// Wire form `pid(1 byte) || fields`.
            pub fn encode_framed(&self) -> Vec<u8> {
                let mut out = vec![self.pid()];
                match self {
                    $(Self::$variant(p) => {
                        p.encode(&mut out).expect("Vec<u8> writes are infallible");
                    })*
                }
                out
            }

            /// Reads `pid(1 byte) || fields` from the front of `buf`. Leaves `buf`
            /// conceptually untouched (it borrows, never mutates) on `IncompleteData` so
            /// the caller can retry once more bytes arrive.
            pub fn decode_framed(buf: &[u8]) -> Result<(usize, Self)> {
                if buf.is_empty() {
                    return Err(Error::IncompleteData);
                }
                let pid = buf[0];
                let body = &buf[1..];
                match pid {
                    $(
                        $pid => {
                            let (consumed, value) = <$ty as Decode>::decode(body)?;
                            Ok((1 + consumed, Self::$variant(value)))
                        }
                    )*
                    other => Err(Error::UnknownPacket(other)),
                }
            }
        }
    };
}

pub(crate) use packet_enum;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{Clientbound, Serverbound};

    /// A change to declaration order in `packets.rs` without updating the pid literal
    /// shows up here as a non-contiguous or duplicate id.
    #[test]
    fn clientbound_pids_are_contiguous_from_zero() {
        let mut ids: Vec<u8> = Clientbound::all_pids();
        ids.sort_unstable();
        assert_eq!(ids, (0u8..ids.len() as u8).collect::<Vec<_>>());
    }

    #[test]
    fn serverbound_pids_are_contiguous_from_zero() {
        let mut ids: Vec<u8> = Serverbound::all_pids();
        ids.sort_unstable();
        assert_eq!(ids, (0u8..ids.len() as u8).collect::<Vec<_>>());
    }
}
