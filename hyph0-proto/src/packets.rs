//! The packet catalog. Declaration order within each direction assigns the wire `pid`
//! — see [`crate::packet::packet_enum`].

use std::io::{self, Write};

use crate::codec::{CStr0, Decode, Encode, FixedBytes, LenArray};
use crate::error::{Error, Result};
use crate::packet::{packet_enum, Direction, Packet};

macro_rules! struct_packet {
    ($name:ident { $($field:ident: $ty:ty),* $(,)? }) => {
        #[derive(Clone, Debug, Default, PartialEq)]
        pub struct $name {
            $(pub $field: $ty),*
        }

        impl Encode for $name {
            #[allow(unused_variables)]
            fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
                $(self.$field.encode(w)?;)*
                Ok(())
            }
        }

        impl Decode for $name {
            #[allow(unused_variables, unused_mut, unused_assignments)]
            fn decode(buf: &[u8]) -> Result<(usize, Self)> {
                let mut consumed = 0usize;
                $(
                    let (n, $field) = <$ty as Decode>::decode(&buf[consumed..])?;
                    consumed += n;
                )*
                Ok((consumed, Self { $($field),* }))
            }
        }
    };
}

// --- Handshake & lifecycle packets (clientbound) -----------------------------------
//
// `HandshakeCryptOK` is sent server->client: the server is the initiator of both the key
// exchange (phase 3) and the cipher-ready announcement (phase 4), per
// `original_source/hyphen0/hyphen0/server.py`'s `_client_connected` (writes
// `HandshakeCryptKEXServer` then, once it has derived the session key, `HandshakeCryptOK`)
// mirrored by `hyphen0/client.py`'s `mainloop` (waits for both).

struct_packet!(HandshakeConfirm {});

struct_packet!(HandshakeCancel {
    msg: CStr0,
});

struct_packet!(HandshakeCryptModeSelect {
    mode: CStr0,
});

struct_packet!(HandshakeCryptOK {});

struct_packet!(HandshakeCryptKexServer {
    salt: FixedBytes<32>,
    key_len: u16,
    public_key: CStr0,
});

struct_packet!(HandshakeCryptTestPong {
    test: FixedBytes<512>,
});

struct_packet!(HeartbeatClientbound {
    initiating: bool,
    nonce: u32,
});

struct_packet!(Kick {
    message: CStr0,
});

// --- Handshake & lifecycle packets (serverbound) ------------------------------------

struct_packet!(HandshakeInitiate {});

struct_packet!(HandshakeOk {});

struct_packet!(HandshakeCryptModesList {
    modes: LenArray<CStr0>,
});

struct_packet!(HandshakeCryptKexClient {
    public_key: CStr0,
});

struct_packet!(HandshakeCryptTestPing {
    test: FixedBytes<512>,
});

struct_packet!(HeartbeatServerbound {
    initiating: bool,
    nonce: u32,
});

struct_packet!(Disconnect {
    message: CStr0,
});

// --- Chat application overlay -------------------------------------------------------
//
// The application illustrated in `hyph0-chat` overlays its own packets on top of the
// core catalog, each taking the next free pid in its direction.

struct_packet!(ChatMessageServerbound {
    body: CStr0,
});

struct_packet!(ChatMessageClientbound {
    author: CStr0,
    body: CStr0,
});

struct_packet!(ChatNickChange {
    nick: CStr0,
});

struct_packet!(ChatRoster {
    nicks: LenArray<CStr0>,
});

packet_enum!(Clientbound, Direction::Clientbound, {
    HandshakeConfirm(HandshakeConfirm) = 0,
    HandshakeCancel(HandshakeCancel) = 1,
    HandshakeCryptModeSelect(HandshakeCryptModeSelect) = 2,
    HandshakeCryptOK(HandshakeCryptOK) = 3,
    HandshakeCryptKexServer(HandshakeCryptKexServer) = 4,
    HandshakeCryptTestPong(HandshakeCryptTestPong) = 5,
    Heartbeat(HeartbeatClientbound) = 6,
    Kick(Kick) = 7,
    ChatMessage(ChatMessageClientbound) = 8,
    ChatRoster(ChatRoster) = 9,
});

packet_enum!(Serverbound, Direction::Serverbound, {
    HandshakeInitiate(HandshakeInitiate) = 0,
    HandshakeOK(HandshakeOk) = 1,
    HandshakeCryptModesList(HandshakeCryptModesList) = 2,
    HandshakeCryptKexClient(HandshakeCryptKexClient) = 3,
    HandshakeCryptTestPing(HandshakeCryptTestPing) = 4,
    Heartbeat(HeartbeatServerbound) = 5,
    Disconnect(Disconnect) = 6,
    ChatMessage(ChatMessageServerbound) = 7,
    ChatNickChange(ChatNickChange) = 8,
});
