//! A [`ProtoSocket`] whose framing can be upgraded, in place, from clear text to an
//! AEAD-sealed envelope once a handshake has negotiated a cipher.
//!
//! Grounded on `original_source/hyphen0/hyphen0/socket/cryptsocket.py`: before
//! `set_encryption` is called it behaves exactly like `ProtoSocket`; afterwards, reads
//! and writes go through a `u32` length prefix wrapping an encrypted, still
//! `pid || fields`-shaped packet. The original achieves the switch by reassigning the
//! socket's class at runtime (`sock.__class__ = cls`); here it's an enum swap behind
//! [`PacketFramer`], which needs no unsafe downcasting.

use crate::cipher::AeadCipher;
use crate::error::{Error, Result};
use crate::proto_socket::{Framed, PacketFramer, PlainFramer, ProtoSocket};

/// The framer a [`CryptSocket`] starts with and can upgrade out of exactly once.
#[derive(Default)]
pub enum UpgradableFramer {
    #[default]
    Plain,
    Sealed(Box<dyn AeadCipher>),
}

impl std::fmt::Debug for UpgradableFramer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpgradableFramer::Plain => f.write_str("UpgradableFramer::Plain"),
            UpgradableFramer::Sealed(_) => f.write_str("UpgradableFramer::Sealed(..)"),
        }
    }
}

impl<In: Framed, Out: Framed> PacketFramer<In, Out> for UpgradableFramer {
    fn try_decode(&self, buf: &mut Vec<u8>) -> Result<Option<In>> {
        match self {
            UpgradableFramer::Plain => {
                <PlainFramer as PacketFramer<In, Out>>::try_decode(&PlainFramer, buf)
            }
            UpgradableFramer::Sealed(cipher) => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
                if buf.len() < 4 + len {
                    return Ok(None);
                }
                let ciphertext = buf[4..4 + len].to_vec();
                buf.drain(..4 + len);

                let plaintext = cipher.decrypt(&ciphertext)?;
                let (_, packet) = In::decode_framed(&plaintext)?;
                Ok(Some(packet))
            }
        }
    }

    fn encode(&self, packet: &Out) -> Result<Vec<u8>> {
        match self {
            UpgradableFramer::Plain => {
                <PlainFramer as PacketFramer<In, Out>>::encode(&PlainFramer, packet)
            }
            UpgradableFramer::Sealed(cipher) => {
                let plaintext = packet.encode_framed();
                let ciphertext = cipher.encrypt(&plaintext)?;
                let len: u32 = ciphertext
                    .len()
                    .try_into()
                    .map_err(|_| Error::Crypto("encrypted packet too large to frame".into()))?;
                let mut out = Vec::with_capacity(4 + ciphertext.len());
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(&ciphertext);
                Ok(out)
            }
        }
    }
}

/// A connection that may or may not have a cipher installed yet.
pub type CryptSocket<In, Out> = ProtoSocket<In, Out, UpgradableFramer>;

impl<In, Out> CryptSocket<In, Out>
where
    In: crate::proto_socket::HasHeartbeat + Framed,
    Out: crate::proto_socket::MakeHeartbeat + Framed,
{
    /// Upgrades framing to AEAD-sealed. Irreversible for the life of the connection.
    pub fn install_cipher(&mut self, cipher: Box<dyn AeadCipher>) {
        tracing::debug!("framer upgraded to sealed");
        self.set_framer(UpgradableFramer::Sealed(cipher));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{AesOcbCipher, KEY_LEN};
    use crate::codec::CStr0;
    use crate::config::ConnectionConfig;
    use crate::packets::{ChatMessageServerbound, Clientbound, Serverbound};
    use crate::socket::BasicSocket;
    use std::time::Duration;

    async fn connected_pair() -> (BasicSocket, BasicSocket) {
        let acceptor = BasicSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let server_fut = acceptor.accept();
        let client_fut = BasicSocket::connect(addr, Duration::from_secs(5));
        let (server, client) = tokio::join!(server_fut, client_fut);
        (server.unwrap().0, client.unwrap())
    }

    #[tokio::test]
    async fn upgrades_from_plain_to_sealed_without_losing_state() {
        let (server_sock, client_sock) = connected_pair().await;
        let config = ConnectionConfig::default();

        let mut server: CryptSocket<Serverbound, Clientbound> =
            ProtoSocket::new(server_sock, config.clone(), true);
        let mut client: CryptSocket<Clientbound, Serverbound> =
            ProtoSocket::new(client_sock, config, false);

        client.write_packet(ChatMessageServerbound {
            body: CStr0::new("plaintext"),
        });
        client.update().await.unwrap();
        let plain = server
            .wait_for_packet(Duration::from_secs(2), |p| {
                matches!(p, Serverbound::ChatMessage(_))
            })
            .await
            .unwrap();
        assert!(matches!(plain, Serverbound::ChatMessage(_)));

        let key = [9u8; KEY_LEN];
        server.install_cipher(Box::new(AesOcbCipher::new(&key)));
        client.install_cipher(Box::new(AesOcbCipher::new(&key)));

        client.write_packet(ChatMessageServerbound {
            body: CStr0::new("sealed"),
        });
        client.update().await.unwrap();
        let sealed = server
            .wait_for_packet(Duration::from_secs(2), |p| {
                matches!(p, Serverbound::ChatMessage(_))
            })
            .await
            .unwrap();
        match sealed {
            Serverbound::ChatMessage(m) => assert_eq!(m.body.0, "sealed"),
            other => panic!("unexpected packet: {other:?}"),
        }
    }
}
