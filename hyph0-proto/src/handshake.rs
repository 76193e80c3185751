//! The six-phase handshake: lifecycle confirmation, cipher negotiation, ECDH key
//! agreement, and a cipher self-test before the connection is handed to the caller.
//!
//! Grounded on `original_source/hyphen0/hyphen0/server.py`'s `_client_connected` and
//! `original_source/hyphen0/hyphen0/client.py`'s `mainloop`: the server drives the key
//! exchange (it sends `HandshakeCryptKEXServer` first, waits for the client's
//! `HandshakeCryptKEXClient` reply, then announces the derived key with
//! `HandshakeCryptOK`), not the client — the original's placeholder shared key
//! (`shared_key = b' test test test '`) is replaced here by a real P-256 ECDH exchange
//! and HKDF-SHA256 derivation, which the original never implemented at all.

use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use p256::PublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::time::Duration;

use crate::cipher::{AesOcbCipher, CipherRegistry, KEY_LEN};
use crate::codec::{CStr0, FixedBytes};
use crate::crypt_socket::CryptSocket;
use crate::error::{Error, Result};
use crate::packets::{
    Clientbound, Disconnect, HandshakeCancel, HandshakeConfirm, HandshakeCryptKexClient,
    HandshakeCryptKexServer, HandshakeCryptModeSelect, HandshakeCryptModesList, HandshakeCryptOK,
    HandshakeCryptTestPing, HandshakeCryptTestPong, HandshakeInitiate, HandshakeOk, Serverbound,
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const KEX_SALT_LEN: usize = 32;

/// Drives both sides of the handshake using a given set of offerable/acceptable cipher
/// names. The same engine instance can run repeated handshakes (e.g. a server serving
/// many clients).
pub struct HandshakeEngine {
    ciphers: CipherRegistry,
}

impl HandshakeEngine {
    pub fn new(ciphers: CipherRegistry) -> Self {
        Self { ciphers }
    }

    /// Runs the client side of the handshake to completion, returning the connection
    /// ready for application traffic with its cipher already installed.
    pub async fn run_client(
        &self,
        mut socket: CryptSocket<Clientbound, Serverbound>,
    ) -> Result<CryptSocket<Clientbound, Serverbound>> {
        socket.write_packet(HandshakeInitiate {});
        socket.update().await?;
        socket
            .wait_for_packet(HANDSHAKE_TIMEOUT, |p| {
                matches!(p, Clientbound::HandshakeConfirm(_))
            })
            .await?;
        tracing::debug!("client: handshake confirmed");
        socket.emit("client_handshake", None).await?;

        socket.write_packet(HandshakeCryptModesList {
            modes: self
                .ciphers
                .modes()
                .iter()
                .map(|m| CStr0::new(m.clone()))
                .collect::<Vec<_>>()
                .into(),
        });
        socket.update().await?;

        let selected = socket
            .wait_for_packet(HANDSHAKE_TIMEOUT, |p| {
                matches!(
                    p,
                    Clientbound::HandshakeCryptModeSelect(_) | Clientbound::HandshakeCancel(_)
                )
            })
            .await?;
        match selected {
            Clientbound::HandshakeCryptModeSelect(HandshakeCryptModeSelect { mode }) => {
                tracing::debug!(mode = %mode.0, "client: cipher mode selected");
                socket.emit("crypt_modeselected", Some(mode.0)).await?;
            }
            Clientbound::HandshakeCancel(HandshakeCancel { msg }) => {
                return Err(Error::HandshakeFailure(format!(
                    "server declined: {}",
                    msg.0
                )));
            }
            _ => unreachable!("wait_for_packet only returns matched variants"),
        };

        let kex = socket
            .wait_for_packet(HANDSHAKE_TIMEOUT, |p| {
                matches!(p, Clientbound::HandshakeCryptKexServer(_))
            })
            .await?;
        let Clientbound::HandshakeCryptKexServer(HandshakeCryptKexServer {
            salt,
            public_key,
            ..
        }) = kex
        else {
            unreachable!()
        };
        let server_public = PublicKey::from_public_key_pem(&public_key.0)
            .map_err(|e| Error::Crypto(format!("bad server public key: {e}")))?;

        let client_secret = EphemeralSecret::random(&mut OsRng);
        let client_public = PublicKey::from(&client_secret);
        let client_public_pem = client_public
            .to_public_key_pem(Default::default())
            .map_err(|e| Error::Crypto(format!("failed to encode public key: {e}")))?;

        socket.write_packet(HandshakeCryptKexClient {
            public_key: CStr0::new(client_public_pem),
        });
        socket.update().await?;
        socket.emit("crypt_kexok", None).await?;

        socket
            .wait_for_packet(HANDSHAKE_TIMEOUT, |p| {
                matches!(p, Clientbound::HandshakeCryptOK(_))
            })
            .await?;

        socket.emit("crypt_starting", None).await?;
        let key = derive_session_key(&client_secret, &server_public, &salt.0)?;
        socket.install_cipher(Box::new(AesOcbCipher::new(&key)));
        tracing::info!("client: cipher installed");

        let mut test = [0u8; 512];
        OsRng.fill_bytes(&mut test);
        socket.write_packet(HandshakeCryptTestPing {
            test: FixedBytes(test),
        });
        socket.update().await?;

        let pong = socket
            .wait_for_packet(HANDSHAKE_TIMEOUT, |p| {
                matches!(p, Clientbound::HandshakeCryptTestPong(_))
            })
            .await?;
        let Clientbound::HandshakeCryptTestPong(HandshakeCryptTestPong { test: echoed }) = pong
        else {
            unreachable!()
        };
        if echoed.0 != test {
            socket.emit("crypt_testfail", None).await?;
            return Err(Error::HandshakeFailure(
                "cipher self-test mismatch".to_string(),
            ));
        }
        socket.emit("crypt_complete", None).await?;

        socket.write_packet(HandshakeOk {});
        socket.update().await?;
        socket.emit("client_connected", None).await?;
        tracing::info!("client: handshake complete");
        Ok(socket)
    }

    /// Runs the server side against one freshly accepted connection.
    pub async fn run_server(
        &self,
        mut socket: CryptSocket<Serverbound, Clientbound>,
    ) -> Result<CryptSocket<Serverbound, Clientbound>> {
        socket
            .wait_for_packet(HANDSHAKE_TIMEOUT, |p| {
                matches!(p, Serverbound::HandshakeInitiate(_))
            })
            .await?;
        socket.write_packet(HandshakeConfirm {});
        socket.update().await?;
        socket.emit("client_handshake", None).await?;

        let offer = socket
            .wait_for_packet(HANDSHAKE_TIMEOUT, |p| {
                matches!(p, Serverbound::HandshakeCryptModesList(_))
            })
            .await?;
        let Serverbound::HandshakeCryptModesList(HandshakeCryptModesList { modes }) = offer else {
            unreachable!()
        };
        let offered: Vec<String> = modes.0.into_iter().map(|c| c.0).collect();

        let Some(mode) = self.ciphers.negotiate(&offered) else {
            tracing::warn!("server: no shared cipher mode, killing connection");
            socket.emit("crypt_modeselectfail", None).await?;
            socket.write_packet(HandshakeCancel {
                msg: CStr0::new("no shared cipher modes"),
            });
            socket.update().await?;
            socket.emit("client_killed", None).await?;
            return Err(Error::HandshakeFailure(
                "no shared cipher modes with peer".to_string(),
            ));
        };
        socket.write_packet(HandshakeCryptModeSelect {
            mode: CStr0::new(mode.clone()),
        });
        socket.update().await?;
        socket
            .emit("crypt_modeselected", Some(mode.clone()))
            .await?;

        let server_secret = EphemeralSecret::random(&mut OsRng);
        let server_public = PublicKey::from(&server_secret);
        let server_public_pem = server_public
            .to_public_key_pem(Default::default())
            .map_err(|e| Error::Crypto(format!("failed to encode public key: {e}")))?;

        let mut salt = [0u8; KEX_SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        socket.write_packet(HandshakeCryptKexServer {
            salt: FixedBytes(salt),
            key_len: KEY_LEN as u16,
            public_key: CStr0::new(server_public_pem),
        });
        socket.update().await?;

        let kex = socket
            .wait_for_packet(HANDSHAKE_TIMEOUT, |p| {
                matches!(p, Serverbound::HandshakeCryptKexClient(_))
            })
            .await?;
        let Serverbound::HandshakeCryptKexClient(HandshakeCryptKexClient { public_key }) = kex
        else {
            unreachable!()
        };
        let client_public = PublicKey::from_public_key_pem(&public_key.0)
            .map_err(|e| Error::Crypto(format!("bad client public key: {e}")))?;
        socket.emit("crypt_kexok", None).await?;

        socket.emit("crypt_starting", None).await?;
        let key = derive_session_key(&server_secret, &client_public, &salt)?;
        socket.install_cipher(Box::new(AesOcbCipher::new(&key)));
        tracing::info!("server: cipher installed");

        socket.write_packet(HandshakeCryptOK {});
        socket.update().await?;

        let ping = socket
            .wait_for_packet(HANDSHAKE_TIMEOUT, |p| {
                matches!(p, Serverbound::HandshakeCryptTestPing(_))
            })
            .await?;
        let Serverbound::HandshakeCryptTestPing(HandshakeCryptTestPing { test }) = ping else {
            unreachable!()
        };
        socket.write_packet(HandshakeCryptTestPong { test });
        socket.update().await?;
        socket.emit("crypt_complete", None).await?;

        socket
            .wait_for_packet(HANDSHAKE_TIMEOUT, |p| {
                matches!(p, Serverbound::HandshakeOK(_))
            })
            .await?;
        socket.emit("client_connected", None).await?;
        tracing::info!("server: handshake complete");

        Ok(socket)
    }

    /// Cleanly rejects a connection before or during the handshake, notifying the peer.
    pub async fn reject_server(
        &self,
        mut socket: CryptSocket<Serverbound, Clientbound>,
        reason: &str,
    ) -> Result<()> {
        tracing::info!(reason, "server: rejecting connection");
        socket
            .emit("client_killed", Some(reason.to_string()))
            .await?;
        socket.write_packet(HandshakeCancel {
            msg: CStr0::new(reason),
        });
        socket.update().await?;
        socket.close();
        Ok(())
    }

    /// Mirrors [`reject_server`] for a client disconnecting mid-handshake.
    pub async fn disconnect_client(
        &self,
        mut socket: CryptSocket<Clientbound, Serverbound>,
        reason: &str,
    ) -> Result<()> {
        tracing::info!(reason, "client: disconnecting");
        socket
            .emit("client_disconnecting", Some(reason.to_string()))
            .await?;
        socket.write_packet(Disconnect {
            message: CStr0::new(reason),
        });
        socket.update().await?;
        socket.close();
        Ok(())
    }
}

/// Derives the session key from the ECDH shared secret. `info` is empty: the salt
/// (random per handshake, sent alongside the server's public key) is the only input
/// that distinguishes one session's derivation from another's.
fn derive_session_key(
    own_secret: &EphemeralSecret,
    peer_public: &PublicKey,
    salt: &[u8],
) -> Result<[u8; KEY_LEN]> {
    let shared = own_secret.diffie_hellman(peer_public);
    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared.raw_secret_bytes().as_slice());

    let mut okm = [0u8; KEY_LEN];
    hkdf.expand(&[], &mut okm)
        .map_err(|_| Error::Crypto("HKDF expand produced an invalid length".to_string()))?;
    Ok(okm)
}
