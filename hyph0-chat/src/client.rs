//! The chat client: connects, handshakes, then relays stdin lines to the server and
//! prints whatever comes back.
//!
//! Grounded on `original_source/hyphen0/hyphen0/client.py`'s `work()` loop: ticking the
//! connection, draining inbound packets, and raising on a `Kick`. Lines typed at stdin
//! are read on a blocking task and forwarded over a channel, since `std::io::Stdin` has
//! no non-blocking read.

use std::net::SocketAddr;
use std::time::Duration;

use hyph0_proto::cipher::CipherRegistry;
use hyph0_proto::codec::CStr0;
use hyph0_proto::config::ConnectionConfig;
use hyph0_proto::crypt_socket::CryptSocket;
use hyph0_proto::error::{Error, Result};
use hyph0_proto::handshake::HandshakeEngine;
use hyph0_proto::packets::{ChatMessageServerbound, ChatNickChange, Clientbound, Serverbound};
use hyph0_proto::proto_socket::ProtoSocket;
use hyph0_proto::socket::{default_timeout, BasicSocket};
use tokio::sync::mpsc;

pub async fn run(
    addr: SocketAddr,
    nick: String,
    connection: ConnectionConfig,
    cipher_modes: Vec<String>,
) -> Result<()> {
    let sock = BasicSocket::connect(addr, default_timeout()).await?;
    let socket: CryptSocket<Clientbound, Serverbound> = ProtoSocket::new(sock, connection, false);

    let engine = HandshakeEngine::new(CipherRegistry::new(cipher_modes));
    let mut socket = engine.run_client(socket).await?;
    tracing::info!("connected to {addr}");

    socket.write_packet(ChatNickChange {
        nick: CStr0::new(nick),
    });
    socket.update().await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(line.trim_end().to_string()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        socket.update().await?;

        while let Some(packet) = socket.read_packet() {
            match packet {
                Clientbound::ChatMessage(m) => println!("{}: {}", m.author.0, m.body.0),
                Clientbound::ChatRoster(r) => {
                    let names: Vec<&str> = r.nicks.0.iter().map(|n| n.0.as_str()).collect();
                    println!("* online: {}", names.join(", "));
                }
                Clientbound::Kick(k) => return Err(Error::WereKicked(k.message.0)),
                Clientbound::HandshakeCancel(c) => return Err(Error::HandshakeFailure(c.msg.0)),
                _ => {}
            }
        }

        while let Ok(line) = rx.try_recv() {
            if line.is_empty() {
                continue;
            }
            socket.write_packet(ChatMessageServerbound {
                body: CStr0::new(line),
            });
            socket.update().await?;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
