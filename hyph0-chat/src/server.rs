//! The chat server: accepts connections, runs the handshake, then relays chat traffic.
//!
//! Grounded on `original_source/hyphen0/server.py`'s `SimpleChatServer`: a shared roster
//! of connected nicknames, broadcast-to-everyone chat messages, and an MOTD sent right
//! after a client joins. The original tracks clients in a free-list of small integer
//! uids; nicknames here are unique strings instead, since nothing downstream needs a
//! compact numeric id.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyph0_proto::cipher::CipherRegistry;
use hyph0_proto::codec::CStr0;
use hyph0_proto::config::ConnectionConfig;
use hyph0_proto::crypt_socket::CryptSocket;
use hyph0_proto::error::{Error, Result};
use hyph0_proto::handshake::HandshakeEngine;
use hyph0_proto::packets::{
    ChatMessageClientbound, ChatNickChange, ChatRoster, Clientbound, Serverbound,
};
use hyph0_proto::proto_socket::ProtoSocket;
use hyph0_proto::socket::BasicSocket;
use std::sync::Mutex;
use tokio::sync::broadcast;

const MOTD: &str = "Welcome to hyph0-chat. Say hello.";
const BROADCAST_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
enum Broadcast {
    Message(ChatMessageClientbound),
    Roster(Vec<String>),
}

struct Roster {
    nicks: Mutex<HashMap<SocketAddr, String>>,
}

impl Roster {
    fn new() -> Self {
        Self {
            nicks: Mutex::new(HashMap::new()),
        }
    }

    fn join(&self, addr: SocketAddr, nick: String) -> bool {
        let mut nicks = self.nicks.lock().unwrap();
        if nicks.values().any(|n| n == &nick) {
            return false;
        }
        nicks.insert(addr, nick);
        true
    }

    fn leave(&self, addr: &SocketAddr) {
        self.nicks.lock().unwrap().remove(addr);
    }

    fn snapshot(&self) -> Vec<String> {
        self.nicks.lock().unwrap().values().cloned().collect()
    }
}

pub async fn serve(bind: SocketAddr, connection: ConnectionConfig, cipher_modes: Vec<String>) -> Result<()> {
    let acceptor = BasicSocket::bind(bind).await?;
    tracing::info!("listening on {bind}");

    let engine = Arc::new(HandshakeEngine::new(CipherRegistry::new(cipher_modes)));
    let roster = Arc::new(Roster::new());
    let (tx, _rx) = broadcast::channel::<Broadcast>(BROADCAST_CAPACITY);

    loop {
        let (sock, addr) = acceptor.accept().await?;
        let engine = engine.clone();
        let roster = roster.clone();
        let tx = tx.clone();
        let rx = tx.subscribe();
        let connection = connection.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_client(sock, addr, connection, engine, roster.clone(), tx, rx).await {
                tracing::warn!("client {addr} disconnected: {e}");
            }
            roster.leave(&addr);
        });
    }
}

async fn handle_client(
    sock: BasicSocket,
    addr: SocketAddr,
    connection: ConnectionConfig,
    engine: Arc<HandshakeEngine>,
    roster: Arc<Roster>,
    tx: broadcast::Sender<Broadcast>,
    mut rx: broadcast::Receiver<Broadcast>,
) -> Result<()> {
    let socket: CryptSocket<Serverbound, Clientbound> = ProtoSocket::new(sock, connection, true);
    let mut socket = engine.run_server(socket).await?;
    tracing::info!("{addr} completed handshake");

    let nick = socket
        .wait_for_packet(Duration::from_secs(30), |p| {
            matches!(p, Serverbound::ChatNickChange(_))
        })
        .await?;
    let Serverbound::ChatNickChange(ChatNickChange { nick }) = nick else {
        unreachable!()
    };
    let nick = nick.0;

    if !roster.join(addr, nick.clone()) {
        socket.write_packet(hyph0_proto::packets::Kick {
            message: CStr0::new("nickname already taken"),
        });
        socket.update().await?;
        return Err(Error::HandshakeFailure("nickname collision".to_string()));
    }

    socket.write_packet(ChatMessageClientbound {
        author: CStr0::new("server"),
        body: CStr0::new(MOTD),
    });
    let _ = tx.send(Broadcast::Roster(roster.snapshot()));
    tracing::info!("{addr} joined as {nick}");

    let result = chat_loop(&mut socket, &nick, &tx, &mut rx).await;

    roster.leave(&addr);
    let _ = tx.send(Broadcast::Roster(roster.snapshot()));
    result
}

async fn chat_loop(
    socket: &mut CryptSocket<Serverbound, Clientbound>,
    nick: &str,
    tx: &broadcast::Sender<Broadcast>,
    rx: &mut broadcast::Receiver<Broadcast>,
) -> Result<()> {
    loop {
        socket.update().await?;

        while let Some(packet) = socket.read_packet() {
            match packet {
                Serverbound::ChatMessage(m) => {
                    let _ = tx.send(Broadcast::Message(ChatMessageClientbound {
                        author: CStr0::new(nick),
                        body: m.body,
                    }));
                }
                Serverbound::ChatNickChange(_) => {
                    // Renaming mid-session isn't offered; the first nick sticks.
                }
                Serverbound::Disconnect(d) => {
                    return Err(Error::WereDisconnected(d.message.0));
                }
                _ => {}
            }
        }

        while let Ok(event) = rx.try_recv() {
            match event {
                Broadcast::Message(m) => socket.write_packet(m),
                Broadcast::Roster(nicks) => socket.write_packet(ChatRoster {
                    nicks: nicks.into_iter().map(CStr0::new).collect::<Vec<_>>().into(),
                }),
            }
        }

        tokio::task::yield_now().await;
    }
}
