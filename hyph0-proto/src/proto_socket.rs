//! Packet framing over a [`BasicSocket`], plus the bidirectional heartbeat sublayer.
//!
//! Grounded on `original_source/hyphen0/hyphen0/socket/protosocket.py`: a single `update`
//! tick drains whatever bytes are ready, folds heartbeat traffic into liveness tracking
//! instead of the inbound queue, and otherwise queues packets for `read_packet`/
//! `write_packet`. `wait_for_packet` scans the whole inbound queue, not just its head,
//! matching the original's linear search-and-remove.
//!
//! The actual byte-level framing is pulled out behind [`PacketFramer`] so
//! [`crate::crypt_socket`] can swap in AEAD-wrapped framing without duplicating any of
//! the queueing or heartbeat logic here — the reference implementation gets the same
//! effect by having `CryptSocket` subclass `ProtoSocket` and override two methods.
//!
//! When [`crate::config::ConnectionConfig::zt_layer`] names an obfuscation layer, every
//! byte this socket sends or receives is wrapped/unwrapped through a [`crate::zt::ZtBuffers`]
//! sitting below the framer, transparent to it.

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::events::EventHub;
use crate::packets::{Clientbound, HeartbeatClientbound, HeartbeatServerbound, Serverbound};
use crate::socket::{default_timeout, BasicSocket};
use crate::zt::ZtBuffers;

/// A packet enum that can be framed onto/off of the wire.
pub trait Framed: Sized + Clone + std::fmt::Debug {
    fn encode_framed(&self) -> Vec<u8>;
    fn decode_framed(buf: &[u8]) -> Result<(usize, Self)>;
    /// The variant's name, for `ptype_<name>_received` event dispatch.
    fn kind_name(&self) -> &'static str;
}

impl Framed for Clientbound {
    fn encode_framed(&self) -> Vec<u8> {
        Clientbound::encode_framed(self)
    }
    fn decode_framed(buf: &[u8]) -> Result<(usize, Self)> {
        Clientbound::decode_framed(buf)
    }
    fn kind_name(&self) -> &'static str {
        Clientbound::name(self)
    }
}

impl Framed for Serverbound {
    fn encode_framed(&self) -> Vec<u8> {
        Serverbound::encode_framed(self)
    }
    fn decode_framed(buf: &[u8]) -> Result<(usize, Self)> {
        Serverbound::decode_framed(buf)
    }
    fn kind_name(&self) -> &'static str {
        Serverbound::name(self)
    }
}

/// A packet enum that may itself be the heartbeat packet for its direction.
pub trait HasHeartbeat {
    fn as_heartbeat(&self) -> Option<(bool, u32)>;
}

impl HasHeartbeat for Clientbound {
    fn as_heartbeat(&self) -> Option<(bool, u32)> {
        match self {
            Clientbound::Heartbeat(h) => Some((h.initiating, h.nonce)),
            _ => None,
        }
    }
}

impl HasHeartbeat for Serverbound {
    fn as_heartbeat(&self) -> Option<(bool, u32)> {
        match self {
            Serverbound::Heartbeat(h) => Some((h.initiating, h.nonce)),
            _ => None,
        }
    }
}

/// A packet enum that can build the heartbeat packet for its own direction.
pub trait MakeHeartbeat {
    fn heartbeat(initiating: bool, nonce: u32) -> Self;
}

impl MakeHeartbeat for Clientbound {
    fn heartbeat(initiating: bool, nonce: u32) -> Self {
        Clientbound::Heartbeat(HeartbeatClientbound { initiating, nonce })
    }
}

impl MakeHeartbeat for Serverbound {
    fn heartbeat(initiating: bool, nonce: u32) -> Self {
        Serverbound::Heartbeat(HeartbeatServerbound { initiating, nonce })
    }
}

/// Translates between the wire's raw bytes and one decoded packet. Implementations own
/// whatever envelope sits around the packet's own `pid || fields` encoding (nothing, for
/// [`PlainFramer`]; a length-prefixed ciphertext, for `crypt_socket`'s framer).
pub trait PacketFramer<In, Out> {
    /// Consumes a complete packet's worth of bytes from the front of `buf` if one is
    /// present, returning it decoded. Returns `Ok(None)` on a merely incomplete buffer.
    fn try_decode(&self, buf: &mut Vec<u8>) -> Result<Option<In>>;
    fn encode(&self, packet: &Out) -> Result<Vec<u8>>;
}

/// The no-envelope framer: a packet is exactly its `pid || fields` encoding.
#[derive(Clone, Copy, Default)]
pub struct PlainFramer;

impl<In: Framed, Out: Framed> PacketFramer<In, Out> for PlainFramer {
    fn try_decode(&self, buf: &mut Vec<u8>) -> Result<Option<In>> {
        match In::decode_framed(buf) {
            Ok((consumed, packet)) => {
                buf.drain(..consumed);
                Ok(Some(packet))
            }
            Err(Error::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn encode(&self, packet: &Out) -> Result<Vec<u8>> {
        Ok(packet.encode_framed())
    }
}

/// A framed, heartbeat-aware connection. `In` is the direction this endpoint reads,
/// `Out` the direction it writes — a client is `ProtoSocket<Clientbound, Serverbound>`,
/// a server is `ProtoSocket<Serverbound, Clientbound>`. `Fr` is the byte-level envelope;
/// almost everyone wants the default, [`PlainFramer`].
pub struct ProtoSocket<In, Out, Fr = PlainFramer> {
    socket: BasicSocket,
    config: ConnectionConfig,
    recv_buffer: Vec<u8>,
    inbound: VecDeque<In>,
    outbound: VecDeque<Out>,
    last_packet_received: Instant,
    heartbeat_nonce: Option<u32>,
    missed_heartbeats: u32,
    framer: Fr,
    zt: Option<ZtBuffers>,
    hub: EventHub,
}

impl<In: std::fmt::Debug, Out: std::fmt::Debug, Fr: std::fmt::Debug> std::fmt::Debug
    for ProtoSocket<In, Out, Fr>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtoSocket")
            .field("socket", &self.socket)
            .field("config", &self.config)
            .field("recv_buffer", &self.recv_buffer)
            .field("inbound", &self.inbound)
            .field("outbound", &self.outbound)
            .field("last_packet_received", &self.last_packet_received)
            .field("heartbeat_nonce", &self.heartbeat_nonce)
            .field("missed_heartbeats", &self.missed_heartbeats)
            .field("framer", &self.framer)
            .field("zt", &self.zt)
            .field("hub", &self.hub)
            .finish()
    }
}

impl<In, Out, Fr> ProtoSocket<In, Out, Fr>
where
    In: HasHeartbeat + Framed,
    Out: MakeHeartbeat,
    Fr: PacketFramer<In, Out>,
{
    /// `desync_start` backdates the liveness clock by half a heartbeat interval, matching
    /// the reference implementation's trick for staggering which side initiates the first
    /// heartbeat on a freshly established connection (servers desync, clients don't).
    pub fn with_framer(
        socket: BasicSocket,
        config: ConnectionConfig,
        desync_start: bool,
        framer: Fr,
    ) -> Self {
        let last_packet_received = if desync_start {
            Instant::now() - config.heartbeat_interval / 2
        } else {
            Instant::now()
        };
        let zt = config.zt_layer.build().map(|layer| ZtBuffers::new(layer, config.chunk_size));
        Self {
            socket,
            config,
            recv_buffer: Vec::new(),
            inbound: VecDeque::new(),
            outbound: VecDeque::new(),
            last_packet_received,
            heartbeat_nonce: None,
            missed_heartbeats: 0,
            framer,
            zt,
            hub: EventHub::new(),
        }
    }

    /// Replaces the framer in place — used to upgrade a plain connection to an
    /// encrypted one partway through the handshake without losing queued state.
    pub fn set_framer(&mut self, framer: Fr) {
        self.framer = framer;
    }

    pub fn framer(&self) -> &Fr {
        &self.framer
    }

    /// Mutable access to the event hub, for registering or removing hooks.
    pub fn hub_mut(&mut self) -> &mut EventHub {
        &mut self.hub
    }

    /// Emits a named event to every hook registered on this connection's hub.
    pub async fn emit(&self, event: &str, detail: Option<String>) -> Result<()> {
        self.hub.emit(event, detail).await
    }

    pub fn inbound_pending(&self) -> bool {
        !self.inbound.is_empty()
    }

    pub fn outbound_pending(&self) -> bool {
        !self.outbound.is_empty()
    }

    pub fn read_packet(&mut self) -> Option<In> {
        self.inbound.pop_front()
    }

    pub fn write_packet(&mut self, packet: impl Into<Out>) {
        self.outbound.push_back(packet.into());
    }

    pub fn peer_name(&mut self) -> Result<&str> {
        self.socket.peer_name()
    }

    pub fn close(&mut self) {
        self.socket.close();
    }

    /// One cooperative tick: drains whatever bytes are ready, decodes at most one
    /// packet, folds heartbeat traffic into liveness tracking, and flushes one queued
    /// outbound packet. Never blocks waiting for new bytes.
    pub async fn update(&mut self) -> Result<()> {
        let chunk = self.socket.try_recv(self.config.chunk_size)?;
        if !chunk.is_empty() {
            match &mut self.zt {
                Some(zt) => {
                    zt.push_recv(&chunk);
                    let plain = zt.pull_recv(self.config.chunk_size)?;
                    self.recv_buffer.extend_from_slice(&plain);
                }
                None => self.recv_buffer.extend_from_slice(&chunk),
            }
        }

        let decoded = self.framer.try_decode(&mut self.recv_buffer)?;

        match decoded {
            Some(packet) => {
                if let Some((initiating, nonce)) = packet.as_heartbeat() {
                    self.handle_heartbeat(initiating, nonce).await?;
                } else {
                    let kind = packet.kind_name();
                    tracing::trace!(packet = kind, "packet received");
                    self.hub
                        .emit("packet_received", Some(format!("{packet:?}")))
                        .await?;
                    self.hub
                        .emit(&format!("ptype_{kind}_received"), Some(format!("{packet:?}")))
                        .await?;
                    self.inbound.push_back(packet);
                    self.last_packet_received = Instant::now();
                }
            }
            None => self.maybe_initiate_heartbeat().await?,
        }

        if let Some(packet) = self.outbound.pop_front() {
            let bytes = self.framer.encode(&packet)?;
            self.send_framed(&bytes).await?;
        }

        Ok(())
    }

    /// Sends already-framed bytes, wrapping them in the zero-trust envelope first if one
    /// is configured.
    async fn send_framed(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.zt {
            Some(zt) => {
                zt.push_send(bytes);
                while zt.can_pull_send() {
                    let envelope = zt.pull_send();
                    self.socket.send(&envelope, default_timeout()).await?;
                }
                Ok(())
            }
            None => self.socket.send(bytes, default_timeout()).await,
        }
    }

    async fn handle_heartbeat(&mut self, initiating: bool, nonce: u32) -> Result<()> {
        if initiating {
            self.missed_heartbeats = 0;
            self.heartbeat_nonce = None;
            let reply = Out::heartbeat(false, nonce);
            let bytes = self.framer.encode(&reply)?;
            self.send_framed(&bytes).await?;
        } else if self.heartbeat_nonce == Some(nonce) {
            self.missed_heartbeats = 0;
            self.heartbeat_nonce = None;
        }
        self.last_packet_received = Instant::now();
        Ok(())
    }

    async fn maybe_initiate_heartbeat(&mut self) -> Result<()> {
        if self.last_packet_received.elapsed() <= self.config.heartbeat_interval {
            return Ok(());
        }
        if self.heartbeat_nonce.is_some() {
            self.missed_heartbeats += 1;
        }
        if self.missed_heartbeats > self.config.max_heartbeat_misses {
            tracing::warn!(missed = self.missed_heartbeats, "connection flatlined");
            return Err(Error::SocketFlatlined(self.missed_heartbeats));
        }
        self.last_packet_received = Instant::now();
        let nonce: u32 = rand::thread_rng().gen();
        self.heartbeat_nonce = Some(nonce);
        let probe = Out::heartbeat(true, nonce);
        let bytes = self.framer.encode(&probe)?;
        self.send_framed(&bytes).await
    }

    /// Ticks the connection until a packet matching `pred` arrives, or `timeout` elapses.
    /// Scans the entire inbound queue (not just its head) on every tick.
    pub async fn wait_for_packet<F>(&mut self, timeout: Duration, pred: F) -> Result<In>
    where
        F: Fn(&In) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.inbound.iter().position(|p| pred(p)) {
                return Ok(self.inbound.remove(pos).unwrap());
            }
            if Instant::now() >= deadline {
                return Err(Error::TimeoutError("packet did not arrive before timeout"));
            }
            self.update().await?;
            tokio::task::yield_now().await;
        }
    }
}

impl<In, Out, Fr> ProtoSocket<In, Out, Fr>
where
    In: HasHeartbeat + Framed,
    Out: MakeHeartbeat,
    Fr: PacketFramer<In, Out> + Default,
{
    pub fn new(socket: BasicSocket, config: ConnectionConfig, desync_start: bool) -> Self {
        Self::with_framer(socket, config, desync_start, Fr::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::ChatMessageServerbound;

    async fn connected_pair() -> (BasicSocket, BasicSocket) {
        let acceptor = BasicSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let server_fut = acceptor.accept();
        let client_fut = BasicSocket::connect(addr, Duration::from_secs(5));
        let (server, client) = tokio::join!(server_fut, client_fut);
        (server.unwrap().0, client.unwrap())
    }

    #[tokio::test]
    async fn write_then_read_through_update() {
        let (server_sock, client_sock) = connected_pair().await;
        let config = ConnectionConfig::default();

        let mut server: ProtoSocket<Serverbound, Clientbound> =
            ProtoSocket::new(server_sock, config.clone(), true);
        let mut client: ProtoSocket<Clientbound, Serverbound> =
            ProtoSocket::new(client_sock, config, false);

        client.write_packet(ChatMessageServerbound {
            body: crate::codec::CStr0::new("hi"),
        });
        client.update().await.unwrap();

        let received = server
            .wait_for_packet(Duration::from_secs(2), |p| {
                matches!(p, Serverbound::ChatMessage(_))
            })
            .await
            .unwrap();
        match received {
            Serverbound::ChatMessage(m) => assert_eq!(m.body.0, "hi"),
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[tokio::test]
    async fn heartbeat_round_trip_does_not_reach_inbound_queue() {
        let (server_sock, client_sock) = connected_pair().await;
        let mut config = ConnectionConfig::default();
        config.heartbeat_interval = Duration::from_millis(20);
        config.max_heartbeat_misses = 50;

        let mut server: ProtoSocket<Serverbound, Clientbound> =
            ProtoSocket::new(server_sock, config.clone(), true);
        let mut client: ProtoSocket<Clientbound, Serverbound> =
            ProtoSocket::new(client_sock, config, false);

        for _ in 0..20 {
            server.update().await.unwrap();
            client.update().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!server.inbound_pending());
        assert!(!client.inbound_pending());
        assert_eq!(server.missed_heartbeats, 0);
    }

    #[tokio::test]
    async fn zt_wrapped_traffic_round_trips_through_update() {
        let (server_sock, client_sock) = connected_pair().await;
        let mut config = ConnectionConfig::default();
        config.zt_layer = crate::zt::ZtLayerKind::Http1;
        config.chunk_size = 64;

        let mut server: ProtoSocket<Serverbound, Clientbound> =
            ProtoSocket::new(server_sock, config.clone(), true);
        let mut client: ProtoSocket<Clientbound, Serverbound> =
            ProtoSocket::new(client_sock, config, false);

        client.write_packet(ChatMessageServerbound {
            body: crate::codec::CStr0::new("wrapped"),
        });
        client.update().await.unwrap();

        let received = server
            .wait_for_packet(Duration::from_secs(2), |p| {
                matches!(p, Serverbound::ChatMessage(_))
            })
            .await
            .unwrap();
        match received {
            Serverbound::ChatMessage(m) => assert_eq!(m.body.0, "wrapped"),
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[tokio::test]
    async fn flatline_after_too_many_missed_heartbeats() {
        let acceptor = BasicSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let client_fut = BasicSocket::connect(addr, Duration::from_secs(5));
        let (server_sock, _addr) = acceptor.accept().await.unwrap();
        let client_sock = client_fut.await.unwrap();
        drop(client_sock);

        let mut config = ConnectionConfig::default();
        config.heartbeat_interval = Duration::from_millis(5);
        config.max_heartbeat_misses = 1;

        let mut server: ProtoSocket<Serverbound, Clientbound> =
            ProtoSocket::new(server_sock, config, true);

        let mut flatlined = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            match server.update().await {
                Ok(()) => {}
                Err(Error::SocketFlatlined(_)) | Err(Error::SocketClosed) => {
                    flatlined = true;
                    break;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(flatlined);
    }
}
