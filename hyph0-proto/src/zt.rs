//! Pluggable obfuscation codec.
//!
//! Grounded on `original_source/hyphen0/hyphen0/zerotrust/_layer.py` (the buffering
//! contract) and `.../hyphen0/zerotrust/layers/http.py` (the HTTP/1.1 instance, whose
//! `_make_header`/`_parse_header` join fields with `\n` and terminate on `\n\n`, not
//! CRLF). The original assumes a full envelope is always present in one recv chunk;
//! this implementation instead reports an incomplete envelope as "need more bytes"
//! rather than panicking, since a TCP stream gives no such guarantee.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Selects which [`ZtLayer`] implementation a connection uses. Carried in
/// [`crate::config::ConnectionConfig`] for (de)serialization; the actual trait object is
/// constructed from this descriptor with [`ZtLayerKind::build`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZtLayerKind {
    /// No obfuscation: the raw `ProtoSocket`/`CryptSocket` frame stream travels as-is.
    #[default]
    None,
    /// Wraps each chunk in an HTTP/1.1-looking request.
    Http1,
}

impl ZtLayerKind {
    pub fn build(self) -> Option<Box<dyn ZtLayer>> {
        match self {
            ZtLayerKind::None => None,
            ZtLayerKind::Http1 => Some(Box::new(Http1ZtLayer::new())),
        }
    }
}

/// A pluggable obfuscation codec.
///
/// `wrap` takes a plaintext chunk and returns an envelope that looks innocuous to an
/// on-path observer. `unwrap` takes a buffer that may hold zero, one, or a partial
/// envelope and returns `Ok(None)` if no full envelope is present yet, or
/// `Ok(Some((consumed, payload)))` once one completes. Malformed (not merely
/// incomplete) framing is a fatal [`Error::Framing`].
pub trait ZtLayer: Send + Sync {
    fn wrap(&self, data: &[u8]) -> Vec<u8>;
    fn unwrap(&self, data: &[u8]) -> Result<Option<(usize, Vec<u8>)>>;
}

/// The buffering state machine shared by any [`ZtLayer`]: a raw receive buffer, a
/// staging area for plaintext that has been unwrapped but not yet consumed, and a
/// send buffer awaiting the next full envelope.
pub struct ZtBuffers {
    layer: Box<dyn ZtLayer>,
    chunk_size: usize,
    recv_buffer: Vec<u8>,
    unwrapped_recv_buffer: Vec<u8>,
    send_buffer: Vec<u8>,
}

impl std::fmt::Debug for ZtBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZtBuffers")
            .field("chunk_size", &self.chunk_size)
            .field("recv_buffer", &self.recv_buffer)
            .field("unwrapped_recv_buffer", &self.unwrapped_recv_buffer)
            .field("send_buffer", &self.send_buffer)
            .finish()
    }
}

impl ZtBuffers {
    pub fn new(layer: Box<dyn ZtLayer>, chunk_size: usize) -> Self {
        Self {
            layer,
            chunk_size,
            recv_buffer: Vec::new(),
            unwrapped_recv_buffer: Vec::new(),
            send_buffer: Vec::new(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn can_pull_send(&self) -> bool {
        !self.send_buffer.is_empty()
    }

    pub fn can_pull_recv(&self) -> bool {
        !self.unwrapped_recv_buffer.is_empty() || !self.recv_buffer.is_empty()
    }

    pub fn push_recv(&mut self, data: &[u8]) {
        self.recv_buffer.extend_from_slice(data);
    }

    pub fn push_send(&mut self, data: &[u8]) {
        self.send_buffer.extend_from_slice(data);
    }

    /// Unwraps as many whole envelopes as are currently buffered, then returns up to
    /// `n` bytes of plaintext, stashing any surplus in `unwrapped_recv_buffer`.
    pub fn pull_recv(&mut self, n: usize) -> Result<Vec<u8>> {
        if !self.can_pull_recv() {
            return Ok(Vec::new());
        }

        let mut out = std::mem::take(&mut self.unwrapped_recv_buffer);
        while out.len() < n {
            if self.recv_buffer.is_empty() {
                break;
            }
            match self.layer.unwrap(&self.recv_buffer)? {
                Some((consumed, payload)) => {
                    self.recv_buffer.drain(..consumed);
                    out.extend_from_slice(&payload);
                }
                None => break,
            }
        }

        if out.len() > n {
            self.unwrapped_recv_buffer = out.split_off(n);
        }
        Ok(out)
    }

    /// Wraps up to `chunk_size` bytes of pending plaintext into a single envelope.
    pub fn pull_send(&mut self) -> Vec<u8> {
        if !self.can_pull_send() {
            return Vec::new();
        }
        let take = self.chunk_size.min(self.send_buffer.len());
        let chunk: Vec<u8> = self.send_buffer.drain(..take).collect();
        self.layer.wrap(&chunk)
    }
}

/// Wraps payload inside an HTTP/1.1 `POST` request. The body is always emitted as
/// base64, but `unwrap` also accepts a raw (non-base64) body so a peer running a
/// differently-configured layer can still be read.
pub struct Http1ZtLayer {
    user_agent: String,
}

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36",
];

impl Http1ZtLayer {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let user_agent = USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())].to_string();
        Self { user_agent }
    }

    fn random_path_suffix() -> String {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
        let mut rng = rand::thread_rng();
        let len = rng.gen_range(16..=32);
        (0..len)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect()
    }
}

impl Default for Http1ZtLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl ZtLayer for Http1ZtLayer {
    fn wrap(&self, data: &[u8]) -> Vec<u8> {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine;

        let body = BASE64.encode(data);
        let mut out = Vec::with_capacity(body.len() + 256);
        out.extend_from_slice(
            format!("POST /{} HTTP/1.1\n", Self::random_path_suffix()).as_bytes(),
        );
        out.extend_from_slice(b"Connection: keep-alive\n");
        out.extend_from_slice(b"Cache-Control: max-age=0\n");
        out.extend_from_slice(format!("User-Agent: {}\n", self.user_agent).as_bytes());
        out.extend_from_slice(b"Accept: */*\n");
        out.extend_from_slice(format!("Content-Length: {}\n", body.len()).as_bytes());
        out.extend_from_slice(b"\n");
        out.extend_from_slice(body.as_bytes());
        out
    }

    fn unwrap(&self, data: &[u8]) -> Result<Option<(usize, Vec<u8>)>> {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine;

        let header_end = match find_double_newline(data) {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let header_text = std::str::from_utf8(&data[..header_end])
            .map_err(|_| Error::Framing("envelope headers are not valid UTF-8".into()))?;

        if !(header_text.starts_with("POST /") || header_text.starts_with("GET /")) {
            return Err(Error::Framing("envelope missing HTTP/1.1 request line".into()));
        }

        let content_length = header_text
            .lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .ok_or_else(|| Error::Framing("envelope missing Content-Length header".into()))?
            .trim()
            .parse::<usize>()
            .map_err(|_| Error::Framing("envelope Content-Length is not numeric".into()))?;

        let body_start = header_end + 2;
        if data.len() < body_start + content_length {
            return Ok(None);
        }
        let body = &data[body_start..body_start + content_length];

        let payload = match BASE64.decode(body) {
            Ok(decoded) => decoded,
            Err(_) => body.to_vec(),
        };

        Ok(Some((body_start + content_length, payload)))
    }
}

fn find_double_newline(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\n\n")
}
