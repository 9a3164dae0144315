//! Reference network sender: chunked UDP with a small framing layer.
//!
//! [`UdpSender`] implements [`NativeSender`]. Each created instance owns a
//! socket and a worker task on the tokio runtime; `send` hands the frame
//! to the worker and returns, `fence` blocks until the worker has put
//! every earlier frame on the wire. [`FrameReceiver`] reassembles frames
//! on the other end.
//!
//! ## Wire format
//!
//! All integers little-endian.
//!
//! **Frame header datagram** (55 bytes + name):
//! ```text
//! kind:           u8   (1)   = 0x01
//! sequence:       u32  (4)
//! frame_number:   u64  (8)
//! timestamp_us:   u64  (8)
//! width:          u32  (4)
//! height:         u32  (4)
//! fourcc:         u32  (4)
//! line_stride:    u32  (4)
//! frame_rate_n:   u32  (4)
//! frame_rate_d:   u32  (4)
//! flags:          u8   (1)   bit 0 = zstd payload
//! payload_len:    u32  (4)   uncompressed length
//! total_chunks:   u32  (4)
//! name_len:       u8   (1)
//! name:           [u8] (name_len, ≤ 64)
//! ```
//!
//! **Chunk datagram** (13 byte header + payload):
//! ```text
//! kind:           u8   (1)   = 0x02
//! sequence:       u32  (4)
//! chunk_index:    u32  (4)
//! chunk_size:     u32  (4)
//! data:           [u8] (chunk_size, ≤ MTU − 13)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::channel::{NativeSender, VideoFrame};
use crate::error::FrameError;
use crate::format::PixelFormat;

// ── Constants ────────────────────────────────────────────────────

/// Maximum transmission unit minus IP (20) + UDP (8) headers.
pub const DEFAULT_MTU: usize = 1400;

/// Longest advertised sender name, in bytes.
pub const MAX_NAME_LEN: usize = 64;

const KIND_HEADER: u8 = 0x01;
const KIND_CHUNK: u8 = 0x02;

const FLAG_ZSTD: u8 = 0x01;

/// Largest uncompressed payload a [`FrameReceiver`] will reassemble.
/// Covers an 8K RGBA frame.
pub const MAX_PAYLOAD_LEN: usize = 256 * 1024 * 1024;

// ── UdpSenderConfig ──────────────────────────────────────────────

/// Settings for [`UdpSender`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpSenderConfig {
    /// Where frames are sent.
    pub remote: SocketAddr,
    /// Local bind address for each sender instance.
    pub bind: SocketAddr,
    /// Largest datagram emitted.
    pub mtu: usize,
    /// Advertised frame rate numerator.
    pub frame_rate_n: u32,
    /// Advertised frame rate denominator.
    pub frame_rate_d: u32,
    /// zstd level for payload compression. `None` sends raw bytes.
    pub compression_level: Option<i32>,
}

impl Default for UdpSenderConfig {
    fn default() -> Self {
        Self {
            remote: SocketAddr::from(([127, 0, 0, 1], 5960)),
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            mtu: DEFAULT_MTU,
            frame_rate_n: 60,
            frame_rate_d: 1,
            compression_level: None,
        }
    }
}

impl UdpSenderConfig {
    /// Reject settings the framing cannot carry.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.mtu <= FrameHeader::MAX_SIZE || self.mtu <= ChunkHeader::SIZE {
            return Err(FrameError::InvalidConfig("mtu too small for frame header"));
        }
        if self.frame_rate_n == 0 || self.frame_rate_d == 0 {
            return Err(FrameError::InvalidConfig("frame rate must be non-zero"));
        }
        Ok(())
    }

    fn chunk_payload_max(&self) -> usize {
        self.mtu - ChunkHeader::SIZE
    }
}

// ── FrameHeader ──────────────────────────────────────────────────

/// Per-frame metadata sent as the first datagram of each frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub sequence: u32,
    pub frame_number: u64,
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    pub fourcc: u32,
    pub line_stride: u32,
    pub frame_rate_n: u32,
    pub frame_rate_d: u32,
    pub flags: u8,
    pub payload_len: u32,
    pub total_chunks: u32,
    pub name: String,
}

impl FrameHeader {
    /// Encoded size without the name.
    pub const FIXED_SIZE: usize = 55;
    /// Encoded size with the longest name.
    pub const MAX_SIZE: usize = Self::FIXED_SIZE + MAX_NAME_LEN;

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_ZSTD != 0
    }

    /// Serialize. Names longer than [`MAX_NAME_LEN`] are cut at a char
    /// boundary.
    pub fn encode(&self) -> Bytes {
        let name = truncate_name(&self.name);
        let mut buf = BytesMut::with_capacity(Self::FIXED_SIZE + name.len());
        buf.put_u8(KIND_HEADER);
        buf.put_u32_le(self.sequence);
        buf.put_u64_le(self.frame_number);
        buf.put_u64_le(self.timestamp_us);
        buf.put_u32_le(self.width);
        buf.put_u32_le(self.height);
        buf.put_u32_le(self.fourcc);
        buf.put_u32_le(self.line_stride);
        buf.put_u32_le(self.frame_rate_n);
        buf.put_u32_le(self.frame_rate_d);
        buf.put_u8(self.flags);
        buf.put_u32_le(self.payload_len);
        buf.put_u32_le(self.total_chunks);
        buf.put_u8(name.len() as u8);
        buf.put_slice(name.as_bytes());
        buf.freeze()
    }

    /// Deserialize.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < Self::FIXED_SIZE {
            return Err(FrameError::Malformed(format!(
                "frame header too short: {} < {}",
                data.len(),
                Self::FIXED_SIZE,
            )));
        }
        let mut buf = data;
        let kind = buf.get_u8();
        if kind != KIND_HEADER {
            return Err(FrameError::Malformed(format!("not a frame header: {kind:#04x}")));
        }
        let sequence = buf.get_u32_le();
        let frame_number = buf.get_u64_le();
        let timestamp_us = buf.get_u64_le();
        let width = buf.get_u32_le();
        let height = buf.get_u32_le();
        let fourcc = buf.get_u32_le();
        let line_stride = buf.get_u32_le();
        let frame_rate_n = buf.get_u32_le();
        let frame_rate_d = buf.get_u32_le();
        let flags = buf.get_u8();
        let payload_len = buf.get_u32_le();
        let total_chunks = buf.get_u32_le();
        let name_len = buf.get_u8() as usize;
        if name_len > MAX_NAME_LEN || buf.remaining() < name_len {
            return Err(FrameError::Malformed(format!("bad name length {name_len}")));
        }
        let name = String::from_utf8(buf[..name_len].to_vec())
            .map_err(|_| FrameError::Malformed("sender name is not utf-8".into()))?;

        Ok(Self {
            sequence,
            frame_number,
            timestamp_us,
            width,
            height,
            fourcc,
            line_stride,
            frame_rate_n,
            frame_rate_d,
            flags,
            payload_len,
            total_chunks,
            name,
        })
    }
}

fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

// ── ChunkHeader ──────────────────────────────────────────────────

/// Per-chunk metadata prepended to each data datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub sequence: u32,
    pub chunk_index: u32,
    pub chunk_size: u32,
}

impl ChunkHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 13;

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(KIND_CHUNK);
        buf.put_u32_le(self.sequence);
        buf.put_u32_le(self.chunk_index);
        buf.put_u32_le(self.chunk_size);
    }

    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < Self::SIZE {
            return Err(FrameError::Malformed(format!(
                "chunk header too short: {} < {}",
                data.len(),
                Self::SIZE,
            )));
        }
        let mut buf = data;
        let kind = buf.get_u8();
        if kind != KIND_CHUNK {
            return Err(FrameError::Malformed(format!("not a chunk: {kind:#04x}")));
        }
        Ok(Self {
            sequence: buf.get_u32_le(),
            chunk_index: buf.get_u32_le(),
            chunk_size: buf.get_u32_le(),
        })
    }
}

/// A decoded datagram.
enum Datagram<'a> {
    Header(FrameHeader),
    Chunk(ChunkHeader, &'a [u8]),
}

fn parse_datagram(data: &[u8]) -> Result<Datagram<'_>, FrameError> {
    match data.first() {
        Some(&KIND_HEADER) => FrameHeader::decode(data).map(Datagram::Header),
        Some(&KIND_CHUNK) => {
            let ch = ChunkHeader::decode(data)?;
            let payload = &data[ChunkHeader::SIZE..];
            if payload.len() != ch.chunk_size as usize {
                return Err(FrameError::Malformed(format!(
                    "chunk size mismatch: header {} payload {}",
                    ch.chunk_size,
                    payload.len()
                )));
            }
            Ok(Datagram::Chunk(ch, payload))
        }
        Some(other) => Err(FrameError::Malformed(format!("unknown kind {other:#04x}"))),
        None => Err(FrameError::Malformed("empty datagram".into())),
    }
}

// ── UdpSender ────────────────────────────────────────────────────

/// Counters shared between a [`UdpSender`] and its workers.
#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

enum Command {
    Frame(VideoFrame),
    Fence(oneshot::Sender<()>),
}

/// A live sender instance.
pub struct UdpHandle {
    name: String,
    local_addr: SocketAddr,
    tx: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<()>,
}

impl UdpHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address the instance's socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// [`NativeSender`] over chunked UDP.
///
/// `fence` blocks the calling thread, so the pipeline driving this
/// sender must not run on a runtime worker thread.
pub struct UdpSender {
    config: UdpSenderConfig,
    runtime: Handle,
    counters: Arc<Counters>,
}

impl UdpSender {
    pub fn new(config: UdpSenderConfig, runtime: Handle) -> Result<Self, FrameError> {
        config.validate()?;
        Ok(Self {
            config,
            runtime,
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn config(&self) -> &UdpSenderConfig {
        &self.config
    }

    /// Frames put on the wire across all instances.
    pub fn frames_sent(&self) -> u64 {
        self.counters.frames.load(Ordering::Relaxed)
    }

    /// Datagram bytes put on the wire across all instances.
    pub fn bytes_sent(&self) -> u64 {
        self.counters.bytes.load(Ordering::Relaxed)
    }

    /// Frames dropped because a socket send or compression failed.
    pub fn send_errors(&self) -> u64 {
        self.counters.errors.load(Ordering::Relaxed)
    }

    fn bind(&self) -> Result<UdpSocket, FrameError> {
        let std_sock = std::net::UdpSocket::bind(self.config.bind)?;
        std_sock.set_nonblocking(true)?;
        let _guard = self.runtime.enter();
        Ok(UdpSocket::from_std(std_sock)?)
    }
}

impl NativeSender for UdpSender {
    type Handle = UdpHandle;

    fn is_available(&self) -> bool {
        true
    }

    fn create(&mut self, name: &str) -> Option<UdpHandle> {
        let socket = match self.bind() {
            Ok(s) => s,
            Err(e) => {
                warn!("UDP sender bind {} failed: {e}", self.config.bind);
                return None;
            }
        };
        let local_addr = socket.local_addr().ok()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = Worker {
            socket,
            config: self.config.clone(),
            name: name.to_string(),
            counters: self.counters.clone(),
            sequence: 0,
            frame_number: 0,
            started: Instant::now(),
        };
        let worker = self.runtime.spawn(worker.run(rx));

        debug!(name, %local_addr, remote = %self.config.remote, "UDP sender created");
        Some(UdpHandle {
            name: name.to_string(),
            local_addr,
            tx,
            worker,
        })
    }

    fn destroy(&mut self, handle: UdpHandle) {
        // Dropping the command channel lets the worker finish what is
        // queued and exit.
        drop(handle.tx);
        debug!(name = %handle.name, finished = handle.worker.is_finished(), "UDP sender destroyed");
    }

    fn send(&mut self, handle: &UdpHandle, frame: VideoFrame) {
        if let Err(e) = handle.submit(frame) {
            warn!(name = %handle.name, "frame dropped: {e}");
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn fence(&mut self, handle: &UdpHandle) {
        if let Err(e) = handle.wait_idle() {
            warn!(name = %handle.name, "fence skipped: {e}");
        }
    }
}

impl UdpHandle {
    fn submit(&self, frame: VideoFrame) -> Result<(), FrameError> {
        self.tx.send(Command::Frame(frame))?;
        Ok(())
    }

    /// Block until the worker has processed every earlier command.
    fn wait_idle(&self) -> Result<(), FrameError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send(Command::Fence(ack_tx))?;
        ack_rx.blocking_recv()?;
        Ok(())
    }
}

// ── Worker ───────────────────────────────────────────────────────

struct Worker {
    socket: UdpSocket,
    config: UdpSenderConfig,
    name: String,
    counters: Arc<Counters>,
    sequence: u32,
    frame_number: u64,
    started: Instant,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Frame(frame) => {
                    if let Err(e) = self.send_frame(frame).await {
                        warn!(name = %self.name, "frame send failed: {e}");
                        self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Command::Fence(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!(name = %self.name, frames = self.frame_number, "UDP sender worker stopped");
    }

    async fn send_frame(&mut self, frame: VideoFrame) -> Result<(), FrameError> {
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        let (payload, flags) = match self.config.compression_level {
            Some(level) => (Bytes::from(zstd::encode_all(&frame.data[..], level)?), FLAG_ZSTD),
            None => (frame.data.clone(), 0),
        };
        let chunk_max = self.config.chunk_payload_max();
        let total_chunks = payload.len().div_ceil(chunk_max);

        let header = FrameHeader {
            sequence: seq,
            frame_number: self.frame_number,
            timestamp_us: self.started.elapsed().as_micros() as u64,
            width: frame.width,
            height: frame.height,
            fourcc: frame.format.fourcc(),
            line_stride: frame.line_stride,
            frame_rate_n: self.config.frame_rate_n,
            frame_rate_d: self.config.frame_rate_d,
            flags,
            payload_len: frame.data.len() as u32,
            total_chunks: total_chunks as u32,
            name: self.name.clone(),
        };
        let header_bytes = header.encode();
        self.socket.send_to(&header_bytes, self.config.remote).await?;
        let mut sent_total = header_bytes.len();

        let mut pkt = BytesMut::with_capacity(self.config.mtu);
        for (idx, chunk) in payload.chunks(chunk_max).enumerate() {
            pkt.clear();
            ChunkHeader {
                sequence: seq,
                chunk_index: idx as u32,
                chunk_size: chunk.len() as u32,
            }
            .encode_into(&mut pkt);
            pkt.put_slice(chunk);
            self.socket.send_to(&pkt, self.config.remote).await?;
            sent_total += pkt.len();
        }

        trace!(seq, chunks = total_chunks, bytes = sent_total, "frame sent");
        self.frame_number += 1;
        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes.fetch_add(sent_total as u64, Ordering::Relaxed);
        Ok(())
    }
}

// ── FrameReceiver ────────────────────────────────────────────────

/// A reassembled frame.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub name: String,
    pub frame_number: u64,
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub line_stride: u32,
    pub frame_rate: (u32, u32),
    pub data: Bytes,
}

enum Collected {
    Frame(ReceivedFrame),
    Restart(FrameHeader),
}

/// Receiving end of the UDP framing.
pub struct FrameReceiver {
    socket: UdpSocket,
    buf: Vec<u8>,
    chunk_max: usize,
}

impl FrameReceiver {
    /// Bind a receiver on `addr`.
    pub async fn bind(addr: SocketAddr) -> Result<Self, FrameError> {
        Ok(Self::new(UdpSocket::bind(addr).await?, DEFAULT_MTU))
    }

    /// Wrap a bound socket. `mtu` must match the sender's.
    pub fn new(socket: UdpSocket, mtu: usize) -> Self {
        Self {
            socket,
            buf: vec![0u8; mtu.max(FrameHeader::MAX_SIZE)],
            chunk_max: mtu.saturating_sub(ChunkHeader::SIZE).max(1),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, FrameError> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive the next complete frame.
    ///
    /// Chunks from other sequences and undecodable datagrams are dropped.
    /// Headers failing [`check_header`](Self::check_header) are skipped.
    /// A new frame header arriving mid-frame abandons the partial frame
    /// and starts collecting the new one.
    pub async fn receive_frame(&mut self) -> Result<ReceivedFrame, FrameError> {
        let mut next = None;
        loop {
            let header = match next.take() {
                Some(h) => h,
                None => self.next_header().await?,
            };
            if let Err(e) = self.check_header(&header) {
                debug!(seq = header.sequence, "frame header rejected: {e}");
                continue;
            }
            match self.collect(header).await? {
                Collected::Frame(f) => return Ok(f),
                Collected::Restart(h) => {
                    trace!(seq = h.sequence, "partial frame abandoned");
                    next = Some(h);
                }
            }
        }
    }

    /// Reject headers whose chunk count cannot describe their payload.
    ///
    /// Raw payloads must be split exactly as the sender splits them.
    /// Compressed payloads may use at most as many chunks as the zstd
    /// bound of the uncompressed length needs.
    pub fn check_header(&self, header: &FrameHeader) -> Result<(), FrameError> {
        let payload_len = header.payload_len as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(FrameError::Malformed(format!(
                "payload length {payload_len} exceeds {MAX_PAYLOAD_LEN}"
            )));
        }
        let total = header.total_chunks as usize;
        let valid = if header.is_compressed() {
            let bound = zstd::zstd_safe::compress_bound(payload_len).div_ceil(self.chunk_max);
            (1..=bound).contains(&total)
        } else {
            total == payload_len.div_ceil(self.chunk_max)
        };
        if !valid {
            return Err(FrameError::Malformed(format!(
                "{total} chunks cannot carry a {payload_len} byte payload"
            )));
        }
        Ok(())
    }

    async fn next_header(&mut self) -> Result<FrameHeader, FrameError> {
        loop {
            let (len, _) = self.socket.recv_from(&mut self.buf).await?;
            if let Ok(Datagram::Header(h)) = parse_datagram(&self.buf[..len]) {
                return Ok(h);
            }
        }
    }

    async fn collect(&mut self, header: FrameHeader) -> Result<Collected, FrameError> {
        let total = header.total_chunks as usize;
        let mut chunks: Vec<Option<Vec<u8>>> = vec![None; total];
        let mut received = 0usize;

        while received < total {
            let (len, _) = self.socket.recv_from(&mut self.buf).await?;
            match parse_datagram(&self.buf[..len]) {
                Ok(Datagram::Header(h)) if h.sequence != header.sequence => {
                    return Ok(Collected::Restart(h));
                }
                Ok(Datagram::Chunk(ch, payload)) => {
                    let idx = ch.chunk_index as usize;
                    if ch.sequence != header.sequence || idx >= total || chunks[idx].is_some() {
                        continue;
                    }
                    chunks[idx] = Some(payload.to_vec());
                    received += 1;
                }
                _ => continue,
            }
        }

        let mut data = BytesMut::new();
        for chunk in chunks.into_iter().flatten() {
            data.put_slice(&chunk);
        }
        let data = if header.is_compressed() {
            Bytes::from(zstd::bulk::decompress(&data[..], header.payload_len as usize)?)
        } else {
            data.freeze()
        };
        if data.len() != header.payload_len as usize {
            return Err(FrameError::Malformed(format!(
                "payload length {} != advertised {}",
                data.len(),
                header.payload_len
            )));
        }
        let format = PixelFormat::from_fourcc(header.fourcc).ok_or_else(|| {
            FrameError::Malformed(format!("unknown fourcc {:#010x}", header.fourcc))
        })?;

        Ok(Collected::Frame(ReceivedFrame {
            name: header.name,
            frame_number: header.frame_number,
            timestamp_us: header.timestamp_us,
            width: header.width,
            height: header.height,
            format,
            line_stride: header.line_stride,
            frame_rate: (header.frame_rate_n, header.frame_rate_d),
            data,
        }))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn header(name: &str) -> FrameHeader {
        FrameHeader {
            sequence: 42,
            frame_number: 100,
            timestamp_us: 123_456,
            width: 1920,
            height: 1080,
            fourcc: PixelFormat::Uyva.fourcc(),
            line_stride: 3840,
            frame_rate_n: 60,
            frame_rate_d: 1,
            flags: FLAG_ZSTD,
            payload_len: 4_147_200,
            total_chunks: 2963,
            name: name.to_string(),
        }
    }

    #[test]
    fn frame_header_roundtrip() {
        let hdr = header("Cam1");
        let encoded = hdr.encode();
        assert_eq!(encoded.len(), FrameHeader::FIXED_SIZE + 4);
        let decoded = FrameHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, hdr);
        assert!(decoded.is_compressed());
    }

    #[test]
    fn long_name_truncated_on_char_boundary() {
        let name = "é".repeat(40); // 80 bytes
        let decoded = FrameHeader::decode(&header(&name).encode()).unwrap();
        assert_eq!(decoded.name.len(), MAX_NAME_LEN);
        assert_eq!(decoded.name, "é".repeat(32));
    }

    #[test]
    fn chunk_header_roundtrip() {
        let ch = ChunkHeader {
            sequence: 7,
            chunk_index: 3,
            chunk_size: 1024,
        };
        let mut buf = BytesMut::new();
        ch.encode_into(&mut buf);
        assert_eq!(buf.len(), ChunkHeader::SIZE);
        assert_eq!(ChunkHeader::decode(&buf).unwrap(), ch);
    }

    #[test]
    fn short_and_mistyped_datagrams_rejected() {
        assert!(FrameHeader::decode(&[KIND_HEADER; 10]).is_err());
        assert!(ChunkHeader::decode(&[KIND_CHUNK; 4]).is_err());

        let mut chunk = BytesMut::new();
        ChunkHeader {
            sequence: 0,
            chunk_index: 0,
            chunk_size: 0,
        }
        .encode_into(&mut chunk);
        let mut mistyped = chunk.to_vec();
        mistyped.extend_from_slice(&[0u8; 60]);
        assert!(FrameHeader::decode(&mistyped).is_err());
        assert!(parse_datagram(&[0x7f, 0, 0]).is_err());
        assert!(parse_datagram(&[]).is_err());
    }

    #[test]
    fn chunk_size_must_match_payload() {
        let mut pkt = BytesMut::new();
        ChunkHeader {
            sequence: 1,
            chunk_index: 0,
            chunk_size: 8,
        }
        .encode_into(&mut pkt);
        pkt.put_slice(&[1, 2, 3]);
        assert!(matches!(parse_datagram(&pkt), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn config_validation() {
        assert_ok!(UdpSenderConfig::default().validate());
        let small = UdpSenderConfig {
            mtu: 64,
            ..Default::default()
        };
        assert_err!(small.validate());
        let zero_rate = UdpSenderConfig {
            frame_rate_d: 0,
            ..Default::default()
        };
        assert_err!(zero_rate.validate());
    }

    #[test]
    fn config_parses_partial_toml() {
        let cfg: UdpSenderConfig = toml::from_str(
            r#"
            remote = "10.0.0.2:6000"
            compression_level = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.remote.port(), 6000);
        assert_eq!(cfg.compression_level, Some(3));
        assert_eq!(cfg.mtu, DEFAULT_MTU);
    }

    async fn send_over_localhost(compression_level: Option<i32>) {
        let mut receiver = FrameReceiver::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let config = UdpSenderConfig {
            remote: receiver.local_addr().unwrap(),
            bind: "127.0.0.1:0".parse().unwrap(),
            compression_level,
            ..Default::default()
        };
        let handle = Handle::current();

        let recv = tokio::spawn(async move {
            tokio::time::timeout(Duration::from_secs(5), receiver.receive_frame())
                .await
                .unwrap()
                .unwrap()
        });

        // `fence` blocks, so drive the sender off the runtime threads.
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let sent = data.clone();
        let bytes_sent = tokio::task::spawn_blocking(move || {
            let mut sender = UdpSender::new(config, handle).unwrap();
            let h = sender.create("Cam1").unwrap();
            sender.send(&h, VideoFrame::new(Bytes::from(sent), 50, 25, PixelFormat::Rgba));
            sender.fence(&h);
            sender.destroy(h);
            assert_eq!(sender.frames_sent(), 1);
            sender.bytes_sent()
        })
        .await
        .unwrap();
        assert!(bytes_sent > 0);

        let frame = recv.await.unwrap();
        assert_eq!(frame.name, "Cam1");
        assert_eq!((frame.width, frame.height), (50, 25));
        assert_eq!(frame.format, PixelFormat::Rgba);
        assert_eq!(frame.line_stride, 200);
        assert_eq!(frame.frame_rate, (60, 1));
        assert_eq!(&frame.data[..], data.as_slice());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn udp_send_receive_raw() {
        send_over_localhost(None).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn udp_send_receive_zstd() {
        send_over_localhost(Some(3)).await;
    }

    #[tokio::test]
    async fn new_header_restarts_collection() {
        // Four payload bytes per chunk.
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut receiver = FrameReceiver::new(socket, ChunkHeader::SIZE + 4);
        let to = receiver.local_addr().unwrap();
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // Frame 1 announces two chunks but only one arrives.
        let mut first = header("A");
        first.sequence = 1;
        first.flags = 0;
        first.total_chunks = 2;
        first.payload_len = 8;
        sock.send_to(&first.encode(), to).await.unwrap();
        let mut pkt = BytesMut::new();
        ChunkHeader {
            sequence: 1,
            chunk_index: 0,
            chunk_size: 4,
        }
        .encode_into(&mut pkt);
        pkt.put_slice(&[9; 4]);
        sock.send_to(&pkt, to).await.unwrap();

        // Frame 2 is complete.
        let mut second = first.clone();
        second.sequence = 2;
        second.frame_number = 101;
        second.total_chunks = 1;
        second.payload_len = 4;
        sock.send_to(&second.encode(), to).await.unwrap();
        pkt.clear();
        ChunkHeader {
            sequence: 2,
            chunk_index: 0,
            chunk_size: 4,
        }
        .encode_into(&mut pkt);
        pkt.put_slice(&[7; 4]);
        sock.send_to(&pkt, to).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), receiver.receive_frame())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.frame_number, 101);
        assert_eq!(&frame.data[..], &[7u8; 4]);
    }
    #[tokio::test]
    async fn chunk_count_must_fit_payload() {
        let receiver = FrameReceiver::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let chunk_max = DEFAULT_MTU - ChunkHeader::SIZE;

        let mut h = header("A");
        h.flags = 0;
        h.payload_len = (chunk_max * 2 + 1) as u32;
        h.total_chunks = 3;
        assert_ok!(receiver.check_header(&h));

        h.total_chunks = u32::MAX;
        assert!(matches!(receiver.check_header(&h), Err(FrameError::Malformed(_))));
        h.total_chunks = 2;
        assert_err!(receiver.check_header(&h));

        h.flags = FLAG_ZSTD;
        h.total_chunks = 1;
        assert_ok!(receiver.check_header(&h));
        h.total_chunks = 0;
        assert_err!(receiver.check_header(&h));
        h.total_chunks = u32::MAX;
        assert_err!(receiver.check_header(&h));

        h.payload_len = u32::MAX;
        h.total_chunks = 1;
        assert_err!(receiver.check_header(&h));
    }

    #[tokio::test]
    async fn oversized_chunk_count_is_skipped() {
        let mut receiver = FrameReceiver::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let to = receiver.local_addr().unwrap();
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut bogus = header("A");
        bogus.sequence = 1;
        bogus.flags = 0;
        bogus.payload_len = 4;
        bogus.total_chunks = u32::MAX;
        sock.send_to(&bogus.encode(), to).await.unwrap();

        let mut good = bogus.clone();
        good.sequence = 2;
        good.frame_number = 7;
        good.total_chunks = 1;
        sock.send_to(&good.encode(), to).await.unwrap();
        let mut pkt = BytesMut::new();
        ChunkHeader {
            sequence: 2,
            chunk_index: 0,
            chunk_size: 4,
        }
        .encode_into(&mut pkt);
        pkt.put_slice(&[5; 4]);
        sock.send_to(&pkt, to).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), receiver.receive_frame())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.frame_number, 7);
        assert_eq!(&frame.data[..], &[5u8; 4]);
    }
}
