//! Forwarding-daemon wire protocol: fixed-size framed messages over a
//! message-queue primitive.
//!
//! The queue primitive may drop or reorder undelivered frames across
//! restarts, so every logical message starts with a 4-byte ordinal sentinel
//! the receiver re-syncs on, followed by a 4-byte big-endian payload length.
//! Payloads are split across fixed-size frames.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use log::{debug, warn};
use serde_derive::{Deserialize, Serialize};

use crate::config::RangeConfig;
use crate::error::{CResult, Error};

/// Frame buffer size. Must be a power of two.
pub const FRAME_SIZE: usize = 16_384;

/// The sentinel opening every logical message.
const MSG_ORDINAL: u32 = 0xAAAA_AAAA;

/// Sentinel + length prefix.
const OVERHEAD: usize = 8;

const ACK_QUEUE_PREFIX: &str = "rangexx_ack";

/// A raw frame transport. Implementations deliver whole frames, possibly
/// dropping or reordering them across process restarts.
pub trait MessageQueue: Send + Sync {
    /// Sends one frame, returning false on timeout.
    fn send(&self, frame: &[u8], timeout_ms: u64) -> CResult<bool>;

    /// Receives one frame, returning None on timeout.
    fn receive(&self, timeout_ms: u64) -> CResult<Option<Vec<u8>>>;
}

/// A bounded in-process frame queue. This is the transport used in tests and
/// by embedders running client and daemon in one process; the out-of-process
/// daemon supplies its own POSIX-queue transport behind the same trait.
pub struct HeapQueue {
    frames: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
}

impl HeapQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }
}

impl MessageQueue for HeapQueue {
    fn send(&self, frame: &[u8], timeout_ms: u64) -> CResult<bool> {
        if frame.len() > FRAME_SIZE {
            return Err(Error::Mqueue(format!("frame exceeds {} bytes", FRAME_SIZE)));
        }
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut frames = self
            .frames
            .lock()
            .map_err(|e| Error::Mqueue(format!("queue lock poisoned: {}", e)))?;
        while frames.len() >= self.capacity {
            let timeout = deadline.saturating_duration_since(Instant::now());
            if timeout.is_zero() {
                return Ok(false);
            }
            let (guard, result) = self
                .not_full
                .wait_timeout(frames, timeout)
                .map_err(|e| Error::Mqueue(format!("queue lock poisoned: {}", e)))?;
            frames = guard;
            if result.timed_out() && frames.len() >= self.capacity {
                return Ok(false);
            }
        }
        frames.push_back(frame.to_vec());
        self.not_empty.notify_one();
        Ok(true)
    }

    fn receive(&self, timeout_ms: u64) -> CResult<Option<Vec<u8>>> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut frames = self
            .frames
            .lock()
            .map_err(|e| Error::Mqueue(format!("queue lock poisoned: {}", e)))?;
        while frames.is_empty() {
            let timeout = deadline.saturating_duration_since(Instant::now());
            if timeout.is_zero() {
                return Ok(None);
            }
            let (guard, result) = self
                .not_empty
                .wait_timeout(frames, timeout)
                .map_err(|e| Error::Mqueue(format!("queue lock poisoned: {}", e)))?;
            frames = guard;
            if result.timed_out() && frames.is_empty() {
                return Ok(None);
            }
        }
        let frame = frames.pop_front();
        self.not_full.notify_one();
        Ok(frame)
    }
}

/// Named in-process queues, shared between clients and the listener. Opening
/// a name creates the queue on first use.
#[derive(Clone, Default)]
pub struct MqRegistry {
    queues: Arc<Mutex<HashMap<String, Arc<HeapQueue>>>>,
}

impl MqRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, name: &str) -> Arc<HeapQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.entry(name.to_string()).or_insert_with(|| Arc::new(HeapQueue::new(512))).clone()
    }
}

/// Splits logical messages into sentinel-framed chunks and reassembles them.
pub struct FramedQueue {
    queue: Arc<dyn MessageQueue>,
    send_timeout_ms: u64,
    recv_timeout_ms: u64,
}

impl FramedQueue {
    pub fn new(queue: Arc<dyn MessageQueue>, send_timeout_ms: u64, recv_timeout_ms: u64) -> Self {
        Self { queue, send_timeout_ms, recv_timeout_ms }
    }

    /// Sends one logical message, splitting it across frames.
    pub fn send(&self, msg: &[u8]) -> CResult<()> {
        let mut first = BytesMut::with_capacity(OVERHEAD + msg.len().min(FRAME_SIZE - OVERHEAD));
        first.put_u32(MSG_ORDINAL);
        first.put_u32(msg.len() as u32);
        let head_len = msg.len().min(FRAME_SIZE - OVERHEAD);
        first.put_slice(&msg[..head_len]);
        if !self.queue.send(&first, self.send_timeout_ms)? {
            return Err(Error::Mqueue("send timed out".to_string()));
        }

        let mut sent = head_len;
        while sent < msg.len() {
            let chunk = &msg[sent..(sent + FRAME_SIZE).min(msg.len())];
            if !self.queue.send(chunk, self.send_timeout_ms)? {
                return Err(Error::Mqueue("send timed out mid-message".to_string()));
            }
            sent += chunk.len();
        }
        Ok(())
    }

    /// Receives one logical message, discarding frames until the ordinal
    /// sentinel is seen. Returns None when nothing arrives in time.
    pub fn receive(&self) -> CResult<Option<Vec<u8>>> {
        let (length, mut msg) = loop {
            let Some(frame) = self.queue.receive(self.recv_timeout_ms)? else {
                return Ok(None);
            };
            if frame.len() >= OVERHEAD && BigEndian::read_u32(&frame[..4]) == MSG_ORDINAL {
                let length = BigEndian::read_u32(&frame[4..8]) as usize;
                break (length, frame[OVERHEAD..].to_vec());
            }
            warn!("discarding {} garbage bytes while waiting for sentinel", frame.len());
        };

        while msg.len() < length {
            let Some(frame) = self.queue.receive(self.recv_timeout_ms)? else {
                return Err(Error::Mqueue("receive timed out mid-message".to_string()));
            };
            msg.extend_from_slice(&frame);
        }
        msg.truncate(length);
        Ok(Some(msg))
    }
}

/// A forwarded write request. The method names and argument arities match
/// the write API's dispatch table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub args: Vec<String>,
    pub proposer_id: u64,
    pub client_id: String,
}

/// The daemon's reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub status: bool,
    pub code: u32,
    pub reason: String,
}

/// Stable error codes carried in acks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ErrorCode {
    Unknown = 0,
    NodeNotFound = 1,
    EdgeNotFound = 2,
    KeyNotFound = 3,
    IncorrectNodeType = 4,
    NodeExists = 5,
    InvalidEnvironment = 6,
    GraphCycle = 7,
    InvalidRangeExpression = 8,
    IncorrectNumberOfArguments = 9,
}

impl Ack {
    pub fn success() -> Self {
        Ack { status: true, code: 0, reason: String::new() }
    }

    pub fn failure(err: &Error) -> Self {
        let code = match err {
            Error::NodeNotFound(_) => ErrorCode::NodeNotFound,
            Error::EdgeNotFound(_) => ErrorCode::EdgeNotFound,
            Error::KeyNotFound(_) => ErrorCode::KeyNotFound,
            Error::IncorrectNodeType(_) => ErrorCode::IncorrectNodeType,
            Error::NodeExists(_) => ErrorCode::NodeExists,
            Error::InvalidEnvironment(_) => ErrorCode::InvalidEnvironment,
            Error::GraphCycle(_) => ErrorCode::GraphCycle,
            Error::InvalidRangeExpression(_) => ErrorCode::InvalidRangeExpression,
            Error::IncorrectNumberOfArguments(_) => ErrorCode::IncorrectNumberOfArguments,
            _ => ErrorCode::Unknown,
        };
        Ack { status: false, code: code as u32, reason: err.to_string() }
    }

    /// Maps a failed ack back to the typed error the daemon hit.
    pub fn into_result(self) -> CResult<bool> {
        if self.status {
            return Ok(true);
        }
        let reason = self.reason;
        Err(match self.code {
            c if c == ErrorCode::NodeNotFound as u32 => Error::NodeNotFound(reason),
            c if c == ErrorCode::EdgeNotFound as u32 => Error::EdgeNotFound(reason),
            c if c == ErrorCode::KeyNotFound as u32 => Error::KeyNotFound(reason),
            c if c == ErrorCode::IncorrectNodeType as u32 => Error::IncorrectNodeType(reason),
            c if c == ErrorCode::NodeExists as u32 => Error::NodeExists(reason),
            c if c == ErrorCode::InvalidEnvironment as u32 => Error::InvalidEnvironment(reason),
            c if c == ErrorCode::GraphCycle as u32 => Error::GraphCycle(reason),
            c if c == ErrorCode::InvalidRangeExpression as u32 => {
                Error::InvalidRangeExpression(reason)
            }
            c if c == ErrorCode::IncorrectNumberOfArguments as u32 => {
                Error::IncorrectNumberOfArguments(reason)
            }
            _ => Error::Internal(reason),
        })
    }
}

static CLIENT_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_client_id() -> String {
    format!("{}_{}", std::process::id(), CLIENT_SEQ.fetch_add(1, Ordering::Relaxed))
}

/// The client side of the store-and-forward path.
pub struct RequestQueueClient {
    client_id: String,
    sending: FramedQueue,
    acks: FramedQueue,
}

impl RequestQueueClient {
    pub fn new(registry: &MqRegistry, config: &RangeConfig) -> Self {
        let client_id = next_client_id();
        let sending = FramedQueue::new(
            registry.open(&config.stored_mq_name),
            config.stored_request_timeout,
            config.stored_request_timeout,
        );
        let acks = FramedQueue::new(
            registry.open(&format!("{}_{}", ACK_QUEUE_PREFIX, client_id)),
            config.stored_request_timeout,
            config.reader_ack_timeout,
        );
        Self { client_id, sending, acks }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Forwards a request and waits for the daemon's ack.
    pub fn request(&self, method: &str, args: &[String], proposer_id: u64) -> CResult<Ack> {
        let request = Request {
            method: method.to_string(),
            args: args.to_vec(),
            proposer_id,
            client_id: self.client_id.clone(),
        };
        debug!("forwarding {} ({} args)", request.method, request.args.len());
        self.sending.send(&bincode::serialize(&request)?)?;
        match self.acks.receive()? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Err(Error::Mqueue(format!("timed out waiting for ack to {}", method))),
        }
    }
}

/// The daemon side: receives requests, replies on per-client ack queues.
pub struct RequestQueueListener {
    registry: MqRegistry,
    config: RangeConfig,
    receiving: FramedQueue,
    client_queues: Mutex<HashMap<String, FramedQueue>>,
}

impl RequestQueueListener {
    pub fn new(registry: &MqRegistry, config: &RangeConfig) -> Self {
        let receiving = FramedQueue::new(
            registry.open(&config.stored_mq_name),
            config.stored_request_timeout,
            config.stored_request_timeout,
        );
        Self {
            registry: registry.clone(),
            config: config.clone(),
            receiving,
            client_queues: Mutex::new(HashMap::new()),
        }
    }

    /// Receives the next request, or None when the queue stays empty for the
    /// configured timeout.
    pub fn receive(&self) -> CResult<Option<Request>> {
        match self.receiving.receive()? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn send_ack(&self, client_id: &str, ack: &Ack) -> CResult<()> {
        let mut queues =
            self.client_queues.lock().map_err(|e| Error::Mqueue(format!("lock poisoned: {}", e)))?;
        let queue = queues.entry(client_id.to_string()).or_insert_with(|| {
            FramedQueue::new(
                self.registry.open(&format!("{}_{}", ACK_QUEUE_PREFIX, client_id)),
                self.config.stored_request_timeout,
                self.config.reader_ack_timeout,
            )
        });
        queue.send(&bincode::serialize(ack)?)
    }
}
