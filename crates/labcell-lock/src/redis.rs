//! Redis lock store client — RESP2 over TCP.
//!
//! A deliberately thin client: one connection guarded by a mutex,
//! reconnect on I/O failure, and only the handful of commands the lock
//! manager needs. The conditional operations map onto server-side
//! atomic primitives:
//!
//! ```text
//! set_if_absent     → SET key value NX PX <ms>
//! delete_if_equals  → EVAL compare-and-delete script (one round trip,
//!                     executed atomically by the server)
//! set_add           → SADD + PEXPIRE
//! scan_prefix       → SCAN cursor MATCH <prefix>* COUNT 100
//! time_to_live      → PTTL
//! ```

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{LockResult, LockStoreError};
use crate::store::{KeyTtl, LockStore};

/// Atomic check-then-delete, run server-side so a stale release can
/// never remove a lock another holder re-acquired in between.
const CHECK_AND_DELETE: &str =
    "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('del', KEYS[1]) else return 0 end";

// ── Wire protocol ───────────────────────────────────────────────────

/// A parsed RESP2 reply.
#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Simple(String),
    Error(String),
    Int(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<Reply>>),
}

impl Reply {
    fn into_string(self) -> LockResult<Option<String>> {
        match self {
            Reply::Bulk(None) => Ok(None),
            Reply::Bulk(Some(bytes)) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| LockStoreError::Protocol(format!("non-utf8 bulk string: {e}"))),
            other => Err(LockStoreError::Protocol(format!(
                "expected bulk string, got {other:?}"
            ))),
        }
    }

    fn into_int(self) -> LockResult<i64> {
        match self {
            Reply::Int(n) => Ok(n),
            other => Err(LockStoreError::Protocol(format!(
                "expected integer, got {other:?}"
            ))),
        }
    }
}

/// Encode a command as a RESP array of bulk strings.
fn encode_command(parts: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(format!("*{}\r\n", parts.len()).as_bytes());
    for part in parts {
        out.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        out.extend_from_slice(part.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Read one CRLF-terminated header line.
fn read_line(reader: &mut impl BufRead) -> LockResult<String> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .map_err(|e| LockStoreError::Io(format!("read: {e}")))?;
    if n == 0 {
        return Err(LockStoreError::Io("connection closed by server".to_string()));
    }
    let trimmed = line.trim_end_matches("\r\n");
    if trimmed.len() == line.len() {
        return Err(LockStoreError::Protocol("missing CRLF terminator".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Parse one RESP2 reply from the stream.
fn read_reply(reader: &mut impl BufRead) -> LockResult<Reply> {
    let line = read_line(reader)?;
    let (kind, rest) = line
        .split_at_checked(1)
        .ok_or_else(|| LockStoreError::Protocol("empty reply line".to_string()))?;

    match kind {
        "+" => Ok(Reply::Simple(rest.to_string())),
        "-" => Ok(Reply::Error(rest.to_string())),
        ":" => rest
            .parse::<i64>()
            .map(Reply::Int)
            .map_err(|e| LockStoreError::Protocol(format!("bad integer reply: {e}"))),
        "$" => {
            let len: i64 = rest
                .parse()
                .map_err(|e| LockStoreError::Protocol(format!("bad bulk length: {e}")))?;
            if len < 0 {
                return Ok(Reply::Bulk(None));
            }
            let mut buf = vec![0u8; len as usize + 2];
            reader
                .read_exact(&mut buf)
                .map_err(|e| LockStoreError::Io(format!("read bulk: {e}")))?;
            buf.truncate(len as usize);
            Ok(Reply::Bulk(Some(buf)))
        }
        "*" => {
            let len: i64 = rest
                .parse()
                .map_err(|e| LockStoreError::Protocol(format!("bad array length: {e}")))?;
            if len < 0 {
                return Ok(Reply::Array(None));
            }
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(read_reply(reader)?);
            }
            Ok(Reply::Array(Some(items)))
        }
        other => Err(LockStoreError::Protocol(format!(
            "unknown reply type marker {other:?}"
        ))),
    }
}

// ── Client ──────────────────────────────────────────────────────────

struct Conn {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

/// [`LockStore`] implementation speaking RESP2 to a Redis-compatible
/// server over plain TCP.
pub struct RedisLockStore {
    addr: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    conn: Mutex<Option<Conn>>,
}

impl RedisLockStore {
    /// Create a client for the given `host:port` address.
    ///
    /// No connection is made until the first command.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
            conn: Mutex::new(None),
        }
    }

    /// Override the connect/read timeouts.
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    fn connect(&self) -> LockResult<Conn> {
        let addr = self
            .addr
            .to_socket_addrs()
            .map_err(|e| LockStoreError::Connect(format!("resolve {}: {e}", self.addr)))?
            .next()
            .ok_or_else(|| {
                LockStoreError::Connect(format!("no addresses for {}", self.addr))
            })?;

        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| LockStoreError::Connect(format!("connect {}: {e}", self.addr)))?;
        stream
            .set_read_timeout(Some(self.read_timeout))
            .map_err(|e| LockStoreError::Connect(e.to_string()))?;
        stream
            .set_write_timeout(Some(self.read_timeout))
            .map_err(|e| LockStoreError::Connect(e.to_string()))?;

        let reader_stream = stream
            .try_clone()
            .map_err(|e| LockStoreError::Connect(e.to_string()))?;

        debug!(addr = %self.addr, "lock store connected");
        Ok(Conn {
            reader: BufReader::new(reader_stream),
            writer: stream,
        })
    }

    /// Send one command and read its reply, reconnecting once on a
    /// stale connection. Server `-ERR` replies become [`LockStoreError::Server`].
    fn command(&self, parts: &[&str]) -> LockResult<Reply> {
        let mut guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let conn = guard.as_mut().unwrap();

        let payload = encode_command(parts);
        let result = conn
            .writer
            .write_all(&payload)
            .map_err(|e| LockStoreError::Io(format!("write: {e}")))
            .and_then(|_| read_reply(&mut conn.reader));

        match result {
            Ok(Reply::Error(msg)) => Err(LockStoreError::Server(msg)),
            Ok(reply) => Ok(reply),
            Err(e) => {
                // Drop the connection so the next command reconnects.
                warn!(addr = %self.addr, error = %e, "lock store command failed");
                *guard = None;
                Err(e)
            }
        }
    }
}

impl LockStore for RedisLockStore {
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool> {
        let ms = ttl.as_millis().max(1).to_string();
        match self.command(&["SET", key, value, "NX", "PX", &ms])? {
            Reply::Simple(ok) if ok == "OK" => Ok(true),
            Reply::Bulk(None) => Ok(false),
            other => Err(LockStoreError::Protocol(format!(
                "unexpected SET reply {other:?}"
            ))),
        }
    }

    fn get(&self, key: &str) -> LockResult<Option<String>> {
        self.command(&["GET", key])?.into_string()
    }

    fn delete_if_equals(&self, key: &str, expected: &str) -> LockResult<bool> {
        let deleted = self
            .command(&["EVAL", CHECK_AND_DELETE, "1", key, expected])?
            .into_int()?;
        Ok(deleted > 0)
    }

    fn delete(&self, key: &str) -> LockResult<bool> {
        Ok(self.command(&["DEL", key])?.into_int()? > 0)
    }

    fn set_add(&self, key: &str, member: &str, ttl: Duration) -> LockResult<()> {
        self.command(&["SADD", key, member])?.into_int()?;
        let ms = ttl.as_millis().max(1).to_string();
        self.command(&["PEXPIRE", key, &ms])?.into_int()?;
        Ok(())
    }

    fn set_remove(&self, key: &str, member: &str) -> LockResult<()> {
        self.command(&["SREM", key, member])?.into_int()?;
        Ok(())
    }

    fn set_members(&self, key: &str) -> LockResult<Vec<String>> {
        match self.command(&["SMEMBERS", key])? {
            Reply::Array(Some(items)) => {
                let mut members = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(s) = item.into_string()? {
                        members.push(s);
                    }
                }
                members.sort();
                Ok(members)
            }
            Reply::Array(None) => Ok(Vec::new()),
            other => Err(LockStoreError::Protocol(format!(
                "unexpected SMEMBERS reply {other:?}"
            ))),
        }
    }

    fn scan_prefix(&self, prefix: &str) -> LockResult<Vec<String>> {
        let pattern = format!("{prefix}*");
        let mut cursor = "0".to_string();
        let mut keys = Vec::new();

        loop {
            let reply =
                self.command(&["SCAN", &cursor, "MATCH", &pattern, "COUNT", "100"])?;
            let Reply::Array(Some(mut parts)) = reply else {
                return Err(LockStoreError::Protocol("unexpected SCAN reply".to_string()));
            };
            if parts.len() != 2 {
                return Err(LockStoreError::Protocol(format!(
                    "SCAN reply had {} elements",
                    parts.len()
                )));
            }
            let batch = parts.pop().unwrap();
            cursor = parts
                .pop()
                .unwrap()
                .into_string()?
                .ok_or_else(|| LockStoreError::Protocol("null SCAN cursor".to_string()))?;

            if let Reply::Array(Some(items)) = batch {
                for item in items {
                    if let Some(key) = item.into_string()? {
                        keys.push(key);
                    }
                }
            }

            if cursor == "0" {
                break;
            }
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn time_to_live(&self, key: &str) -> LockResult<KeyTtl> {
        match self.command(&["PTTL", key])?.into_int()? {
            -2 => Ok(KeyTtl::Missing),
            -1 => Ok(KeyTtl::NoExpiry),
            ms if ms >= 0 => Ok(KeyTtl::Expires(Duration::from_millis(ms as u64))),
            other => Err(LockStoreError::Protocol(format!(
                "unexpected PTTL value {other}"
            ))),
        }
    }
}
