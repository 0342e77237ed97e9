//! Minimal Redis client speaking RESP over a tokio `TcpStream`
//!
//! Only what health checks and key inspection need: every command is sent as
//! an array of bulk strings and every reply is bounded by the client timeout.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, trace};

/// A decoded RESP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<String>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Turn `-ERR ...` replies into errors carrying the raw message
    fn into_result(self) -> Result<RespValue> {
        match self {
            RespValue::Error(message) => Err(anyhow!(message)),
            other => Ok(other),
        }
    }

    fn into_text(self) -> Result<Option<String>> {
        match self.into_result()? {
            RespValue::Simple(text) => Ok(Some(text)),
            RespValue::Bulk(text) => Ok(text),
            other => bail!("expected a string reply, got {other:?}"),
        }
    }

    fn into_integer(self) -> Result<i64> {
        match self.into_result()? {
            RespValue::Integer(value) => Ok(value),
            other => bail!("expected an integer reply, got {other:?}"),
        }
    }
}

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyTtl {
    Expires(Duration),
    NoExpiry,
    NotFound,
}

impl KeyTtl {
    /// Map the `TTL` command's integer reply
    pub fn from_reply(reply: i64) -> Self {
        match reply {
            -2 => KeyTtl::NotFound,
            n if n < 0 => KeyTtl::NoExpiry,
            n => KeyTtl::Expires(Duration::from_secs(n as u64)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisOptions {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u32,
    pub timeout: Duration,
}

impl RedisOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
            db: 0,
            timeout: Duration::from_secs(5),
        }
    }
}

pub struct RedisClient {
    stream: BufReader<TcpStream>,
    timeout: Duration,
}

impl RedisClient {
    /// Connect, authenticate and select the database
    #[instrument(skip(options), fields(host = %options.host, port = options.port))]
    pub async fn connect(options: &RedisOptions) -> Result<Self> {
        let stream = timeout(
            options.timeout,
            TcpStream::connect((options.host.as_str(), options.port)),
        )
        .await
        .context("connection timed out")?
        .context("failed to connect")?;

        let mut client = Self {
            stream: BufReader::new(stream),
            timeout: options.timeout,
        };

        if let Some(password) = &options.password {
            client.command(&["AUTH", password.as_str()]).await?.into_result()?;
        }

        if options.db != 0 {
            client
                .command(&["SELECT", options.db.to_string().as_str()])
                .await?
                .into_result()?;
        }

        debug!("connected to redis");
        Ok(client)
    }

    /// Send one command and read its reply
    pub async fn command(&mut self, args: &[&str]) -> Result<RespValue> {
        let request = encode_command(args);
        trace!("sending {}", args.first().copied().unwrap_or_default());

        timeout(self.timeout, self.exchange(&request))
            .await
            .with_context(|| format!("{} timed out", args.first().copied().unwrap_or("command")))?
    }

    async fn exchange(&mut self, request: &[u8]) -> Result<RespValue> {
        self.stream
            .get_mut()
            .write_all(request)
            .await
            .context("failed to send command")?;
        read_value(&mut self.stream).await
    }

    /// `true` when the server answers `PONG`
    pub async fn ping(&mut self) -> Result<bool> {
        let reply = self.command(&["PING"]).await?.into_text()?;
        Ok(reply.as_deref() == Some("PONG"))
    }

    /// `INFO [section]` as an ordered key/value map
    pub async fn info(&mut self, section: Option<&str>) -> Result<BTreeMap<String, String>> {
        let reply = match section {
            Some(section) => self.command(&["INFO", section]).await?,
            None => self.command(&["INFO"]).await?,
        };

        Ok(parse_info(&reply.into_text()?.unwrap_or_default()))
    }

    pub async fn server_version(&mut self) -> Result<String> {
        let info = self.info(Some("server")).await?;
        Ok(info
            .get("redis_version")
            .cloned()
            .unwrap_or_else(|| String::from("unknown")))
    }

    /// Key count of database `db`, from the `keyspace` section
    pub async fn total_keys(&mut self, db: u32) -> Result<u64> {
        let info = self.info(Some("keyspace")).await?;
        Ok(info
            .get(&format!("db{db}"))
            .and_then(|entry| keyspace_keys(entry))
            .unwrap_or(0))
    }

    /// Keys matching `pattern`, iterated with `SCAN` until `limit` is reached
    pub async fn keys(&mut self, pattern: &str, limit: usize) -> Result<Vec<String>> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let count = limit.to_string();
        let mut cursor = String::from("0");
        let mut keys = vec![];

        loop {
            let reply = self
                .command(&["SCAN", cursor.as_str(), "MATCH", pattern, "COUNT", count.as_str()])
                .await?
                .into_result()?;

            let mut parts = match reply {
                RespValue::Array(Some(parts)) => parts,
                other => bail!("unexpected SCAN reply: {other:?}"),
            };
            if parts.len() != 2 {
                bail!("unexpected SCAN reply with {} parts", parts.len());
            }

            let batch = parts.pop();
            cursor = parts
                .pop()
                .map(RespValue::into_text)
                .transpose()?
                .flatten()
                .unwrap_or_else(|| String::from("0"));

            if let Some(RespValue::Array(Some(batch))) = batch {
                for key in batch {
                    if let Some(key) = key.into_text()? {
                        keys.push(key);
                    }
                    if keys.len() >= limit {
                        return Ok(keys);
                    }
                }
            }

            if cursor == "0" {
                return Ok(keys);
            }
        }
    }

    pub async fn key_type(&mut self, key: &str) -> Result<String> {
        Ok(self
            .command(&["TYPE", key])
            .await?
            .into_text()?
            .unwrap_or_else(|| String::from("none")))
    }

    pub async fn ttl(&mut self, key: &str) -> Result<KeyTtl> {
        let reply = self.command(&["TTL", key]).await?.into_integer()?;
        Ok(KeyTtl::from_reply(reply))
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<String>> {
        self.command(&["GET", key]).await?.into_text()
    }

    /// `SET`, or `SETEX` when a ttl is given
    pub async fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let reply = match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1).to_string();
                self.command(&["SETEX", key, secs.as_str(), value]).await?
            }
            None => self.command(&["SET", key, value]).await?,
        };
        reply.into_result()?;
        Ok(())
    }

    /// `true` if the key existed
    pub async fn delete(&mut self, key: &str) -> Result<bool> {
        Ok(self.command(&["DEL", key]).await?.into_integer()? > 0)
    }
}

pub(crate) fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Longest accepted type/length line, CRLF included
const MAX_LINE_LEN: u64 = 64 * 1024;

/// Largest bulk string Redis itself accepts (`proto-max-bulk-len`)
const MAX_BULK_LEN: u64 = 512 * 1024 * 1024;

const MAX_ARRAY_LEN: u64 = 1024 * 1024;

/// Read one RESP value; arrays recurse, hence the boxed future.
///
/// Lengths announced by the server are checked against fixed limits and
/// nothing is allocated ahead of the bytes actually received.
pub(crate) fn read_value<'a, R>(reader: &'a mut R) -> BoxFuture<'a, Result<RespValue>>
where
    R: AsyncBufRead + Unpin + Send,
{
    async move {
        let mut line = String::new();
        let read = (&mut *reader)
            .take(MAX_LINE_LEN)
            .read_line(&mut line)
            .await?;
        if read == 0 {
            bail!("connection closed by server");
        }
        if !line.ends_with('\n') {
            bail!("reply line exceeds {MAX_LINE_LEN} bytes or is truncated");
        }

        let line = line.trim_end_matches(['\r', '\n']);
        let Some(kind) = line.chars().next() else {
            bail!("empty reply line");
        };
        let rest = &line[kind.len_utf8()..];

        match kind {
            '+' => Ok(RespValue::Simple(rest.to_string())),
            '-' => Ok(RespValue::Error(rest.to_string())),
            ':' => Ok(RespValue::Integer(
                rest.parse().context("invalid integer reply")?,
            )),
            '$' => {
                let Some(len) = announced_len(rest, MAX_BULK_LEN, "bulk")? else {
                    return Ok(RespValue::Bulk(None));
                };

                let mut buf = vec![];
                (&mut *reader).take(len + 2).read_to_end(&mut buf).await?;
                if (buf.len() as u64) < len + 2 {
                    bail!("connection closed inside a bulk reply");
                }

                buf.truncate(buf.len() - 2);
                Ok(RespValue::Bulk(Some(String::from_utf8_lossy(&buf).into_owned())))
            }
            '*' => {
                let Some(len) = announced_len(rest, MAX_ARRAY_LEN, "array")? else {
                    return Ok(RespValue::Array(None));
                };

                let mut items = vec![];
                for _ in 0..len {
                    items.push(read_value(reader).await?);
                }
                Ok(RespValue::Array(Some(items)))
            }
            other => bail!("unsupported reply type '{other}'"),
        }
    }
    .boxed()
}

/// `None` for the RESP null (`-1`), an error above `max`
fn announced_len(raw: &str, max: u64, kind: &str) -> Result<Option<u64>> {
    let len: i64 = raw
        .parse()
        .with_context(|| format!("invalid {kind} length"))?;
    if len < 0 {
        return Ok(None);
    }

    let len = len as u64;
    if len > max {
        bail!("{kind} length {len} exceeds the limit of {max}");
    }
    Ok(Some(len))
}

/// `key:value` lines; `#` section headers and blanks are skipped
pub(crate) fn parse_info(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// `keys=3,expires=0,avg_ttl=0` -> 3
fn keyspace_keys(entry: &str) -> Option<u64> {
    entry
        .split(',')
        .filter_map(|part| part.split_once('='))
        .find(|(name, _)| *name == "keys")
        .and_then(|(_, value)| value.parse().ok())
}
