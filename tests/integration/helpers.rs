//! In-process fakes for integration tests

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// How the fake server answers
#[derive(Debug, Clone)]
pub enum RedisBehavior {
    /// Answers like a real server reporting `version`
    Healthy { version: String },
    /// Answers every `PING` with `-{message}`
    PingError(String),
    /// Answers every `PING` with these raw bytes, anything else with `+OK`
    PingReply(String),
    /// Closes each connection without reading from it
    CloseOnConnect,
    /// Accepts connections and never replies
    Silent,
}

#[derive(Debug, Default)]
struct Store {
    values: BTreeMap<String, (String, Option<u64>)>,
}

/// Scripted RESP server on `127.0.0.1:0`, stopped on drop
pub struct FakeRedis {
    pub port: u16,
    store: Arc<Mutex<Store>>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeRedis {
    pub async fn start(behavior: RedisBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let store = Arc::new(Mutex::new(Store::default()));

        let task = {
            let store = store.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, behavior.clone(), store.clone()));
                }
            })
        };

        Self { port, store, task }
    }

    pub async fn healthy(version: &str) -> Self {
        Self::start(RedisBehavior::Healthy {
            version: version.to_string(),
        })
        .await
    }

    pub fn insert(&self, key: &str, value: &str, ttl: Option<u64>) {
        self.store
            .lock()
            .unwrap()
            .values
            .insert(key.to_string(), (value.to_string(), ttl));
    }
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A port nothing listens on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// A port that accepts connections but speaks no protocol
pub async fn open_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn serve(stream: TcpStream, behavior: RedisBehavior, store: Arc<Mutex<Store>>) {
    if let RedisBehavior::CloseOnConnect = behavior {
        return;
    }

    let mut stream = BufReader::new(stream);

    while let Some(args) = read_command(&mut stream).await {
        let reply = match &behavior {
            RedisBehavior::Silent => continue,
            RedisBehavior::PingError(message) if args[0] == "PING" => format!("-{message}\r\n"),
            RedisBehavior::PingReply(raw) if args[0] == "PING" => raw.clone(),
            RedisBehavior::PingError(_) | RedisBehavior::PingReply(_) => "+OK\r\n".to_string(),
            RedisBehavior::CloseOnConnect => return,
            RedisBehavior::Healthy { version } => respond(&args, version, &store),
        };

        if stream.get_mut().write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

async fn read_command(stream: &mut BufReader<TcpStream>) -> Option<Vec<String>> {
    let mut line = String::new();
    if stream.read_line(&mut line).await.ok()? == 0 {
        return None;
    }

    let count: usize = line.trim().strip_prefix('*')?.parse().ok()?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        stream.read_line(&mut line).await.ok()?;
        let len: usize = line.trim().strip_prefix('$')?.parse().ok()?;

        let mut buf = vec![0; len + 2];
        stream.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        args.push(String::from_utf8(buf).ok()?);
    }

    (!args.is_empty()).then_some(args)
}

fn bulk(value: &str) -> String {
    format!("${}\r\n{value}\r\n", value.len())
}

fn respond(args: &[String], version: &str, store: &Mutex<Store>) -> String {
    let mut store = store.lock().unwrap();
    let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or_default();

    match args[0].to_ascii_uppercase().as_str() {
        "PING" => "+PONG\r\n".to_string(),
        "AUTH" | "SELECT" => "+OK\r\n".to_string(),
        "INFO" if arg(1) == "keyspace" => bulk(&format!(
            "# Keyspace\r\ndb0:keys={},expires=0,avg_ttl=0\r\n",
            store.values.len()
        )),
        "INFO" => bulk(&format!(
            "# Server\r\nredis_version:{version}\r\nuptime_in_seconds:42\r\n"
        )),
        "SCAN" => {
            let pattern = args
                .iter()
                .position(|a| a == "MATCH")
                .and_then(|i| args.get(i + 1))
                .map(|p| p.trim_end_matches('*').to_string())
                .unwrap_or_default();
            let keys: Vec<_> = store
                .values
                .keys()
                .filter(|key| key.starts_with(&pattern))
                .map(|key| bulk(key))
                .collect();
            format!("*2\r\n{}*{}\r\n{}", bulk("0"), keys.len(), keys.concat())
        }
        "GET" => match store.values.get(arg(1)) {
            Some((value, _)) => bulk(value),
            None => "$-1\r\n".to_string(),
        },
        "SET" => {
            store
                .values
                .insert(arg(1).to_string(), (arg(2).to_string(), None));
            "+OK\r\n".to_string()
        }
        "SETEX" => {
            let ttl = arg(2).parse().ok();
            store
                .values
                .insert(arg(1).to_string(), (arg(3).to_string(), ttl));
            "+OK\r\n".to_string()
        }
        "DEL" => format!(":{}\r\n", store.values.remove(arg(1)).map_or(0, |_| 1)),
        "TYPE" => match store.values.contains_key(arg(1)) {
            true => "+string\r\n".to_string(),
            false => "+none\r\n".to_string(),
        },
        "TTL" => match store.values.get(arg(1)) {
            Some((_, Some(ttl))) => format!(":{ttl}\r\n"),
            Some((_, None)) => ":-1\r\n".to_string(),
            None => ":-2\r\n".to_string(),
        },
        other => format!("-ERR unknown command '{other}'\r\n"),
    }
}
