//! Shared fixtures: a scripted in-process PostgreSQL backend and a counting provisioner.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pg_sandbox::{InstanceError, Opts, Provisioner};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What the fake backend answers for a given query.
#[derive(Debug, Clone)]
pub enum Reply {
    Rows {
        columns: Vec<&'static str>,
        rows: Vec<Vec<Option<&'static str>>>,
    },
    /// No result set (NoData, EmptyQueryResponse)
    Empty,
    /// ErrorResponse to Parse
    ParseError { code: &'static str, message: &'static str },
    /// Rows are sent, then an ErrorResponse
    ExecuteError {
        columns: Vec<&'static str>,
        rows: Vec<Vec<Option<&'static str>>>,
        code: &'static str,
    },
    /// Statement declaring parameters
    Params(usize),
    /// RowDescription whose single field is cut short
    MalformedColumns,
}

/// Replies used throughout the tests.
pub fn reply_for(sql: &str) -> Reply {
    match sql.trim() {
        "SELECT 1" => Reply::Rows {
            columns: vec!["?column?"],
            rows: vec![vec![Some("1")]],
        },
        "SELECT * FROM testdb" => Reply::Rows {
            columns: vec!["id", "name"],
            rows: vec![vec![Some("1"), Some("alice")], vec![Some("2"), None]],
        },
        "SELECT * FROM empty" => Reply::Rows {
            columns: vec!["id", "name"],
            rows: vec![],
        },
        "" => Reply::Empty,
        "SELECT 1/0" => Reply::ExecuteError {
            columns: vec!["?column?"],
            rows: vec![],
            code: "22012",
        },
        "SELECT slow_failure()" => Reply::ExecuteError {
            columns: vec!["n"],
            rows: vec![vec![Some("1")]],
            code: "XX000",
        },
        "SELECT $1" => Reply::Params(1),
        "SELECT broken_columns()" => Reply::MalformedColumns,
        _ => Reply::ParseError {
            code: "42601",
            message: "syntax error",
        },
    }
}

/// A minimal PostgreSQL server speaking trust authentication and the extended
/// query protocol, answering from [`reply_for`].
pub struct FakeBackend {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let _ = serve(socket).await;
                });
            }
        });

        Self { addr, connections }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn opts(&self) -> Opts {
        Opts {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            user: "dev".into(),
            database: Some("dev".into()),
            ..Opts::default()
        }
    }
}

fn message(type_byte: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![type_byte];
    out.extend_from_slice(&(payload.len() as i32 + 4).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

fn error_response(code: &str, message_text: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.push(b'S');
    cstr(&mut payload, "ERROR");
    payload.push(b'C');
    cstr(&mut payload, code);
    payload.push(b'M');
    cstr(&mut payload, message_text);
    payload.push(0);
    message(b'E', &payload)
}

fn row_description(columns: &[&str]) -> Vec<u8> {
    let mut payload = (columns.len() as u16).to_be_bytes().to_vec();
    for column in columns {
        cstr(&mut payload, column);
        payload.extend_from_slice(&0_u32.to_be_bytes());
        payload.extend_from_slice(&0_i16.to_be_bytes());
        payload.extend_from_slice(&25_u32.to_be_bytes());
        payload.extend_from_slice(&(-1_i16).to_be_bytes());
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_u16.to_be_bytes());
    }
    message(b'T', &payload)
}

fn data_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut payload = (values.len() as u16).to_be_bytes().to_vec();
    for value in values {
        match value {
            Some(v) => {
                payload.extend_from_slice(&(v.len() as i32).to_be_bytes());
                payload.extend_from_slice(v.as_bytes());
            }
            None => payload.extend_from_slice(&(-1_i32).to_be_bytes()),
        }
    }
    message(b'D', &payload)
}

fn ready() -> Vec<u8> {
    message(b'Z', b"I")
}

async fn serve(mut socket: TcpStream) -> std::io::Result<()> {
    // Startup packet: length, then protocol version and parameters.
    let len = socket.read_i32().await? as usize;
    let mut startup = vec![0u8; len - 4];
    socket.read_exact(&mut startup).await?;

    let mut out = message(b'R', &0_i32.to_be_bytes());
    out.extend(message(b'S', b"server_version\x0014.8\0"));
    out.extend(message(b'K', &[0, 0, 0, 42, 0, 0, 0, 7]));
    out.extend(ready());
    socket.write_all(&out).await?;

    let mut sql = String::new();
    let mut batch = Vec::new();
    loop {
        let type_byte = socket.read_u8().await?;
        let len = socket.read_i32().await? as usize;
        let mut payload = vec![0u8; len - 4];
        socket.read_exact(&mut payload).await?;

        match type_byte {
            b'X' => return Ok(()),
            b'P' => {
                // name\0 query\0 ...
                let mut parts = payload.split(|&b| b == 0);
                parts.next();
                sql = String::from_utf8_lossy(parts.next().unwrap_or_default()).into_owned();
                batch.push(type_byte);
            }
            b'S' => {
                let response = respond(&batch, &sql);
                batch.clear();
                socket.write_all(&response).await?;
            }
            other => batch.push(other),
        }
    }
}

fn respond(batch: &[u8], sql: &str) -> Vec<u8> {
    let reply = reply_for(sql);
    let mut out = Vec::new();

    if batch.contains(&b'P') {
        // Parse + Describe
        match &reply {
            Reply::ParseError { code, message } => out.extend(error_response(code, message)),
            Reply::Params(n) => {
                out.extend(message(b'1', b""));
                let mut desc = (*n as u16).to_be_bytes().to_vec();
                for _ in 0..*n {
                    desc.extend_from_slice(&25_u32.to_be_bytes());
                }
                out.extend(message(b't', &desc));
                out.extend(row_description(&["?column?"]));
            }
            Reply::Empty => {
                out.extend(message(b'1', b""));
                out.extend(message(b't', &[0, 0]));
                out.extend(message(b'n', b""));
            }
            Reply::MalformedColumns => {
                out.extend(message(b'1', b""));
                out.extend(message(b't', &[0, 0]));
                out.extend(message(b'T', b"\x00\x01col\x00\x00\x00"));
            }
            Reply::Rows { columns, .. } | Reply::ExecuteError { columns, .. } => {
                out.extend(message(b'1', b""));
                out.extend(message(b't', &[0, 0]));
                out.extend(row_description(columns));
            }
        }
    } else if batch.contains(&b'B') {
        // Bind + Execute
        out.extend(message(b'2', b""));
        match &reply {
            Reply::Rows { rows, .. } => {
                for row in rows {
                    out.extend(data_row(row));
                }
                let mut tag = Vec::new();
                cstr(&mut tag, &format!("SELECT {}", rows.len()));
                out.extend(message(b'C', &tag));
            }
            Reply::Empty | Reply::MalformedColumns => out.extend(message(b'I', b"")),
            Reply::ExecuteError { rows, code, .. } => {
                for row in rows {
                    out.extend(data_row(row));
                }
                out.extend(error_response(code, "execution failed"));
            }
            Reply::ParseError { code, message } => out.extend(error_response(code, message)),
            Reply::Params(_) => out.extend(error_response("08P01", "bind message supplies 0 parameters")),
        }
    }

    out.extend(ready());
    out
}

/// A provisioned fake instance.
#[derive(Debug)]
pub struct FakeInstance {
    pub id: usize,
}

#[derive(Default)]
struct Counters {
    fail: AtomicBool,
    next_id: AtomicUsize,
    resolved: Mutex<Vec<usize>>,
    terminated: Mutex<Vec<usize>>,
}

/// Provisioner handing out instances that all point at one endpoint.
///
/// Clones share their counters, so a test keeps one clone for inspection.
#[derive(Clone)]
pub struct FakeProvisioner {
    endpoint: Option<Opts>,
    delay: Duration,
    counters: Arc<Counters>,
}

impl FakeProvisioner {
    /// Instances resolving to `endpoint`; `None` makes endpoint lookup fail.
    pub fn new(endpoint: Option<Opts>) -> Self {
        Self {
            endpoint,
            delay: Duration::from_millis(5),
            counters: Arc::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(self) -> Self {
        self.set_failing(true);
        self
    }

    pub fn set_failing(&self, fail: bool) {
        self.counters.fail.store(fail, Ordering::SeqCst);
    }

    pub fn provisioned(&self) -> usize {
        self.counters.next_id.load(Ordering::SeqCst)
    }

    /// Instances whose endpoint was looked up, in lookup order.
    pub fn resolved(&self) -> Vec<usize> {
        self.counters.resolved.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Vec<usize> {
        self.counters.terminated.lock().unwrap().clone()
    }

    /// Panics if any instance was terminated twice.
    pub fn assert_terminated_once(&self) {
        let terminated = self.terminated();
        let unique: HashSet<_> = terminated.iter().collect();
        assert_eq!(unique.len(), terminated.len(), "double termination: {terminated:?}");
    }
}

impl Provisioner for FakeProvisioner {
    type Instance = FakeInstance;

    async fn provision(&self) -> Result<FakeInstance, InstanceError> {
        tokio::time::sleep(self.delay).await;
        if self.counters.fail.load(Ordering::SeqCst) {
            return Err(InstanceError::Other("image pull failed".into()));
        }
        let id = self.counters.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(FakeInstance { id })
    }

    async fn endpoint(&self, instance: &FakeInstance) -> Result<Opts, InstanceError> {
        self.counters.resolved.lock().unwrap().push(instance.id);
        self.endpoint
            .clone()
            .ok_or_else(|| InstanceError::Endpoint("no port mapping".into()))
    }

    async fn terminate(&self, instance: FakeInstance) -> Result<(), InstanceError> {
        self.counters.terminated.lock().unwrap().push(instance.id);
        Ok(())
    }
}

/// Poll `condition` until it holds, failing after `timeout`.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
