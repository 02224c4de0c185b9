//! Offline transport and reply sink used by the engine tests.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use zphh_contracts::config::PluginConfig;
use zphh_contracts::events::EventWriter;
use zphh_contracts::message::{Reply, ReplyChannel, ReplyTarget};

use crate::client::ChatGlmClient;
use crate::credentials::CredentialManager;
use crate::gateway::Gateway;
use crate::transport::{
    HttpTransport, Method, OutboundRequest, TransportError, TransportResponse,
};

#[derive(Clone, Debug)]
pub(crate) enum Scripted {
    Reply { status: u16, body: Vec<u8> },
    Fail,
}

impl Scripted {
    pub(crate) fn json(status: u16, value: Value) -> Self {
        Self::Reply {
            status,
            body: value.to_string().into_bytes(),
        }
    }

    pub(crate) fn ok(value: Value) -> Self {
        Self::json(200, value)
    }

    pub(crate) fn raw(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::Reply {
            status,
            body: body.into(),
        }
    }
}

struct Route {
    method: Method,
    path_suffix: String,
    responses: VecDeque<Scripted>,
}

/// Answers requests from per-route queues. The last queued response of a
/// route repeats once the others are used up; unknown routes fail as a
/// connection error.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    log: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn on(&self, method: Method, path_suffix: &str, responses: Vec<Scripted>) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.push(Route {
                method,
                path_suffix: path_suffix.to_string(),
                responses: responses.into(),
            });
        }
    }

    pub(crate) fn requests(&self) -> Vec<OutboundRequest> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub(crate) fn count(&self, path_suffix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.url.ends_with(path_suffix))
            .count()
    }
}

impl HttpTransport for ScriptedTransport {
    fn execute(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        if let Ok(mut log) = self.log.lock() {
            log.push(request.clone());
        }
        let scripted = self.routes.lock().ok().and_then(|mut routes| {
            let route = routes.iter_mut().find(|route| {
                route.method == request.method && request.url.ends_with(&route.path_suffix)
            })?;
            if route.responses.len() > 1 {
                route.responses.pop_front()
            } else {
                route.responses.front().cloned()
            }
        });
        match scripted {
            Some(Scripted::Reply { status, body }) => {
                Ok(TransportResponse::new(status, Cursor::new(body)))
            }
            Some(Scripted::Fail) | None => Err(TransportError::Connect {
                url: request.url,
                message: "scripted failure".to_string(),
            }),
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingChannel {
    sent: Mutex<Vec<(Reply, ReplyTarget)>>,
}

impl RecordingChannel {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn replies(&self) -> Vec<Reply> {
        self.sent
            .lock()
            .map(|sent| sent.iter().map(|(reply, _)| reply.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn targets(&self) -> Vec<ReplyTarget> {
        self.sent
            .lock()
            .map(|sent| sent.iter().map(|(_, target)| target.clone()).collect())
            .unwrap_or_default()
    }
}

impl ReplyChannel for RecordingChannel {
    fn send(&self, reply: Reply, target: &ReplyTarget) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((reply, target.clone()));
        }
    }
}

pub(crate) fn client_for(transport: &Arc<ScriptedTransport>, config: &PluginConfig) -> ChatGlmClient {
    client_over(transport.clone(), config)
}

pub(crate) fn client_over(transport: Arc<dyn HttpTransport>, config: &PluginConfig) -> ChatGlmClient {
    let credentials = Arc::new(CredentialManager::new(
        Arc::clone(&transport),
        config,
        EventWriter::disabled("ZPHH"),
    ));
    ChatGlmClient::new(Gateway::new(transport, credentials, config), config)
}

/// One-shot HTTP/1.1 server on 127.0.0.1. It reads a single request, then
/// writes each chunk after its delay and closes the connection, which ends
/// a body sent without a length.
pub(crate) struct LoopbackServer {
    base: String,
    handle: thread::JoinHandle<io::Result<Vec<u8>>>,
}

impl LoopbackServer {
    pub(crate) fn serve_once(chunks: Vec<(Duration, Vec<u8>)>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base = format!("http://{}", listener.local_addr()?);
        let handle = thread::Builder::new()
            .name("zphh-test-loopback".to_string())
            .spawn(move || {
                let (mut stream, _) = listener.accept()?;
                let request = read_request(&stream)?;
                for (delay, chunk) in chunks {
                    thread::sleep(delay);
                    stream.write_all(&chunk)?;
                    stream.flush()?;
                }
                Ok(request)
            })?;
        Ok(Self { base, handle })
    }

    pub(crate) fn base(&self) -> &str {
        &self.base
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    /// Waits for the server thread and returns the raw request it received.
    pub(crate) fn finish(self) -> anyhow::Result<Vec<u8>> {
        let request = self
            .handle
            .join()
            .map_err(|_| anyhow::anyhow!("loopback server panicked"))??;
        Ok(request)
    }
}

pub(crate) fn response_head(status_line: &str, headers: &[(&str, &str)]) -> Vec<u8> {
    let mut head = format!("HTTP/1.1 {status_line}\r\nConnection: close\r\n");
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    head.into_bytes()
}

/// Reads a request head plus a `Content-Length` or chunked body.
fn read_request(stream: &TcpStream) -> io::Result<Vec<u8>> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut raw = Vec::new();
    let mut content_length = 0usize;
    let mut chunked = false;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(raw);
        }
        raw.extend_from_slice(line.as_bytes());
        let lower = line.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
        if lower.starts_with("transfer-encoding:") && lower.contains("chunked") {
            chunked = true;
        }
        if line == "\r\n" {
            break;
        }
    }
    if !chunked {
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body)?;
        raw.extend_from_slice(&body);
        return Ok(raw);
    }
    loop {
        let mut size_line = String::new();
        reader.read_line(&mut size_line)?;
        let size = usize::from_str_radix(size_line.trim(), 16).unwrap_or(0);
        let mut chunk = vec![0; size + 2];
        reader.read_exact(&mut chunk)?;
        if size == 0 {
            return Ok(raw);
        }
        raw.extend_from_slice(&chunk[..size]);
    }
}

/// Header lookup on a raw request; names compare case-insensitively.
pub(crate) fn raw_header(request: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(request);
    let head = text.split("\r\n\r\n").next()?;
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

pub(crate) fn raw_body(request: &[u8]) -> Vec<u8> {
    request
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| request[idx + 4..].to_vec())
        .unwrap_or_default()
}

/// Config with every wait set to zero so tests never sleep.
pub(crate) fn fast_config() -> PluginConfig {
    PluginConfig {
        refresh_token: Some("rt-1".to_string()),
        access_token: Some("at-1".to_string()),
        api_base: "http://provider.test/chatglm".to_string(),
        poll_interval_secs: 0,
        retry_backoff_ms: 0,
        settle_delay_ms: 0,
        ..PluginConfig::default()
    }
}

/// A tiny valid PNG of the given size.
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::new(width, height);
    let mut out = Cursor::new(Vec::new());
    if image::DynamicImage::ImageRgb8(image)
        .write_to(&mut out, image::ImageFormat::Png)
        .is_err()
    {
        return Vec::new();
    }
    out.into_inner()
}
