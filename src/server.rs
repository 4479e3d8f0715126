//! HTTP Server for message ingestion
//! Simple HTTP/1.1 handling on tokio, one request per connection

use crate::ingestion::{IngestRequest, IngestResponse, IngestionOrchestrator};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Largest accepted header section
const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct ServerSettings {
    pub read_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            max_body_bytes: 1_048_576,
        }
    }
}

/// Server state shared by all connections
pub struct AppState {
    pub orchestrator: IngestionOrchestrator,
    pub settings: ServerSettings,
}

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Request too large: {0}")]
    TooLarge(String),

    #[error("Length required: {0}")]
    LengthRequired(String),
}

#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    /// Lower-cased header names
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

impl HttpResponse {
    pub fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_string(body) {
            Ok(body) => Self { status, body },
            Err(e) => Self::error(500, &format!("Failed to encode response: {}", e)),
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        let body = IngestResponse::Error {
            message: message.to_string(),
        };
        Self {
            status,
            body: serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string()),
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let content_type = if self.body.is_empty() {
            String::new()
        } else {
            "Content-Type: application/json\r\n".to_string()
        };
        format!(
            "HTTP/1.1 {} {}\r\n\
             {}\
             Access-Control-Allow-Origin: *\r\n\
             Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
             Access-Control-Allow-Headers: Content-Type\r\n\
             Connection: close\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {}",
            self.status,
            status_text(self.status),
            content_type,
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Accept loop; every connection runs on its own task
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        debug!("New connection from: {}", addr);
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                error!("Error handling connection from {}: {}", addr, e);
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<AppState>) -> std::io::Result<()> {
    let started = Instant::now();
    let read_result = timeout(
        state.settings.read_timeout,
        read_request(&mut stream, state.settings.max_body_bytes),
    )
    .await;

    let (response, method, path) = match read_result {
        Err(_) => {
            warn!("Request read timeout");
            (HttpResponse::error(408, "Request timeout"), String::new(), String::new())
        }
        Ok(Err(ReadError::Io(e))) => return Err(e),
        Ok(Err(ReadError::TooLarge(msg))) => {
            (HttpResponse::error(413, &msg), String::new(), String::new())
        }
        Ok(Err(ReadError::LengthRequired(msg))) => {
            (HttpResponse::error(411, &msg), String::new(), String::new())
        }
        Ok(Err(ReadError::Malformed(msg))) => {
            (HttpResponse::error(400, &msg), String::new(), String::new())
        }
        Ok(Ok(None)) => return Ok(()),
        Ok(Ok(Some(request))) => {
            let response = handle_request(&request, &state.orchestrator).await;
            (response, request.method, request.path)
        }
    };

    info!(
        method = %method,
        path = %path,
        status = response.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request handled"
    );

    stream.write_all(&response.to_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one request: headers, then `Content-Length` bytes of body.
/// Returns `None` when the peer closes before sending anything.
pub async fn read_request<R>(stream: &mut R, max_body_bytes: usize) -> Result<Option<HttpRequest>, ReadError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut temp_buf = [0u8; 8192];

    let header_end = loop {
        if let Some(pos) = find_header_end(&buffer) {
            break pos;
        }
        if buffer.len() > MAX_HEADER_BYTES {
            return Err(ReadError::TooLarge("header section exceeds limit".to_string()));
        }
        let n = stream.read(&mut temp_buf).await?;
        if n == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(ReadError::Malformed("connection closed mid-headers".to_string()));
        }
        buffer.extend_from_slice(&temp_buf[..n]);
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(ReadError::Malformed("invalid request line".to_string()));
    }

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    // Only Content-Length framed bodies are read
    if let Some(encoding) = headers.get("transfer-encoding") {
        if !encoding.eq_ignore_ascii_case("identity") {
            return Err(ReadError::LengthRequired(format!(
                "Transfer-Encoding '{}' is not supported; send the body with Content-Length",
                encoding
            )));
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| ReadError::Malformed(format!("invalid Content-Length: {}", value)))?,
        None => 0,
    };
    if content_length > max_body_bytes {
        return Err(ReadError::TooLarge(format!(
            "body of {} bytes exceeds limit of {}",
            content_length, max_body_bytes
        )));
    }

    let body_start = header_end + 4;
    while buffer.len() < body_start + content_length {
        let n = stream.read(&mut temp_buf).await?;
        if n == 0 {
            return Err(ReadError::Malformed("connection closed mid-body".to_string()));
        }
        buffer.extend_from_slice(&temp_buf[..n]);
    }

    Ok(Some(HttpRequest {
        method: parts[0].to_string(),
        path: normalize_path(parts[1]),
        headers,
        body: buffer[body_start..body_start + content_length].to_vec(),
    }))
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Drop the query string and any trailing slash
fn normalize_path(raw: &str) -> String {
    let path = raw.split('?').next().unwrap_or_default();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Route one request
pub async fn handle_request(request: &HttpRequest, orchestrator: &IngestionOrchestrator) -> HttpResponse {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => HttpResponse::json(
            200,
            &HealthResponse {
                status: "ok".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        ),
        ("POST", "/ingest") => handle_ingest(&request.body, orchestrator).await,
        ("OPTIONS", _) => HttpResponse::empty(200),
        (method, path) => HttpResponse::error(404, &format!("Not found: {} {}", method, path)),
    }
}

async fn handle_ingest(body: &[u8], orchestrator: &IngestionOrchestrator) -> HttpResponse {
    let request: IngestRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return HttpResponse::error(400, &format!("Invalid JSON body: {}", e)),
    };

    let result = orchestrator.ingest(request).await;
    let status = match &result {
        Ok(_) => 200,
        Err(e) => e.status_code(),
    };
    HttpResponse::json(status, &IngestResponse::from(&result))
}
