use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;

use super::MAX_REQUEST_SIZE;

pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Parse one HTTP/1.1 request off `stream`: request line, headers (used
/// only for `Content-Length`), then body.
pub async fn read_request(reader: &mut BufReader<&mut TcpStream>) -> Result<HttpRequest> {
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.context("failed to read request line")?;
    if request_line.is_empty() {
        return Err(eyre::eyre!("connection closed before request line"));
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().context("missing HTTP method")?.to_string();
    let path = parts.next().context("missing HTTP path")?.to_string();

    let mut content_length = 0usize;
    loop {
        let mut header_line = String::new();
        reader.read_line(&mut header_line).await.context("failed to read header line")?;
        let trimmed = header_line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    if content_length > MAX_REQUEST_SIZE {
        return Err(eyre::eyre!("request body too large: {} bytes", content_length));
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).await.context("failed to read request body")?;
    }

    Ok(HttpRequest {
        method,
        path,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}
