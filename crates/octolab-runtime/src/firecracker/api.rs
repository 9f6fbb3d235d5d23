//! Minimal HTTP/1.1 client over a UNIX domain socket for the Firecracker
//! API. `reqwest` has no UDS transport, so PUT/GET are hand-rolled here —
//! the wire format is fixed and small enough that a full HTTP client adds
//! nothing but dependency weight.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;

pub struct FirecrackerApi {
    socket_path: String,
    timeout: Duration,
}

impl FirecrackerApi {
    pub fn new(socket_path: impl Into<String>) -> Self {
        FirecrackerApi {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(5),
        }
    }

    fn connect(&self) -> Result<UnixStream> {
        let stream = UnixStream::connect(&self.socket_path)
            .with_context(|| format!("failed to connect to firecracker API at {}", self.socket_path))?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        Ok(stream)
    }

    pub fn put(&self, path: &str, body: &impl Serialize) -> Result<()> {
        let json = serde_json::to_string(body).context("failed to serialize firecracker request")?;
        let request = format!(
            "PUT {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n{json}",
            path = path,
            len = json.len(),
            json = json,
        );
        let mut stream = self.connect()?;
        stream
            .write_all(request.as_bytes())
            .with_context(|| format!("failed to write PUT {path}"))?;

        let (status, response_body) = read_response(&stream)?;
        if status >= 400 {
            bail!("firecracker PUT {path} returned {status}: {response_body}");
        }
        Ok(())
    }

    pub fn get(&self, path: &str) -> Result<String> {
        let request = format!(
            "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        );
        let mut stream = self.connect()?;
        stream
            .write_all(request.as_bytes())
            .with_context(|| format!("failed to write GET {path}"))?;

        let (status, response_body) = read_response(&stream)?;
        if status >= 400 {
            bail!("firecracker GET {path} returned {status}: {response_body}");
        }
        Ok(response_body)
    }
}

fn read_response(stream: &UnixStream) -> Result<(u16, String)> {
    let mut reader = BufReader::new(stream);

    let mut status_line = String::new();
    reader
        .read_line(&mut status_line)
        .context("failed to read firecracker API status line")?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .context("malformed HTTP status line")?
        .parse()
        .context("non-numeric HTTP status code")?;

    let mut content_length: usize = 0;
    loop {
        let mut header_line = String::new();
        reader
            .read_line(&mut header_line)
            .context("failed to read firecracker API headers")?;
        let trimmed = header_line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.strip_prefix("Content-Length:").or_else(|| trimmed.strip_prefix("content-length:")) {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader
            .read_exact(&mut body)
            .context("failed to read firecracker API body")?;
    }

    Ok((status, String::from_utf8_lossy(&body).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stores_socket_path() {
        let api = FirecrackerApi::new("/tmp/fc.sock");
        assert_eq!(api.socket_path, "/tmp/fc.sock");
    }
}
