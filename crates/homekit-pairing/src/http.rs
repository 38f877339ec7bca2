//! HTTP/1.1 transport over a TCP connection to the accessory.
//!
//! HAP accessories speak a small subset of HTTP: one request at a time,
//! bodies sized by `Content-Length` or sent chunked. After pair-verify the
//! same connection switches to encrypted frames carrying the raw HTTP bytes.

use crate::channel::{EncryptedChannel, FRAME_HEADER_LEN};
use crate::traits::{Endpoint, HttpMethod, Request, Transport, PAIRING_CONTENT_TYPE};
use async_trait::async_trait;
use homekit_core::{Error, ErrorKind, Result, Stage, TransportError};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const MAX_HEADER_BYTES: usize = 16 * 1024;

/// HTTP transport to one accessory.
pub struct HttpTransport<S = TcpStream> {
    stream: S,
    host: String,
    adapter: Option<String>,
    buffer: Vec<u8>,
}

impl HttpTransport<TcpStream> {
    /// Open a TCP connection to the accessory.
    ///
    /// `adapter` names the local interface to use and is kept as a hint for
    /// callers that bind sockets themselves.
    pub async fn connect(addr: SocketAddr, adapter: Option<String>) -> Result<Self> {
        debug!("Connecting to accessory at {}", addr);
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::new(Stage::Session, TransportError::Io(e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::new(Stage::Session, TransportError::Io(e)))?;
        Ok(Self::from_stream(stream, addr.to_string(), adapter))
    }
}

impl<S> HttpTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    /// Wrap an already connected stream.
    pub fn from_stream(stream: S, host: impl Into<String>, adapter: Option<String>) -> Self {
        Self {
            stream,
            host: host.into(),
            adapter,
            buffer: Vec::new(),
        }
    }

    pub fn adapter(&self) -> Option<&str> {
        self.adapter.as_deref()
    }

    fn encode_request(&self, request: &Request) -> Vec<u8> {
        let mut head = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\n",
            request.method, request.path, self.host
        );
        if let Some(content_type) = &request.content_type {
            head.push_str(&format!("Content-Type: {}\r\n", content_type));
        }
        if request.method != HttpMethod::Get || !request.body.is_empty() {
            head.push_str(&format!("Content-Length: {}\r\n", request.body.len()));
        }
        head.push_str("\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&request.body);
        bytes
    }

    async fn read_more(&mut self, stage: Stage) -> Result<()> {
        let mut chunk = [0u8; 4096];
        let n = self
            .stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::new(stage, TransportError::Io(e)))?;
        if n == 0 {
            return Err(Error::new(stage, TransportError::Closed));
        }
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    async fn read_frame(&mut self, channel: &mut EncryptedChannel, stage: Stage) -> Result<()> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(|e| read_error(stage, e))?;

        let mut body = vec![0u8; EncryptedChannel::body_length(header)];
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(|e| read_error(stage, e))?;

        let plaintext = channel.decrypt_block(header, &body)?;
        self.buffer.extend_from_slice(&plaintext);
        Ok(())
    }

    fn take_response(&mut self, stage: Stage) -> Result<Option<Vec<u8>>> {
        match parse_response(&self.buffer).map_err(|e| Error::new(stage, e))? {
            Some(response) => {
                self.buffer.drain(..response.consumed);
                response.into_body(stage).map(Some)
            }
            None if self.buffer.len() > MAX_HEADER_BYTES + MAX_BODY_BYTES => Err(Error::new(
                stage,
                TransportError::InvalidResponse("response too large".to_string()),
            )),
            None => Ok(None),
        }
    }
}

const MAX_BODY_BYTES: usize = 1024 * 1024;

fn read_error(stage: Stage, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::new(stage, TransportError::Closed)
    } else {
        Error::new(stage, TransportError::Io(e))
    }
}

#[async_trait]
impl<S> Transport for HttpTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    async fn post(&mut self, endpoint: Endpoint, body: &[u8]) -> Result<Vec<u8>> {
        let stage = endpoint.stage();
        let request = self.encode_request(&Request::pairing(endpoint, body));
        debug!("POST {} ({} bytes)", endpoint, body.len());
        self.stream
            .write_all(&request)
            .await
            .map_err(|e| Error::new(stage, TransportError::Io(e)))?;

        loop {
            if let Some(body) = self.take_response(stage)? {
                return Ok(body);
            }
            self.read_more(stage).await?;
        }
    }

    async fn send_encrypted(
        &mut self,
        channel: &mut EncryptedChannel,
        request: &Request,
    ) -> Result<Vec<u8>> {
        let stage = Stage::Session;
        let frames = channel.encrypt_frame(&self.encode_request(request))?;
        debug!("{} encrypted ({} bytes)", request, request.body.len());
        if let Err(e) = self.stream.write_all(&frames).await {
            channel.poison();
            return Err(Error::new(stage, TransportError::Io(e)));
        }

        loop {
            match self.take_response(stage) {
                Ok(Some(body)) => return Ok(body),
                Ok(None) => {}
                Err(err) if err.is_transport() => {
                    channel.poison();
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
            if let Err(err) = self.read_frame(channel, stage).await {
                channel.poison();
                return Err(err);
            }
        }
    }
}

/// A complete HTTP response found at the start of a buffer.
#[derive(Debug)]
struct ParsedResponse {
    status: u16,
    content_type: Option<String>,
    body: Vec<u8>,
    consumed: usize,
}

impl ParsedResponse {
    /// Pairing errors arrive as TLV bodies on 4xx statuses; hand those to
    /// the state machine instead of failing on the status alone.
    fn into_body(self, stage: Stage) -> Result<Vec<u8>> {
        let is_tlv = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.eq_ignore_ascii_case(PAIRING_CONTENT_TYPE));
        match self.status {
            200..=299 => Ok(self.body),
            400..=499 if is_tlv && !self.body.is_empty() => Ok(self.body),
            status => Err(Error::new(stage, ErrorKind::Http(status))),
        }
    }
}

fn parse_response(buf: &[u8]) -> std::result::Result<Option<ParsedResponse>, TransportError> {
    let Some(header_end) = find_header_end(buf) else {
        if buf.len() > MAX_HEADER_BYTES {
            return Err(bad_response("header section too large".to_string()));
        }
        return Ok(None);
    };

    let head = std::str::from_utf8(&buf[..header_end])
        .map_err(|_| bad_response("non-UTF-8 headers".to_string()))?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") && !version.starts_with("EVENT/1.") {
        return Err(bad_response(format!("bad status line: {}", status_line)));
    }
    let status: u16 = parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| bad_response(format!("bad status line: {}", status_line)))?;

    let mut content_length = None;
    let mut chunked = false;
    let mut content_type = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            let length: usize = value
                .parse()
                .map_err(|_| bad_response(format!("bad Content-Length: {}", value)))?;
            content_length = Some(length);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            let last = value.rsplit(',').next().unwrap_or_default().trim();
            if !last.eq_ignore_ascii_case("chunked") {
                return Err(bad_response(format!("unsupported Transfer-Encoding: {}", value)));
            }
            chunked = true;
        } else if name.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_string());
        }
    }

    let body_start = header_end + 4;
    let (body, consumed) = if chunked {
        match decode_chunked(&buf[body_start..])? {
            Some((body, used)) => (body, body_start + used),
            None => return Ok(None),
        }
    } else {
        let length = content_length.unwrap_or(0);
        if length > MAX_BODY_BYTES {
            return Err(bad_response(format!("body of {} bytes exceeds limit", length)));
        }
        if buf.len() < body_start + length {
            return Ok(None);
        }
        (buf[body_start..body_start + length].to_vec(), body_start + length)
    };

    Ok(Some(ParsedResponse {
        status,
        content_type,
        body,
        consumed,
    }))
}

/// Decode a chunked body from the start of `buf`.
///
/// Returns the body and the bytes consumed, including trailers, or `None`
/// while the final chunk has not arrived.
fn decode_chunked(buf: &[u8]) -> std::result::Result<Option<(Vec<u8>, usize)>, TransportError> {
    let mut body = Vec::new();
    let mut pos = 0;
    loop {
        let Some(line_len) = find_line_end(&buf[pos..]) else {
            return Ok(None);
        };
        let line = std::str::from_utf8(&buf[pos..pos + line_len])
            .map_err(|_| bad_response("non-UTF-8 chunk size".to_string()))?;
        let size_field = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| bad_response(format!("bad chunk size: {}", line)))?;
        pos += line_len + 2;

        if size == 0 {
            // Trailer fields, then an empty line.
            loop {
                let Some(line_len) = find_line_end(&buf[pos..]) else {
                    return Ok(None);
                };
                pos += line_len + 2;
                if line_len == 0 {
                    return Ok(Some((body, pos)));
                }
            }
        }

        if size > MAX_BODY_BYTES - body.len() {
            return Err(bad_response("chunked body exceeds limit".to_string()));
        }
        if buf.len() < pos + size + 2 {
            return Ok(None);
        }
        if buf[pos + size..pos + size + 2] != *b"\r\n" {
            return Err(bad_response("chunk not terminated by CRLF".to_string()));
        }
        body.extend_from_slice(&buf[pos..pos + size]);
        pos += size + 2;
    }
}

fn bad_response(message: String) -> TransportError {
    TransportError::InvalidResponse(message)
}

fn find_line_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
