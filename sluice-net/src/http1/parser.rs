use std::collections::VecDeque;

use super::types::{
    Header, HttpVersion, Limits, ParseError, ParseErrorKind, ParseWarning, ParseWarningKind,
    Request, RequestLine, Response, StatusLine, is_interim_status,
};

const CRLF: &[u8] = b"\r\n";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Incremental parser for the client side of a connection.
///
/// Bytes are pushed as they arrive; every request they complete is queued
/// and handed out in arrival order by [`RequestParser::pop_complete`]. A
/// message's head is parsed once and its body is decoded from where the
/// previous push stopped.
#[derive(Debug, Default)]
pub struct RequestParser {
    buffer: Vec<u8>,
    head_scanned: usize,
    pending: Option<PendingMessage<RequestLine>>,
    completed: VecDeque<Request>,
    warnings: Vec<ParseWarning>,
    limits: Limits,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Returns the number of requests completed by these bytes.
    pub fn push(&mut self, bytes: &[u8]) -> Result<usize, ParseError> {
        self.buffer.extend_from_slice(bytes);
        let mut completed = 0;

        loop {
            if self.pending.is_none() {
                if skip_leading_crlf(&mut self.buffer) {
                    self.head_scanned = 0;
                }
                let Some(head) = parse_head(&self.buffer, &mut self.head_scanned, self.limits)?
                else {
                    return Ok(completed);
                };
                let line = parse_request_line(&self.buffer[..head.line_end], 0, &mut self.warnings)?;
                let headers = head.headers(&self.buffer, &mut self.warnings);
                let framing = request_framing(&headers, head.len)?;
                self.pending = Some(PendingMessage {
                    line,
                    headers,
                    head_len: head.len,
                    body: BodyDecoder::new(framing, head.len, self.limits)?,
                });
            }

            let Some(pending) = self.pending.as_mut() else {
                return Ok(completed);
            };
            let Some(consumed) = pending.body.advance(&self.buffer, self.limits, false)? else {
                return Ok(completed);
            };
            let Some(pending) = self.pending.take() else {
                return Ok(completed);
            };

            let raw: Vec<u8> = self.buffer.drain(..consumed).collect();
            self.completed.push_back(Request {
                line: pending.line,
                headers: pending.headers,
                body: pending.body.decoded,
                raw,
                head_len: pending.head_len,
            });
            completed += 1;
        }
    }

    /// Signals that the client will send nothing more. A request cut off
    /// mid-message is an error.
    pub fn finish(&mut self) -> Result<(), ParseError> {
        if self.pending.is_none() {
            skip_leading_crlf(&mut self.buffer);
        }
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(ParseError {
                kind: ParseErrorKind::UnexpectedEof,
                offset: self.buffer.len(),
            })
        }
    }

    pub fn has_complete(&self) -> bool {
        !self.completed.is_empty()
    }

    pub fn pop_complete(&mut self) -> Option<Request> {
        self.completed.pop_front()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn take_warnings(&mut self) -> Vec<ParseWarning> {
        std::mem::take(&mut self.warnings)
    }
}

/// Incremental parser for the server side of a connection.
///
/// Requests forwarded upstream are registered in order; each final response
/// is attributed to the oldest registered request that has not been
/// answered yet.
#[derive(Debug, Default)]
pub struct ResponseParser {
    buffer: Vec<u8>,
    head_scanned: usize,
    pending: Option<PendingMessage<StatusLine>>,
    completed: VecDeque<Response>,
    outstanding: VecDeque<Request>,
    warnings: Vec<ParseWarning>,
    limits: Limits,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn register_request(&mut self, request: Request) {
        self.outstanding.push_back(request);
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Returns the number of responses completed by these bytes.
    pub fn push(&mut self, bytes: &[u8]) -> Result<usize, ParseError> {
        self.buffer.extend_from_slice(bytes);
        self.drain_complete(false)
    }

    /// Signals end of stream from the server. Completes a response whose
    /// body is delimited by connection close; anything else left over is
    /// a truncated message.
    pub fn finish(&mut self) -> Result<usize, ParseError> {
        let completed = self.drain_complete(true)?;
        if self.buffer.is_empty() {
            Ok(completed)
        } else {
            Err(ParseError {
                kind: ParseErrorKind::UnexpectedEof,
                offset: self.buffer.len(),
            })
        }
    }

    pub fn has_complete(&self) -> bool {
        !self.completed.is_empty()
    }

    pub fn pop_complete(&mut self) -> Option<Response> {
        self.completed.pop_front()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn take_warnings(&mut self) -> Vec<ParseWarning> {
        std::mem::take(&mut self.warnings)
    }

    fn drain_complete(&mut self, eof: bool) -> Result<usize, ParseError> {
        let mut completed = 0;

        while !self.buffer.is_empty() {
            if self.pending.is_none() {
                let Some(head) = parse_head(&self.buffer, &mut self.head_scanned, self.limits)?
                else {
                    break;
                };
                let line = parse_status_line(&self.buffer[..head.line_end], 0, &mut self.warnings)?;
                let headers = head.headers(&self.buffer, &mut self.warnings);
                let framing = response_framing(
                    line.status_code,
                    self.outstanding.front(),
                    &headers,
                    head.len,
                )?;
                self.pending = Some(PendingMessage {
                    line,
                    headers,
                    head_len: head.len,
                    body: BodyDecoder::new(framing, head.len, self.limits)?,
                });
            }

            let Some(pending) = self.pending.as_mut() else {
                break;
            };
            let Some(consumed) = pending.body.advance(&self.buffer, self.limits, eof)? else {
                break;
            };

            let request = if is_interim_status(pending.line.status_code) {
                self.outstanding.front().cloned()
            } else {
                self.outstanding.pop_front()
            };
            let Some(request) = request else {
                return Err(ParseError {
                    kind: ParseErrorKind::UnpairedResponse,
                    offset: 0,
                });
            };
            let Some(pending) = self.pending.take() else {
                break;
            };

            let raw: Vec<u8> = self.buffer.drain(..consumed).collect();
            self.completed.push_back(Response {
                line: pending.line,
                headers: pending.headers,
                body: pending.body.decoded,
                request,
                raw,
                head_len: pending.head_len,
            });
            completed += 1;
        }

        Ok(completed)
    }
}

/// A message whose head has been parsed and whose body is still arriving.
/// Offsets are relative to the start of the parser's buffer, which holds
/// the message's wire bytes until it completes.
#[derive(Debug)]
struct PendingMessage<L> {
    line: L,
    headers: Vec<Header>,
    head_len: usize,
    body: BodyDecoder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
    UntilEof,
}

/// Location of a complete head inside the buffer.
struct Head {
    line_end: usize,
    headers_end: usize,
    len: usize,
}

impl Head {
    fn headers(&self, buffer: &[u8], warnings: &mut Vec<ParseWarning>) -> Vec<Header> {
        parse_headers(
            header_block(buffer, self.line_end, self.headers_end),
            self.line_end,
            warnings,
        )
    }
}

/// Returns true when bytes were removed.
fn skip_leading_crlf(buffer: &mut Vec<u8>) -> bool {
    let mut skip = 0;
    while buffer[skip..].starts_with(CRLF) {
        skip += CRLF.len();
    }
    if skip > 0 {
        buffer.drain(..skip);
    }
    skip > 0
}

/// Finds the end of the head, resuming the search where the previous call
/// left off. `scanned` is reset once a head is found.
fn parse_head(
    buffer: &[u8],
    scanned: &mut usize,
    limits: Limits,
) -> Result<Option<Head>, ParseError> {
    let from = scanned
        .saturating_sub(HEADER_TERMINATOR.len() - 1)
        .min(buffer.len());
    let Some(headers_end) = find_headers_end(buffer, from, limits)? else {
        *scanned = buffer.len();
        return Ok(None);
    };
    *scanned = 0;

    Ok(Some(Head {
        line_end: find_line_end(buffer, 0).unwrap_or(headers_end),
        headers_end,
        len: headers_end + HEADER_TERMINATOR.len(),
    }))
}

fn header_block(buffer: &[u8], line_end: usize, headers_end: usize) -> &[u8] {
    let start = line_end + CRLF.len();
    if start >= headers_end {
        &[]
    } else {
        &buffer[start..headers_end]
    }
}

fn find_headers_end(
    buffer: &[u8],
    from: usize,
    limits: Limits,
) -> Result<Option<usize>, ParseError> {
    let too_large = ParseError {
        kind: ParseErrorKind::HeaderTooLarge,
        offset: limits.max_header_bytes,
    };
    match twoway::find_bytes(&buffer[from..], HEADER_TERMINATOR) {
        Some(index) if from + index > limits.max_header_bytes => Err(too_large),
        Some(index) => Ok(Some(from + index)),
        None if buffer.len() > limits.max_header_bytes => Err(too_large),
        None => Ok(None),
    }
}

fn find_line_end(buffer: &[u8], start: usize) -> Option<usize> {
    twoway::find_bytes(&buffer[start..], CRLF).map(|offset| start + offset)
}

fn parse_request_line(
    line: &[u8],
    offset: usize,
    warnings: &mut Vec<ParseWarning>,
) -> Result<RequestLine, ParseError> {
    let text = std::str::from_utf8(line).map_err(|_| ParseError {
        kind: ParseErrorKind::InvalidStartLine,
        offset,
    })?;

    let mut parts = text.split_whitespace();
    let method = parts.next().ok_or(ParseError {
        kind: ParseErrorKind::InvalidStartLine,
        offset,
    })?;
    let target = parts.next().ok_or(ParseError {
        kind: ParseErrorKind::InvalidStartLine,
        offset,
    })?;
    let version_raw = parts.next().unwrap_or("HTTP/1.1");

    if parts.next().is_some() {
        return Err(ParseError {
            kind: ParseErrorKind::InvalidStartLine,
            offset,
        });
    }

    let version = parse_http_version(version_raw, offset, warnings);

    Ok(RequestLine {
        method: method.to_string(),
        target: target.to_string(),
        version,
    })
}

fn parse_status_line(
    line: &[u8],
    offset: usize,
    warnings: &mut Vec<ParseWarning>,
) -> Result<StatusLine, ParseError> {
    let text = std::str::from_utf8(line).map_err(|_| ParseError {
        kind: ParseErrorKind::InvalidStatusLine,
        offset,
    })?;

    let mut parts = text.splitn(3, ' ');
    let version_raw = parts.next().unwrap_or("");
    if !version_raw.starts_with("HTTP/") {
        return Err(ParseError {
            kind: ParseErrorKind::InvalidStatusLine,
            offset,
        });
    }
    let status_raw = parts.next().ok_or(ParseError {
        kind: ParseErrorKind::InvalidStatusLine,
        offset,
    })?;
    let reason = parts.next().unwrap_or("");

    let status_code = status_raw.parse::<u16>().map_err(|_| ParseError {
        kind: ParseErrorKind::InvalidStatusLine,
        offset,
    })?;

    let version = parse_http_version(version_raw, offset, warnings);

    Ok(StatusLine {
        version,
        status_code,
        reason: reason.to_string(),
    })
}

fn parse_http_version(
    version_raw: &str,
    offset: usize,
    warnings: &mut Vec<ParseWarning>,
) -> HttpVersion {
    match version_raw {
        "HTTP/1.0" => HttpVersion::Http10,
        "HTTP/1.1" => HttpVersion::Http11,
        other => {
            warnings.push(ParseWarning {
                kind: ParseWarningKind::UnknownVersion(other.to_string()),
                offset,
            });
            HttpVersion::Other(other.to_string())
        }
    }
}

// Header bytes are forwarded verbatim, so values that are not valid UTF-8
// are decoded lossily for inspection rather than rejected.
fn parse_headers(bytes: &[u8], base_offset: usize, warnings: &mut Vec<ParseWarning>) -> Vec<Header> {
    if bytes.is_empty() {
        return Vec::new();
    }

    let text = String::from_utf8_lossy(bytes);

    let mut headers = Vec::new();
    let mut current_name: Option<String> = None;
    let mut current_raw_name: Option<String> = None;
    let mut current_value = String::new();
    let mut offset = base_offset;

    for line in text.split("\r\n") {
        if line.is_empty() {
            continue;
        }

        if let Some(first) = line.as_bytes().first() {
            if *first == b' ' || *first == b'\t' {
                warnings.push(ParseWarning {
                    kind: ParseWarningKind::ObsFoldDetected,
                    offset,
                });
                if current_name.is_some() {
                    current_value.push(' ');
                    current_value.push_str(line.trim());
                    offset += line.len() + CRLF.len();
                    continue;
                }
            }
        }

        if let Some(name) = current_name.take() {
            headers.push(Header {
                name,
                raw_name: current_raw_name.take().unwrap_or_default(),
                value: current_value.trim().to_string(),
            });
            current_value.clear();
        }

        let mut parts = line.splitn(2, ':');
        let raw_name = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");

        if raw_name.trim().is_empty() {
            warnings.push(ParseWarning {
                kind: ParseWarningKind::InvalidHeaderName,
                offset,
            });
        }

        if value.contains('\r') || value.contains('\n') {
            warnings.push(ParseWarning {
                kind: ParseWarningKind::InvalidHeaderValue,
                offset,
            });
        }

        current_name = Some(raw_name.trim().to_string());
        current_raw_name = Some(raw_name.to_string());
        current_value.push_str(value.trim_start());
        offset += line.len() + CRLF.len();
    }

    if let Some(name) = current_name {
        headers.push(Header {
            name,
            raw_name: current_raw_name.unwrap_or_default(),
            value: current_value.trim().to_string(),
        });
    }

    headers
}

fn request_framing(headers: &[Header], head_len: usize) -> Result<BodyFraming, ParseError> {
    if is_chunked(headers) {
        return Ok(BodyFraming::Chunked);
    }
    match parse_content_length(headers, head_len)? {
        Some(0) | None => Ok(BodyFraming::Empty),
        Some(length) => Ok(BodyFraming::Length(length)),
    }
}

fn response_framing(
    status_code: u16,
    request: Option<&Request>,
    headers: &[Header],
    head_len: usize,
) -> Result<BodyFraming, ParseError> {
    if status_code / 100 == 1 || status_code == 204 || status_code == 304 {
        return Ok(BodyFraming::Empty);
    }
    if let Some(request) = request {
        if request.is_method("HEAD") {
            return Ok(BodyFraming::Empty);
        }
        if request.is_method("CONNECT") && status_code / 100 == 2 {
            return Ok(BodyFraming::Empty);
        }
    }
    if is_chunked(headers) {
        return Ok(BodyFraming::Chunked);
    }
    match parse_content_length(headers, head_len)? {
        Some(0) => Ok(BodyFraming::Empty),
        Some(length) => Ok(BodyFraming::Length(length)),
        None => Ok(BodyFraming::UntilEof),
    }
}

fn parse_content_length(headers: &[Header], offset: usize) -> Result<Option<usize>, ParseError> {
    let Some(header) = headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case("content-length"))
    else {
        return Ok(None);
    };
    header
        .value
        .trim()
        .parse::<usize>()
        .map(Some)
        .map_err(|_| ParseError {
            kind: ParseErrorKind::InvalidContentLength,
            offset,
        })
}

fn is_chunked(headers: &[Header]) -> bool {
    headers.iter().any(|header| {
        header.name.eq_ignore_ascii_case("transfer-encoding")
            && header
                .value
                .split(',')
                .any(|encoding| encoding.trim().eq_ignore_ascii_case("chunked"))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkStep {
    Size,
    Data(usize),
    DataEnd,
    Trailer,
}

/// Decodes one message body across pushes. Every buffered byte is examined
/// at most once.
#[derive(Debug)]
struct BodyDecoder {
    framing: BodyFraming,
    start: usize,
    cursor: usize,
    step: ChunkStep,
    decoded: Vec<u8>,
}

impl BodyDecoder {
    fn new(framing: BodyFraming, start: usize, limits: Limits) -> Result<Self, ParseError> {
        if let BodyFraming::Length(length) = framing {
            if length > limits.max_body_bytes {
                return Err(ParseError {
                    kind: ParseErrorKind::BodyTooLarge,
                    offset: start,
                });
            }
        }
        Ok(Self {
            framing,
            start,
            cursor: start,
            step: ChunkStep::Size,
            decoded: Vec::new(),
        })
    }

    /// Returns the end offset of the message once its body is complete.
    fn advance(
        &mut self,
        buffer: &[u8],
        limits: Limits,
        eof: bool,
    ) -> Result<Option<usize>, ParseError> {
        match self.framing {
            BodyFraming::Empty => Ok(Some(self.start)),
            BodyFraming::Length(length) => {
                let end = self.start + length;
                if buffer.len() < end {
                    return Ok(None);
                }
                self.decoded = buffer[self.start..end].to_vec();
                Ok(Some(end))
            }
            BodyFraming::UntilEof => {
                if buffer.len() - self.start > limits.max_body_bytes {
                    return Err(ParseError {
                        kind: ParseErrorKind::BodyTooLarge,
                        offset: self.start,
                    });
                }
                if !eof {
                    return Ok(None);
                }
                self.decoded = buffer[self.start..].to_vec();
                Ok(Some(buffer.len()))
            }
            BodyFraming::Chunked => self.advance_chunked(buffer, limits),
        }
    }

    fn advance_chunked(
        &mut self,
        buffer: &[u8],
        limits: Limits,
    ) -> Result<Option<usize>, ParseError> {
        loop {
            match self.step {
                ChunkStep::Size => {
                    let Some(line_end) = find_line_end(buffer, self.cursor) else {
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&buffer[self.cursor..line_end], self.cursor)?;
                    self.cursor = line_end + CRLF.len();
                    if size == 0 {
                        self.step = ChunkStep::Trailer;
                        continue;
                    }
                    if size > limits.max_body_bytes - self.decoded.len() {
                        return Err(ParseError {
                            kind: ParseErrorKind::BodyTooLarge,
                            offset: self.cursor,
                        });
                    }
                    self.step = ChunkStep::Data(size);
                }
                ChunkStep::Data(remaining) => {
                    let take = remaining.min(buffer.len() - self.cursor);
                    if take == 0 {
                        return Ok(None);
                    }
                    self.decoded
                        .extend_from_slice(&buffer[self.cursor..self.cursor + take]);
                    self.cursor += take;
                    self.step = if take == remaining {
                        ChunkStep::DataEnd
                    } else {
                        ChunkStep::Data(remaining - take)
                    };
                }
                ChunkStep::DataEnd => {
                    if buffer.len() < self.cursor + CRLF.len() {
                        return Ok(None);
                    }
                    if &buffer[self.cursor..self.cursor + CRLF.len()] != CRLF {
                        return Err(ParseError {
                            kind: ParseErrorKind::InvalidChunkTerminator,
                            offset: self.cursor,
                        });
                    }
                    self.cursor += CRLF.len();
                    self.step = ChunkStep::Size;
                }
                // trailer fields, up to the blank line
                ChunkStep::Trailer => {
                    let Some(line_end) = find_line_end(buffer, self.cursor) else {
                        return Ok(None);
                    };
                    let blank = line_end == self.cursor;
                    self.cursor = line_end + CRLF.len();
                    if blank {
                        return Ok(Some(self.cursor));
                    }
                }
            }
        }
    }
}

fn parse_chunk_size(line: &[u8], offset: usize) -> Result<usize, ParseError> {
    let invalid = ParseError {
        kind: ParseErrorKind::InvalidChunkSize,
        offset,
    };
    let line = std::str::from_utf8(line).map_err(|_| invalid.clone())?;
    let size = line.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(size, 16).map_err(|_| invalid)
}
