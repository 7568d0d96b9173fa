#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
    pub raw_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: HttpVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: HttpVersion,
    pub status_code: u16,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
    Other(String),
}

impl HttpVersion {
    pub fn as_str(&self) -> &str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
            HttpVersion::Other(other) => other.as_str(),
        }
    }
}

/// A complete request as it appeared on the wire.
///
/// `body` holds the decoded payload (chunk framing removed); `as_bytes`
/// returns the exact bytes the client sent, which is what gets forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub line: RequestLine,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
    pub(crate) raw: Vec<u8>,
    pub(crate) head_len: usize,
}

impl Request {
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Start line and header block, including the terminating blank line.
    pub fn head_bytes(&self) -> &[u8] {
        &self.raw[..self.head_len]
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_method(&self, method: &str) -> bool {
        self.line.method.eq_ignore_ascii_case(method)
    }
}

/// A complete response together with the request it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub line: StatusLine,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
    pub request: Request,
    pub(crate) raw: Vec<u8>,
    pub(crate) head_len: usize,
}

impl Response {
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn head_bytes(&self) -> &[u8] {
        &self.raw[..self.head_len]
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// `1xx` responses other than `101` precede the final response to the
    /// same request.
    pub fn is_interim(&self) -> bool {
        is_interim_status(self.line.status_code)
    }
}

pub(crate) fn is_interim_status(status_code: u16) -> bool {
    status_code / 100 == 1 && status_code != 101
}

fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            max_body_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub kind: ParseWarningKind,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarningKind {
    UnknownVersion(String),
    ObsFoldDetected,
    InvalidHeaderName,
    InvalidHeaderValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    InvalidStartLine,
    InvalidStatusLine,
    InvalidContentLength,
    HeaderTooLarge,
    BodyTooLarge,
    InvalidChunkSize,
    InvalidChunkTerminator,
    UnexpectedEof,
    UnpairedResponse,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} at byte {}", self.kind, self.offset)
    }
}

impl std::error::Error for ParseError {}
