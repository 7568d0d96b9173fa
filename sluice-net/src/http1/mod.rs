mod parser;
mod types;

pub use parser::{RequestParser, ResponseParser};
pub use types::{
    Header, HttpVersion, Limits, ParseError, ParseErrorKind, ParseWarning, ParseWarningKind,
    Request, RequestLine, Response, StatusLine,
};
