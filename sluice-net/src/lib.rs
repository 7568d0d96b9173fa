mod dest;
mod http1;
mod tls;

pub use dest::{OriginalDestination, original_destination};

pub use http1::{
    Header, HttpVersion, Limits, ParseError, ParseErrorKind, ParseWarning, ParseWarningKind,
    Request, RequestLine, RequestParser, Response, ResponseParser, StatusLine,
};

pub use tls::{
    CaCertificate, CaMaterial, CaMaterialPaths, LeafCertificate, RECORD_HEADER_LEN, TlsConfig,
    TlsError, TlsErrorKind, build_acceptor, build_connector, client_hello_record_len,
    generate_ca, generate_leaf_cert, load_or_generate_ca, read_leaf_cert,
    server_name_from_client_hello, write_ca_to_dir,
};
