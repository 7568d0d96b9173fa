mod ca;
mod cert;
mod openssl;
mod sni;
mod types;

pub use ca::{generate_ca, load_or_generate_ca, write_ca_to_dir};
pub use cert::{generate_leaf_cert, read_leaf_cert};
pub use openssl::{TlsConfig, build_acceptor, build_connector};
pub use sni::{RECORD_HEADER_LEN, client_hello_record_len, server_name_from_client_hello};
pub use types::{
    CaCertificate, CaMaterial, CaMaterialPaths, LeafCertificate, TlsError, TlsErrorKind,
};
