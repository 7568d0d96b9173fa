mod config;
mod error;
mod handler;
mod pipeline;
mod proxy;
mod resolve;
mod store;
mod tls;

pub use config::{CaptureConfig, HttpConfig, ListenConfig, ProxyConfig, TlsMitmConfig};
pub use error::ProxyError;
pub use pipeline::{Pipeline, PipelineSummary};
pub use proxy::Proxy;
pub use resolve::{DestinationResolver, FixedDestination, SocketOriginalDst};
pub use store::{BackingStore, CaptureBackingStore, MemoryStore, SavedExchange};
pub use tls::InterceptionContexts;
