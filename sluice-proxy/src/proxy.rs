use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{Instrument, field, info, info_span, warn};
use uuid::Uuid;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::handler::handle_connection;
use crate::resolve::{DestinationResolver, SocketOriginalDst};
use crate::store::BackingStore;
use crate::tls::InterceptionContexts;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

pub struct Proxy {
    listener: TcpListener,
    state: ProxyState,
}

/// Everything connections share: read-only for the life of the listener.
pub(crate) struct ProxyState {
    pub(crate) config: ProxyConfig,
    pub(crate) store: Arc<dyn BackingStore>,
    pub(crate) resolver: Arc<dyn DestinationResolver>,
    pub(crate) tls: Option<InterceptionContexts>,
}

impl Proxy {
    /// Binds the configured listen address. `tls` is required when
    /// interception is enabled.
    pub async fn bind(
        config: ProxyConfig,
        tls: Option<InterceptionContexts>,
        store: Arc<dyn BackingStore>,
    ) -> Result<Self, ProxyError> {
        config.validate()?;
        if config.tls.enabled && tls.is_none() {
            return Err(ProxyError::Config(
                "tls interception is enabled but no TLS contexts were provided".to_string(),
            ));
        }

        let listener = TcpListener::bind(config.listen_addr())
            .await
            .map_err(|err| ProxyError::Runtime(err.to_string()))?;

        Ok(Self {
            listener,
            state: ProxyState {
                config,
                store,
                resolver: Arc::new(SocketOriginalDst),
                tls,
            },
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DestinationResolver>) -> Self {
        self.state.resolver = resolver;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<(), ProxyError> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves. Connections already
    /// accepted keep running on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ProxyError>
    where
        F: Future<Output = ()>,
    {
        let local_addr = self.local_addr()?;
        let listener = self.listener;
        let state = Arc::new(self.state);
        let mut shutdown = std::pin::pin!(shutdown);

        info!(addr = %local_addr, tls = state.config.tls.enabled, "proxy listening");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(addr = %local_addr, "proxy stopped accepting");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = Arc::clone(&state);
                        let span = info_span!(
                            "connection",
                            id = %Uuid::new_v4(),
                            peer = %peer,
                            destination = field::Empty,
                        );
                        tokio::spawn(
                            async move {
                                if let Err(err) = handle_connection(&state, stream).await {
                                    warn!(error = %err, "connection failed");
                                }
                            }
                            .instrument(span),
                        );
                    }
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }
    }
}
