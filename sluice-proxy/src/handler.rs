use std::time::Duration;

use sluice_net::{
    OriginalDestination, RECORD_HEADER_LEN, client_hello_record_len, server_name_from_client_hello,
};
use tokio::net::TcpStream;
use tracing::{debug, field, info};

use crate::error::ProxyError;
use crate::pipeline::Pipeline;
use crate::proxy::ProxyState;

const SNI_PEEK_TIMEOUT: Duration = Duration::from_secs(2);
const SNI_PEEK_INTERVAL: Duration = Duration::from_millis(10);
const MAX_HELLO_RECORD: usize = RECORD_HEADER_LEN + 16 * 1024;

/// Serves one accepted connection from destination lookup to pipeline exit.
/// Runs inside the connection's span; errors are reported by the caller.
pub(crate) async fn handle_connection(
    state: &ProxyState,
    client: TcpStream,
) -> Result<(), ProxyError> {
    let destination = state.resolver.resolve(&client)?;
    tracing::Span::current().record("destination", field::display(destination));

    if destination.addr() == client.local_addr()? {
        return Err(ProxyError::Destination(
            "connection was not redirected; refusing to relay to the proxy itself".to_string(),
        ));
    }

    let server = TcpStream::connect(destination.addr())
        .await
        .map_err(|source| ProxyError::Connect {
            addr: destination.addr(),
            source,
        })?;
    // Small pipelined messages should not wait on Nagle.
    disable_nagle(&client, "client");
    disable_nagle(&server, "server");

    if !state.config.is_https_port(destination.port()) {
        return relay(state, client, server, destination).await;
    }

    let Some(tls) = state.tls.as_ref().filter(|_| state.config.tls.enabled) else {
        return tunnel(client, server).await;
    };

    let server_name = peek_server_name(&client).await;
    debug!(server_name = ?server_name, "intercepting TLS");
    let server = tls.connect(server, server_name.as_deref()).await?;
    let client = tls.accept(client).await?;

    relay(state, client, server, destination).await
}

async fn relay<C, S>(
    state: &ProxyState,
    client: C,
    server: S,
    destination: OriginalDestination,
) -> Result<(), ProxyError>
where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let summary = Pipeline::new(client, server, destination, state.store.clone())
        .with_limits(state.config.parser_limits())
        .run()
        .await?;
    info!(
        requests = summary.requests_forwarded,
        responses = summary.responses_forwarded,
        saved = summary.responses_saved,
        "connection closed"
    );
    Ok(())
}

fn disable_nagle(stream: &TcpStream, peer: &'static str) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(peer, error = %err, "failed to set TCP_NODELAY");
    }
}

/// Relays bytes unparsed; used for TLS ports when interception is off.
async fn tunnel(mut client: TcpStream, mut server: TcpStream) -> Result<(), ProxyError> {
    let (sent, received) = tokio::io::copy_bidirectional(&mut client, &mut server).await?;
    info!(sent, received, "tunnel closed");
    Ok(())
}

/// Reads the SNI host name from the client's ClientHello without consuming
/// it. Gives up quietly if the hello does not arrive in time.
async fn peek_server_name(client: &TcpStream) -> Option<String> {
    let mut buf = vec![0u8; MAX_HELLO_RECORD];
    let peek = async {
        loop {
            let n = client.peek(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            match client_hello_record_len(&buf[..n]) {
                Some(len) if n >= len.min(buf.len()) => {
                    return server_name_from_client_hello(&buf[..n]);
                }
                None if n >= RECORD_HEADER_LEN => return None,
                _ => tokio::time::sleep(SNI_PEEK_INTERVAL).await,
            }
        }
    };
    tokio::time::timeout(SNI_PEEK_TIMEOUT, peek)
        .await
        .ok()
        .flatten()
}
