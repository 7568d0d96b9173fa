use std::sync::Arc;

use sluice_net::{
    Limits, OriginalDestination, ParseError, ParseWarning, Request, RequestParser, Response,
    ResponseParser,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::ProxyError;
use crate::store::BackingStore;

const READ_BUFFER_SIZE: usize = 8192;

/// Counters reported when a connection's pipeline ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    pub requests_forwarded: usize,
    pub responses_forwarded: usize,
    pub responses_saved: usize,
}

/// Relays one client/server connection pair through the HTTP parsers.
///
/// Requests reach the server in the order they completed; each response is
/// attributed to the oldest unanswered request, written to the client, and
/// then saved under the destination captured at construction.
pub struct Pipeline<C, S> {
    client: C,
    server: S,
    destination: OriginalDestination,
    store: Arc<dyn BackingStore>,
    limits: Limits,
}

impl<C, S> Pipeline<C, S>
where
    C: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        client: C,
        server: S,
        destination: OriginalDestination,
        store: Arc<dyn BackingStore>,
    ) -> Self {
        Self {
            client,
            server,
            destination,
            store,
            limits: Limits::default(),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Runs until neither peer can make progress: a peer has closed and
    /// everything already parsed has been written out.
    pub async fn run(self) -> Result<PipelineSummary, ProxyError> {
        let Self {
            client,
            server,
            destination,
            store,
            limits,
        } = self;

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut server_read, mut server_write) = tokio::io::split(server);

        let mut requests = RequestParser::with_limits(limits);
        let mut responses = ResponseParser::with_limits(limits);
        let mut to_server: Outgoing<Request> = Outgoing::default();
        let mut to_client: Outgoing<Response> = Outgoing::default();

        let mut client_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut server_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut client_eof = false;
        let mut server_eof = false;
        let mut summary = PipelineSummary::default();

        loop {
            if to_server.is_idle() {
                if let Some(request) = requests.pop_complete() {
                    responses.register_request(request.clone());
                    to_server.load(request);
                }
            }
            if to_client.is_idle() {
                if let Some(response) = responses.pop_complete() {
                    to_client.load(response);
                }
            }

            tokio::select! {
                result = server_read.read(&mut server_buf), if !client_eof && !server_eof => {
                    match result? {
                        0 => {
                            server_eof = true;
                            responses.finish().map_err(|err| protocol("server", err))?;
                            log_warnings("server", responses.take_warnings());
                        }
                        n => {
                            responses
                                .push(&server_buf[..n])
                                .map_err(|err| protocol("server", err))?;
                            log_warnings("server", responses.take_warnings());
                        }
                    }
                }
                result = client_read.read(&mut client_buf), if !server_eof && !client_eof => {
                    match result? {
                        0 => {
                            client_eof = true;
                            requests.finish().map_err(|err| protocol("client", err))?;
                        }
                        n => {
                            requests
                                .push(&client_buf[..n])
                                .map_err(|err| protocol("client", err))?;
                            log_warnings("client", requests.take_warnings());
                        }
                    }
                }
                result = server_write.write(to_server.remaining()), if !to_server.is_idle() => {
                    let written = nonzero_write(result?)?;
                    if let Some(request) = to_server.advance(written) {
                        server_write.flush().await?;
                        summary.requests_forwarded += 1;
                        debug!(
                            method = %request.line.method,
                            target = %request.line.target,
                            "request forwarded"
                        );
                    }
                }
                result = client_write.write(to_client.remaining()), if !to_client.is_idle() => {
                    let written = nonzero_write(result?)?;
                    if let Some(response) = to_client.advance(written) {
                        client_write.flush().await?;
                        summary.responses_forwarded += 1;
                        debug!(
                            status = response.line.status_code,
                            target = %response.request.line.target,
                            content_type = response.header("content-type").unwrap_or("-"),
                            "response forwarded"
                        );
                        match store.save(&response, &destination) {
                            Ok(()) => summary.responses_saved += 1,
                            Err(err) => warn!(error = %err, "failed to save response"),
                        }
                    }
                }
                else => break,
            }
        }

        if let Err(err) = client_write.shutdown().await {
            debug!(error = %err, "client shutdown failed");
        }
        if let Err(err) = server_write.shutdown().await {
            debug!(error = %err, "server shutdown failed");
        }

        Ok(summary)
    }
}

trait WireMessage {
    fn wire_bytes(&self) -> &[u8];
}

impl WireMessage for Request {
    fn wire_bytes(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl WireMessage for Response {
    fn wire_bytes(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// A message being written out, possibly across several writes.
struct Outgoing<M> {
    message: Option<M>,
    written: usize,
}

impl<M> Default for Outgoing<M> {
    fn default() -> Self {
        Self {
            message: None,
            written: 0,
        }
    }
}

impl<M: WireMessage> Outgoing<M> {
    fn is_idle(&self) -> bool {
        self.message.is_none()
    }

    fn load(&mut self, message: M) {
        self.message = Some(message);
        self.written = 0;
    }

    fn remaining(&self) -> &[u8] {
        match &self.message {
            Some(message) => &message.wire_bytes()[self.written..],
            None => &[],
        }
    }

    /// Returns the message once its last byte has been written.
    fn advance(&mut self, written: usize) -> Option<M> {
        self.written += written;
        let len = self.message.as_ref().map_or(0, |message| message.wire_bytes().len());
        if self.written >= len {
            self.written = 0;
            self.message.take()
        } else {
            None
        }
    }
}

fn nonzero_write(written: usize) -> Result<usize, ProxyError> {
    if written == 0 {
        return Err(ProxyError::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "peer stopped accepting data",
        )));
    }
    Ok(written)
}

fn log_warnings(peer: &'static str, warnings: Vec<ParseWarning>) {
    for warning in warnings {
        debug!(peer, kind = ?warning.kind, offset = warning.offset, "lenient parse");
    }
}

fn protocol(peer: &'static str, err: ParseError) -> ProxyError {
    ProxyError::Protocol {
        peer,
        message: err.to_string(),
    }
}
