use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use openssl::ssl::{NameType, Ssl, SslConnector, SslMethod, SslVerifyMode};
use sluice_net::{OriginalDestination, TlsConfig, build_acceptor, generate_ca, generate_leaf_cert};
use sluice_proxy::{
    DestinationResolver, FixedDestination, InterceptionContexts, MemoryStore, Proxy, ProxyConfig,
    ProxyError,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_openssl::SslStream;

fn plain_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listen.host = "127.0.0.1".to_string();
    config.listen.port = 0;
    config.tls.enabled = false;
    config
}

async fn start_proxy(
    config: ProxyConfig,
    tls: Option<InterceptionContexts>,
    store: Arc<MemoryStore>,
    resolver: Arc<dyn DestinationResolver>,
) -> SocketAddr {
    let proxy = Proxy::bind(config, tls, store)
        .await
        .unwrap()
        .with_resolver(resolver);
    let addr = proxy.local_addr().unwrap();
    tokio::spawn(proxy.run());
    addr
}

async fn wait_for_saves(store: &MemoryStore, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("saves did not arrive in time");
}

async fn read_head<R: AsyncRead + Unpin>(stream: &mut R) -> Vec<u8> {
    let mut received = Vec::new();
    let mut byte = [0u8; 1];
    while !received.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.unwrap() == 0 {
            break;
        }
        received.push(byte[0]);
    }
    received
}

/// Answers every request head with a fixed-length body naming its target.
async fn spawn_http_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                loop {
                    let head = read_head(&mut stream).await;
                    if head.is_empty() {
                        break;
                    }
                    let line = String::from_utf8_lossy(&head).to_string();
                    let target = line.split(' ').nth(1).unwrap_or("?").to_string();
                    let reply = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                        target.len(),
                        target
                    );
                    if stream.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

fn reply_for(target: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        target.len(),
        target
    )
    .into_bytes()
}

async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn plain_pipelined_requests_are_relayed_and_saved() {
    let upstream = spawn_http_upstream().await;
    let store = Arc::new(MemoryStore::new());
    let proxy = start_proxy(
        plain_config(),
        None,
        store.clone(),
        Arc::new(FixedDestination(upstream)),
    )
    .await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(b"GET /a HTTP/1.1\r\nHost: example.test\r\n\r\nGET /b HTTP/1.1\r\nHost: example.test\r\n\r\n")
        .await
        .unwrap();

    let mut expected = reply_for("/a");
    expected.extend_from_slice(&reply_for("/b"));
    assert_eq!(read_exactly(&mut client, expected.len()).await, expected);

    wait_for_saves(&store, 2).await;
    let saved = store.saved();
    assert_eq!(saved[0].response.request.line.target, "/a");
    assert_eq!(saved[0].response.body, b"/a");
    assert_eq!(saved[1].response.request.line.target, "/b");
    assert_eq!(saved[1].response.body, b"/b");
    for exchange in &saved {
        assert_eq!(exchange.destination, OriginalDestination::new(upstream));
    }
}

/// Sends the first connection to `first` and every later one to `rest`.
struct FirstThenRest {
    calls: AtomicUsize,
    first: SocketAddr,
    rest: SocketAddr,
}

impl DestinationResolver for FirstThenRest {
    fn resolve(&self, _stream: &TcpStream) -> Result<OriginalDestination, ProxyError> {
        let addr = if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.first
        } else {
            self.rest
        };
        Ok(OriginalDestination::new(addr))
    }
}

#[tokio::test]
async fn failed_upstream_connect_closes_only_that_client() {
    let upstream = spawn_http_upstream().await;
    let unreachable = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let store = Arc::new(MemoryStore::new());
    let proxy = start_proxy(
        plain_config(),
        None,
        store.clone(),
        Arc::new(FirstThenRest {
            calls: AtomicUsize::new(0),
            first: upstream,
            rest: unreachable,
        }),
    )
    .await;

    let mut healthy = TcpStream::connect(proxy).await.unwrap();
    healthy
        .write_all(b"GET /one HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let expected = reply_for("/one");
    assert_eq!(read_exactly(&mut healthy, expected.len()).await, expected);

    let mut doomed = TcpStream::connect(proxy).await.unwrap();
    let _ = doomed.write_all(b"GET /lost HTTP/1.1\r\nHost: x\r\n\r\n").await;
    let mut rest = Vec::new();
    let closed = tokio::time::timeout(Duration::from_secs(5), doomed.read_to_end(&mut rest))
        .await
        .expect("connection was not closed");
    assert!(closed.is_err() || rest.is_empty());

    healthy
        .write_all(b"GET /two HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let expected = reply_for("/two");
    assert_eq!(read_exactly(&mut healthy, expected.len()).await, expected);

    wait_for_saves(&store, 2).await;
    let targets: Vec<String> = store
        .saved()
        .iter()
        .map(|exchange| exchange.response.request.line.target.clone())
        .collect();
    assert_eq!(targets, vec!["/one".to_string(), "/two".to_string()]);
}

#[tokio::test]
async fn connection_to_the_proxy_itself_is_refused() {
    let store = Arc::new(MemoryStore::new());
    let server = Proxy::bind(plain_config(), None, store.clone())
        .await
        .unwrap();
    let proxy = server.local_addr().unwrap();
    tokio::spawn(server.with_resolver(Arc::new(FixedDestination(proxy))).run());

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let _ = client.write_all(b"GET / HTTP/1.1\r\n\r\n").await;
    let mut rest = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut rest))
        .await
        .expect("connection was not closed");
    assert!(rest.is_empty());
    assert!(store.is_empty());
}

#[tokio::test]
async fn tls_port_without_interception_is_tunnelled() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        stream.write_all(&buf[..n]).await.unwrap();
    });

    let mut config = plain_config();
    config.tls.https_ports = vec![upstream.port()];
    let store = Arc::new(MemoryStore::new());
    let proxy = start_proxy(
        config,
        None,
        store.clone(),
        Arc::new(FixedDestination(upstream)),
    )
    .await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(b"\x16opaque bytes").await.unwrap();
    assert_eq!(read_exactly(&mut client, 13).await, b"\x16opaque bytes");
    assert!(store.is_empty());
}

#[tokio::test]
async fn tls_request_is_intercepted_and_saved_once() {
    let ca = generate_ca("upstream test authority").unwrap();
    let leaf = generate_leaf_cert(&["upstream.test"], &ca).unwrap();
    let acceptor = build_acceptor(&TlsConfig::default(), &leaf).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    let upstream_task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ssl = Ssl::new(acceptor.context()).unwrap();
        let mut tls = SslStream::new(ssl, stream).unwrap();
        Pin::new(&mut tls).accept().await.unwrap();
        let server_name = tls
            .ssl()
            .servername(NameType::HOST_NAME)
            .map(str::to_string);

        let head = read_head(&mut tls).await;
        assert!(head.starts_with(b"GET / HTTP/1.1\r\n"));
        tls.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();
        let mut rest = Vec::new();
        let _ = tls.read_to_end(&mut rest).await;
        server_name
    });

    let dir = tempfile::tempdir().unwrap();
    let mut config = plain_config();
    config.tls.enabled = true;
    config.tls.https_ports = vec![upstream.port()];
    config.tls.identity_hosts = vec!["localhost".to_string()];
    let contexts = InterceptionContexts::from_config(&config.tls, dir.path()).unwrap();

    let store = Arc::new(MemoryStore::new());
    let proxy = start_proxy(
        config,
        Some(contexts),
        store.clone(),
        Arc::new(FixedDestination(upstream)),
    )
    .await;

    let stream = TcpStream::connect(proxy).await.unwrap();
    let mut client = SslStream::new(client_tls_config(), stream).unwrap();
    Pin::new(&mut client).connect().await.unwrap();

    let peer_cert = client.ssl().peer_certificate().unwrap();
    let issuer = peer_cert
        .issuer_name()
        .entries_by_nid(openssl::nid::Nid::COMMONNAME)
        .next()
        .unwrap()
        .data()
        .as_utf8()
        .unwrap()
        .to_string();
    assert_eq!(issuer, "sluice interception CA");

    client
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let expected = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
    let mut received = vec![0u8; expected.len()];
    client.read_exact(&mut received).await.unwrap();
    assert_eq!(received, expected);

    wait_for_saves(&store, 1).await;
    client.shutdown().await.unwrap();
    drop(client);

    assert_eq!(upstream_task.await.unwrap().as_deref(), Some("localhost"));
    let saved = store.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].response.body, b"hello");
    assert_eq!(saved[0].destination, OriginalDestination::new(upstream));
}

fn client_tls_config() -> Ssl {
    let mut connector = SslConnector::builder(SslMethod::tls()).unwrap();
    connector.set_verify(SslVerifyMode::NONE);
    connector
        .build()
        .configure()
        .unwrap()
        .into_ssl("localhost")
        .unwrap()
}

#[tokio::test]
async fn failed_upstream_handshake_closes_only_that_client() {
    let healthy_upstream = spawn_http_upstream().await;

    // Answers in plaintext on a port the proxy treats as HTTPS.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let plaintext_upstream = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                .await;
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let mut config = plain_config();
    config.tls.enabled = true;
    config.tls.https_ports = vec![plaintext_upstream.port()];
    let contexts = InterceptionContexts::from_config(&config.tls, dir.path()).unwrap();

    let store = Arc::new(MemoryStore::new());
    let proxy = start_proxy(
        config,
        Some(contexts),
        store.clone(),
        Arc::new(FirstThenRest {
            calls: AtomicUsize::new(0),
            first: healthy_upstream,
            rest: plaintext_upstream,
        }),
    )
    .await;

    let mut healthy = TcpStream::connect(proxy).await.unwrap();
    healthy
        .write_all(b"GET /before HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let expected = reply_for("/before");
    assert_eq!(read_exactly(&mut healthy, expected.len()).await, expected);

    let stream = TcpStream::connect(proxy).await.unwrap();
    let mut doomed = SslStream::new(client_tls_config(), stream).unwrap();
    let handshake = tokio::time::timeout(Duration::from_secs(10), Pin::new(&mut doomed).connect())
        .await
        .expect("handshake was neither completed nor refused");
    assert!(handshake.is_err());

    healthy
        .write_all(b"GET /after HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let expected = reply_for("/after");
    assert_eq!(read_exactly(&mut healthy, expected.len()).await, expected);

    wait_for_saves(&store, 2).await;
    let targets: Vec<String> = store
        .saved()
        .iter()
        .map(|exchange| exchange.response.request.line.target.clone())
        .collect();
    assert_eq!(targets, vec!["/before".to_string(), "/after".to_string()]);
}
