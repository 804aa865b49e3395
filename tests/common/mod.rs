//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::future::BoxFuture;
use pkcs8::der::pem::LineEnding;
use pkcs8::pkcs5::pbes2;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tls_transport::server::{ConnectionHandler, HandlerResult, TlsServer};
use tls_transport::{
    listen, ChannelPair, ClientContext, Connector, InputStream, ListenOptions, OutputStream,
    ServeReport, StopSignal, TlsVersion,
};

/// Throw-away certificate and key on disk, valid for `localhost` and
/// `127.0.0.1`.
pub struct TestCerts {
    _dir: TempDir,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub cert_pem: String,
}

pub fn test_certs() -> TestCerts {
    write_certs(|certified| certified.key_pair.serialize_pem())
}

/// Like [`test_certs`], with the key stored as encrypted PKCS#8.
pub fn encrypted_test_certs(passphrase: &str) -> TestCerts {
    write_certs(|certified| {
        let params =
            pbes2::Parameters::pbkdf2_sha256_aes256cbc(2048, &[3u8; 16], &[5u8; 16]).unwrap();
        let der = certified.key_pair.serialize_der();
        pkcs8::PrivateKeyInfo::try_from(der.as_slice())
            .unwrap()
            .encrypt_with_params(params, passphrase)
            .unwrap()
            .to_pem("ENCRYPTED PRIVATE KEY", LineEnding::LF)
            .unwrap()
            .to_string()
    })
}

fn write_certs(key_pem: impl FnOnce(&rcgen::CertifiedKey) -> String) -> TestCerts {
    let certified =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");
    let cert_pem = certified.cert.pem();

    std::fs::write(&cert_path, &cert_pem).unwrap();
    std::fs::write(&key_path, key_pem(&certified)).unwrap();

    TestCerts {
        _dir: dir,
        cert_path,
        key_path,
        cert_pem,
    }
}

pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

pub fn listen_options(certs: &TestCerts) -> ListenOptions {
    ListenOptions::new(loopback(), &certs.cert_path, &certs.key_path)
}

/// Client that trusts only the test certificate.
pub fn client_context(certs: &TestCerts, version: TlsVersion) -> ClientContext {
    ClientContext::builder()
        .version(version)
        .add_ca_pem(certs.cert_pem.as_bytes(), &certs.cert_path)
        .unwrap()
        .build()
        .unwrap()
}

pub fn connector(certs: &TestCerts) -> Connector {
    Connector::new(client_context(certs, TlsVersion::Tls13))
        .with_connect_timeout(Some(Duration::from_secs(5)))
}

/// Write `message`, half-close, and read everything the server sends back.
pub async fn round_trip(mut pair: ChannelPair, message: &[u8]) -> Vec<u8> {
    pair.output.write_all(message).await.unwrap();
    pair.output.shutdown().await.unwrap();

    let mut reply = Vec::new();
    pair.input.read_to_end(&mut reply).await.unwrap();
    pair.close().await;
    reply
}

/// Echoes everything back and reports each peer it served.
pub struct EchoHandler {
    pub peers: mpsc::UnboundedSender<SocketAddr>,
}

impl ConnectionHandler for EchoHandler {
    fn handle<'a>(
        &'a self,
        peer: SocketAddr,
        input: &'a mut InputStream,
        output: &'a mut OutputStream,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let _ = self.peers.send(peer);
            tokio::io::copy(input, output).await?;
            Ok(())
        })
    }
}

/// Announces itself, then sleeps without touching the streams.
pub struct SleepyHandler {
    pub delay: Duration,
    pub started: mpsc::UnboundedSender<SocketAddr>,
}

impl ConnectionHandler for SleepyHandler {
    fn handle<'a>(
        &'a self,
        peer: SocketAddr,
        _input: &'a mut InputStream,
        _output: &'a mut OutputStream,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let _ = self.started.send(peer);
            tokio::time::sleep(self.delay).await;
            Ok(())
        })
    }
}

/// Writes 1 MiB chunks until the write fails or the handler is cancelled.
pub struct FloodHandler {
    pub started: mpsc::UnboundedSender<SocketAddr>,
}

impl ConnectionHandler for FloodHandler {
    fn handle<'a>(
        &'a self,
        peer: SocketAddr,
        _input: &'a mut InputStream,
        output: &'a mut OutputStream,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let _ = self.started.send(peer);
            let chunk = vec![0x5a; 1 << 20];
            loop {
                output.write_all(&chunk).await?;
            }
        })
    }
}

/// A running accept loop.
pub struct RunningServer {
    pub address: SocketAddr,
    pub stop: StopSignal,
    pub task: JoinHandle<ServeReport>,
}

impl RunningServer {
    /// Stop the loop and wait for its report.
    pub async fn shutdown(self) -> ServeReport {
        self.stop.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("accept loop did not stop")
            .unwrap()
    }
}

pub async fn start_server<H: ConnectionHandler>(
    options: ListenOptions,
    handler: H,
    timeout: Option<Duration>,
) -> RunningServer {
    let listener = listen(options).await.unwrap();
    let address = listener.local_addr();
    let stop = StopSignal::new();

    let server = TlsServer::new(listener, handler)
        .with_timeout(timeout)
        .with_stop(stop.subscribe());
    let task = tokio::spawn(server.run());

    RunningServer {
        address,
        stop,
        task,
    }
}

pub async fn start_echo_server(
    certs: &TestCerts,
) -> (RunningServer, mpsc::UnboundedReceiver<SocketAddr>) {
    let (peers, seen) = mpsc::unbounded_channel();
    let server = start_server(listen_options(certs), EchoHandler { peers }, None).await;
    (server, seen)
}
