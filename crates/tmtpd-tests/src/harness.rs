//! In-process server harness backed by scratch directories.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use tmtpd_queue::{Doors, OhiRegistry, Registry};
use tmtpd_server::link::LinkCtx;
use tmtpd_server::{listener, tls, Clock};
use tmtpd_store::Store;
use tmtpd_userdb::UserDb;

use crate::client::TestClient;

/// A live server on a loopback TLS port, with handles to its internals
/// for state assertions.
pub struct TestServer {
    /// Shared server state, for direct inspection.
    pub ctx: Arc<LinkCtx>,
    addr: SocketAddr,
    connector: TlsConnector,
    root: tempfile::TempDir,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    /// Boots a server against fresh scratch directories.
    pub async fn start() -> TestServer {
        let root = tempfile::tempdir().expect("scratch dir");
        TestServer::start_at(root).await
    }

    /// Boots a server against existing directories (restart scenarios
    /// reuse the previous server's tempdir).
    pub async fn start_at(root: tempfile::TempDir) -> TestServer {
        let store = Store::open(root.path().join("qstore")).expect("store");
        let udb = Arc::new(UserDb::open(root.path().join("userdb")).expect("userdb"));
        let ctx = Arc::new(LinkCtx {
            store,
            udb,
            registry: Arc::new(Registry::new()),
            ohi: Arc::new(OhiRegistry::new()),
            doors: Doors::new(),
            clock: Clock::system(),
        });

        let key = rcgen::KeyPair::generate().expect("key");
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .expect("cert params")
            .self_signed(&key)
            .expect("self signed");
        let acceptor =
            tls::acceptor_from_pem(cert.pem().as_bytes(), key.serialize_pem().as_bytes())
                .expect("acceptor");

        let _ = rustls::crypto::ring::default_provider().install_default();
        let mut roots = rustls::RootCertStore::empty();
        roots.add(cert.der().clone()).expect("trust anchor");
        let client_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(client_config));

        let tcp = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = tcp.local_addr().expect("addr");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let serve_ctx = ctx.clone();
        tokio::spawn(async move {
            let _ = listener::serve(serve_ctx, tcp, acceptor, async {
                let _ = shutdown_rx.await;
            })
            .await;
        });

        TestServer {
            ctx,
            addr,
            connector,
            root,
            _shutdown: shutdown_tx,
        }
    }

    /// Opens a TLS connection and wraps it in a test client.
    pub async fn connect(&self) -> TestClient<TlsStream<TcpStream>> {
        let tcp = TcpStream::connect(self.addr).await.expect("connect");
        let name = ServerName::try_from("localhost".to_string()).expect("server name");
        let stream = self.connector.connect(name, tcp).await.expect("handshake");
        TestClient::new(stream)
    }

    /// The message-store directory, for on-disk assertions.
    pub fn qstore_path(&self) -> PathBuf {
        self.root.path().join("qstore")
    }

    /// Tears the server down, releasing the scratch directories for a
    /// restarted instance.
    pub fn into_root(self) -> tempfile::TempDir {
        self.root
    }
}
