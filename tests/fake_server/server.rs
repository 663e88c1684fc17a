//! In-process fake ROP server for integration testing
//!
//! ## Connection lifecycle
//!
//! ```text
//!   Client connects via TCP
//!       |
//!   TLS handshake (self-signed certificate)
//!       |
//!   Connect with user DN, username, password -> session context handle
//!       |
//!   Execute (ROP batches), AsyncConnect / AsyncWait, RegisterPush
//!       |
//!   Disconnect, or the connection drops and the context goes with it
//! ```
//!
//! Every call is one `[call:1][len:4][payload]` frame from the client
//! answered by one `[status:4][len:4][payload]` frame, using the frame
//! helpers the client itself uses.

use super::handlers::{
    handle_async_connect, handle_async_wait, handle_connect, handle_disconnect, handle_execute,
    handle_register_push,
};
use super::store::Store;
use mapi_rop_client::connection::{read_request, write_reply};
use mapi_rop_client::wire::RopId;
use mapi_rop_client::{ConnectionConfig, call, status};
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

/// A fake ROP server on localhost with an OS-assigned port.
///
/// The server generates a self-signed TLS certificate at startup using
/// `rcgen`, so no cert files are needed.
pub struct FakeRopServer {
    port: u16,
    store: Arc<Mutex<Store>>,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeRopServer {
    /// Start a new fake server over `store`.
    ///
    /// The server runs until the `FakeRopServer` is dropped.
    pub async fn start(store: Store) -> Self {
        // Multiple tests may race to install the provider; ignore the
        // error if it is already set.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let store = Arc::new(Mutex::new(store));

        let shared = Arc::clone(&store);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let store = Arc::clone(&shared);
                tokio::spawn(async move {
                    handle_connection(stream, acceptor, store).await;
                });
            }
        });

        Self {
            port,
            store,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Connection settings for a client of this server.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: self.port,
            user_dn: "/o=Test/ou=First Administrative Group/cn=Recipients/cn=tester".to_string(),
            username: "tester".to_string(),
            password: super::store::PASSWORD.to_string(),
        }
    }

    /// Run `f` against the store under its lock.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut Store) -> R) -> R {
        f(&mut self.store.lock().unwrap())
    }

    /// Requests of kind `rop` seen so far.
    pub fn rop_calls(&self, rop: RopId) -> usize {
        self.with_store(|store| store.rop_calls.get(&rop).copied().unwrap_or(0))
    }

    /// `Execute` calls handled so far.
    pub fn execute_calls(&self) -> usize {
        self.with_store(|store| store.execute_calls)
    }
}

/// Serve one client connection until it closes.
async fn handle_connection(stream: TcpStream, acceptor: TlsAcceptor, store: Arc<Mutex<Store>>) {
    let peer = stream.peer_addr().ok();
    let Ok(mut tls) = acceptor.accept(stream).await else {
        return;
    };

    let mut cxh = None;
    loop {
        let Ok(Some((code, payload))) = read_request(&mut tls).await else {
            break;
        };
        let (status, reply) = match code {
            call::CONNECT => handle_connect(&store, &payload, &mut cxh),
            call::DISCONNECT => handle_disconnect(&store, &payload, &mut cxh),
            call::EXECUTE => handle_execute(&store, &payload),
            call::ASYNC_CONNECT => handle_async_connect(&store, &payload),
            call::ASYNC_WAIT => handle_async_wait(&store, &payload).await,
            call::REGISTER_PUSH => handle_register_push(&store, &payload, peer),
            _ => (status::RPC_FORMAT, Vec::new()),
        };
        if write_reply(&mut tls, status, &reply).await.is_err() {
            break;
        }
    }

    if let Some(cxh) = cxh {
        store.lock().unwrap().close_context(cxh);
    }
}
