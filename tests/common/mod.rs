//! In-process mock LDAP server for integration tests
//!
//! Speaks just enough LDAPv3 through the crate's own codec. What a search
//! returns depends on its base DN:
//!
//! | base                            | behaviour                                |
//! |---------------------------------|------------------------------------------|
//! | `dc=example,dc=com`             | 5 entries, a reference, success          |
//! | `ou=big,dc=example,dc=com`      | 200 entries, success                     |
//! | `ou=<name>,dc=example,dc=com`   | 10 entries under the base, success       |
//! | `ou=slow,dc=example,dc=com`     | 1 entry, then never finishes             |
//! | `ou=missing,dc=example,dc=com`  | noSuchObject                             |
//! | `ou=gone,dc=example,dc=com`     | server closes the socket                 |
//! | `ou=notice,dc=example,dc=com`   | notice of disconnection (unavailable)    |
//!
//! StartTLS is refused unless the server was started with
//! [`StartTls::Accept`], in which case the session continues over TLS with
//! the certificate in `tests/fixtures`.

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use ldap_wire::protocol::constants::oid;
use ldap_wire::protocol::{
    decode_message, encode_message, BindAuth, BindResponse, ExtendedResponse, LdapMessage,
    PartialAttribute, ProtocolOp, ResultInfo, SearchEntry, SearchRequest,
};
use rustls_pki_types::CertificateDer;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

pub const BASE: &str = "dc=example,dc=com";
pub const ADMIN_DN: &str = "cn=admin,dc=example,dc=com";
pub const ADMIN_PASSWORD: &str = "secret";
pub const WHOAMI_OID: &str = "1.3.6.1.4.1.4203.1.11.3";

const SUCCESS: i32 = 0;
const NO_SUCH_OBJECT: i32 = 32;
const INVALID_CREDENTIALS: i32 = 49;
const UNAVAILABLE: i32 = 52;
const PROTOCOL_ERROR: i32 = 2;
const OPERATIONS_ERROR: i32 = 1;

const SERVER_CERT: &[u8] = include_bytes!("../fixtures/server.crt");
const SERVER_KEY: &[u8] = include_bytes!("../fixtures/server.key");

/// How the server answers StartTLS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartTls {
    /// unavailable, "TLS not configured"
    Refuse,
    /// success, then a TLS handshake
    Accept,
    /// success with a stray frame in the same write
    AcceptWithTrailingData,
}

/// The fixture certificate in DER
pub fn server_certificate() -> CertificateDer<'static> {
    rustls_pemfile::certs(&mut &SERVER_CERT[..])
        .next()
        .expect("certificate in fixture")
        .expect("valid PEM")
}

fn tls_acceptor() -> TlsAcceptor {
    let key = rustls_pemfile::private_key(&mut &SERVER_KEY[..])
        .expect("valid PEM")
        .expect("key in fixture");
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![server_certificate()], key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

enum Out {
    Frame(BytesMut),
    Close,
    /// stop writing and give the write half back
    Handoff,
}

enum Next {
    Continue,
    End,
    Upgrade,
}

/// What the server saw, for assertions
#[derive(Debug, Default)]
pub struct Seen {
    pub abandoned: Vec<i32>,
    pub unbinds: usize,
    pub connections: usize,
    pub tls_sessions: usize,
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub seen: Arc<Mutex<Seen>>,
    accept: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(StartTls::Refuse).await
    }

    pub async fn start_with(start_tls: StartTls) -> Self {
        let acceptor = (start_tls != StartTls::Refuse).then(tls_acceptor);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Seen::default()));

        let accept_seen = seen.clone();
        let accept = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_seen.lock().unwrap().connections += 1;
                tokio::spawn(serve(
                    socket,
                    accept_seen.clone(),
                    start_tls,
                    acceptor.clone(),
                ));
            }
        });

        Self { addr, seen, accept }
    }

    pub fn url(&self) -> String {
        format!("ldap://{}", self.addr)
    }

    pub fn abandoned(&self) -> Vec<i32> {
        self.seen.lock().unwrap().abandoned.clone()
    }

    pub fn unbinds(&self) -> usize {
        self.seen.lock().unwrap().unbinds
    }

    pub fn tls_sessions(&self) -> usize {
        self.seen.lock().unwrap().tls_sessions
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(
    socket: TcpStream,
    seen: Arc<Mutex<Seen>>,
    start_tls: StartTls,
    acceptor: Option<TlsAcceptor>,
) {
    let Some(socket) = session(socket, seen.clone(), start_tls).await else {
        return;
    };
    let Some(acceptor) = acceptor else {
        return;
    };
    match acceptor.accept(socket).await {
        Ok(stream) => {
            seen.lock().unwrap().tls_sessions += 1;
            session(stream, seen, StartTls::Refuse).await;
        }
        Err(e) => tracing::debug!(error = %e, "mock TLS handshake failed"),
    }
}

/// One session: a read loop here, a writer task fed by a channel, and a
/// task per search so responses to concurrent searches interleave.
///
/// Returns the stream after an accepted StartTLS.
async fn session<S>(stream: S, seen: Arc<Mutex<Seen>>, start_tls: StartTls) -> Option<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut read_half, write_half) = tokio::io::split(stream);
    let (tx, rx) = mpsc::unbounded_channel::<Out>();
    let writer = tokio::spawn(write_loop(write_half, rx));

    let mut buf = BytesMut::with_capacity(4096);
    let mut upgrade = false;
    'session: loop {
        loop {
            match decode_message(&mut buf) {
                Ok((msg, len)) => {
                    let _ = buf.split_to(len);
                    match handle(msg, &tx, &seen, start_tls) {
                        Next::Continue => {}
                        Next::End => break 'session,
                        Next::Upgrade => {
                            upgrade = true;
                            break 'session;
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(_) => break 'session,
            }
        }
        match read_half.read_buf(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }

    if upgrade {
        let _ = tx.send(Out::Handoff);
        return match writer.await {
            Ok(Some(write_half)) => Some(read_half.unsplit(write_half)),
            _ => None,
        };
    }
    let _ = tx.send(Out::Close);
    let _ = writer.await;
    None
}

async fn write_loop<W>(mut write_half: W, mut rx: mpsc::UnboundedReceiver<Out>) -> Option<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(out) = rx.recv().await {
        match out {
            Out::Frame(buf) => {
                let written = match write_half.write_all(&buf).await {
                    Ok(()) => write_half.flush().await,
                    Err(e) => Err(e),
                };
                if written.is_err() {
                    return None;
                }
            }
            Out::Close => {
                let _ = write_half.shutdown().await;
                return None;
            }
            Out::Handoff => return Some(write_half),
        }
    }
    None
}

fn send(tx: &mpsc::UnboundedSender<Out>, msgid: i32, op: ProtocolOp) {
    let buf = encode_message(&LdapMessage::new(msgid, op)).unwrap();
    let _ = tx.send(Out::Frame(buf));
}

fn handle(
    msg: LdapMessage,
    tx: &mpsc::UnboundedSender<Out>,
    seen: &Arc<Mutex<Seen>>,
    start_tls: StartTls,
) -> Next {
    let msgid = msg.message_id;
    match msg.op {
        ProtocolOp::BindRequest(req) => {
            let password = match &req.auth {
                BindAuth::Simple(p) => p.clone(),
                BindAuth::Sasl { .. } => Vec::new(),
            };
            let code = match (req.name.as_str(), password.as_slice()) {
                ("", []) => SUCCESS,
                (ADMIN_DN, p) if p == ADMIN_PASSWORD.as_bytes() => SUCCESS,
                _ => INVALID_CREDENTIALS,
            };
            send(
                tx,
                msgid,
                ProtocolOp::BindResponse(BindResponse {
                    result: ResultInfo::with_code(code),
                    server_sasl_creds: None,
                }),
            );
            Next::Continue
        }
        ProtocolOp::SearchRequest(req) => {
            if search(msgid, req, tx.clone()) {
                Next::Continue
            } else {
                Next::End
            }
        }
        ProtocolOp::ExtendedRequest(req) if req.name == oid::START_TLS => {
            accept_start_tls(msgid, tx, start_tls)
        }
        ProtocolOp::ExtendedRequest(req) => {
            let (result, value) = match req.name.as_str() {
                WHOAMI_OID => (
                    ResultInfo::with_code(SUCCESS),
                    Some(Bytes::from_static(b"dn:")),
                ),
                _ => (
                    ResultInfo::with_diagnostic(PROTOCOL_ERROR, "unsupported extended operation"),
                    None,
                ),
            };
            send(
                tx,
                msgid,
                ProtocolOp::ExtendedResponse(ExtendedResponse {
                    result,
                    name: None,
                    value,
                }),
            );
            Next::Continue
        }
        ProtocolOp::AbandonRequest(target) => {
            seen.lock().unwrap().abandoned.push(target);
            Next::Continue
        }
        ProtocolOp::UnbindRequest => {
            seen.lock().unwrap().unbinds += 1;
            Next::End
        }
        _ => Next::Continue,
    }
}

fn accept_start_tls(msgid: i32, tx: &mpsc::UnboundedSender<Out>, start_tls: StartTls) -> Next {
    let result = match start_tls {
        StartTls::Refuse => ResultInfo::with_diagnostic(UNAVAILABLE, "TLS not configured"),
        _ => ResultInfo::with_code(SUCCESS),
    };
    let mut buf = encode_message(&LdapMessage::new(
        msgid,
        ProtocolOp::ExtendedResponse(ExtendedResponse {
            result,
            name: Some(oid::START_TLS.to_string()),
            value: None,
        }),
    ))
    .unwrap();

    match start_tls {
        StartTls::Refuse => {
            let _ = tx.send(Out::Frame(buf));
            Next::Continue
        }
        StartTls::Accept => {
            let _ = tx.send(Out::Frame(buf));
            Next::Upgrade
        }
        StartTls::AcceptWithTrailingData => {
            let stray = encode_message(&LdapMessage::new(
                msgid + 1,
                ProtocolOp::SearchResultDone(ResultInfo::with_code(OPERATIONS_ERROR)),
            ))
            .unwrap();
            buf.extend_from_slice(&stray);
            let _ = tx.send(Out::Frame(buf));
            Next::Upgrade
        }
    }
}

fn entry(dn: String, i: usize) -> ProtocolOp {
    ProtocolOp::SearchResultEntry(SearchEntry {
        dn,
        attributes: vec![
            PartialAttribute {
                name: "objectClass".into(),
                values: vec![Bytes::from_static(b"person")],
            },
            PartialAttribute {
                name: "uid".into(),
                values: vec![Bytes::from(format!("user{}", i))],
            },
        ],
    })
}

fn search(msgid: i32, req: SearchRequest, tx: mpsc::UnboundedSender<Out>) -> bool {
    let base = req.base.to_ascii_lowercase();
    match base.as_str() {
        "ou=gone,dc=example,dc=com" => return false,
        "ou=notice,dc=example,dc=com" => {
            send(
                &tx,
                0,
                ProtocolOp::ExtendedResponse(ExtendedResponse {
                    result: ResultInfo::with_diagnostic(UNAVAILABLE, "shutting down"),
                    name: Some(oid::NOTICE_OF_DISCONNECTION.to_string()),
                    value: None,
                }),
            );
            return false;
        }
        "ou=missing,dc=example,dc=com" => {
            send(
                &tx,
                msgid,
                ProtocolOp::SearchResultDone(ResultInfo {
                    code: NO_SUCH_OBJECT,
                    matched_dn: BASE.into(),
                    diagnostic: "no such object".into(),
                    referrals: vec![],
                }),
            );
            return true;
        }
        _ => {}
    }

    tokio::spawn(async move {
        let (count, slow) = match base.as_str() {
            BASE => (5, false),
            "ou=big,dc=example,dc=com" => (200, false),
            "ou=slow,dc=example,dc=com" => (1, true),
            _ => (10, false),
        };
        let limit = match req.size_limit {
            0 => count,
            n => count.min(n as usize),
        };

        for i in 0..limit {
            let dn = format!("uid=user{},{}", i, req.base);
            send(&tx, msgid, entry(dn, i));
            tokio::task::yield_now().await;
        }
        if slow {
            return;
        }
        if base == BASE {
            send(
                &tx,
                msgid,
                ProtocolOp::SearchResultReference(vec!["ldap://other.example.com/".into()]),
            );
        }
        let code = if limit < count { 4 } else { SUCCESS };
        send(&tx, msgid, ProtocolOp::SearchResultDone(ResultInfo::with_code(code)));
    });
    true
}
