//! Core connection type

use super::dispatch::Dispatcher;
use super::options::{LdapOption, OptionValue, Options, TLS_PACKAGE};
use super::reader::{self, ReaderExit};
use super::search::{time_limit_secs, Scope, SearchOptions};
use super::state::ConnectionState;
use super::tls::TlsConfig;
use super::transport::Transport;
use crate::client::{LdapUrl, UrlScheme};
use crate::error::{LdapError, ResultCode};
use crate::metrics::{counters, histograms, labels};
use crate::protocol::constants::{oid, LDAP_PORT};
use crate::protocol::filter::DEFAULT_FILTER;
use crate::protocol::{
    encode_message, BindAuth, BindRequest, Control, ExtendedRequest, Filter, LdapMessage,
    ProtocolOp, SearchRequest,
};
use crate::result::{Message, Operation, OperationKind, OperationState};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::Instrument;
use zeroize::Zeroize;

/// Write side of the transport plus what StartTLS needs to re-handshake
#[derive(Default)]
struct Link {
    writer: Option<WriteHalf<Transport>>,
    /// TCP host of the live transport, `None` for Unix sockets
    host: Option<String>,
}

/// State shared by a connection's handles, its reader task, and the
/// operations and messages it produced (the latter through `Weak`)
pub(crate) struct Shared {
    uris: Vec<LdapUrl>,
    options: RwLock<Options>,
    link: Mutex<Link>,
    dispatcher: Arc<Dispatcher>,
    state: std::sync::Mutex<ConnectionState>,
    fd: AtomicI32,
    tls_active: AtomicBool,
    reader: std::sync::Mutex<Option<JoinHandle<ReaderExit>>>,
    tls_context: std::sync::Mutex<Option<TlsConfig>>,
    channel_binding: std::sync::Mutex<Option<Vec<u8>>>,
}

fn lock<T>(m: &std::sync::Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn server_down(reason: impl Into<String>) -> LdapError {
    LdapError::new(ResultCode::ServerDown, reason)
}

impl Shared {
    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn state(&self) -> ConnectionState {
        let state = *lock(&self.state);
        if state == ConnectionState::Connected && self.dispatcher.closed().is_some() {
            return ConnectionState::Closed;
        }
        state
    }

    fn set_state(&self, next: ConnectionState) -> Result<()> {
        lock(&self.state).transition(next)
    }

    fn tls_context(&self, options: &Options) -> Result<TlsConfig> {
        let mut cached = lock(&self.tls_context);
        if let Some(ctx) = cached.as_ref() {
            return Ok(ctx.clone());
        }
        let ctx = TlsConfig::from_options(&options.tls)?;
        *cached = Some(ctx.clone());
        Ok(ctx)
    }

    async fn ensure_connected(&self, options: &Options, link: &mut Link) -> Result<()> {
        let state = self.state();
        if state.is_usable() {
            return Ok(());
        }
        match state {
            ConnectionState::Initialized => self.connect_locked(options, link).await,
            ConnectionState::Closed => Err(Error::Library(
                self.dispatcher
                    .closed()
                    .unwrap_or_else(|| server_down("connection closed")),
            )),
            other => Err(Error::IllegalState(format!("connection is {}", other))),
        }
    }

    /// Try each URI in order; the network timeout bounds every attempt
    async fn connect_locked(&self, options: &Options, link: &mut Link) -> Result<()> {
        self.set_state(ConnectionState::Connecting)?;

        let tls = if self.uris.iter().any(|u| u.scheme == UrlScheme::Ldaps) {
            match self.tls_context(options) {
                Ok(ctx) => Some(ctx),
                Err(e) => {
                    self.set_state(ConnectionState::Initialized)?;
                    return Err(e);
                }
            }
        } else {
            None
        };

        let span = tracing::info_span!("connect", uris = self.uris.len());
        let attempt = async {
            let mut last_error = None;
            for url in &self.uris {
                let attempt = open_transport(url, tls.as_ref());
                let outcome = match options.network_timeout() {
                    Some(limit) => tokio::time::timeout(limit, attempt)
                        .await
                        .unwrap_or_else(|_| {
                            Err(Error::Library(LdapError::new(
                                ResultCode::Timeout,
                                format!("connect timed out after {:?}", limit),
                            )))
                        }),
                    None => attempt.await,
                };
                match outcome {
                    Ok(transport) => {
                        tracing::info!(uri = %url, tls = transport.is_tls(), "connected");
                        return Ok((url, transport));
                    }
                    Err(e) => {
                        tracing::debug!(uri = %url, error = %e, "connect attempt failed");
                        last_error = Some(e);
                    }
                }
            }
            Err(last_error)
        }
        .instrument(span)
        .await;

        match attempt {
            Ok((url, transport)) => {
                link.host = match url.scheme {
                    UrlScheme::Ldapi => None,
                    _ => Some(url.host_or_default().to_string()),
                };
                self.install(link, transport, BytesMut::new());
                self.set_state(ConnectionState::Connected)
            }
            Err(last_error) => {
                self.set_state(ConnectionState::Initialized)?;
                counters::connection_error(labels::REASON_CONNECT);
                let reason = last_error.map_or_else(|| "no URI".to_string(), |e| e.to_string());
                Err(Error::Library(server_down(format!(
                    "can't contact LDAP server: {}",
                    reason
                ))))
            }
        }
    }

    /// Split a fresh transport and start its reader
    fn install(&self, link: &mut Link, transport: Transport, leftover: BytesMut) {
        self.fd.store(transport.raw_fd(), Ordering::Release);
        self.tls_active.store(transport.is_tls(), Ordering::Release);
        *lock(&self.channel_binding) = transport.channel_binding_data();

        let (read_half, write_half) = tokio::io::split(transport);
        link.writer = Some(write_half);
        self.spawn_reader(read_half, leftover);
    }

    fn spawn_reader(&self, read_half: ReadHalf<Transport>, leftover: BytesMut) {
        let handle = tokio::spawn(reader::run(read_half, leftover, self.dispatcher.clone()));
        *lock(&self.reader) = Some(handle);
    }

    /// Wait for the reader to hand the read half back
    async fn take_handoff(&self) -> Result<(ReadHalf<Transport>, BytesMut)> {
        let handle = lock(&self.reader).take();
        let Some(handle) = handle else {
            return Err(Error::IllegalState("reader is not running".into()));
        };
        match handle.await {
            Ok(ReaderExit::Handoff {
                read_half,
                leftover,
            }) => Ok((read_half, leftover)),
            _ => Err(Error::Library(
                self.dispatcher
                    .closed()
                    .unwrap_or_else(|| server_down("reader stopped")),
            )),
        }
    }

    /// Close the dispatcher and stop reading; the connection is unusable after
    fn teardown(&self, err: LdapError) {
        self.dispatcher.close(err);
        if let Some(handle) = lock(&self.reader).take() {
            handle.abort();
        }
        self.fd.store(-1, Ordering::Release);
        self.tls_active.store(false, Ordering::Release);
        *lock(&self.state) = ConnectionState::Closed;
    }

    /// Encode, send, and scrub one request
    async fn write(&self, link: &mut Link, msg: &mut LdapMessage) -> Result<()> {
        let encoded = encode_message(msg);
        msg.clear_secrets();
        let mut buf = encoded.map_err(|e| Error::Protocol(format!("encode failed: {}", e)))?;

        let Some(writer) = link.writer.as_mut() else {
            buf[..].zeroize();
            return Err(Error::IllegalState("not connected".into()));
        };
        let written = match writer.write_all(&buf).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        buf[..].zeroize();

        if let Err(e) = written {
            tracing::warn!(error = %e, "write failed");
            counters::connection_error(labels::REASON_WRITE);
            let err = server_down(e.to_string());
            self.dispatcher.close(err.clone());
            return Err(Error::Library(err));
        }
        Ok(())
    }

    /// Mark `msgid` abandoned locally, then tell the server
    pub(crate) async fn abandon(&self, msgid: i32, controls: &[Control]) -> Result<()> {
        self.dispatcher.abandon(msgid);
        counters::abandon();
        tracing::debug!(msgid, "abandoning");

        let _options = self.options.read().await;
        let mut link = self.link.lock().await;
        let id = self.dispatcher.register(false)?;
        let mut msg = LdapMessage::new(id, ProtocolOp::AbandonRequest(msgid))
            .with_controls(controls.to_vec());
        let sent = self.write(&mut link, &mut msg).await;
        self.dispatcher.release(id);
        if let Err(e) = &sent {
            tracing::warn!(msgid, error = %e, "abandon request not sent");
        }
        sent
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.dispatcher.close(server_down("connection dropped"));
        if let Some(handle) = lock(&self.reader).take() {
            handle.abort();
        }
    }
}

async fn open_transport(url: &LdapUrl, tls: Option<&TlsConfig>) -> Result<Transport> {
    let host = url.host_or_default();
    let port = url
        .port
        .or_else(|| url.scheme.default_port())
        .unwrap_or(LDAP_PORT);
    match url.scheme {
        UrlScheme::Ldap => Transport::connect_tcp(host, port).await,
        UrlScheme::Ldaps => {
            let tls = tls.ok_or_else(|| Error::Config("no TLS context for ldaps".into()))?;
            let started = Instant::now();
            match Transport::connect_tcp_tls(host, port, tls).await {
                Ok(transport) => {
                    histograms::tls_handshake(started.elapsed().as_millis() as u64);
                    counters::tls_upgrade(labels::RESULT_OK);
                    Ok(transport)
                }
                Err(e) => {
                    counters::tls_upgrade(labels::RESULT_FAILED);
                    Err(e)
                }
            }
        }
        UrlScheme::Ldapi => Transport::connect_unix(&url.socket_path()).await,
    }
}

/// An LDAP connection
///
/// One connection owns one socket and multiplexes any number of outstanding
/// requests over it by message id. Requests return an [`Operation`] whose
/// `fetch` yields [`Message`]s. Cloning the connection shares the socket.
///
/// # Examples
///
/// ```ignore
/// use ldap_wire::{Connection, Scope};
///
/// let conn = Connection::new(["ldap://localhost"])?;
/// conn.bind_and_wait(Some("cn=admin,dc=example,dc=com"), Some("secret")).await?;
///
/// let op = conn.search("dc=example,dc=com", Scope::Subtree, Some("(uid=jdoe)")).await?;
/// loop {
///     let msg = op.fetch(None).await?;
///     for entry in msg.entries()? {
///         println!("{}", entry.dn);
///     }
///     if msg.is_terminal() {
///         msg.check()?;
///         break;
///     }
/// }
/// ```
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Create a connection with default options.
    ///
    /// Each string may hold several whitespace-separated URIs; they are tried
    /// in order on connect. Nothing is sent until [`Connection::connect`] or
    /// the first request.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUrl`] if any URI is not a valid LDAP URL or none is given.
    pub fn new<I, S>(uris: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_options(uris, Options::default())
    }

    /// Create a connection with explicit options
    pub fn with_options<I, S>(uris: I, options: Options) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for item in uris {
            for uri in item.as_ref().split_whitespace() {
                let url = LdapUrl::parse(uri).map_err(|e| match e {
                    Error::MalformedUrl { url, reason } => Error::InvalidUrl { url, reason },
                    other => other,
                })?;
                if url.has_query() {
                    tracing::info!(uri, "only scheme, host and port of a connection URI are used");
                }
                parsed.push(url.simplified());
            }
        }
        if parsed.is_empty() {
            return Err(Error::InvalidUrl {
                url: String::new(),
                reason: "no URI given".into(),
            });
        }

        Ok(Self {
            shared: Arc::new(Shared {
                uris: parsed,
                options: RwLock::new(options),
                link: Mutex::new(Link::default()),
                dispatcher: Arc::new(Dispatcher::new()),
                state: std::sync::Mutex::new(ConnectionState::Initialized),
                fd: AtomicI32::new(-1),
                tls_active: AtomicBool::new(false),
                reader: std::sync::Mutex::new(None),
                tls_context: std::sync::Mutex::new(None),
                channel_binding: std::sync::Mutex::new(None),
            }),
        })
    }

    /// Create a connection and connect it, unless `async_connect` defers
    /// the connect to the first request
    pub async fn open<I, S>(uris: I, options: Options) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let deferred = options.async_connect;
        let conn = Self::with_options(uris, options)?;
        if !deferred {
            conn.connect().await?;
        }
        Ok(conn)
    }

    /// Establish the transport.
    ///
    /// # Errors
    ///
    /// - [`Error::IllegalState`] if a transport was already established
    /// - [`Error::Library`] with `ServerDown` if no URI could be reached
    pub async fn connect(&self) -> Result<()> {
        let options = self.shared.options.read().await;
        let mut link = self.shared.link.lock().await;
        if link.writer.is_some() || self.shared.state() != ConnectionState::Initialized {
            return Err(Error::IllegalState(
                "connection is already initialized".into(),
            ));
        }
        self.shared.connect_locked(&options, &mut link).await
    }

    async fn dispatch(
        &self,
        kind: OperationKind,
        op: ProtocolOp,
        controls: Vec<Control>,
    ) -> Result<Operation> {
        let mut msg = LdapMessage::new(0, op).with_controls(controls);
        let result = self.dispatch_message(kind, &mut msg).await;
        msg.clear_secrets();
        result
    }

    async fn dispatch_message(
        &self,
        kind: OperationKind,
        msg: &mut LdapMessage,
    ) -> Result<Operation> {
        let options = self.shared.options.read().await;
        let mut link = self.shared.link.lock().await;
        self.shared.ensure_connected(&options, &mut link).await?;

        let msgid = self.shared.dispatcher.register(false)?;
        msg.message_id = msgid;
        if let Err(e) = self.shared.write(&mut link, msg).await {
            self.shared.dispatcher.release(msgid);
            return Err(e);
        }

        tracing::debug!(msgid, kind = kind.as_str(), "dispatched");
        counters::operation_dispatched(kind.as_str());
        Ok(Operation::new(msgid, kind, Arc::downgrade(&self.shared)))
    }

    /// Send a simple bind.
    ///
    /// `None` or empty DN and password make an anonymous bind. The password
    /// is overwritten in every buffer it was copied to before this returns.
    pub async fn bind(&self, dn: Option<&str>, password: Option<&str>) -> Result<Operation> {
        let version = self.shared.options.read().await.protocol_version;
        let op = ProtocolOp::BindRequest(BindRequest {
            version,
            name: dn.unwrap_or_default().to_string(),
            auth: BindAuth::Simple(password.unwrap_or_default().as_bytes().to_vec()),
        });
        self.dispatch(OperationKind::Bind, op, Vec::new()).await
    }

    /// Simple bind, waiting for the result
    pub async fn bind_and_wait(&self, dn: Option<&str>, password: Option<&str>) -> Result<Message> {
        self.bind(dn, password).await?.wait_done().await
    }

    /// Send a SASL bind step; mechanism negotiation is up to the caller
    pub async fn sasl_bind(
        &self,
        dn: Option<&str>,
        mechanism: &str,
        credentials: Option<&[u8]>,
    ) -> Result<Operation> {
        let version = self.shared.options.read().await.protocol_version;
        let op = ProtocolOp::BindRequest(BindRequest {
            version,
            name: dn.unwrap_or_default().to_string(),
            auth: BindAuth::Sasl {
                mechanism: mechanism.to_string(),
                credentials: credentials.map(<[u8]>::to_vec),
            },
        });
        self.dispatch(OperationKind::Bind, op, Vec::new()).await
    }

    /// Search with default parameters (all attributes, no limits)
    pub async fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: Option<&str>,
    ) -> Result<Operation> {
        self.search_ext(base, scope, filter, SearchOptions::default())
            .await
    }

    /// Search.
    ///
    /// A missing or empty filter means `(objectClass=*)`. Without an explicit
    /// timeout the search timeout option sets the server-side time limit.
    ///
    /// # Errors
    ///
    /// - [`Error::Library`] with `FilterError` for an unparseable filter
    /// - [`Error::Library`] with `NotSupported` for a critical client control
    pub async fn search_ext(
        &self,
        base: &str,
        scope: Scope,
        filter: Option<&str>,
        opts: SearchOptions,
    ) -> Result<Operation> {
        reject_critical(&opts.client_controls)?;
        let filter = Filter::parse(filter.filter(|f| !f.is_empty()).unwrap_or(DEFAULT_FILTER))?;

        let time_limit = match opts.timeout {
            Some(timeout) => time_limit_secs(timeout),
            None => self
                .shared
                .options
                .read()
                .await
                .search_timeout()
                .map_or(0, time_limit_secs),
        };

        let op = ProtocolOp::SearchRequest(SearchRequest {
            base: base.to_string(),
            scope: scope.code(),
            deref: opts.deref.code(),
            size_limit: opts.size_limit.unwrap_or(0),
            time_limit,
            types_only: opts.attrs_only,
            filter,
            attributes: opts.attrs,
        });
        self.dispatch(OperationKind::Search, op, opts.server_controls)
            .await
    }

    /// Send an extended operation. StartTLS goes through [`Connection::start_tls`].
    pub async fn extended(&self, name: &str, value: Option<&[u8]>) -> Result<Operation> {
        if name == oid::START_TLS {
            return Err(Error::InvalidArgument(
                "use start_tls for the StartTLS operation".into(),
            ));
        }
        let op = ProtocolOp::ExtendedRequest(ExtendedRequest {
            name: name.to_string(),
            value: value.map(Bytes::copy_from_slice),
        });
        self.dispatch(OperationKind::Extended, op, Vec::new()).await
    }

    /// Abandon a request by message id.
    ///
    /// Local handles for `msgid` fail with [`Error::OperationAbandoned`]
    /// from now on, whether or not the request reaches the server.
    pub async fn abandon(&self, msgid: i32, controls: &[Control]) -> Result<()> {
        self.shared.abandon(msgid, controls).await
    }

    /// Upgrade the connection to TLS in place.
    ///
    /// New requests wait until the handshake finishes. A refusal from the
    /// server leaves the plain connection usable; a failed handshake closes
    /// the connection.
    pub async fn start_tls(&self) -> Result<()> {
        let shared = &self.shared;
        async move {
            let options = shared.options.read().await;
            let mut link = shared.link.lock().await;
            shared.ensure_connected(&options, &mut link).await?;

            if shared.tls_active.load(Ordering::Acquire) {
                return Err(Error::Library(LdapError::new(
                    ResultCode::LocalError,
                    "TLS already started",
                )));
            }
            let Some(host) = link.host.clone() else {
                return Err(Error::Library(LdapError::new(
                    ResultCode::NotSupported,
                    "StartTLS requires a TCP connection",
                )));
            };
            let tls = shared.tls_context(&options)?;

            shared.set_state(ConnectionState::NegotiatingTls)?;
            let outcome = self.negotiate_tls(&options, &mut link, &host, &tls).await;
            if shared.state() == ConnectionState::NegotiatingTls {
                shared.set_state(ConnectionState::Connected)?;
            }
            outcome
        }
        .instrument(tracing::info_span!("start_tls"))
        .await
    }

    async fn negotiate_tls(
        &self,
        options: &Options,
        link: &mut Link,
        host: &str,
        tls: &TlsConfig,
    ) -> Result<()> {
        let shared = &self.shared;
        let msgid = shared.dispatcher.register(true)?;
        let op = Operation::new(msgid, OperationKind::Extended, Arc::downgrade(shared));
        let mut request = LdapMessage::new(
            msgid,
            ProtocolOp::ExtendedRequest(ExtendedRequest {
                name: oid::START_TLS.to_string(),
                value: None,
            }),
        );
        shared.write(link, &mut request).await?;
        counters::operation_dispatched(OperationKind::Extended.as_str());

        let response = loop {
            match op.fetch(options.network_timeout()).await {
                Ok(msg) if msg.is_terminal() => break Ok(msg),
                Ok(_) => continue,
                Err(e) => break Err(e),
            }
        };
        let response = match response {
            Ok(msg) => msg,
            Err(e) => {
                if shared.dispatcher.cancel_handoff(msgid) {
                    let (read_half, leftover) = shared.take_handoff().await?;
                    shared.spawn_reader(read_half, leftover);
                }
                return Err(e);
            }
        };
        let result = response
            .result()?
            .cloned()
            .ok_or_else(|| Error::Protocol("StartTLS response without result".into()))?;
        drop(response);
        drop(op);

        let (read_half, leftover) = shared.take_handoff().await?;
        if result.code != ResultCode::Success.code() {
            shared.spawn_reader(read_half, leftover);
            counters::tls_upgrade(labels::RESULT_REFUSED);
            tracing::info!(code = result.code, "server refused StartTLS");
            return Err(Error::Library(LdapError::from_server(
                result.code,
                &result.matched_dn,
                &result.diagnostic,
            )));
        }

        let writer = link
            .writer
            .take()
            .ok_or_else(|| Error::IllegalState("not connected".into()))?;
        let transport = read_half.unsplit(writer);
        if !leftover.is_empty() {
            shared.teardown(server_down("data after StartTLS response"));
            return Err(Error::Protocol(
                "server sent data after the StartTLS response".into(),
            ));
        }

        let started = Instant::now();
        let upgrade = transport.upgrade_to_tls(tls, host);
        let upgraded = match options.network_timeout() {
            Some(limit) => tokio::time::timeout(limit, upgrade)
                .await
                .unwrap_or_else(|_| Err(Error::Config("TLS handshake timed out".into()))),
            None => upgrade.await,
        };

        match upgraded {
            Ok(transport) => {
                histograms::tls_handshake(started.elapsed().as_millis() as u64);
                counters::tls_upgrade(labels::RESULT_OK);
                shared.install(link, transport, BytesMut::new());
                tracing::info!(host, "TLS established");
                Ok(())
            }
            Err(e) => {
                counters::tls_upgrade(labels::RESULT_FAILED);
                let err = LdapError::new(ResultCode::ConnectError, e.to_string());
                shared.teardown(err.clone());
                Err(Error::Library(err))
            }
        }
    }

    /// Send an unbind and close the transport. Outstanding and later
    /// requests fail with `ServerDown`; calling it again is a no-op.
    pub async fn unbind(&self) -> Result<()> {
        let mut link = self.shared.link.lock().await;
        if self.shared.state() == ConnectionState::Closed && link.writer.is_none() {
            return Ok(());
        }

        let mut result = Ok(());
        if link.writer.is_some() && self.shared.dispatcher.closed().is_none() {
            result = match self.shared.dispatcher.register(false) {
                Ok(id) => {
                    let mut msg = LdapMessage::new(id, ProtocolOp::UnbindRequest);
                    let sent = self.shared.write(&mut link, &mut msg).await;
                    self.shared.dispatcher.release(id);
                    sent
                }
                Err(e) => Err(e),
            };
        }
        if let Some(mut writer) = link.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.shared.teardown(server_down("connection unbound"));
        tracing::info!("unbound");
        result
    }

    /// Unbind and consume the handle
    pub async fn close(self) -> Result<()> {
        self.unbind().await
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Connection URIs, reduced to scheme, host and port
    pub fn uris(&self) -> &[LdapUrl] {
        &self.shared.uris
    }

    /// OS descriptor of the socket, `None` until connected
    pub fn file_descriptor(&self) -> Option<RawFd> {
        let fd = self.shared.fd.load(Ordering::Acquire);
        (fd >= 0).then_some(fd)
    }

    /// Read an option
    pub async fn get_option(&self, option: LdapOption) -> Result<OptionValue> {
        self.shared
            .options
            .read()
            .await
            .get(option)
            .map_err(|e| Error::option(option.name(), "get", e))
    }

    /// Write an option.
    ///
    /// Waits for in-flight writes to finish. Changing a TLS option drops the
    /// cached TLS context.
    pub async fn set_option(&self, option: LdapOption, value: OptionValue) -> Result<OptionValue> {
        let mut options = self.shared.options.write().await;
        let stored = options.set(option, value)?;
        if option.affects_tls() {
            *lock(&self.shared.tls_context) = None;
        }
        tracing::debug!(option = option.name(), "option set");
        Ok(stored)
    }

    /// Snapshot of every option
    pub async fn options(&self) -> Options {
        self.shared.options.read().await.clone()
    }

    /// Rebuild the TLS context from the current options, surfacing file and
    /// configuration errors now rather than at the next handshake
    pub async fn create_new_tls_context(&self) -> Result<()> {
        let options = self.shared.options.read().await;
        let ctx = TlsConfig::from_options(&options.tls)?;
        *lock(&self.shared.tls_context) = Some(ctx);
        Ok(())
    }

    /// Name of the TLS implementation
    pub fn tls_package(&self) -> &'static str {
        TLS_PACKAGE
    }

    /// Whether the live transport is encrypted
    pub fn tls_inplace(&self) -> bool {
        self.shared.tls_active.load(Ordering::Acquire)
    }

    /// `tls-server-end-point` channel binding of the TLS transport
    pub fn channel_binding_data(&self) -> Option<Vec<u8>> {
        lock(&self.shared.channel_binding).clone()
    }

    /// Progress of a request by message id
    pub fn operation_state(&self, msgid: i32) -> OperationState {
        self.shared.dispatcher.state(msgid)
    }

    /// Number of message ids still registered
    pub fn outstanding(&self) -> usize {
        self.shared.dispatcher.outstanding()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("uris", &self.shared.uris)
            .field("state", &self.shared.state())
            .field("tls", &self.tls_inplace())
            .finish()
    }
}

fn reject_critical(client_controls: &[Control]) -> Result<()> {
    for control in client_controls {
        if control.critical {
            return Err(Error::Library(LdapError::new(
                ResultCode::NotSupported,
                format!("critical client control {} is not supported", control.oid),
            )));
        }
        tracing::debug!(oid = %control.oid, "ignoring non-critical client control");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_non_ldap_uri() {
        let err = Connection::new(["http://example.com"]).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[test]
    fn test_new_rejects_malformed_ldap_uri_as_invalid() {
        let err = Connection::new(["ldap://host/dc=x??bogus"]).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[test]
    fn test_new_requires_a_uri() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            Connection::new(empty),
            Err(Error::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_new_splits_and_simplifies() {
        let conn = Connection::new([
            "ldap://a.example.com ldaps://b.example.com:1636",
            "ldap://c/dc=example,dc=com?cn?sub",
        ])
        .unwrap();
        let uris = conn.uris();
        assert_eq!(uris.len(), 3);
        assert_eq!(uris[1].port, Some(1636));
        assert!(!uris[2].has_query());
        assert_eq!(conn.state(), ConnectionState::Initialized);
        assert_eq!(conn.file_descriptor(), None);
        assert!(!conn.tls_inplace());
        assert_eq!(conn.tls_package(), "rustls");
    }

    #[test]
    fn test_reject_critical_client_controls() {
        assert!(reject_critical(&[Control::new("1.2.3")]).is_ok());
        let err = reject_critical(&[Control::new("1.2.3").critical()]).unwrap_err();
        assert_eq!(err.result_code(), Some(ResultCode::NotSupported));
    }

    #[tokio::test]
    async fn test_options_roundtrip_through_connection() {
        let conn = Connection::new(["ldap://localhost"]).unwrap();
        conn.set_option(LdapOption::NetworkTimeout, OptionValue::Seconds(Some(2.5)))
            .await
            .unwrap();
        assert_eq!(
            conn.get_option(LdapOption::NetworkTimeout).await.unwrap(),
            OptionValue::Seconds(Some(2.5))
        );
        conn.set_option(LdapOption::NetworkTimeout, OptionValue::Seconds(None))
            .await
            .unwrap();
        assert_eq!(
            conn.get_option(LdapOption::NetworkTimeout).await.unwrap(),
            OptionValue::Seconds(None)
        );
        assert!(conn
            .set_option(LdapOption::TlsPackage, OptionValue::Text(None))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_initialized() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let conn = Connection::new([format!("ldap://127.0.0.1:{}", port)]).unwrap();
        let err = conn.connect().await.unwrap_err();
        assert!(err.is_server_down());
        assert_eq!(conn.state(), ConnectionState::Initialized);
    }

    #[tokio::test]
    async fn test_create_new_tls_context_surfaces_file_errors() {
        let options = Options::builder()
            .ca_cert_file("/nonexistent/ca.pem")
            .build()
            .unwrap();
        let conn = Connection::with_options(["ldaps://localhost"], options).unwrap();
        assert!(matches!(
            conn.create_new_tls_context().await,
            Err(Error::Config(_))
        ));
    }
}
