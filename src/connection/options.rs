//! Per-connection option registry
//!
//! Every tunable has a libldap-style name and number so callers can address
//! options generically with [`Options::get`] / [`Options::set`]. Failures of
//! either are reported as [`Error::Option`] naming the option.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Timeout stored as whole seconds plus microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeval {
    /// Whole seconds
    pub sec: i64,
    /// Microseconds, `0..1_000_000`
    pub usec: i64,
}

impl Timeval {
    /// Convert floating-point seconds; `-1` means disabled and yields `None`
    pub fn from_secs_f64(secs: f64) -> Result<Option<Timeval>> {
        if secs == -1.0 {
            return Ok(None);
        }
        if !secs.is_finite() || secs < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "timeout must be a non-negative number of seconds or -1, got {}",
                secs
            )));
        }
        let mut sec = secs.floor();
        let mut usec = ((secs - sec) * 1_000_000.0).round();
        if usec >= 1_000_000.0 {
            sec += 1.0;
            usec = 0.0;
        }
        Ok(Some(Timeval {
            sec: sec as i64,
            usec: usec as i64,
        }))
    }

    /// Floating-point seconds
    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + self.usec as f64 / 1_000_000.0
    }

    /// As a [`Duration`]
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.sec.max(0) as u64) + Duration::from_micros(self.usec.max(0) as u64)
    }
}

impl From<Duration> for Timeval {
    fn from(d: Duration) -> Self {
        Timeval {
            sec: i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
            usec: d.subsec_micros() as i64,
        }
    }
}

/// Server certificate checking strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequireCert {
    /// Don't request or check a certificate
    Never,
    /// Same as `Demand`
    Hard,
    /// Require a valid certificate
    #[default]
    Demand,
    /// Accept a bad or missing certificate
    Allow,
    /// Reject a bad certificate, accept a missing one
    Try,
}

impl RequireCert {
    /// libldap constant value
    pub fn code(&self) -> i32 {
        match self {
            Self::Never => 0,
            Self::Hard => 1,
            Self::Demand => 2,
            Self::Allow => 3,
            Self::Try => 4,
        }
    }

    /// Inverse of [`RequireCert::code`]
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::Never),
            1 => Ok(Self::Hard),
            2 => Ok(Self::Demand),
            3 => Ok(Self::Allow),
            4 => Ok(Self::Try),
            other => Err(Error::InvalidArgument(format!(
                "invalid require-cert strategy {}",
                other
            ))),
        }
    }

    /// Whether the peer certificate chain is verified
    pub fn verifies(&self) -> bool {
        !matches!(self, Self::Never | Self::Allow)
    }
}

impl FromStr for RequireCert {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "hard" => Ok(Self::Hard),
            "demand" => Ok(Self::Demand),
            "allow" => Ok(Self::Allow),
            "try" => Ok(Self::Try),
            _ => Err(Error::InvalidArgument(format!(
                "invalid require-cert strategy '{}': expected never, hard, demand, allow, or try",
                s
            ))),
        }
    }
}

impl fmt::Display for RequireCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Never => "never",
            Self::Hard => "hard",
            Self::Demand => "demand",
            Self::Allow => "allow",
            Self::Try => "try",
        })
    }
}

/// Certificate revocation checking strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrlCheck {
    /// No CRL checks
    #[default]
    None,
    /// Check the peer certificate only
    Peer,
    /// Check the whole chain
    All,
}

impl CrlCheck {
    /// libldap constant value
    pub fn code(&self) -> i32 {
        match self {
            Self::None => 0,
            Self::Peer => 1,
            Self::All => 2,
        }
    }

    /// Inverse of [`CrlCheck::code`]
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Peer),
            2 => Ok(Self::All),
            other => Err(Error::InvalidArgument(format!(
                "invalid CRL check strategy {}",
                other
            ))),
        }
    }
}

impl FromStr for CrlCheck {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "peer" => Ok(Self::Peer),
            "all" => Ok(Self::All),
            _ => Err(Error::InvalidArgument(format!(
                "invalid CRL check strategy '{}': expected none, peer, or all",
                s
            ))),
        }
    }
}

impl fmt::Display for CrlCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Peer => "peer",
            Self::All => "all",
        })
    }
}

/// TLS settings consumed by [`crate::connection::TlsConfig`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    /// PEM bundle of trusted CAs
    pub ca_cert_file: Option<String>,
    /// Directory of PEM CA certificates
    pub ca_cert_dir: Option<String>,
    /// Client certificate chain (PEM)
    pub cert_file: Option<String>,
    /// Client private key (PEM)
    pub key_file: Option<String>,
    /// Colon-separated allow list of cipher suite names
    pub cipher_suite: Option<String>,
    /// Entropy source (not used by rustls)
    pub random_file: Option<String>,
    /// Diffie-Hellman parameters (not used by rustls)
    pub dh_file: Option<String>,
    /// PEM file of certificate revocation lists
    pub crl_file: Option<String>,
    /// Certificate checking strategy
    pub require_cert: RequireCert,
    /// Revocation checking strategy
    pub crl_check: CrlCheck,
    /// Minimum protocol as `major << 8 | minor` (0x0303 = TLS 1.2), 0 for no minimum
    pub protocol_min: i32,
}

/// Addressable options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LdapOption {
    /// LDAP protocol version (2 or 3)
    ProtocolVersion,
    /// Defer the TCP connect until the first operation
    AsyncConnect,
    /// Connect and TLS handshake timeout, in seconds
    NetworkTimeout,
    /// Default server-side time limit for searches, in seconds
    SearchTimeout,
    /// CA certificate file
    TlsCaCertFile,
    /// CA certificate directory
    TlsCaCertDir,
    /// Client certificate file
    TlsCertFile,
    /// Client key file
    TlsKeyFile,
    /// Cipher suite allow list
    TlsCipherSuite,
    /// Random file
    TlsRandomFile,
    /// DH parameter file
    TlsDhFile,
    /// CRL file
    TlsCrlFile,
    /// Certificate checking strategy
    TlsRequireCert,
    /// CRL checking strategy
    TlsCrlCheck,
    /// Minimum TLS protocol version
    TlsProtocolMin,
    /// TLS implementation name (read-only)
    TlsPackage,
}

impl LdapOption {
    /// Every option, in libldap order
    pub const ALL: [LdapOption; 16] = [
        LdapOption::ProtocolVersion,
        LdapOption::AsyncConnect,
        LdapOption::NetworkTimeout,
        LdapOption::SearchTimeout,
        LdapOption::TlsCaCertFile,
        LdapOption::TlsCaCertDir,
        LdapOption::TlsCertFile,
        LdapOption::TlsKeyFile,
        LdapOption::TlsCipherSuite,
        LdapOption::TlsRandomFile,
        LdapOption::TlsDhFile,
        LdapOption::TlsCrlFile,
        LdapOption::TlsRequireCert,
        LdapOption::TlsCrlCheck,
        LdapOption::TlsProtocolMin,
        LdapOption::TlsPackage,
    ];

    /// libldap constant name
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProtocolVersion => "LDAP_OPT_PROTOCOL_VERSION",
            Self::AsyncConnect => "LDAP_OPT_CONNECT_ASYNC",
            Self::NetworkTimeout => "LDAP_OPT_NETWORK_TIMEOUT",
            Self::SearchTimeout => "LDAP_OPT_TIMELIMIT",
            Self::TlsCaCertFile => "LDAP_OPT_X_TLS_CACERTFILE",
            Self::TlsCaCertDir => "LDAP_OPT_X_TLS_CACERTDIR",
            Self::TlsCertFile => "LDAP_OPT_X_TLS_CERTFILE",
            Self::TlsKeyFile => "LDAP_OPT_X_TLS_KEYFILE",
            Self::TlsCipherSuite => "LDAP_OPT_X_TLS_CIPHER_SUITE",
            Self::TlsRandomFile => "LDAP_OPT_X_TLS_RANDOM_FILE",
            Self::TlsDhFile => "LDAP_OPT_X_TLS_DHFILE",
            Self::TlsCrlFile => "LDAP_OPT_X_TLS_CRLFILE",
            Self::TlsRequireCert => "LDAP_OPT_X_TLS_REQUIRE_CERT",
            Self::TlsCrlCheck => "LDAP_OPT_X_TLS_CRLCHECK",
            Self::TlsProtocolMin => "LDAP_OPT_X_TLS_PROTOCOL_MIN",
            Self::TlsPackage => "LDAP_OPT_X_TLS_PACKAGE",
        }
    }

    /// libldap constant number
    pub fn code(&self) -> i32 {
        match self {
            Self::ProtocolVersion => 0x0011,
            Self::AsyncConnect => 0x5010,
            Self::NetworkTimeout => 0x5005,
            Self::SearchTimeout => 0x0004,
            Self::TlsCaCertFile => 0x6002,
            Self::TlsCaCertDir => 0x6003,
            Self::TlsCertFile => 0x6004,
            Self::TlsKeyFile => 0x6005,
            Self::TlsCipherSuite => 0x6008,
            Self::TlsRandomFile => 0x6009,
            Self::TlsDhFile => 0x600e,
            Self::TlsCrlFile => 0x6010,
            Self::TlsRequireCert => 0x6006,
            Self::TlsCrlCheck => 0x600b,
            Self::TlsProtocolMin => 0x6007,
            Self::TlsPackage => 0x6011,
        }
    }

    /// Whether the option can be set
    pub fn is_writable(&self) -> bool {
        !matches!(self, Self::TlsPackage)
    }

    /// Whether a change invalidates a cached TLS context
    pub fn affects_tls(&self) -> bool {
        self.code() & 0x6000 == 0x6000
    }
}

impl fmt::Display for LdapOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value read from or written to an option
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// Integer options
    Int(i32),
    /// Flags
    Bool(bool),
    /// Timeouts; `None` means disabled
    Seconds(Option<f64>),
    /// Paths and names; `None` means unset
    Text(Option<String>),
    /// Require-cert strategy
    RequireCert(RequireCert),
    /// CRL strategy
    CrlCheck(CrlCheck),
}

impl OptionValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Int(_) => "integer",
            Self::Bool(_) => "boolean",
            Self::Seconds(_) => "seconds",
            Self::Text(_) => "text",
            Self::RequireCert(_) => "require-cert strategy",
            Self::CrlCheck(_) => "CRL strategy",
        }
    }
}

/// Name of the TLS implementation linked into this build
pub const TLS_PACKAGE: &str = "rustls";

/// Connection options
///
/// Use `Options::builder()` for fluent construction, [`Options::get`] and
/// [`Options::set`] for generic access, or deserialize from a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// LDAP protocol version
    pub protocol_version: i32,
    /// Defer the connect until first use
    pub async_connect: bool,
    /// Connect and handshake timeout
    pub network_timeout: Option<Timeval>,
    /// Default server-side search time limit
    pub search_timeout: Option<Timeval>,
    /// TLS settings
    pub tls: TlsOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            protocol_version: crate::protocol::constants::PROTOCOL_VERSION,
            async_connect: false,
            network_timeout: None,
            search_timeout: None,
            tls: TlsOptions::default(),
        }
    }
}

impl Options {
    /// Create a builder
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Network timeout as a [`Duration`]
    pub fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout.map(|t| t.as_duration())
    }

    /// Search timeout as a [`Duration`]
    pub fn search_timeout(&self) -> Option<Duration> {
        self.search_timeout.map(|t| t.as_duration())
    }

    /// Read an option
    pub fn get(&self, option: LdapOption) -> Result<OptionValue> {
        let tls = &self.tls;
        Ok(match option {
            LdapOption::ProtocolVersion => OptionValue::Int(self.protocol_version),
            LdapOption::AsyncConnect => OptionValue::Bool(self.async_connect),
            LdapOption::NetworkTimeout => {
                OptionValue::Seconds(self.network_timeout.map(|t| t.as_secs_f64()))
            }
            LdapOption::SearchTimeout => {
                OptionValue::Seconds(self.search_timeout.map(|t| t.as_secs_f64()))
            }
            LdapOption::TlsCaCertFile => OptionValue::Text(tls.ca_cert_file.clone()),
            LdapOption::TlsCaCertDir => OptionValue::Text(tls.ca_cert_dir.clone()),
            LdapOption::TlsCertFile => OptionValue::Text(tls.cert_file.clone()),
            LdapOption::TlsKeyFile => OptionValue::Text(tls.key_file.clone()),
            LdapOption::TlsCipherSuite => OptionValue::Text(tls.cipher_suite.clone()),
            LdapOption::TlsRandomFile => OptionValue::Text(tls.random_file.clone()),
            LdapOption::TlsDhFile => OptionValue::Text(tls.dh_file.clone()),
            LdapOption::TlsCrlFile => OptionValue::Text(tls.crl_file.clone()),
            LdapOption::TlsRequireCert => OptionValue::RequireCert(tls.require_cert),
            LdapOption::TlsCrlCheck => OptionValue::CrlCheck(tls.crl_check),
            LdapOption::TlsProtocolMin => OptionValue::Int(tls.protocol_min),
            LdapOption::TlsPackage => OptionValue::Text(Some(TLS_PACKAGE.to_string())),
        })
    }

    /// Write an option, returning the value as stored
    pub fn set(&mut self, option: LdapOption, value: OptionValue) -> Result<OptionValue> {
        self.apply(option, value)
            .map_err(|e| Error::option(option.name(), "set", e))?;
        self.get(option)
    }

    fn apply(&mut self, option: LdapOption, value: OptionValue) -> Result<()> {
        let tls = &mut self.tls;
        match option {
            LdapOption::ProtocolVersion => {
                let version = expect_int(&value)?;
                if !(2..=3).contains(&version) {
                    return Err(Error::InvalidArgument(format!(
                        "protocol version must be 2 or 3, got {}",
                        version
                    )));
                }
                self.protocol_version = version;
            }
            LdapOption::AsyncConnect => match value {
                OptionValue::Bool(flag) => self.async_connect = flag,
                other => return Err(mismatch("boolean", &other)),
            },
            LdapOption::NetworkTimeout => self.network_timeout = expect_seconds(value)?,
            LdapOption::SearchTimeout => self.search_timeout = expect_seconds(value)?,
            LdapOption::TlsCaCertFile => tls.ca_cert_file = expect_text(value)?,
            LdapOption::TlsCaCertDir => tls.ca_cert_dir = expect_text(value)?,
            LdapOption::TlsCertFile => tls.cert_file = expect_text(value)?,
            LdapOption::TlsKeyFile => tls.key_file = expect_text(value)?,
            LdapOption::TlsCipherSuite => tls.cipher_suite = expect_text(value)?,
            LdapOption::TlsRandomFile => tls.random_file = expect_text(value)?,
            LdapOption::TlsDhFile => tls.dh_file = expect_text(value)?,
            LdapOption::TlsCrlFile => tls.crl_file = expect_text(value)?,
            LdapOption::TlsRequireCert => {
                tls.require_cert = match value {
                    OptionValue::RequireCert(v) => v,
                    OptionValue::Int(code) => RequireCert::from_code(code)?,
                    OptionValue::Text(Some(name)) => name.parse()?,
                    other => return Err(mismatch("require-cert strategy", &other)),
                }
            }
            LdapOption::TlsCrlCheck => {
                tls.crl_check = match value {
                    OptionValue::CrlCheck(v) => v,
                    OptionValue::Int(code) => CrlCheck::from_code(code)?,
                    OptionValue::Text(Some(name)) => name.parse()?,
                    other => return Err(mismatch("CRL strategy", &other)),
                }
            }
            LdapOption::TlsProtocolMin => {
                let version = expect_int(&value)?;
                if version != 0 && !(0x0301..=0x0304).contains(&version) {
                    return Err(Error::InvalidArgument(format!(
                        "unknown TLS protocol version 0x{:04x}",
                        version
                    )));
                }
                tls.protocol_min = version;
            }
            LdapOption::TlsPackage => {
                return Err(Error::NotImplemented(format!(
                    "{} is read-only",
                    option.name()
                )))
            }
        }
        Ok(())
    }
}

fn mismatch(expected: &str, got: &OptionValue) -> Error {
    Error::InvalidArgument(format!("expected {} value, got {}", expected, got.kind()))
}

fn expect_int(value: &OptionValue) -> Result<i32> {
    match value {
        OptionValue::Int(v) => Ok(*v),
        other => Err(mismatch("integer", other)),
    }
}

fn expect_seconds(value: OptionValue) -> Result<Option<Timeval>> {
    match value {
        OptionValue::Seconds(None) => Ok(None),
        OptionValue::Seconds(Some(secs)) => Timeval::from_secs_f64(secs),
        OptionValue::Int(secs) => Timeval::from_secs_f64(secs as f64),
        other => Err(mismatch("seconds", &other)),
    }
}

fn expect_text(value: OptionValue) -> Result<Option<String>> {
    match value {
        OptionValue::Text(text) => Ok(text.filter(|t| !t.is_empty())),
        other => Err(mismatch("text", &other)),
    }
}

/// Builder for [`Options`]
///
/// # Examples
///
/// ```ignore
/// let options = Options::builder()
///     .network_timeout(Duration::from_secs(5))
///     .ca_cert_file("/etc/ssl/certs/ldap-ca.pem")
///     .require_cert(RequireCert::Demand)
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
    pending: Vec<(LdapOption, OptionValue)>,
}

impl OptionsBuilder {
    fn push(mut self, option: LdapOption, value: OptionValue) -> Self {
        self.pending.push((option, value));
        self
    }

    /// Protocol version (default 3)
    pub fn protocol_version(self, version: i32) -> Self {
        self.push(LdapOption::ProtocolVersion, OptionValue::Int(version))
    }

    /// Defer the connect until the first operation
    pub fn async_connect(self, enabled: bool) -> Self {
        self.push(LdapOption::AsyncConnect, OptionValue::Bool(enabled))
    }

    /// Bound each connect attempt and TLS handshake
    pub fn network_timeout(self, timeout: Duration) -> Self {
        self.push(
            LdapOption::NetworkTimeout,
            OptionValue::Seconds(Some(timeout.as_secs_f64())),
        )
    }

    /// Default server-side time limit for searches
    pub fn search_timeout(self, timeout: Duration) -> Self {
        self.push(
            LdapOption::SearchTimeout,
            OptionValue::Seconds(Some(timeout.as_secs_f64())),
        )
    }

    /// Trusted CA bundle
    pub fn ca_cert_file(self, path: impl Into<String>) -> Self {
        self.push(LdapOption::TlsCaCertFile, OptionValue::Text(Some(path.into())))
    }

    /// Directory of trusted CA certificates
    pub fn ca_cert_dir(self, path: impl Into<String>) -> Self {
        self.push(LdapOption::TlsCaCertDir, OptionValue::Text(Some(path.into())))
    }

    /// Client certificate and key for mutual TLS
    pub fn client_cert(self, cert: impl Into<String>, key: impl Into<String>) -> Self {
        self.push(LdapOption::TlsCertFile, OptionValue::Text(Some(cert.into())))
            .push(LdapOption::TlsKeyFile, OptionValue::Text(Some(key.into())))
    }

    /// Colon-separated cipher suite allow list
    pub fn cipher_suite(self, suites: impl Into<String>) -> Self {
        self.push(LdapOption::TlsCipherSuite, OptionValue::Text(Some(suites.into())))
    }

    /// CRL file
    pub fn crl_file(self, path: impl Into<String>) -> Self {
        self.push(LdapOption::TlsCrlFile, OptionValue::Text(Some(path.into())))
    }

    /// Certificate checking strategy
    pub fn require_cert(self, strategy: RequireCert) -> Self {
        self.push(LdapOption::TlsRequireCert, OptionValue::RequireCert(strategy))
    }

    /// CRL checking strategy
    pub fn crl_check(self, strategy: CrlCheck) -> Self {
        self.push(LdapOption::TlsCrlCheck, OptionValue::CrlCheck(strategy))
    }

    /// Minimum TLS protocol (0x0303 = TLS 1.2, 0x0304 = TLS 1.3)
    pub fn tls_protocol_min(self, version: i32) -> Self {
        self.push(LdapOption::TlsProtocolMin, OptionValue::Int(version))
    }

    /// Validate and build
    pub fn build(self) -> Result<Options> {
        let mut options = self.options;
        for (option, value) in self.pending {
            options.set(option, value)?;
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = Options::default();
        assert_eq!(opts.get(LdapOption::ProtocolVersion).unwrap(), OptionValue::Int(3));
        assert_eq!(opts.get(LdapOption::AsyncConnect).unwrap(), OptionValue::Bool(false));
        assert_eq!(opts.get(LdapOption::NetworkTimeout).unwrap(), OptionValue::Seconds(None));
        assert_eq!(opts.get(LdapOption::TlsCaCertFile).unwrap(), OptionValue::Text(None));
        assert_eq!(
            opts.get(LdapOption::TlsRequireCert).unwrap(),
            OptionValue::RequireCert(RequireCert::Demand)
        );
    }

    #[test]
    fn test_timeval_conversion() {
        let tv = Timeval::from_secs_f64(2.25).unwrap().unwrap();
        assert_eq!(tv, Timeval { sec: 2, usec: 250_000 });
        assert_eq!(tv.as_secs_f64(), 2.25);
        assert_eq!(tv.as_duration(), Duration::from_millis(2250));
        assert_eq!(Timeval::from_secs_f64(-1.0).unwrap(), None);
        assert!(Timeval::from_secs_f64(-2.0).is_err());
        assert!(Timeval::from_secs_f64(f64::NAN).is_err());
    }

    #[test]
    fn test_timeout_disabled_roundtrip() {
        let mut opts = Options::default();
        for option in [LdapOption::NetworkTimeout, LdapOption::SearchTimeout] {
            opts.set(option, OptionValue::Seconds(Some(1.5))).unwrap();
            assert_eq!(opts.get(option).unwrap(), OptionValue::Seconds(Some(1.5)));

            opts.set(option, OptionValue::Seconds(None)).unwrap();
            assert_eq!(opts.get(option).unwrap(), OptionValue::Seconds(None));

            opts.set(option, OptionValue::Seconds(Some(-1.0))).unwrap();
            assert_eq!(opts.get(option).unwrap(), OptionValue::Seconds(None));

            opts.set(option, OptionValue::Int(-1)).unwrap();
            assert_eq!(opts.get(option).unwrap(), OptionValue::Seconds(None));
        }
    }

    #[test]
    fn test_set_then_get_every_writable_option() {
        let cases = [
            (LdapOption::ProtocolVersion, OptionValue::Int(2)),
            (LdapOption::AsyncConnect, OptionValue::Bool(true)),
            (LdapOption::NetworkTimeout, OptionValue::Seconds(Some(0.1))),
            (LdapOption::SearchTimeout, OptionValue::Seconds(Some(30.0))),
            (LdapOption::TlsCaCertFile, OptionValue::Text(Some("/ca.pem".into()))),
            (LdapOption::TlsCaCertDir, OptionValue::Text(Some("/certs".into()))),
            (LdapOption::TlsCertFile, OptionValue::Text(Some("/c.pem".into()))),
            (LdapOption::TlsKeyFile, OptionValue::Text(Some("/k.pem".into()))),
            (
                LdapOption::TlsCipherSuite,
                OptionValue::Text(Some("TLS13_AES_256_GCM_SHA384".into())),
            ),
            (LdapOption::TlsRandomFile, OptionValue::Text(Some("/dev/urandom".into()))),
            (LdapOption::TlsDhFile, OptionValue::Text(Some("/dh.pem".into()))),
            (LdapOption::TlsCrlFile, OptionValue::Text(Some("/crl.pem".into()))),
            (LdapOption::TlsRequireCert, OptionValue::RequireCert(RequireCert::Allow)),
            (LdapOption::TlsCrlCheck, OptionValue::CrlCheck(CrlCheck::Peer)),
            (LdapOption::TlsProtocolMin, OptionValue::Int(0x0303)),
        ];
        let mut opts = Options::default();
        for (option, value) in cases {
            assert!(option.is_writable());
            let stored = opts.set(option, value.clone()).unwrap();
            assert_eq!(stored, value, "{}", option);
            assert_eq!(opts.get(option).unwrap(), value, "{}", option);
        }
    }

    #[test]
    fn test_empty_text_reads_back_unset() {
        let mut opts = Options::default();
        opts.set(LdapOption::TlsCaCertFile, OptionValue::Text(Some(String::new())))
            .unwrap();
        assert_eq!(opts.get(LdapOption::TlsCaCertFile).unwrap(), OptionValue::Text(None));
    }

    #[test]
    fn test_strategies_by_name_and_code() {
        let mut opts = Options::default();
        opts.set(LdapOption::TlsRequireCert, OptionValue::Text(Some("never".into())))
            .unwrap();
        assert_eq!(opts.tls.require_cert, RequireCert::Never);
        opts.set(LdapOption::TlsRequireCert, OptionValue::Int(4)).unwrap();
        assert_eq!(opts.tls.require_cert, RequireCert::Try);
        opts.set(LdapOption::TlsCrlCheck, OptionValue::Text(Some("all".into())))
            .unwrap();
        assert_eq!(opts.tls.crl_check, CrlCheck::All);

        let err = opts
            .set(LdapOption::TlsRequireCert, OptionValue::Text(Some("sometimes".into())))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Option { name: "LDAP_OPT_X_TLS_REQUIRE_CERT", .. }
        ));
    }

    #[test]
    fn test_invalid_values_are_option_errors() {
        let mut opts = Options::default();
        let err = opts
            .set(LdapOption::ProtocolVersion, OptionValue::Int(4))
            .unwrap_err();
        assert_eq!(err.to_string(), "couldn't set option: LDAP_OPT_PROTOCOL_VERSION");
        assert!(opts.set(LdapOption::AsyncConnect, OptionValue::Int(1)).is_err());
        assert!(opts
            .set(LdapOption::TlsProtocolMin, OptionValue::Int(0x0999))
            .is_err());
        assert!(opts
            .set(LdapOption::TlsPackage, OptionValue::Text(Some("openssl".into())))
            .is_err());
        assert_eq!(opts, Options::default());
    }

    #[test]
    fn test_tls_package_reports_rustls() {
        let opts = Options::default();
        assert_eq!(
            opts.get(LdapOption::TlsPackage).unwrap(),
            OptionValue::Text(Some("rustls".into()))
        );
        assert!(!LdapOption::TlsPackage.is_writable());
    }

    #[test]
    fn test_builder_validates() {
        let opts = Options::builder()
            .network_timeout(Duration::from_millis(1500))
            .require_cert(RequireCert::Never)
            .client_cert("/c.pem", "/k.pem")
            .build()
            .unwrap();
        assert_eq!(opts.network_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(opts.tls.key_file.as_deref(), Some("/k.pem"));

        assert!(Options::builder().protocol_version(1).build().is_err());
    }

    #[test]
    fn test_affects_tls() {
        assert!(LdapOption::TlsCaCertFile.affects_tls());
        assert!(LdapOption::TlsRequireCert.affects_tls());
        assert!(!LdapOption::NetworkTimeout.affects_tls());
        assert!(!LdapOption::ProtocolVersion.affects_tls());
    }
}
