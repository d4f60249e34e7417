//! LDAP URL parsing (RFC 4516)
//!
//! Supports formats:
//! * ldap://[host][:port][/dn[?attrs[?scope[?filter[?extensions]]]]]
//! * ldaps://... (TLS from the first byte, default port 636)
//! * ldapi://%2Fpath%2Fto%2Fsocket (Unix domain socket)

use crate::connection::Scope;
use crate::protocol::constants::{scope, LDAPS_PORT, LDAP_PORT};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlScheme {
    /// Plain TCP, optionally upgraded with StartTLS
    Ldap,
    /// TLS from connect
    Ldaps,
    /// Unix domain socket
    Ldapi,
}

impl UrlScheme {
    /// Scheme text without `://`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ldap => "ldap",
            Self::Ldaps => "ldaps",
            Self::Ldapi => "ldapi",
        }
    }

    /// Port used when the URL omits one
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Ldap => Some(LDAP_PORT),
            Self::Ldaps => Some(LDAPS_PORT),
            Self::Ldapi => None,
        }
    }
}

/// Components of an LDAP URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapUrl {
    /// Scheme
    pub scheme: UrlScheme,
    /// Host name, IP literal, or socket path for `ldapi`
    pub host: Option<String>,
    /// Port (explicit or the scheme default)
    pub port: Option<u16>,
    /// Base DN
    pub dn: Option<String>,
    /// Requested attributes
    pub attributes: Vec<String>,
    /// Search scope (base when omitted)
    pub scope: Scope,
    /// Search filter
    pub filter: Option<String>,
    /// Extensions, critical ones keep their leading `!`
    pub extensions: Vec<String>,
    /// Whether any extension is marked critical
    pub critical_extensions: bool,
}

/// Decompose an LDAP URL into its components
///
/// Fails with [`Error::InvalidUrl`] if the input is not an LDAP URL at all and
/// with [`Error::MalformedUrl`] if it is one but breaks the grammar.
pub fn split_url(url: &str) -> Result<LdapUrl> {
    LdapUrl::parse(url)
}

/// Whether `url` carries an LDAP scheme
pub fn is_ldap_url(url: &str) -> bool {
    scheme_and_rest(url).is_some()
}

fn unwrap_url(url: &str) -> &str {
    let s = url.trim();
    let s = s
        .strip_prefix('<')
        .and_then(|inner| inner.strip_suffix('>'))
        .unwrap_or(s);
    match s.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("URL:") => &s[4..],
        _ => s,
    }
}

fn scheme_and_rest(url: &str) -> Option<(UrlScheme, &str)> {
    let s = unwrap_url(url);
    let (scheme, rest) = s.split_once("://")?;
    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "ldap" => UrlScheme::Ldap,
        "ldaps" => UrlScheme::Ldaps,
        "ldapi" => UrlScheme::Ldapi,
        _ => return None,
    };
    Some((scheme, rest))
}

impl LdapUrl {
    /// Parse an LDAP URL
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = scheme_and_rest(url).ok_or_else(|| Error::InvalidUrl {
            url: url.to_string(),
            reason: "scheme must be ldap://, ldaps:// or ldapi://".into(),
        })?;
        let malformed = |reason: String| Error::MalformedUrl {
            url: url.to_string(),
            reason,
        };

        let (hostport, path) = match rest.find('/') {
            Some(i) => (&rest[..i], Some(&rest[i + 1..])),
            None => (rest, None),
        };
        if hostport.contains('?') {
            return Err(malformed("query components require a '/' after the host".into()));
        }

        let (host, port) = split_host_port(hostport).map_err(&malformed)?;
        let host = match host {
            "" => None,
            h => Some(percent_decode(h).map_err(&malformed)?),
        };
        let port = port.or_else(|| scheme.default_port());

        let mut out = LdapUrl {
            scheme,
            host,
            port,
            dn: None,
            attributes: Vec::new(),
            scope: Scope::Base,
            filter: None,
            extensions: Vec::new(),
            critical_extensions: false,
        };

        let Some(path) = path else {
            return Ok(out);
        };
        let parts: Vec<&str> = path.split('?').collect();
        if parts.len() > 5 {
            return Err(malformed(format!("{} query components, at most 4 allowed", parts.len() - 1)));
        }

        if !parts[0].is_empty() {
            out.dn = Some(percent_decode(parts[0]).map_err(&malformed)?);
        }
        if let Some(attrs) = parts.get(1) {
            for attr in attrs.split(',').filter(|a| !a.is_empty()) {
                out.attributes.push(percent_decode(attr).map_err(&malformed)?);
            }
        }
        if let Some(word) = parts.get(2) {
            out.scope = match word.to_ascii_lowercase().as_str() {
                "" | "base" => Scope::Base,
                "one" => Scope::OneLevel,
                "sub" => Scope::Subtree,
                "children" | "subordinate" => Scope::Raw(scope::SUBORDINATE),
                other => return Err(malformed(format!("unknown scope '{}'", other))),
            };
        }
        if let Some(filter) = parts.get(3).filter(|f| !f.is_empty()) {
            out.filter = Some(percent_decode(filter).map_err(&malformed)?);
        }
        if let Some(exts) = parts.get(4) {
            for ext in exts.split(',') {
                let ext = percent_decode(ext).map_err(&malformed)?;
                let name = ext.strip_prefix('!').unwrap_or(&ext);
                if name.is_empty() {
                    return Err(malformed("empty extension".into()));
                }
                if ext.starts_with('!') {
                    out.critical_extensions = true;
                }
                out.extensions.push(ext);
            }
        }

        Ok(out)
    }

    /// Copy holding only scheme, host and port
    pub fn simplified(&self) -> Self {
        Self {
            scheme: self.scheme,
            host: self.host.clone(),
            port: self.port,
            dn: None,
            attributes: Vec::new(),
            scope: Scope::Base,
            filter: None,
            extensions: Vec::new(),
            critical_extensions: false,
        }
    }

    /// Whether anything beyond scheme, host and port was given
    pub fn has_query(&self) -> bool {
        self.dn.is_some()
            || !self.attributes.is_empty()
            || self.scope != Scope::Base
            || self.filter.is_some()
            || !self.extensions.is_empty()
    }

    /// Host for TCP schemes, `localhost` when omitted
    pub fn host_or_default(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }

    /// Socket path for `ldapi` URLs
    pub fn socket_path(&self) -> PathBuf {
        PathBuf::from(
            self.host
                .as_deref()
                .unwrap_or(crate::protocol::constants::LDAPI_DEFAULT_PATH),
        )
    }
}

impl FromStr for LdapUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LdapUrl::parse(s)
    }
}

impl fmt::Display for LdapUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme.as_str())?;
        if let Some(host) = &self.host {
            if host.contains(':') && !host.starts_with('/') {
                write!(f, "[{}]", host)?;
            } else {
                f.write_str(&percent_encode(host, b"/:?"))?;
            }
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }

        let scope = match self.scope {
            Scope::Base => String::new(),
            Scope::OneLevel => "one".into(),
            Scope::Subtree => "sub".into(),
            Scope::Raw(scope::SUBORDINATE) => "children".into(),
            Scope::Raw(n) => n.to_string(),
        };
        let mut query = vec![
            self.attributes
                .iter()
                .map(|a| percent_encode(a, b",?"))
                .collect::<Vec<_>>()
                .join(","),
            scope,
            self.filter
                .as_deref()
                .map(|flt| percent_encode(flt, b"?"))
                .unwrap_or_default(),
            self.extensions
                .iter()
                .map(|e| percent_encode(e, b",?"))
                .collect::<Vec<_>>()
                .join(","),
        ];
        while query.last().is_some_and(String::is_empty) {
            query.pop();
        }

        if self.dn.is_none() && query.is_empty() {
            return Ok(());
        }
        f.write_str("/")?;
        if let Some(dn) = &self.dn {
            f.write_str(&percent_encode(dn, b"?/"))?;
        }
        for part in query {
            write!(f, "?{}", part)?;
        }
        Ok(())
    }
}

fn split_host_port(hostport: &str) -> std::result::Result<(&str, Option<u16>), String> {
    let (host, port) = if let Some(rest) = hostport.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| "unterminated IPv6 literal".to_string())?;
        match after {
            "" => (host, None),
            p => (
                host,
                Some(
                    p.strip_prefix(':')
                        .ok_or_else(|| format!("unexpected '{}' after IPv6 literal", p))?,
                ),
            ),
        }
    } else {
        match hostport.split_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (hostport, None),
        }
    };

    let port = match port {
        None | Some("") => None,
        Some(p) => Some(
            p.parse::<u16>()
                .map_err(|_| format!("invalid port '{}'", p))?,
        ),
    };
    Ok((host, port))
}

fn percent_decode(s: &str) -> std::result::Result<String, String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let value = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| format!("bad percent escape in '{}'", s))?;
            out.push(value);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| format!("'{}' does not decode to UTF-8", s))
}

fn percent_encode(s: &str, reserved: &[u8]) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b == b'%' || b == b' ' || b >= 0x80 || b < 0x20 || reserved.contains(&b) {
            out.push_str(&format!("%{:02X}", b));
        } else {
            out.push(b as char);
        }
    }
    out
}
