//! Search parameters

use crate::protocol::constants::{deref, scope};
use crate::protocol::Control;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Search scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// The base entry only
    #[default]
    Base,
    /// Immediate children of the base
    OneLevel,
    /// The base and everything below it
    Subtree,
    /// Wire integer passed through unchecked
    Raw(i32),
}

impl Scope {
    /// Integer sent on the wire
    pub fn code(&self) -> i32 {
        match self {
            Scope::Base => scope::BASE,
            Scope::OneLevel => scope::ONE_LEVEL,
            Scope::Subtree => scope::SUBTREE,
            Scope::Raw(n) => *n,
        }
    }
}

impl From<i32> for Scope {
    fn from(code: i32) -> Self {
        match code {
            scope::BASE => Scope::Base,
            scope::ONE_LEVEL => Scope::OneLevel,
            scope::SUBTREE => Scope::Subtree,
            other => Scope::Raw(other),
        }
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "base" => Ok(Scope::Base),
            "one" | "onelevel" | "one_level" => Ok(Scope::OneLevel),
            "sub" | "subtree" => Ok(Scope::Subtree),
            _ => Err(Error::InvalidArgument(format!(
                "invalid scope '{}': expected base, onelevel, or subtree",
                s
            ))),
        }
    }
}

/// Alias dereferencing policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerefAliases {
    /// Never dereference
    #[default]
    Never,
    /// Dereference while searching below the base
    InSearching,
    /// Dereference when locating the base
    FindingBase,
    /// Always dereference
    Always,
}

impl DerefAliases {
    /// Integer sent on the wire
    pub fn code(&self) -> i32 {
        match self {
            DerefAliases::Never => deref::NEVER,
            DerefAliases::InSearching => deref::IN_SEARCHING,
            DerefAliases::FindingBase => deref::FINDING_BASE,
            DerefAliases::Always => deref::ALWAYS,
        }
    }
}

/// Optional search parameters
///
/// # Examples
///
/// ```ignore
/// let opts = SearchOptions::new()
///     .attrs(["cn", "mail"])
///     .size_limit(100)
///     .timeout(Duration::from_secs(5));
/// let op = conn.search_ext("dc=example,dc=com", Scope::Subtree, Some("(uid=j*)"), opts).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Attributes to return (empty = all user attributes)
    pub attrs: Vec<String>,
    /// Return attribute names without values
    pub attrs_only: bool,
    /// Controls sent with the request
    pub server_controls: Vec<Control>,
    /// Controls interpreted by this library
    pub client_controls: Vec<Control>,
    /// Server-side time limit (falls back to the search timeout option)
    pub timeout: Option<Duration>,
    /// Server-side entry limit (none when omitted)
    pub size_limit: Option<i32>,
    /// Alias dereferencing
    pub deref: DerefAliases,
}

impl SearchOptions {
    /// Defaults: all attributes, no limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Set requested attributes
    pub fn attrs<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs = attrs.into_iter().map(Into::into).collect();
        self
    }

    /// Only return attribute names
    pub fn attrs_only(mut self, attrs_only: bool) -> Self {
        self.attrs_only = attrs_only;
        self
    }

    /// Add a server control
    pub fn server_control(mut self, control: Control) -> Self {
        self.server_controls.push(control);
        self
    }

    /// Add a client control
    pub fn client_control(mut self, control: Control) -> Self {
        self.client_controls.push(control);
        self
    }

    /// Server-side time limit
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Server-side entry limit
    pub fn size_limit(mut self, limit: i32) -> Self {
        self.size_limit = Some(limit);
        self
    }

    /// Alias dereferencing policy
    pub fn deref(mut self, deref: DerefAliases) -> Self {
        self.deref = deref;
        self
    }
}

/// Seconds sent as timeLimit, rounding partial seconds up
pub(crate) fn time_limit_secs(timeout: Duration) -> i32 {
    let mut secs = timeout.as_secs();
    if timeout.subsec_nanos() > 0 {
        secs += 1;
    }
    i32::try_from(secs).unwrap_or(i32::MAX)
}
