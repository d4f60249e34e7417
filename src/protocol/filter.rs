//! Search filters: RFC 4515 string form and BER encoding

use super::ber::{bytes_to_string, BerReader, BerWriter};
use super::constants::{ber, filter as tag};
use crate::error::{LdapError, ResultCode};
use std::fmt;
use std::io;
use std::str::FromStr;

/// Filter used when a search is issued without one
pub const DEFAULT_FILTER: &str = "(objectClass=*)";

/// Deepest `&`/`|`/`!` nesting accepted when parsing or decoding a filter
pub const MAX_FILTER_DEPTH: usize = 64;

/// Search filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `(&...)`
    And(Vec<Filter>),
    /// `(|...)`
    Or(Vec<Filter>),
    /// `(!...)`
    Not(Box<Filter>),
    /// `(attr=value)`
    Equality {
        /// Attribute description
        attr: String,
        /// Assertion value
        value: Vec<u8>,
    },
    /// `(attr=ini*any*fin)`
    Substrings {
        /// Attribute description
        attr: String,
        /// Leading fragment
        initial: Option<Vec<u8>>,
        /// Middle fragments in order
        any: Vec<Vec<u8>>,
        /// Trailing fragment
        final_value: Option<Vec<u8>>,
    },
    /// `(attr>=value)`
    GreaterOrEqual {
        /// Attribute description
        attr: String,
        /// Assertion value
        value: Vec<u8>,
    },
    /// `(attr<=value)`
    LessOrEqual {
        /// Attribute description
        attr: String,
        /// Assertion value
        value: Vec<u8>,
    },
    /// `(attr=*)`
    Present(String),
    /// `(attr~=value)`
    Approx {
        /// Attribute description
        attr: String,
        /// Assertion value
        value: Vec<u8>,
    },
    /// `(attr:dn:rule:=value)`
    Extensible {
        /// Matching rule OID or name
        rule: Option<String>,
        /// Attribute description
        attr: Option<String>,
        /// Assertion value
        value: Vec<u8>,
        /// Whether DN components take part in matching
        dn_attributes: bool,
    },
}

impl Filter {
    /// Parse an RFC 4515 filter string
    ///
    /// A filter without surrounding parentheses (`objectClass=*`) is accepted.
    pub fn parse(input: &str) -> crate::Result<Filter> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(filter_error("empty filter"));
        }
        let wrapped;
        let text = if trimmed.starts_with('(') {
            trimmed
        } else {
            wrapped = format!("({})", trimmed);
            wrapped.as_str()
        };

        let mut parser = Parser {
            input: text.as_bytes(),
            pos: 0,
            depth: 0,
        };
        let filter = parser.filter()?;
        if parser.pos != parser.input.len() {
            return Err(filter_error(format!(
                "unexpected trailing input at offset {}",
                parser.pos
            )));
        }
        Ok(filter)
    }

    /// Append the BER encoding of this filter
    pub fn encode(&self, w: &mut BerWriter) -> io::Result<()> {
        match self {
            Filter::And(items) => w.write_constructed(tag::AND, |w| encode_all(w, items)),
            Filter::Or(items) => w.write_constructed(tag::OR, |w| encode_all(w, items)),
            Filter::Not(inner) => w.write_constructed(tag::NOT, |w| inner.encode(w)),
            Filter::Equality { attr, value } => encode_ava(w, tag::EQUALITY, attr, value),
            Filter::GreaterOrEqual { attr, value } => {
                encode_ava(w, tag::GREATER_OR_EQUAL, attr, value)
            }
            Filter::LessOrEqual { attr, value } => encode_ava(w, tag::LESS_OR_EQUAL, attr, value),
            Filter::Approx { attr, value } => encode_ava(w, tag::APPROX, attr, value),
            Filter::Present(attr) => {
                w.write_octets(tag::PRESENT, attr.as_bytes());
                Ok(())
            }
            Filter::Substrings {
                attr,
                initial,
                any,
                final_value,
            } => w.write_constructed(tag::SUBSTRINGS, |w| {
                w.write_octets(ber::OCTET_STRING, attr.as_bytes());
                w.write_sequence(|w| {
                    if let Some(v) = initial {
                        w.write_octets(tag::SUB_INITIAL, v);
                    }
                    for v in any {
                        w.write_octets(tag::SUB_ANY, v);
                    }
                    if let Some(v) = final_value {
                        w.write_octets(tag::SUB_FINAL, v);
                    }
                    Ok(())
                })
            }),
            Filter::Extensible {
                rule,
                attr,
                value,
                dn_attributes,
            } => w.write_constructed(tag::EXTENSIBLE, |w| {
                if let Some(rule) = rule {
                    w.write_octets(tag::MATCHING_RULE, rule.as_bytes());
                }
                if let Some(attr) = attr {
                    w.write_octets(tag::MATCH_TYPE, attr.as_bytes());
                }
                w.write_octets(tag::MATCH_VALUE, value);
                if *dn_attributes {
                    w.write_bool(tag::DN_ATTRIBUTES, true);
                }
                Ok(())
            }),
        }
    }

    /// Read one filter from `r`
    ///
    /// Nesting deeper than [`MAX_FILTER_DEPTH`] is rejected as invalid data.
    pub fn decode(r: &mut BerReader<'_>) -> io::Result<Filter> {
        Filter::decode_nested(r, 0)
    }

    fn decode_nested(r: &mut BerReader<'_>, depth: usize) -> io::Result<Filter> {
        if depth >= MAX_FILTER_DEPTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("filter nested deeper than {} levels", MAX_FILTER_DEPTH),
            ));
        }
        let (t, body) = r.read_tlv()?;
        let mut inner = BerReader::new(body);
        let filter = match t {
            tag::AND | tag::OR => {
                let mut items = Vec::new();
                while !inner.is_empty() {
                    items.push(Filter::decode_nested(&mut inner, depth + 1)?);
                }
                if t == tag::AND {
                    Filter::And(items)
                } else {
                    Filter::Or(items)
                }
            }
            tag::NOT => Filter::Not(Box::new(Filter::decode_nested(&mut inner, depth + 1)?)),
            tag::EQUALITY | tag::GREATER_OR_EQUAL | tag::LESS_OR_EQUAL | tag::APPROX => {
                let attr = inner.read_string(ber::OCTET_STRING)?;
                let value = inner.read_expected(ber::OCTET_STRING)?.to_vec();
                match t {
                    tag::EQUALITY => Filter::Equality { attr, value },
                    tag::GREATER_OR_EQUAL => Filter::GreaterOrEqual { attr, value },
                    tag::LESS_OR_EQUAL => Filter::LessOrEqual { attr, value },
                    _ => Filter::Approx { attr, value },
                }
            }
            tag::PRESENT => Filter::Present(bytes_to_string(body)?),
            tag::SUBSTRINGS => {
                let attr = inner.read_string(ber::OCTET_STRING)?;
                let mut parts = inner.read_constructed(ber::SEQUENCE)?;
                let mut initial = None;
                let mut any = Vec::new();
                let mut final_value = None;
                while !parts.is_empty() {
                    let (pt, pv) = parts.read_tlv()?;
                    match pt {
                        tag::SUB_INITIAL => initial = Some(pv.to_vec()),
                        tag::SUB_ANY => any.push(pv.to_vec()),
                        tag::SUB_FINAL => final_value = Some(pv.to_vec()),
                        other => {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("unknown substring choice 0x{:02x}", other),
                            ))
                        }
                    }
                }
                Filter::Substrings {
                    attr,
                    initial,
                    any,
                    final_value,
                }
            }
            tag::EXTENSIBLE => {
                let rule = inner
                    .read_optional(tag::MATCHING_RULE)?
                    .map(bytes_to_string)
                    .transpose()?;
                let attr = inner
                    .read_optional(tag::MATCH_TYPE)?
                    .map(bytes_to_string)
                    .transpose()?;
                let value = inner.read_expected(tag::MATCH_VALUE)?.to_vec();
                let dn_attributes = match inner.peek_tag() {
                    Some(tag::DN_ATTRIBUTES) => inner.read_bool(tag::DN_ATTRIBUTES)?,
                    _ => false,
                };
                Filter::Extensible {
                    rule,
                    attr,
                    value,
                    dn_attributes,
                }
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown filter choice 0x{:02x}", other),
                ))
            }
        };
        Ok(filter)
    }
}

fn encode_all(w: &mut BerWriter, items: &[Filter]) -> io::Result<()> {
    for item in items {
        item.encode(w)?;
    }
    Ok(())
}

fn encode_ava(w: &mut BerWriter, t: u8, attr: &str, value: &[u8]) -> io::Result<()> {
    w.write_constructed(t, |w| {
        w.write_octets(ber::OCTET_STRING, attr.as_bytes());
        w.write_octets(ber::OCTET_STRING, value);
        Ok(())
    })
}

fn filter_error(msg: impl Into<String>) -> crate::Error {
    crate::Error::Library(LdapError::new(ResultCode::FilterError, msg))
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> crate::Result<()> {
        match self.peek() {
            Some(found) if found == c => {
                self.pos += 1;
                Ok(())
            }
            Some(found) => Err(filter_error(format!(
                "expected '{}' at offset {}, found '{}'",
                c as char, self.pos, found as char
            ))),
            None => Err(filter_error(format!(
                "expected '{}' at end of filter",
                c as char
            ))),
        }
    }

    fn filter(&mut self) -> crate::Result<Filter> {
        if self.depth >= MAX_FILTER_DEPTH {
            return Err(filter_error(format!(
                "filter nested deeper than {} levels at offset {}",
                MAX_FILTER_DEPTH, self.pos
            )));
        }
        self.depth += 1;
        let filter = self.nested();
        self.depth -= 1;
        filter
    }

    fn nested(&mut self) -> crate::Result<Filter> {
        self.expect(b'(')?;
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(filter_error("unterminated filter")),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn list(&mut self) -> crate::Result<Vec<Filter>> {
        let mut items = Vec::new();
        while self.peek() == Some(b'(') {
            items.push(self.filter()?);
        }
        Ok(items)
    }

    fn item(&mut self) -> crate::Result<Filter> {
        let start = self.pos;
        let eq = self.input[start..]
            .iter()
            .position(|b| *b == b'=' || *b == b'(' || *b == b')')
            .map(|i| start + i)
            .filter(|i| self.input[*i] == b'=')
            .ok_or_else(|| filter_error(format!("missing '=' in item at offset {}", start)))?;

        let lhs = std::str::from_utf8(&self.input[start..eq])
            .map_err(|_| filter_error("attribute description is not UTF-8"))?;
        self.pos = eq + 1;

        let value_start = self.pos;
        while let Some(c) = self.peek() {
            if c == b')' || c == b'(' {
                break;
            }
            self.pos += 1;
        }
        let raw = &self.input[value_start..self.pos];

        if let Some(attr) = lhs.strip_suffix('~') {
            return Ok(Filter::Approx {
                attr: attribute(attr)?,
                value: unescape(raw)?,
            });
        }
        if let Some(attr) = lhs.strip_suffix('>') {
            return Ok(Filter::GreaterOrEqual {
                attr: attribute(attr)?,
                value: unescape(raw)?,
            });
        }
        if let Some(attr) = lhs.strip_suffix('<') {
            return Ok(Filter::LessOrEqual {
                attr: attribute(attr)?,
                value: unescape(raw)?,
            });
        }
        if let Some(spec) = lhs.strip_suffix(':') {
            return extensible(spec, unescape(raw)?);
        }

        let attr = attribute(lhs)?;
        if raw == b"*" {
            return Ok(Filter::Present(attr));
        }
        if !raw.contains(&b'*') {
            return Ok(Filter::Equality {
                attr,
                value: unescape(raw)?,
            });
        }

        let pieces: Vec<&[u8]> = raw.split(|b| *b == b'*').collect();
        let last = pieces.len() - 1;
        let mut initial = None;
        let mut any = Vec::new();
        let mut final_value = None;
        for (i, piece) in pieces.iter().enumerate() {
            if piece.is_empty() {
                continue;
            }
            let value = unescape(piece)?;
            if i == 0 {
                initial = Some(value);
            } else if i == last {
                final_value = Some(value);
            } else {
                any.push(value);
            }
        }
        Ok(Filter::Substrings {
            attr,
            initial,
            any,
            final_value,
        })
    }
}

fn attribute(text: &str) -> crate::Result<String> {
    let valid = !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | ';' | '.' | '_'));
    if !valid {
        return Err(filter_error(format!("invalid attribute description '{}'", text)));
    }
    Ok(text.to_string())
}

fn extensible(spec: &str, value: Vec<u8>) -> crate::Result<Filter> {
    let mut parts = spec.split(':');
    let attr = match parts.next() {
        Some("") | None => None,
        Some(a) => Some(attribute(a)?),
    };
    let mut dn_attributes = false;
    let mut rule = None;
    for part in parts {
        if part.eq_ignore_ascii_case("dn") && !dn_attributes && rule.is_none() {
            dn_attributes = true;
        } else if rule.is_none() {
            rule = Some(attribute(part)?);
        } else {
            return Err(filter_error(format!("invalid extensible match '{}:='", spec)));
        }
    }
    if attr.is_none() && rule.is_none() {
        return Err(filter_error(
            "extensible match needs an attribute or a matching rule",
        ));
    }
    Ok(Filter::Extensible {
        rule,
        attr,
        value,
        dn_attributes,
    })
}

fn unescape(raw: &[u8]) -> crate::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' {
            let hex = raw
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| filter_error("invalid escape sequence in assertion value"))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    Ok(out)
}

fn write_escaped(f: &mut fmt::Formatter<'_>, value: &[u8]) -> fmt::Result {
    for b in value {
        match b {
            b'*' | b'(' | b')' | b'\\' | 0x00..=0x1F | 0x7F..=0xFF => write!(f, "\\{:02x}", b)?,
            _ => write!(f, "{}", *b as char)?,
        }
    }
    Ok(())
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(items) | Filter::Or(items) => {
                f.write_str(if matches!(self, Filter::And(_)) { "(&" } else { "(|" })?;
                for item in items {
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
            Filter::Not(inner) => write!(f, "(!{})", inner),
            Filter::Equality { attr, value } => {
                write!(f, "({}=", attr)?;
                write_escaped(f, value)?;
                f.write_str(")")
            }
            Filter::GreaterOrEqual { attr, value } => {
                write!(f, "({}>=", attr)?;
                write_escaped(f, value)?;
                f.write_str(")")
            }
            Filter::LessOrEqual { attr, value } => {
                write!(f, "({}<=", attr)?;
                write_escaped(f, value)?;
                f.write_str(")")
            }
            Filter::Approx { attr, value } => {
                write!(f, "({}~=", attr)?;
                write_escaped(f, value)?;
                f.write_str(")")
            }
            Filter::Present(attr) => write!(f, "({}=*)", attr),
            Filter::Substrings {
                attr,
                initial,
                any,
                final_value,
            } => {
                write!(f, "({}=", attr)?;
                if let Some(v) = initial {
                    write_escaped(f, v)?;
                }
                f.write_str("*")?;
                for v in any {
                    write_escaped(f, v)?;
                    f.write_str("*")?;
                }
                if let Some(v) = final_value {
                    write_escaped(f, v)?;
                }
                f.write_str(")")
            }
            Filter::Extensible {
                rule,
                attr,
                value,
                dn_attributes,
            } => {
                f.write_str("(")?;
                if let Some(attr) = attr {
                    f.write_str(attr)?;
                }
                if *dn_attributes {
                    f.write_str(":dn")?;
                }
                if let Some(rule) = rule {
                    write!(f, ":{}", rule)?;
                }
                f.write_str(":=")?;
                write_escaped(f, value)?;
                f.write_str(")")
            }
        }
    }
}

impl FromStr for Filter {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Filter::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Filter {
        Filter::parse(s).unwrap_or_else(|e| panic!("{}: {}", s, e))
    }

    fn ber_roundtrip(filter: &Filter) -> Filter {
        let mut w = BerWriter::new();
        filter.encode(&mut w).unwrap();
        let bytes = w.into_bytes();
        let mut r = BerReader::new(&bytes);
        let decoded = Filter::decode(&mut r).unwrap();
        assert!(r.is_empty());
        decoded
    }

    #[test]
    fn test_present() {
        assert_eq!(parse("(objectClass=*)"), Filter::Present("objectClass".into()));
    }

    #[test]
    fn test_bare_filter_is_wrapped() {
        assert_eq!(parse("uid=jdoe"), parse("(uid=jdoe)"));
    }

    #[test]
    fn test_boolean_composition() {
        let f = parse("(&(objectClass=person)(|(uid=a)(uid=b))(!(cn=x)))");
        match f {
            Filter::And(items) => {
                assert_eq!(items.len(), 3);
                assert!(matches!(items[1], Filter::Or(ref v) if v.len() == 2));
                assert!(matches!(items[2], Filter::Not(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_comparisons() {
        assert!(matches!(parse("(age>=21)"), Filter::GreaterOrEqual { .. }));
        assert!(matches!(parse("(age<=65)"), Filter::LessOrEqual { .. }));
        assert!(matches!(parse("(cn~=jon)"), Filter::Approx { .. }));
    }

    #[test]
    fn test_substrings() {
        assert_eq!(
            parse("(cn=Jo*n*Sm*th)"),
            Filter::Substrings {
                attr: "cn".into(),
                initial: Some(b"Jo".to_vec()),
                any: vec![b"n".to_vec(), b"Sm".to_vec()],
                final_value: Some(b"th".to_vec()),
            }
        );
        assert_eq!(
            parse("(cn=*son)"),
            Filter::Substrings {
                attr: "cn".into(),
                initial: None,
                any: vec![],
                final_value: Some(b"son".to_vec()),
            }
        );
    }

    #[test]
    fn test_escapes() {
        assert_eq!(
            parse(r"(cn=a\2ab\28c\29)"),
            Filter::Equality {
                attr: "cn".into(),
                value: b"a*b(c)".to_vec(),
            }
        );
        assert!(Filter::parse(r"(cn=bad\zz)").is_err());
    }

    #[test]
    fn test_extensible() {
        assert_eq!(
            parse("(cn:dn:caseExactMatch:=Fred)"),
            Filter::Extensible {
                rule: Some("caseExactMatch".into()),
                attr: Some("cn".into()),
                value: b"Fred".to_vec(),
                dn_attributes: true,
            }
        );
        assert_eq!(
            parse("(:2.5.13.5:=x)"),
            Filter::Extensible {
                rule: Some("2.5.13.5".into()),
                attr: None,
                value: b"x".to_vec(),
                dn_attributes: false,
            }
        );
        assert!(Filter::parse("(:dn:=x)").is_err());
    }

    #[test]
    fn test_parse_errors_carry_filter_error_code() {
        for bad in ["", "(", "(cn=x", "(cn=x))", "(=x)", "(&(cn=x)", "(c n=x)"] {
            let err = Filter::parse(bad).unwrap_err();
            assert_eq!(
                err.result_code(),
                Some(ResultCode::FilterError),
                "input {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_display_reparses() {
        for text in [
            "(objectClass=*)",
            "(&(uid=jdoe)(!(cn=a\\2ab)))",
            "(cn=Jo*n*th)",
            "(cn:dn:caseExactMatch:=Fred)",
            "(|(age>=21)(age<=3)(sn~=smith))",
        ] {
            let f = parse(text);
            assert_eq!(parse(&f.to_string()), f);
        }
    }

    #[test]
    fn test_ber_encoding_of_present() {
        let mut w = BerWriter::new();
        parse("(objectClass=*)").encode(&mut w).unwrap();
        let mut expected = vec![0x87, 11];
        expected.extend_from_slice(b"objectClass");
        assert_eq!(w.into_bytes().to_vec(), expected);
    }

    fn nested_not(depth: usize) -> String {
        format!("{}(cn=x){}", "(!".repeat(depth), ")".repeat(depth))
    }

    #[test]
    fn test_nesting_limit_on_parse() {
        // the innermost item is one level below the last `!`
        let at_limit = nested_not(MAX_FILTER_DEPTH - 1);
        assert!(Filter::parse(&at_limit).is_ok());

        let err = Filter::parse(&nested_not(MAX_FILTER_DEPTH)).unwrap_err();
        assert_eq!(err.result_code(), Some(ResultCode::FilterError));

        let err = Filter::parse(&nested_not(200_000)).unwrap_err();
        assert_eq!(err.result_code(), Some(ResultCode::FilterError));

        let deep_and = format!("{}(cn=x){}", "(&".repeat(500), ")".repeat(500));
        assert!(Filter::parse(&deep_and).is_err());
    }

    #[test]
    fn test_nesting_limit_on_decode() {
        // hand-built `(!(!...(cn=x)))`, far past the limit
        let mut bytes = vec![0xA3, 0x07, 0x04, 0x02, b'c', b'n', 0x04, 0x01, b'x'];
        for _ in 0..1_000 {
            let mut w = BerWriter::new();
            w.write_tlv(tag::NOT, &bytes);
            bytes = w.into_bytes().to_vec();
        }

        let err = Filter::decode(&mut BerReader::new(&bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let within = parse(&nested_not(MAX_FILTER_DEPTH - 1));
        assert_eq!(ber_roundtrip(&within), within);
    }

    #[test]
    fn test_ber_decode_matches_parse() {
        let f = parse("(&(cn=Jo*n)(member:dn:=x)(|(a>=1)(b<=2)(c~=3)(d=*)))");
        assert_eq!(ber_roundtrip(&f), f);
    }
}
