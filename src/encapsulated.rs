//! `Encapsulated` header descriptor (RFC 3507 section 4.4).
//!
//! The header lists the byte offsets of the embedded HTTP sub-sections
//! inside the message body region, e.g. `req-hdr=0, res-hdr=45,
//! res-body=100`. Offsets are relative to the start of the encapsulated
//! area (immediately after the ICAP headers CRLFCRLF). The difference
//! between consecutive offsets gives the byte length of each header
//! section; the body section, when present, is always last.

use std::fmt;

use crate::error::{Error, IcapResult};
use crate::message::Method;

/// One kind of encapsulated section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    ReqHdr,
    ResHdr,
    ReqBody,
    ResBody,
    OptBody,
    NullBody,
}

impl SectionKind {
    /// Wire token of the section kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::ReqHdr => "req-hdr",
            SectionKind::ResHdr => "res-hdr",
            SectionKind::ReqBody => "req-body",
            SectionKind::ResBody => "res-body",
            SectionKind::OptBody => "opt-body",
            SectionKind::NullBody => "null-body",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "req-hdr" => Some(SectionKind::ReqHdr),
            "res-hdr" => Some(SectionKind::ResHdr),
            "req-body" => Some(SectionKind::ReqBody),
            "res-body" => Some(SectionKind::ResBody),
            "opt-body" => Some(SectionKind::OptBody),
            "null-body" => Some(SectionKind::NullBody),
            _ => None,
        }
    }

    /// Whether this kind closes the section list.
    pub fn is_body(&self) -> bool {
        matches!(
            self,
            SectionKind::ReqBody
                | SectionKind::ResBody
                | SectionKind::OptBody
                | SectionKind::NullBody
        )
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed, validated `Encapsulated` descriptor: an ordered list of
/// `(section kind, byte offset)` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encapsulated {
    entries: Vec<(SectionKind, usize)>,
}

impl Encapsulated {
    /// Parse and validate an `Encapsulated` header value.
    ///
    /// `method` drives the per-method section rules; pass `None` when
    /// decoding responses (or for extension methods), which accepts any
    /// well-formed descriptor.
    pub fn parse(method: Option<&Method>, value: &str) -> IcapResult<Self> {
        let mut entries: Vec<(SectionKind, usize)> = Vec::new();
        for part in value.split(',') {
            let part = part.trim();
            let Some((token, offset)) = part.split_once('=') else {
                return Err(Error::encapsulated(format!("expected token=offset, got {part:?}")));
            };
            let token = token.trim();
            let Some(kind) = SectionKind::from_token(token) else {
                return Err(Error::encapsulated(format!("unknown section kind {token:?}")));
            };
            let offset: usize = offset
                .trim()
                .parse()
                .map_err(|_| Error::encapsulated(format!("invalid offset for {token}")))?;
            if entries.iter().any(|(k, _)| *k == kind) {
                return Err(Error::encapsulated(format!("section {kind} listed twice")));
            }
            if let Some(&(_, prev)) = entries.last()
                && offset < prev
            {
                return Err(Error::encapsulated(format!(
                    "offset of {kind} decreases ({offset} < {prev})"
                )));
            }
            entries.push((kind, offset));
        }
        let Some(&(last, _)) = entries.last() else {
            return Err(Error::encapsulated("empty descriptor"));
        };
        if !last.is_body() {
            return Err(Error::encapsulated(format!(
                "descriptor must end with a body section, ends with {last}"
            )));
        }
        if entries[..entries.len() - 1].iter().any(|(k, _)| k.is_body()) {
            return Err(Error::encapsulated("body section is not the last entry"));
        }

        let kinds: Vec<SectionKind> = entries.iter().map(|(k, _)| *k).collect();
        let allowed = match method {
            Some(Method::Options) => matches!(
                kinds[..],
                [SectionKind::OptBody] | [SectionKind::NullBody]
            ),
            Some(Method::ReqMod) => matches!(
                kinds[..],
                [SectionKind::ReqBody]
                    | [SectionKind::NullBody]
                    | [SectionKind::ReqHdr, SectionKind::ReqBody]
                    | [SectionKind::ReqHdr, SectionKind::NullBody]
            ),
            Some(Method::RespMod) => matches!(
                kinds[..],
                [SectionKind::ResHdr, SectionKind::ResBody]
                    | [SectionKind::ResHdr, SectionKind::NullBody]
                    | [SectionKind::ReqHdr, SectionKind::ResHdr, SectionKind::ResBody]
                    | [SectionKind::ReqHdr, SectionKind::ResHdr, SectionKind::NullBody]
            ),
            Some(Method::Extension(_)) | None => true,
        };
        if !allowed {
            return Err(Error::encapsulated(format!(
                "sections not permitted for this method: {value:?}"
            )));
        }
        Ok(Self { entries })
    }

    /// Ordered `(kind, offset)` entries.
    pub fn entries(&self) -> &[(SectionKind, usize)] {
        &self.entries
    }

    pub fn contains(&self, kind: SectionKind) -> bool {
        self.entries.iter().any(|(k, _)| *k == kind)
    }

    pub fn offset_of(&self, kind: SectionKind) -> Option<usize> {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|&(_, off)| off)
    }

    /// Byte length of a header section: the next entry's offset minus its
    /// own. `None` for the body section and for absent kinds.
    pub fn section_len(&self, kind: SectionKind) -> Option<usize> {
        let idx = self.entries.iter().position(|(k, _)| *k == kind)?;
        let (_, offset) = self.entries[idx];
        let &(_, next) = self.entries.get(idx + 1)?;
        Some(next - offset)
    }

    /// The trailing body entry's kind (`null-body` included).
    pub fn body_kind(&self) -> Option<SectionKind> {
        self.entries.last().map(|&(k, _)| k)
    }

    /// Whether encapsulated body bytes follow the header sections.
    pub fn has_body(&self) -> bool {
        self.body_kind()
            .is_some_and(|k| k.is_body() && k != SectionKind::NullBody)
    }
}

impl fmt::Display for Encapsulated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (kind, offset)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{kind}={offset}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_descriptor_variants() {
        let e = Encapsulated::parse(Some(&Method::ReqMod), "req-hdr=0, req-body=123").unwrap();
        assert_eq!(e.offset_of(SectionKind::ReqHdr), Some(0));
        assert_eq!(e.offset_of(SectionKind::ReqBody), Some(123));
        assert_eq!(e.section_len(SectionKind::ReqHdr), Some(123));
        assert!(e.has_body());

        let e = Encapsulated::parse(Some(&Method::RespMod), "req-hdr=0,res-hdr=42,null-body=80")
            .unwrap();
        assert_eq!(e.section_len(SectionKind::ReqHdr), Some(42));
        assert_eq!(e.section_len(SectionKind::ResHdr), Some(38));
        assert_eq!(e.body_kind(), Some(SectionKind::NullBody));
        assert!(!e.has_body());
    }

    #[test]
    fn whitespace_is_tolerated() {
        let e = Encapsulated::parse(None, " res-hdr = 0 ,  res-body = 7 ").unwrap();
        assert_eq!(e.entries().len(), 2);
    }

    #[test]
    fn unknown_tokens_and_bad_offsets_are_rejected() {
        assert!(Encapsulated::parse(None, "totally-wrong=abc").is_err());
        assert!(Encapsulated::parse(None, "res-body=-5").is_err());
        assert!(Encapsulated::parse(None, "res-body").is_err());
        assert!(Encapsulated::parse(None, "").is_err());
    }

    #[test]
    fn offsets_must_not_decrease() {
        let err = Encapsulated::parse(None, "req-hdr=10, null-body=5").unwrap_err();
        assert!(matches!(err, Error::InvalidEncapsulatedHeader(_)));
        // equal offsets describe an empty header section and are fine
        assert!(Encapsulated::parse(None, "req-hdr=0, null-body=0").is_ok());
    }

    #[test]
    fn body_section_must_close_the_list() {
        assert!(Encapsulated::parse(None, "req-body=0, req-hdr=10").is_err());
        assert!(Encapsulated::parse(None, "req-hdr=0").is_err());
        assert!(Encapsulated::parse(None, "req-body=0, res-body=10").is_err());
        assert!(Encapsulated::parse(None, "req-hdr=0, req-hdr=10, null-body=10").is_err());
    }

    #[test]
    fn method_rules() {
        assert!(Encapsulated::parse(Some(&Method::Options), "opt-body=0").is_ok());
        assert!(Encapsulated::parse(Some(&Method::Options), "req-hdr=0, null-body=10").is_err());
        assert!(Encapsulated::parse(Some(&Method::ReqMod), "res-hdr=0, res-body=10").is_err());
        assert!(Encapsulated::parse(Some(&Method::RespMod), "req-body=0").is_err());
        assert!(
            Encapsulated::parse(Some(&Method::RespMod), "req-hdr=0, res-hdr=30, res-body=70")
                .is_ok()
        );
        // RESPMOD needs the response head
        assert!(Encapsulated::parse(Some(&Method::RespMod), "req-hdr=0, res-body=70").is_err());
        // extension methods accept any well-formed descriptor
        let m = Method::from_name("AUDIT");
        assert!(Encapsulated::parse(Some(&m), "res-hdr=0, opt-body=12").is_ok());
    }
}
