//! DER helpers
//!
//! The structures this crate emits are small and fixed, so encoding is done
//! with a handful of TLV builders. Decoding walks TLVs with [`asn1_rs::Any`]
//! and leaves interpretation of each field to the caller.

use std::borrow::Cow;

use asn1_rs::{Any, Class, FromDer, Oid, Tag};
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::ProtoError;

// ============================================================================
// Encoding
// ============================================================================

/// Encode a SEQUENCE
pub(crate) fn sequence(contents: &[u8]) -> Vec<u8> {
    tlv(0x30, contents)
}

/// Encode an OCTET STRING
pub(crate) fn octet_string(contents: &[u8]) -> Vec<u8> {
    tlv(0x04, contents)
}

/// Encode an INTEGER from its minimal two's complement big-endian bytes
pub(crate) fn integer(twos_complement: &[u8]) -> Vec<u8> {
    if twos_complement.is_empty() {
        return tlv(0x02, &[0x00]);
    }
    tlv(0x02, twos_complement)
}

/// Encode an OBJECT IDENTIFIER
pub(crate) fn oid(components: &[u64]) -> Vec<u8> {
    if components.len() < 2 {
        return tlv(0x06, &[]);
    }

    // First two arcs share one subidentifier: 40 * v1 + v2
    let mut encoded = encode_base128(40 * components[0] + components[1]);
    for &component in &components[2..] {
        encoded.extend_from_slice(&encode_base128(component));
    }

    tlv(0x06, &encoded)
}

/// Encode NULL
pub(crate) fn null() -> Vec<u8> {
    vec![0x05, 0x00]
}

/// Encode a context-specific, constructed (EXPLICIT) tag
pub(crate) fn explicit_context(tag: u8, contents: &[u8]) -> Vec<u8> {
    tlv(0xA0 | tag, contents)
}

/// Encode Tag-Length-Value
pub(crate) fn tlv(tag: u8, contents: &[u8]) -> Vec<u8> {
    let mut result = vec![tag];
    result.extend_from_slice(&length(contents.len()));
    result.extend_from_slice(contents);
    result
}

/// Encode a DER length
fn length(len: usize) -> Vec<u8> {
    if len < 128 {
        return vec![len as u8];
    }

    // Long form: 0x80 | number of length bytes, then big-endian length
    let mut length_bytes = Vec::new();
    let mut remaining = len;
    while remaining > 0 {
        length_bytes.insert(0, (remaining & 0xFF) as u8);
        remaining >>= 8;
    }
    let mut result = vec![0x80 | length_bytes.len() as u8];
    result.extend_from_slice(&length_bytes);
    result
}

/// Base-128 encoding for OID subidentifiers
fn encode_base128(mut value: u64) -> Vec<u8> {
    let mut result = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        result.insert(0, (value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    result
}

// ============================================================================
// Decoding
// ============================================================================

/// Sequential reader over the contents of a constructed DER value
pub(crate) struct Reader<'a> {
    rest: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { rest: data }
    }

    /// Open the single SEQUENCE filling `data` and read its contents
    pub(crate) fn sequence_of(data: &'a [u8], what: &str) -> Result<Self, ProtoError> {
        let mut outer = Self::new(data);
        let seq = outer.expect(Tag::Sequence, what)?;
        if !outer.is_empty() {
            return Err(ProtoError::Malformed(format!("{what}: trailing data")));
        }
        Ok(Self::new(seq.data))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    /// Read the next TLV along with its raw encoding
    pub(crate) fn next_raw(&mut self, what: &str) -> Result<(Any<'a>, &'a [u8]), ProtoError> {
        let before = self.rest;
        let (rem, any) = Any::from_der(before)
            .map_err(|e| ProtoError::Malformed(format!("{what}: {e:?}")))?;
        self.rest = rem;
        Ok((any, &before[..before.len() - rem.len()]))
    }

    /// Read the next TLV
    pub(crate) fn next(&mut self, what: &str) -> Result<Any<'a>, ProtoError> {
        self.next_raw(what).map(|(any, _)| any)
    }

    /// Read the next TLV, requiring a universal tag
    pub(crate) fn expect(&mut self, tag: Tag, what: &str) -> Result<Any<'a>, ProtoError> {
        let any = self.next(what)?;
        if any.header.class() != Class::Universal || any.header.tag() != tag {
            return Err(ProtoError::Malformed(format!(
                "{what}: expected {tag:?}, found {:?}",
                any.header.tag()
            )));
        }
        Ok(any)
    }

    /// Read the next TLV only if it carries context-specific tag `[n]`
    pub(crate) fn optional_context(
        &mut self,
        n: u32,
        what: &str,
    ) -> Result<Option<Any<'a>>, ProtoError> {
        if self.rest.is_empty() {
            return Ok(None);
        }
        let (_, peeked) = Any::from_der(self.rest)
            .map_err(|e| ProtoError::Malformed(format!("{what}: {e:?}")))?;
        if peeked.header.class() == Class::ContextSpecific && peeked.header.tag() == Tag(n) {
            return self.next(what).map(Some);
        }
        Ok(None)
    }
}

/// Dotted form of an OBJECT IDENTIFIER value
pub(crate) fn oid_string(any: &Any<'_>) -> String {
    Oid::new(Cow::Borrowed(any.data)).to_id_string()
}

/// Parse a GeneralizedTime value (`YYYYMMDDHHMMSS[.fff]Z`)
pub(crate) fn generalized_time(any: &Any<'_>, what: &str) -> Result<DateTime<Utc>, ProtoError> {
    let text = std::str::from_utf8(any.data)
        .map_err(|_| ProtoError::Malformed(format!("{what}: time is not ASCII")))?;

    let naive = NaiveDateTime::parse_from_str(text, "%Y%m%d%H%M%SZ")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y%m%d%H%M%S%.fZ"))
        .map_err(|e| ProtoError::Malformed(format!("{what}: '{text}': {e}")))?;

    Ok(naive.and_utc())
}

/// Contents of a BIT STRING with no unused bits
pub(crate) fn bit_string(any: &Any<'_>, what: &str) -> Result<Vec<u8>, ProtoError> {
    match any.data.split_first() {
        Some((0, bits)) => Ok(bits.to_vec()),
        _ => Err(ProtoError::Malformed(format!("{what}: bad BIT STRING"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_short_and_long_form() {
        assert_eq!(length(0), vec![0x00]);
        assert_eq!(length(127), vec![0x7F]);
        assert_eq!(length(128), vec![0x81, 0x80]);
        assert_eq!(length(0x0102), vec![0x82, 0x01, 0x02]);
    }

    #[test]
    fn test_oid_sha256() {
        let encoded = oid(&[2, 16, 840, 1, 101, 3, 4, 2, 1]);
        assert_eq!(
            encoded,
            vec![0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01]
        );
    }

    #[test]
    fn test_oid_reads_back() {
        let encoded = oid(&[1, 3, 14, 3, 2, 26]);
        let mut reader = Reader::new(&encoded);
        let any = reader.expect(Tag::Oid, "oid").unwrap();
        assert_eq!(oid_string(&any), "1.3.14.3.2.26");
        assert!(reader.is_empty());
    }

    #[test]
    fn test_optional_context_skips_other_tags() {
        let mut data = explicit_context(1, &null());
        data.extend_from_slice(&null());
        let mut reader = Reader::new(&data);

        assert!(reader.optional_context(0, "field").unwrap().is_none());
        assert!(reader.optional_context(1, "field").unwrap().is_some());
        assert!(reader.expect(Tag::Null, "null").is_ok());
    }

    #[test]
    fn test_generalized_time_with_fraction() {
        let data = tlv(0x18, b"20240102030405.5Z");
        let any = Reader::new(&data).next("time").unwrap();
        let parsed = generalized_time(&any, "time").unwrap();
        assert_eq!(parsed.timestamp(), 1_704_164_645);
        assert_eq!(parsed.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_sequence_of_rejects_trailing_data() {
        let mut data = sequence(&null());
        data.push(0x00);
        assert!(Reader::sequence_of(&data, "outer").is_err());
    }
}
