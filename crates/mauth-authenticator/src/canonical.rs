//! Canonical request hashing.
//!
//! The canonical form of a request is the newline-joined sequence
//!
//! ```text
//! <METHOD>\n<absolute path>\n<body>\n<app uuid>\n<signed unix seconds>
//! ```
//!
//! hashed with SHA-512. The lowercase hex encoding of the digest (128 ASCII
//! bytes) is what gets signed and verified; it is identical for every protocol
//! version.

use sha2::{Digest, Sha512};
use uuid::Uuid;

/// Build the pre-hash canonical byte string.
///
/// The body is copied verbatim; it may be arbitrary binary data.
#[must_use]
pub fn canonical_string(
    method: &str,
    path: &str,
    body: &[u8],
    app_uuid: Uuid,
    signed_time_secs: i64,
) -> Vec<u8> {
    let uuid = app_uuid.hyphenated().to_string();
    let secs = signed_time_secs.to_string();

    let mut out =
        Vec::with_capacity(method.len() + path.len() + body.len() + uuid.len() + secs.len() + 4);
    out.extend_from_slice(method.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(path.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(body);
    out.push(b'\n');
    out.extend_from_slice(uuid.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(secs.as_bytes());
    out
}

/// Compute the canonical hash of a request: hex-encoded SHA-512 of
/// [`canonical_string`].
///
/// # Examples
///
/// ```
/// use mauth_authenticator::canonical::canonicalize;
///
/// let hash = canonicalize("GET", "/resource", b"", uuid::Uuid::nil(), 1_700_000_000);
/// assert_eq!(hash.len(), 128);
/// ```
#[must_use]
pub fn canonicalize(
    method: &str,
    path: &str,
    body: &[u8],
    app_uuid: Uuid,
    signed_time_secs: i64,
) -> Vec<u8> {
    let digest = Sha512::digest(canonical_string(method, path, body, app_uuid, signed_time_secs));
    hex::encode(digest).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP_UUID: Uuid = Uuid::from_u128(0x1111_1111_1111_1111_1111_1111_1111_1111);
    const SIGNED_AT: i64 = 1_700_000_000;

    fn base() -> Vec<u8> {
        canonicalize("GET", "/resource", b"", APP_UUID, SIGNED_AT)
    }

    #[test]
    fn test_should_build_newline_joined_canonical_string() {
        let s = canonical_string("GET", "/resource", b"", APP_UUID, SIGNED_AT);
        assert_eq!(
            s,
            b"GET\n/resource\n\n11111111-1111-1111-1111-111111111111\n1700000000".to_vec()
        );
    }

    #[test]
    fn test_should_match_known_canonical_hash() {
        assert_eq!(
            String::from_utf8(base()).unwrap(),
            "980ce803d4adc174ebe08c49a10dd42cb9d6bda95be974023facb342f8ca24a0\
             a3649df77da5b532a5a4c4da34e4767dd37724874b919625296c63124d599d31"
        );
    }

    #[test]
    fn test_should_be_deterministic() {
        assert_eq!(base(), base());
    }

    #[test]
    fn test_should_produce_lowercase_hex_of_sha512_length() {
        let hash = base();
        assert_eq!(hash.len(), 128);
        assert!(hash.iter().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b)));
    }

    #[test]
    fn test_should_change_when_any_single_field_changes() {
        let reference = base();
        let variants = [
            canonicalize("POST", "/resource", b"", APP_UUID, SIGNED_AT),
            canonicalize("GET", "/resources", b"", APP_UUID, SIGNED_AT),
            canonicalize("GET", "/resource", b"x", APP_UUID, SIGNED_AT),
            canonicalize("GET", "/resource", b"", Uuid::nil(), SIGNED_AT),
            canonicalize("GET", "/resource", b"", APP_UUID, SIGNED_AT + 1),
        ];
        for variant in variants {
            assert_ne!(variant, reference);
        }
    }

    #[test]
    fn test_should_hash_binary_body_verbatim() {
        let a = canonicalize("PUT", "/blob", &[0x00, 0xff, 0x0a], APP_UUID, SIGNED_AT);
        let b = canonicalize("PUT", "/blob", &[0x00, 0xff, 0x0b], APP_UUID, SIGNED_AT);
        assert_ne!(a, b);
    }
}
