//! RFC 2617-style HTTP Digest authentication for the `/1.0-over-HTTP` and
//! `/2.0` dialects (spec §4.5, §7). Mirrors the `md-5`/`digest` crate
//! pairing used by the kata-containers HTTP auth client in the retrieval
//! pack (`other_examples/.../src-digest.rs`), but on the server side: we
//! issue the challenge and validate the response instead of computing one
//! to send.

use digest::Digest;
use md5::Md5;
use rand::RngCore;
use subtle::ConstantTimeEq;

pub const REALM: &str = "NTRIP";

/// Generate a fresh opaque nonce for a `WWW-Authenticate: Digest` challenge.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Build the `WWW-Authenticate` header value for a fresh Digest challenge.
pub fn challenge_header(nonce: &str) -> String {
    format!(r#"Digest realm="{REALM}", nonce="{nonce}", algorithm=MD5, qop="auth""#)
}

fn md5_hex(parts: &[&str]) -> String {
    let mut hasher = Md5::new();
    hasher.update(parts.join(":").as_bytes());
    hex::encode(hasher.finalize())
}

/// Fields extracted from an `Authorization: Digest ...` header.
#[derive(Debug, Clone)]
pub struct DigestParams {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub qop: Option<String>,
    pub nc: Option<String>,
    pub cnonce: Option<String>,
}

impl DigestParams {
    /// Parse the comma-separated `key=value` list following `Digest `.
    pub fn parse(header_value: &str) -> Option<DigestParams> {
        let rest = header_value.trim().strip_prefix("Digest ")?;

        let mut username = None;
        let mut realm = None;
        let mut nonce = None;
        let mut uri = None;
        let mut response = None;
        let mut qop = None;
        let mut nc = None;
        let mut cnonce = None;

        for field in split_params(rest) {
            let (key, value) = field.split_once('=')?;
            let value = value.trim().trim_matches('"').to_string();
            match key.trim() {
                "username" => username = Some(value),
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "uri" => uri = Some(value),
                "response" => response = Some(value),
                "qop" => qop = Some(value),
                "nc" => nc = Some(value),
                "cnonce" => cnonce = Some(value),
                _ => {}
            }
        }

        Some(DigestParams {
            username: username?,
            realm: realm?,
            nonce: nonce?,
            uri: uri?,
            response: response?,
            qop,
            nc,
            cnonce,
        })
    }
}

/// Split a Digest parameter list on top-level commas, ignoring commas inside
/// quoted values (e.g. a `qop` list `"auth,auth-int"`).
fn split_params(input: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = input[start..].trim();
    if !tail.is_empty() {
        fields.push(tail);
    }
    fields
}

/// Validate a Digest response against the known password, for `method` and
/// `uri` as actually issued by the client (spec §4.5: HA1=MD5(user:realm:pw),
/// HA2=MD5(method:uri), response=MD5(HA1:nonce[:nc:cnonce:qop]:HA2)).
pub fn validate_response(params: &DigestParams, method: &str, password: &str) -> bool {
    if params.realm != REALM {
        return false;
    }

    let ha1 = md5_hex(&[&params.username, &params.realm, password]);
    let ha2 = md5_hex(&[method, &params.uri]);

    let expected = match (&params.qop, &params.nc, &params.cnonce) {
        (Some(qop), Some(nc), Some(cnonce)) => {
            md5_hex(&[&ha1, &params.nonce, nc, cnonce, qop, &ha2])
        }
        _ => md5_hex(&[&ha1, &params.nonce, &ha2]),
    };

    expected.as_bytes().ct_eq(params.response.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_digest_header() {
        let header = r#"Digest username="u1", realm="NTRIP", nonce="abc123", uri="/BASE1", response="deadbeef", qop=auth, nc=00000001, cnonce="xyz""#;
        let params = DigestParams::parse(header).unwrap();
        assert_eq!(params.username, "u1");
        assert_eq!(params.realm, "NTRIP");
        assert_eq!(params.nonce, "abc123");
        assert_eq!(params.qop.as_deref(), Some("auth"));
    }

    #[test]
    fn round_trips_valid_response() {
        let nonce = "testnonce";
        let ha1 = md5_hex(&["u1", REALM, "pw1"]);
        let ha2 = md5_hex(&["GET", "/BASE1"]);
        let response = md5_hex(&[&ha1, nonce, &ha2]);

        let params = DigestParams {
            username: "u1".to_string(),
            realm: REALM.to_string(),
            nonce: nonce.to_string(),
            uri: "/BASE1".to_string(),
            response,
            qop: None,
            nc: None,
            cnonce: None,
        };

        assert!(validate_response(&params, "GET", "pw1"));
        assert!(!validate_response(&params, "GET", "wrong"));
    }

    #[test]
    fn rejects_wrong_realm() {
        let params = DigestParams {
            username: "u1".to_string(),
            realm: "other".to_string(),
            nonce: "n".to_string(),
            uri: "/BASE1".to_string(),
            response: "x".to_string(),
            qop: None,
            nc: None,
            cnonce: None,
        };
        assert!(!validate_response(&params, "GET", "pw1"));
    }
}
