//! Protocol Dispatcher: request-line/header parsing, dialect classification,
//! auth challenge selection, and wire-response framing for all five
//! dialects (spec §4.5). This module is pure request/response logic; the
//! surrounding socket loop (reading bytes, writing the framed response,
//! handing off to the Forwarder) lives in `acceptor.rs`.
//!
//! Grounded on `_parse_request_line` / `_parse_headers` /
//! `_is_empty_request` / `_is_valid_request` in the original's
//! `src/ntrip.py`, reshaped into explicit `Result`-returning parse steps
//! instead of the original's exception-driven control flow (spec §9).

use base64::Engine;

use crate::dialect::{detect_dialect, Dialect, RequestLine};
use crate::digest::{self, DigestParams};
use crate::error::CasterError;

pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Case-insensitive header lookup over the lines following the request
/// line, preserving insertion order for sanitized logging.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn parse(lines: &[String]) -> Headers {
        let mut entries = Vec::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                entries.push((name.trim().to_string(), value.trim().to_string()));
            }
        }
        Headers { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A fully parsed request head (request line + headers), ready for
/// dialect detection and routing.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub request_line: RequestLine,
    pub headers: Headers,
}

/// Reject an empty or malformed request line before attempting dialect
/// detection (spec §11, original `_is_empty_request`/`_is_valid_request`).
pub fn parse_request(lines: &[String]) -> Result<ParsedRequest, CasterError> {
    let total_bytes: usize = lines.iter().map(|l| l.len() + 2).sum();
    if total_bytes > MAX_HEADER_BYTES {
        return Err(CasterError::BadRequest("header block too large".to_string()));
    }

    let first = lines.first().ok_or_else(|| CasterError::BadRequest("empty request".to_string()))?;
    let request_line = RequestLine::parse(first)
        .ok_or_else(|| CasterError::BadRequest("malformed request line".to_string()))?;

    let headers = Headers::parse(&lines[1..]);
    Ok(ParsedRequest { request_line, headers })
}

/// Classify a parsed request's dialect (spec §4.5 dispatch table).
pub fn classify(request: &ParsedRequest) -> Dialect {
    detect_dialect(
        &request.request_line,
        request.headers.get("Ntrip-Version"),
        request.headers.get("Authorization").is_some(),
    )
}

/// Mount path normalized to start with `/` (spec §4.5 tie-break rule).
pub fn normalize_mount_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Extract a bare mount name from a normalized path (`/BASE1` → `BASE1`);
/// rejects multi-segment paths and the sourcetable root.
pub fn mount_name_from_path(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.contains('/') {
        return None;
    }
    Some(trimmed.to_string())
}

/// An upload request line has three shapes: `SOURCE <password> <mount>`
/// puts the mount in the third token; the password-less `SOURCE <mount>`
/// puts it in the second (and must be challenged for a password
/// separately, spec §4.5 "`SOURCE /<mount>` … must be challenged with
/// 401"); the HTTP-flavoured `POST <mount> HTTP/1.1` also puts it in the
/// second. Resolve all three into a single (mount path, inline password)
/// pair so callers don't need to know which shape they got.
pub fn upload_target(request_line: &RequestLine) -> (String, Option<String>) {
    if request_line.method == "SOURCE" {
        if request_line.protocol_token.is_empty() {
            // Two-token form: "SOURCE /<mount>", no inline password; the
            // second token is the mount, not a password.
            (request_line.path.clone(), None)
        } else {
            (request_line.protocol_token.clone(), Some(request_line.path.clone()))
        }
    } else {
        (request_line.path.clone(), None)
    }
}

pub fn is_sourcetable_path(path: &str) -> bool {
    matches!(path, "/" | "" | "/sourcetable")
}

/// Parsed `Basic` credentials from an `Authorization` header value.
pub fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.trim().strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    text.split_once(':').map(|(u, p)| (u.to_string(), p.to_string()))
}

pub fn parse_digest_auth(header_value: &str) -> Option<DigestParams> {
    DigestParams::parse(header_value)
}

/// The upload success preamble (spec §4.5 "Upload handling" step 4).
pub fn upload_preamble(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::V10Native | Dialect::Rtsp | Dialect::V08 => "ICY 200 OK\r\n\r\n",
        Dialect::V10Http => "HTTP/1.1 200 OK\r\nConnection: keep-alive\r\n\r\n",
        Dialect::V20 => "HTTP/1.1 200 OK\r\nConnection: keep-alive\r\nNtrip-Version: NTRIP/2.0\r\n\r\n",
    }
}

/// The download success preamble (spec §4.5 "Download handling" step 4).
pub fn download_preamble(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::V10Native | Dialect::V10Http | Dialect::V08 | Dialect::Rtsp => {
            "ICY 200 OK\r\nConnection: keep-alive\r\n\r\n"
        }
        Dialect::V20 => {
            "HTTP/1.1 200 OK\r\nNtrip-Version: NTRIP/2.0\r\nContent-Type: application/octet-stream\r\nConnection: keep-alive\r\n\r\n"
        }
    }
}

/// `WWW-Authenticate` challenge header lines for a 401 response (spec
/// §4.5 "Missing authorization on upload").
pub fn auth_challenge_lines(nonce: &str) -> Vec<String> {
    vec![
        r#"WWW-Authenticate: Basic realm="NTRIP""#.to_string(),
        format!("WWW-Authenticate: {}", digest::challenge_header(nonce)),
    ]
}

/// Translate a `CasterError` into a protocol-appropriate wire response
/// (spec §7 policy: never echo raw request bytes).
pub fn render_error_response(dialect: Dialect, error: &CasterError) -> String {
    let code = error.status_code();
    let reason = error.reason_phrase();
    match dialect {
        Dialect::V10Native | Dialect::V08 | Dialect::Rtsp => format!("ERROR {code} {reason}\r\n"),
        Dialect::V10Http | Dialect::V20 => {
            format!("HTTP/1.1 {code} {reason}\r\nConnection: close\r\n\r\n")
        }
    }
}

pub fn options_response() -> &'static str {
    "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Sourcetable,
    Upload,
    Download,
    Options,
    RtspDescribe,
    RtspSetup,
    RtspPlay,
    RtspPause,
    RtspRecord,
    RtspTeardown,
}

/// Route a parsed, dialect-classified request to its handling branch (spec
/// §4.5). ADMIN is deliberately not modeled as its own dialect: per spec
/// it is reserved and always replies 405 regardless of dialect.
pub fn route(request: &ParsedRequest, dialect: Dialect) -> Result<RequestKind, CasterError> {
    let method = request.request_line.method.as_str();

    if method == "ADMIN" {
        return Err(CasterError::BadRequest("ADMIN is reserved".to_string()));
    }

    if dialect == Dialect::Rtsp {
        return match method {
            "DESCRIBE" => Ok(RequestKind::RtspDescribe),
            "SETUP" => Ok(RequestKind::RtspSetup),
            "PLAY" => Ok(RequestKind::RtspPlay),
            "PAUSE" => Ok(RequestKind::RtspPause),
            "RECORD" => Ok(RequestKind::RtspRecord),
            "TEARDOWN" => Ok(RequestKind::RtspTeardown),
            _ => Err(CasterError::BadRequest(format!("unsupported RTSP method {method}"))),
        };
    }

    if method == "OPTIONS" {
        return Ok(RequestKind::Options);
    }

    if method == "SOURCE" || method == "POST" {
        return Ok(RequestKind::Upload);
    }

    if method == "GET" {
        let path = match dialect {
            Dialect::V10Native | Dialect::V08 => &request.request_line.path,
            _ => &request.request_line.path,
        };
        if is_sourcetable_path(&normalize_mount_path(path)) {
            return Ok(RequestKind::Sourcetable);
        }
        return Ok(RequestKind::Download);
    }

    Err(CasterError::BadRequest(format!("unsupported method {method}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_request_rejected() {
        assert!(parse_request(&[]).is_err());
        assert!(parse_request(&lines(&[""])).is_err());
    }

    #[test]
    fn parses_headers_case_insensitively() {
        let request = parse_request(&lines(&[
            "GET /BASE1 HTTP/1.1",
            "Host: caster.example.com",
            "authorization: Basic dTE6cHcx",
        ]))
        .unwrap();
        assert_eq!(request.headers.get("Authorization"), Some("Basic dTE6cHcx"));
        assert_eq!(request.headers.get("HOST"), Some("caster.example.com"));
    }

    #[test]
    fn sourcetable_root_routes_correctly() {
        let request = parse_request(&lines(&["GET / HTTP/1.1", "Host: x"])).unwrap();
        let dialect = classify(&request);
        assert_eq!(route(&request, dialect).unwrap(), RequestKind::Sourcetable);
    }

    #[test]
    fn source_upload_routes_as_upload() {
        let request = parse_request(&lines(&["SOURCE pw1 /BASE1"])).unwrap();
        let dialect = classify(&request);
        assert_eq!(dialect, Dialect::V10Native);
        assert_eq!(route(&request, dialect).unwrap(), RequestKind::Upload);
    }

    #[test]
    fn admin_is_rejected() {
        let request = parse_request(&lines(&["ADMIN pw1 /stats"])).unwrap();
        let dialect = classify(&request);
        assert!(route(&request, dialect).is_err());
    }

    #[test]
    fn basic_auth_round_trips() {
        let header = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("u1:pw1")
        );
        let (user, pass) = parse_basic_auth(&header).unwrap();
        assert_eq!(user, "u1");
        assert_eq!(pass, "pw1");
    }

    #[test]
    fn mount_name_rejects_nested_paths() {
        assert_eq!(mount_name_from_path("/BASE1"), Some("BASE1".to_string()));
        assert_eq!(mount_name_from_path("/BASE1/extra"), None);
        assert_eq!(mount_name_from_path("/"), None);
    }

    #[test]
    fn upload_target_splits_source_line_correctly() {
        let request = parse_request(&lines(&["SOURCE pw1 /BASE1"])).unwrap();
        let (mount, password) = upload_target(&request.request_line);
        assert_eq!(mount, "/BASE1");
        assert_eq!(password.as_deref(), Some("pw1"));
    }

    #[test]
    fn upload_target_leaves_post_line_for_header_auth() {
        let request = parse_request(&lines(&["POST /BASE1 HTTP/1.1"])).unwrap();
        let (mount, password) = upload_target(&request.request_line);
        assert_eq!(mount, "/BASE1");
        assert_eq!(password, None);
    }

    #[test]
    fn upload_target_two_token_form_has_no_password() {
        let request = parse_request(&lines(&["SOURCE /BASE1"])).unwrap();
        let (mount, password) = upload_target(&request.request_line);
        assert_eq!(mount, "/BASE1");
        assert_eq!(password, None);
    }

    #[test]
    fn error_response_framing_differs_by_dialect() {
        let err = CasterError::Conflict("BASE1".to_string());
        let v10 = render_error_response(Dialect::V10Native, &err);
        let v20 = render_error_response(Dialect::V20, &err);
        assert!(v10.starts_with("ERROR 409"));
        assert!(v20.starts_with("HTTP/1.1 409"));
    }
}
