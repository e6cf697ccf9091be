//! Protocol dialect detection (spec §4.5 "Protocol Dispatcher").
//!
//! A single listening port serves five request shapes; dialect is decided
//! from the request line and headers alone, before any auth or mount lookup
//! happens, mirroring `_determine_ntrip_version` /
//! `_should_downgrade_protocol` in the original's `src/ntrip.py`.

use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum Dialect {
    #[strum(serialize = "NTRIP/0.8")]
    V08,
    #[strum(serialize = "NTRIP/1.0-native")]
    V10Native,
    #[strum(serialize = "NTRIP/1.0-http")]
    V10Http,
    #[strum(serialize = "NTRIP/2.0")]
    V20,
    #[strum(serialize = "RTSP")]
    Rtsp,
}

/// The request line's method, split from its path and protocol token.
#[derive(Debug, Clone)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub protocol_token: String,
}

impl RequestLine {
    /// Parse `"<METHOD> <PATH> <PROTOCOL>"`. A v0.8 `GET /mount` line with no
    /// trailing protocol token is also accepted (spec §4.5 "no HTTP version
    /// token at all").
    pub fn parse(line: &str) -> Option<RequestLine> {
        let mut tokens = line.trim_end_matches(['\r', '\n']).splitn(3, ' ');
        let method = tokens.next()?.to_string();
        let path = tokens.next()?.to_string();
        if method.is_empty() || path.is_empty() {
            return None;
        }
        let protocol_token = tokens.next().unwrap_or("").to_string();
        Some(RequestLine { method, path, protocol_token })
    }
}

/// Decide a request's dialect from its request line and header presence,
/// per the dispatch table (spec §4.5). Ambiguous tie-breaks (a plain `GET`
/// with `Authorization` but no `Ntrip-Version`) are resolved deterministically
/// here rather than bug-compatibly, per spec §9's open question.
///
/// `ntrip_version_header`: the value of an `Ntrip-Version` header, if any.
/// `has_authorization`: whether an `Authorization` header was present.
pub fn detect_dialect(
    request: &RequestLine,
    ntrip_version_header: Option<&str>,
    _has_authorization: bool,
) -> Dialect {
    if matches!(
        request.method.as_str(),
        "DESCRIBE" | "SETUP" | "PLAY" | "PAUSE" | "TEARDOWN" | "RECORD" | "ANNOUNCE"
    ) && request.protocol_token.starts_with("RTSP/")
    {
        return Dialect::Rtsp;
    }

    if request.method == "SOURCE" {
        let second_token = request.path.as_str();
        if second_token.starts_with("http://")
            || second_token.starts_with("https://")
            || second_token.starts_with("rtsp://")
        {
            return Dialect::V08;
        }
        return Dialect::V10Native;
    }

    if let Some(v) = ntrip_version_header {
        if v.trim() == "NTRIP/2.0" {
            return Dialect::V20;
        }
    }

    if request.protocol_token.starts_with("HTTP/") {
        return Dialect::V10Http;
    }

    if request.protocol_token.is_empty() {
        return Dialect::V08;
    }

    Dialect::V10Native
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v08_has_no_protocol_token() {
        let line = RequestLine::parse("GET /BASE1\r\n").unwrap();
        assert_eq!(detect_dialect(&line, None, true), Dialect::V08);
    }

    #[test]
    fn v10_native_uses_source_method() {
        let line = RequestLine::parse("SOURCE hunter2 /BASE1").unwrap();
        assert_eq!(detect_dialect(&line, None, false), Dialect::V10Native);
    }

    #[test]
    fn v10_http_uses_http_protocol_token_without_version_header() {
        let line = RequestLine::parse("GET /BASE1 HTTP/1.1").unwrap();
        assert_eq!(detect_dialect(&line, None, true), Dialect::V10Http);
    }

    #[test]
    fn v20_is_driven_by_header_not_protocol_token() {
        let line = RequestLine::parse("GET /BASE1 HTTP/1.1").unwrap();
        assert_eq!(detect_dialect(&line, Some("NTRIP/2.0"), true), Dialect::V20);
    }

    #[test]
    fn rtsp_methods_are_detected() {
        let line = RequestLine::parse("DESCRIBE rtsp://caster/BASE1 RTSP/1.0").unwrap();
        assert_eq!(detect_dialect(&line, None, false), Dialect::Rtsp);
    }

    #[test]
    fn empty_request_line_rejected() {
        assert!(RequestLine::parse("").is_none());
        assert!(RequestLine::parse("\r\n").is_none());
    }
}
