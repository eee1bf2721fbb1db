//! Header hygiene for forwarded traffic.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers (and anything named by `Connection`)
//! - Maintain the X-Forwarded-* chain through a pluggable rewriter
//! - Collapse singular response headers to one value
//! - Build the restricted header set for WebSocket dials

use std::fmt;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::forward::session::ClientInfo;

pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_SERVER: HeaderName = HeaderName::from_static("x-forwarded-server");

const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");
const TRAILERS: HeaderName = HeaderName::from_static("trailers");

/// Headers meaningful only for a single connection leg.
pub const HOP_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    KEEP_ALIVE,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    TRAILERS,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub const FORWARDED_HEADERS: [HeaderName; 4] = [
    X_FORWARDED_PROTO,
    X_FORWARDED_FOR,
    X_FORWARDED_HOST,
    X_FORWARDED_SERVER,
];

/// Response headers that must reach the client at most once.
pub const SINGULAR_HEADERS: [HeaderName; 1] = [header::ACCESS_CONTROL_ALLOW_ORIGIN];

/// Request headers a WebSocket dial may carry over from the client.
pub const WEBSOCKET_PASSTHROUGH: [HeaderName; 3] = [
    header::ORIGIN,
    header::SEC_WEBSOCKET_PROTOCOL,
    header::COOKIE,
];

/// Remove hop-by-hop headers, including those listed in `Connection`.
pub fn remove_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_HEADERS {
        headers.remove(name);
    }
}

/// Append every header of `src` to `dst`, then collapse singular headers to
/// their first value.
pub fn copy_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        dst.append(name.clone(), value.clone());
    }
    for name in SINGULAR_HEADERS {
        if let Some(first) = dst.get(&name).cloned() {
            dst.insert(name, first);
        }
    }
}

/// True when the request asks for a WebSocket upgrade.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    connection_upgrade && upgrade_websocket
}

/// The restricted set of client headers carried on a WebSocket dial, plus any
/// forwarding headers for the rewriter to judge.
pub fn websocket_dial_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in WEBSOCKET_PASSTHROUGH.iter().chain(FORWARDED_HEADERS.iter()) {
        for value in inbound.get_all(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Facts about the inbound request a rewriter may use.
#[derive(Debug, Clone, Copy)]
pub struct RewriteContext<'a> {
    pub client: &'a ClientInfo,
    /// Host the client asked for.
    pub host: Option<&'a str>,
}

/// Adjusts outbound request headers.
pub trait RequestRewriter: Send + Sync + fmt::Debug {
    fn rewrite(&self, headers: &mut HeaderMap, ctx: &RewriteContext<'_>);
}

/// Maintains the X-Forwarded-* chain.
///
/// Trusting mode keeps inbound forwarding headers and appends the observed
/// peer to `X-Forwarded-For`. Otherwise inbound values are discarded and the
/// headers describe only what this proxy saw.
#[derive(Debug, Clone)]
pub struct HeaderRewriter {
    pub trust_forward_header: bool,
    /// Value for `X-Forwarded-Server`; empty leaves it unset.
    pub hostname: String,
}

impl HeaderRewriter {
    pub fn new(trust_forward_header: bool, hostname: impl Into<String>) -> Self {
        Self {
            trust_forward_header,
            hostname: hostname.into(),
        }
    }

    fn trusted<'h>(&self, headers: &'h HeaderMap, name: &HeaderName) -> Option<&'h HeaderValue> {
        if !self.trust_forward_header {
            return None;
        }
        headers.get(name).filter(|v| !v.is_empty())
    }
}

impl RequestRewriter for HeaderRewriter {
    fn rewrite(&self, headers: &mut HeaderMap, ctx: &RewriteContext<'_>) {
        if !self.trust_forward_header {
            for name in FORWARDED_HEADERS {
                headers.remove(name);
            }
        }

        let client_ip = ctx.client.peer.ip().to_string();
        let prior: Vec<&str> = headers
            .get_all(&X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let chain = if prior.is_empty() {
            client_ip
        } else {
            format!("{}, {}", prior.join(", "), client_ip)
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR, value);
        }

        if self.trusted(headers, &X_FORWARDED_PROTO).is_none() {
            headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(ctx.client.scheme()));
        }

        if self.trusted(headers, &X_FORWARDED_HOST).is_none() {
            if let Some(value) = ctx.host.and_then(|h| HeaderValue::from_str(h).ok()) {
                headers.insert(X_FORWARDED_HOST, value);
            }
        }

        if !self.hostname.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.hostname) {
                headers.insert(X_FORWARDED_SERVER, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(ip: &str) -> ClientInfo {
        ClientInfo::plain(format!("{ip}:5555").parse().unwrap())
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(HeaderName::from_bytes(k.as_bytes()).unwrap(), HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn strips_hop_headers_and_connection_tokens() {
        let mut map = headers(&[
            ("connection", "close, x-session-hop"),
            ("x-session-hop", "1"),
            ("keep-alive", "timeout=5"),
            ("te", "trailers"),
            ("transfer-encoding", "chunked"),
            ("upgrade", "h2c"),
            ("proxy-authorization", "Basic x"),
            ("x-custom", "keep-me"),
        ]);
        remove_hop_headers(&mut map);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("x-custom").unwrap(), "keep-me");
    }

    #[test]
    fn every_hop_header_is_removed() {
        for name in HOP_HEADERS {
            let mut map = HeaderMap::new();
            map.insert(header::CONNECTION, HeaderValue::from_static("close"));
            map.append(name.clone(), HeaderValue::from_static("Hop Header"));
            map.append(name.clone(), HeaderValue::from_static("For"));
            remove_hop_headers(&mut map);
            assert!(map.get(&name).is_none(), "{name} survived");
            assert!(map.get(header::CONNECTION).is_none());
        }
    }

    #[test]
    fn trusted_mode_appends_peer() {
        let rewriter = HeaderRewriter::new(true, "hello");
        let mut map = headers(&[
            ("x-forwarded-for", "10.0.0.5"),
            ("x-forwarded-proto", "httpx"),
            ("x-forwarded-host", "upstream-foobar"),
            ("x-forwarded-server", "foobar"),
        ]);
        let info = client("10.0.0.9");
        rewriter.rewrite(&mut map, &RewriteContext { client: &info, host: Some("proxy.local") });

        assert_eq!(map.get(X_FORWARDED_FOR).unwrap(), "10.0.0.5, 10.0.0.9");
        assert_eq!(map.get(X_FORWARDED_PROTO).unwrap(), "httpx");
        assert_eq!(map.get(X_FORWARDED_HOST).unwrap(), "upstream-foobar");
        assert_eq!(map.get(X_FORWARDED_SERVER).unwrap(), "hello");
    }

    #[test]
    fn trusted_mode_folds_repeated_chain_headers() {
        let rewriter = HeaderRewriter::new(true, "");
        let mut map = headers(&[("x-forwarded-for", "1.1.1.1"), ("x-forwarded-for", "2.2.2.2")]);
        let info = client("3.3.3.3");
        rewriter.rewrite(&mut map, &RewriteContext { client: &info, host: None });
        assert_eq!(map.get_all(X_FORWARDED_FOR).iter().count(), 1);
        assert_eq!(map.get(X_FORWARDED_FOR).unwrap(), "1.1.1.1, 2.2.2.2, 3.3.3.3");
        assert!(map.get(X_FORWARDED_SERVER).is_none());
    }

    #[test]
    fn untrusted_mode_discards_inbound_chain() {
        let rewriter = HeaderRewriter::new(false, "hello");
        let mut map = headers(&[
            ("x-forwarded-for", "10.0.0.5"),
            ("x-forwarded-proto", "httpx"),
            ("x-forwarded-host", "spoofed"),
        ]);
        let info = client("10.0.0.9");
        rewriter.rewrite(&mut map, &RewriteContext { client: &info, host: Some("proxy.local") });

        assert_eq!(map.get(X_FORWARDED_FOR).unwrap(), "10.0.0.9");
        assert_eq!(map.get(X_FORWARDED_PROTO).unwrap(), "http");
        assert_eq!(map.get(X_FORWARDED_HOST).unwrap(), "proxy.local");
    }

    #[test]
    fn singular_headers_keep_first_value() {
        let src = headers(&[
            ("access-control-allow-origin", "fred"),
            ("access-control-allow-origin", "john"),
            ("vary", "origin"),
            ("vary", "accept"),
        ]);
        let mut dst = HeaderMap::new();
        copy_headers(&mut dst, &src);
        let values: Vec<_> = dst.get_all(header::ACCESS_CONTROL_ALLOW_ORIGIN).iter().collect();
        assert_eq!(values, vec!["fred"]);
        assert_eq!(dst.get_all(header::VARY).iter().count(), 2);
    }

    #[test]
    fn singular_headers_dedup_against_existing() {
        let mut dst = headers(&[("access-control-allow-origin", "*")]);
        let src = headers(&[("access-control-allow-origin", "https://backend")]);
        copy_headers(&mut dst, &src);
        assert_eq!(dst.get_all(header::ACCESS_CONTROL_ALLOW_ORIGIN).iter().count(), 1);
        assert_eq!(dst.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    }

    #[test]
    fn detects_websocket_upgrades() {
        assert!(is_websocket_upgrade(&headers(&[("connection", "keep-alive, Upgrade"), ("upgrade", "WebSocket")])));
        assert!(!is_websocket_upgrade(&headers(&[("connection", "upgrade"), ("upgrade", "h2c")])));
        assert!(!is_websocket_upgrade(&headers(&[("upgrade", "websocket")])));
    }

    #[test]
    fn websocket_dial_headers_are_restricted() {
        let inbound = headers(&[
            ("origin", "http://example.com"),
            ("sec-websocket-protocol", "chat"),
            ("cookie", "a=1"),
            ("authorization", "Bearer secret"),
            ("x-forwarded-for", "10.0.0.5"),
        ]);
        let out = websocket_dial_headers(&inbound);
        assert_eq!(out.len(), 4);
        assert!(out.get(header::AUTHORIZATION).is_none());
    }
}
