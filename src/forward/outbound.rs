//! Building the backend-bound request from the inbound one.

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::uri::Scheme;
use axum::http::{Request, Uri, Version};

use crate::forward::error::ForwardError;
use crate::forward::headers::{remove_hop_headers, RequestRewriter, RewriteContext};
use crate::forward::session::{ClientInfo, Target};

/// Host the client addressed, from the Host header or an absolute-form URI.
pub fn inbound_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
}

/// Shared outbound request policy for every forwarding mode.
#[derive(Debug, Clone)]
pub struct OutboundPolicy {
    pub rewriter: Arc<dyn RequestRewriter>,
    pub pass_host: bool,
}

impl OutboundPolicy {
    pub fn new(rewriter: Arc<dyn RequestRewriter>, pass_host: bool) -> Self {
        Self { rewriter, pass_host }
    }

    /// Turn the inbound request into one addressed at `target`.
    ///
    /// The path and query are carried over byte for byte.
    pub fn prepare(
        &self,
        request: Request<Body>,
        target: &Target,
        client: &ClientInfo,
    ) -> Result<Request<Body>, ForwardError> {
        let (parts, body) = request.into_parts();
        let host = inbound_host(&parts.headers, &parts.uri);

        let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        let uri = Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(target.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| ForwardError::BadRequest(e.to_string()))?;

        let mut headers = parts.headers;
        self.apply_headers(&mut headers, target, client, host.as_deref());

        let mut outbound = Request::new(body);
        *outbound.method_mut() = parts.method;
        *outbound.uri_mut() = uri;
        *outbound.version_mut() = Version::HTTP_11;
        *outbound.headers_mut() = headers;
        Ok(outbound)
    }

    /// Strip hop headers, run the rewriter and settle the Host header.
    pub fn apply_headers(
        &self,
        headers: &mut HeaderMap,
        target: &Target,
        client: &ClientInfo,
        inbound_host: Option<&str>,
    ) {
        remove_hop_headers(headers);
        self.rewriter.rewrite(
            headers,
            &RewriteContext {
                client,
                host: inbound_host,
            },
        );

        let host = if self.pass_host {
            inbound_host.and_then(|h| HeaderValue::from_str(h).ok())
        } else {
            None
        };
        let host = host.or_else(|| HeaderValue::from_str(target.authority.as_str()).ok());
        if let Some(host) = host {
            headers.insert(header::HOST, host);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::headers::{HeaderRewriter, X_FORWARDED_FOR, X_FORWARDED_HOST};
    use axum::http::uri::Authority;

    fn policy(pass_host: bool) -> OutboundPolicy {
        OutboundPolicy::new(Arc::new(HeaderRewriter::new(true, "proxy")), pass_host)
    }

    fn target() -> Target {
        Target::new(Authority::from_static("127.0.0.1:20001"), Some("/api".into()))
    }

    fn client() -> ClientInfo {
        ClientInfo::plain("10.0.0.9:4000".parse().unwrap())
    }

    #[test]
    fn preserves_escaped_path_and_query() {
        let inbound = Request::builder()
            .uri("/api/a%2Fb%20c?q=%26x&y=1")
            .header(header::HOST, "proxy.local")
            .body(Body::empty())
            .unwrap();
        let out = policy(false).prepare(inbound, &target(), &client()).unwrap();
        assert_eq!(out.uri().to_string(), "http://127.0.0.1:20001/api/a%2Fb%20c?q=%26x&y=1");
        assert_eq!(out.headers().get(header::HOST).unwrap(), "127.0.0.1:20001");
        assert_eq!(out.headers().get(X_FORWARDED_HOST).unwrap(), "proxy.local");
        assert_eq!(out.headers().get(X_FORWARDED_FOR).unwrap(), "10.0.0.9");
    }

    #[test]
    fn pass_host_keeps_client_host() {
        let inbound = Request::builder()
            .uri("/api")
            .header(header::HOST, "proxy.local")
            .body(Body::empty())
            .unwrap();
        let out = policy(true).prepare(inbound, &target(), &client()).unwrap();
        assert_eq!(out.headers().get(header::HOST).unwrap(), "proxy.local");
    }

    #[test]
    fn strips_hop_headers() {
        let inbound = Request::builder()
            .method("POST")
            .uri("/api")
            .header(header::CONNECTION, "close, x-hop")
            .header("x-hop", "1")
            .header("x-custom", "2")
            .body(Body::from("payload"))
            .unwrap();
        let out = policy(false).prepare(inbound, &target(), &client()).unwrap();
        assert_eq!(out.method(), "POST");
        assert!(out.headers().get(header::CONNECTION).is_none());
        assert!(out.headers().get("x-hop").is_none());
        assert_eq!(out.headers().get("x-custom").unwrap(), "2");
    }
}
