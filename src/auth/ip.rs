//! Client IP extraction.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, HeaderName, request::Parts},
};

/// A single address longer than this is ignored.
const MAX_IP_LENGTH: usize = 64;

/// Whole header values longer than this are ignored; proxy chains fit well
/// within it.
const MAX_IP_HEADER_LENGTH: usize = 2048;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Trait for types that provide access to HTTP headers and extensions.
/// Implemented for both `Parts` and `Request` to allow flexible IP extraction.
pub trait HasHeadersAndExtensions {
    fn headers(&self) -> &HeaderMap;
    fn extensions(&self) -> &axum::http::Extensions;
}

impl HasHeadersAndExtensions for Parts {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }
    fn extensions(&self) -> &axum::http::Extensions {
        &self.extensions
    }
}

impl<B> HasHeadersAndExtensions for axum::extract::Request<B> {
    fn headers(&self) -> &HeaderMap {
        axum::extract::Request::headers(self)
    }
    fn extensions(&self) -> &axum::http::Extensions {
        axum::extract::Request::extensions(self)
    }
}

/// Which request headers may name the client.
#[derive(Debug, Clone, Default)]
pub struct ClientIpConfig {
    /// Header set by the fronting proxy, e.g. `CF-Connecting-IP`
    pub trusted_header: Option<HeaderName>,
    /// Consult `X-Forwarded-For` and `X-Real-IP`
    pub trust_forwarded_headers: bool,
}

impl ClientIpConfig {
    fn uses_headers(&self) -> bool {
        self.trusted_header.is_some() || self.trust_forwarded_headers
    }
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    let value = value.trim();
    if value.is_empty() || value.len() > MAX_IP_LENGTH {
        return None;
    }
    value.parse().ok()
}

fn header_ip(headers: &HeaderMap, name: &str, first_hop: bool) -> Option<IpAddr> {
    let value = headers.get(name)?.to_str().ok()?;
    if value.len() > MAX_IP_HEADER_LENGTH {
        return None;
    }
    let value = if first_hop {
        value.split(',').next()?
    } else {
        value
    };
    parse_ip(value)
}

/// Resolve the client IP address.
///
/// Header candidates are tried in order (configured trusted header, first
/// hop of `X-Forwarded-For`, `X-Real-IP`) and only when `config` enables
/// them. Unparseable or oversized values are skipped. The socket address
/// from `ConnectInfo` is the final fallback.
pub fn extract_client_ip<T: HasHeadersAndExtensions>(
    source: &T,
    config: &ClientIpConfig,
) -> Option<IpAddr> {
    if config.uses_headers() {
        let headers = source.headers();
        let from_headers = config
            .trusted_header
            .as_ref()
            .and_then(|name| header_ip(headers, name.as_str(), false))
            .or_else(|| {
                config
                    .trust_forwarded_headers
                    .then(|| {
                        header_ip(headers, X_FORWARDED_FOR, true)
                            .or_else(|| header_ip(headers, X_REAL_IP, false))
                    })
                    .flatten()
            });
        if from_headers.is_some() {
            return from_headers;
        }
    }

    source
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    fn request(headers: &[(&str, &str)], socket: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(addr) = socket {
            request
                .extensions_mut()
                .insert(ConnectInfo(addr.parse::<SocketAddr>().unwrap()));
        }
        request
    }

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn test_socket_address_by_default() {
        let req = request(&[("x-forwarded-for", "9.9.9.9")], Some("10.0.0.1:5000"));
        assert_eq!(extract_client_ip(&req, &ClientIpConfig::default()), ip("10.0.0.1"));
    }

    #[test]
    fn test_no_address_at_all() {
        let req = request(&[], None);
        assert_eq!(extract_client_ip(&req, &ClientIpConfig::default()), None);
    }

    #[test]
    fn test_forwarded_headers_when_trusted() {
        let config = ClientIpConfig {
            trusted_header: None,
            trust_forwarded_headers: true,
        };

        let req = request(
            &[("x-forwarded-for", " 1.2.3.4, 10.0.0.2"), ("x-real-ip", "5.6.7.8")],
            Some("10.0.0.1:5000"),
        );
        assert_eq!(extract_client_ip(&req, &config), ip("1.2.3.4"));

        let req = request(&[("x-real-ip", "2001:db8::1")], Some("10.0.0.1:5000"));
        assert_eq!(extract_client_ip(&req, &config), ip("2001:db8::1"));
    }

    #[test]
    fn test_trusted_header_first() {
        let config = ClientIpConfig {
            trusted_header: Some(HeaderName::from_static("cf-connecting-ip")),
            trust_forwarded_headers: true,
        };
        let req = request(
            &[("cf-connecting-ip", "7.7.7.7"), ("x-forwarded-for", "1.2.3.4")],
            Some("10.0.0.1:5000"),
        );
        assert_eq!(extract_client_ip(&req, &config), ip("7.7.7.7"));
    }

    #[test]
    fn test_garbage_and_oversized_values_ignored() {
        let config = ClientIpConfig {
            trusted_header: None,
            trust_forwarded_headers: true,
        };
        let long = "1.2.3.4, ".repeat(300);
        let long_hop = format!("{}, 1.2.3.4", "1".repeat(80));

        let req = request(&[("x-forwarded-for", "not-an-ip")], Some("10.0.0.1:5000"));
        assert_eq!(extract_client_ip(&req, &config), ip("10.0.0.1"));

        let req = request(
            &[("x-forwarded-for", long.as_str()), ("x-real-ip", "5.6.7.8")],
            Some("10.0.0.1:5000"),
        );
        assert_eq!(extract_client_ip(&req, &config), ip("5.6.7.8"));

        let req = request(&[("x-forwarded-for", long_hop.as_str())], Some("10.0.0.1:5000"));
        assert_eq!(extract_client_ip(&req, &config), ip("10.0.0.1"));
    }

    #[test]
    fn test_long_proxy_chain_keeps_first_hop() {
        let config = ClientIpConfig {
            trusted_header: None,
            trust_forwarded_headers: true,
        };
        let chain = "2001:db8:85a3::8a2e:370:7334, 2001:db8:85a3::1, 10.0.0.2, 10.0.0.3";
        assert!(chain.len() > MAX_IP_LENGTH);

        let req = request(&[("x-forwarded-for", chain)], Some("10.0.0.1:5000"));
        assert_eq!(
            extract_client_ip(&req, &config),
            ip("2001:db8:85a3::8a2e:370:7334")
        );
    }
}
