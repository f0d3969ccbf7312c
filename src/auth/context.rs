//! Per-request security context.

use std::net::IpAddr;
use std::time::SystemTime;

use axum::http::{HeaderMap, HeaderName, Method, header, request::Parts};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

use super::ip::{ClientIpConfig, HasHeadersAndExtensions, extract_client_ip};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LENGTH: usize = 64;
const MAX_USER_AGENT_LENGTH: usize = 512;

/// Everything later checks need to know about the caller, computed once.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    pub request_id: String,
    /// `None` when neither a trusted header nor the socket address is known
    pub client_ip: Option<IpAddr>,
    pub user_agent: String,
    pub fingerprint: String,
    pub method: Method,
    pub path: String,
    pub received_at: SystemTime,
}

impl SecurityContext {
    pub fn from_parts(parts: &Parts, ip_config: &ClientIpConfig) -> Self {
        Self::build(parts, &parts.method, parts.uri.path(), ip_config)
    }

    pub fn from_request<B>(request: &axum::extract::Request<B>, ip_config: &ClientIpConfig) -> Self {
        Self::build(request, request.method(), request.uri().path(), ip_config)
    }

    fn build<T: HasHeadersAndExtensions>(
        source: &T,
        method: &Method,
        path: &str,
        ip_config: &ClientIpConfig,
    ) -> Self {
        let headers = source.headers();
        let user_agent = header_value(headers, header::USER_AGENT);
        let accept_language = header_value(headers, header::ACCEPT_LANGUAGE);

        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|id| valid_request_id(id))
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            request_id,
            client_ip: extract_client_ip(source, ip_config),
            user_agent: clean_user_agent(user_agent),
            fingerprint: fingerprint(user_agent, accept_language),
            method: method.clone(),
            path: path.to_string(),
            received_at: SystemTime::now(),
        }
    }

    /// Key for per-client throttling and blocks: the IP, or the fingerprint
    /// when no address is known so that address-less callers are not
    /// lumped together.
    pub fn client_key(&self) -> String {
        match self.client_ip {
            Some(ip) => ip.to_string(),
            None => format!("fp:{}", self.fingerprint),
        }
    }
}

fn header_value(headers: &HeaderMap, name: HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn valid_request_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LENGTH
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

fn clean_user_agent(user_agent: &str) -> String {
    user_agent
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_USER_AGENT_LENGTH)
        .collect()
}

/// Stable client fingerprint: base64url(SHA-256(user-agent | accept-language)).
pub fn fingerprint(user_agent: &str, accept_language: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    hasher.update(b"|");
    hasher.update(accept_language.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}
