//! CLI argument parsing, validation, and startup helpers.

use std::time::Duration;

use axum::http::HeaderName;
use clap::Parser;
use tracing::error;
use url::Url;

use crate::ServerConfig;
use crate::auth::{ClientIpConfig, GatewayConfig};
use crate::jwt::MIN_SECRET_LENGTH;

/// Environment variable holding the token signing secret.
pub const SECRET_ENV: &str = "GATEHOUSE_SECRET";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "Gatehouse",
    about = "Request-security gateway: tokens, sessions, CSRF, throttling and content cleaning"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7291")]
    pub port: u16,

    /// Path to file containing the signing secret. Prefer the GATEHOUSE_SECRET env var instead
    #[arg(long)]
    pub secret_file: Option<String>,

    /// Origins allowed to send state-changing requests (repeatable)
    #[arg(long = "allowed-origin", env = "GATEHOUSE_ALLOWED_ORIGINS", value_delimiter = ',',
        default_value = "http://localhost:7291", value_parser = validate_origin)]
    pub allowed_origins: Vec<String>,

    /// Header set by a trusted reverse proxy carrying the client IP, e.g. CF-Connecting-IP
    #[arg(long, env = "GATEHOUSE_IP_HEADER", value_parser = validate_header_name)]
    pub ip_header: Option<HeaderName>,

    /// Trust X-Forwarded-For and X-Real-IP (only behind a proxy that sets them)
    #[arg(long)]
    pub trust_forwarded: bool,

    /// Maximum concurrent sessions per user
    #[arg(long, default_value = "5")]
    pub max_sessions: usize,

    /// Idle time in hours after which a session expires
    #[arg(long, default_value = "168")]
    pub session_idle_hours: u64,

    /// Requests per minute allowed from one IP across the API
    #[arg(long, default_value = "300")]
    pub global_rate_limit: u32,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

fn validate_origin(s: &str) -> Result<String, String> {
    let url = Url::parse(s).map_err(|e| format!("Invalid origin '{}': {}", s, e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("Origin must use http or https: {}", s));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(format!("Origin must not have a path, query or fragment: {}", s));
    }
    Ok(url.origin().ascii_serialization())
}

fn validate_header_name(s: &str) -> Result<HeaderName, String> {
    HeaderName::from_bytes(s.trim().as_bytes()).map_err(|_| format!("Invalid header name: {}", s))
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load the signing secret from the environment or a file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_secret(secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var(SECRET_ENV) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(SECRET_ENV) };
        secret
    } else if let Some(path) = secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            "Signing secret is required. Set {} environment variable (recommended) or use --secret-file",
            SECRET_ENV
        );
        return None;
    };

    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            "Signing secret is shorter than {} bytes. Use a longer secret",
            MIN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, secret: String) -> ServerConfig {
    let mut gateway = GatewayConfig::default();

    // Secure cookies unless every allowed origin is plain http
    let secure_cookies = args.allowed_origins.iter().any(|o| o.starts_with("https://"));

    gateway.csrf.allowed_origins = args.allowed_origins.clone();
    gateway.csrf.secure_cookie = secure_cookies;
    gateway.client_ip = ClientIpConfig {
        trusted_header: args.ip_header.clone(),
        trust_forwarded_headers: args.trust_forwarded,
    };
    gateway.session.max_per_user = args.max_sessions.max(1);
    gateway.session.idle_ttl = Duration::from_secs(args.session_idle_hours.max(1) * 60 * 60);
    gateway.rate_limit.global = (args.global_rate_limit > 0)
        .then(|| crate::rate_limit::RateRule::per_minute(args.global_rate_limit));

    ServerConfig {
        secret: secret.into_bytes(),
        gateway,
    }
}
