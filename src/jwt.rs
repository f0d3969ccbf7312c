//! Bearer token codec.
//!
//! Tokens are compact JWS values (`header.payload.signature`, base64url) signed
//! with HMAC-SHA256. Decoding runs a structural pre-check before any crypto and
//! pins validation to the single configured algorithm, so attacker-supplied
//! `alg` values are never branched on.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::ErrorCode;

/// The only algorithm this codec signs with or accepts.
pub const ALGORITHM: Algorithm = Algorithm::HS256;

/// Minimum accepted secret length in bytes.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Tokens above this size are rejected without being parsed.
const MAX_TOKEN_LENGTH: usize = 8 * 1024;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Caller role carried in access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

/// Claims for access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user id)
    pub sub: String,
    pub email: String,
    pub role: Role,
    /// Session the token was issued for
    pub sid: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Issued at (Unix seconds)
    pub iat: u64,
    /// Expiration time (Unix seconds)
    pub exp: u64,
}

/// Claims for refresh tokens. The `jti` is the single-use marker key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub jti: String,
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub sid: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    pub iat: u64,
    pub exp: u64,
}

/// Errors that can occur while encoding or decoding tokens.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("unexpected signing algorithm")]
    Algorithm,
    #[error("signature verification failed")]
    Signature,
    #[error("token expired")]
    Expired,
    #[error("wrong token type")]
    WrongType,
    #[error("failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
    #[error("system time error")]
    Time,
}

impl TokenError {
    /// The caller-facing code. Anything that is not expiry or a type mix-up is
    /// reported as an invalid token.
    pub fn code(&self) -> ErrorCode {
        match self {
            TokenError::Expired => ErrorCode::TokenExpired,
            TokenError::WrongType => ErrorCode::WrongTokenType,
            _ => ErrorCode::InvalidToken,
        }
    }
}

/// Current Unix time in seconds.
pub fn now_secs() -> Result<u64, TokenError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| TokenError::Time)
}

/// HMAC signer/verifier for a single secret.
#[derive(Clone)]
pub struct JwtCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtCodec {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Sign a claims set. Claims must already carry `iat`/`exp`.
    pub fn encode<C: Serialize>(&self, claims: &C) -> Result<String, TokenError> {
        jsonwebtoken::encode(&Header::new(ALGORITHM), claims, &self.encoding_key)
            .map_err(TokenError::Encoding)
    }

    /// Verify a token and return its raw claims object.
    pub fn decode(&self, token: &str) -> Result<serde_json::Map<String, serde_json::Value>, TokenError> {
        check_structure(token)?;

        let data = jsonwebtoken::decode::<serde_json::Map<String, serde_json::Value>>(
            token,
            &self.decoding_key,
            &self.validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::Signature,
            ErrorKind::InvalidAlgorithm => TokenError::Algorithm,
            _ => TokenError::Malformed,
        })?;

        Ok(data.claims)
    }

    /// Verify a token and deserialize it as `C`, requiring `typ == expected`.
    pub fn decode_typed<C: DeserializeOwned>(
        &self,
        token: &str,
        expected: TokenType,
    ) -> Result<C, TokenError> {
        let claims = self.decode(token)?;

        let token_type = claims
            .get("typ")
            .cloned()
            .map(serde_json::from_value::<TokenType>)
            .ok_or(TokenError::Malformed)?
            .map_err(|_| TokenError::Malformed)?;
        if token_type != expected {
            return Err(TokenError::WrongType);
        }

        serde_json::from_value(serde_json::Value::Object(claims)).map_err(|_| TokenError::Malformed)
    }
}

/// Reject anything that is not three non-empty base64url segments with a
/// header declaring exactly the configured algorithm.
fn check_structure(token: &str) -> Result<(), TokenError> {
    if token.is_empty() || token.len() > MAX_TOKEN_LENGTH {
        return Err(TokenError::Malformed);
    }

    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::Malformed);
    }

    let mut decoded = Vec::with_capacity(3);
    for segment in &segments {
        if segment.is_empty() {
            return Err(TokenError::Malformed);
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|_| TokenError::Malformed)?;
        decoded.push(bytes);
    }

    #[derive(Deserialize)]
    struct RawHeader {
        alg: String,
    }

    let header: RawHeader =
        serde_json::from_slice(&decoded[0]).map_err(|_| TokenError::Malformed)?;
    if header.alg != "HS256" {
        return Err(TokenError::Algorithm);
    }

    Ok(())
}
