//! Who a request is charged to: a user id taken from the bearer token, or
//! the client address.

use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, Request};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    id: i64,
}

/// Decodes bearer tokens into user ids. Without a secret the signature is
/// not checked; tokens are then only trusted as rate limit keys.
#[derive(Clone, Default)]
pub struct TokenDecoder {
    secret: Option<String>,
}

impl TokenDecoder {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS512);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        if self.secret.is_none() {
            validation.insecure_disable_signature_validation();
        }
        validation
    }

    /// `None` for anything that is not a well-formed token with an `id`.
    pub fn user_id(&self, token: &str) -> Option<i64> {
        let key = match &self.secret {
            Some(secret) => DecodingKey::from_secret(secret.as_bytes()),
            None => DecodingKey::from_secret(&[]),
        };

        decode::<TokenClaims>(token, &key, &self.validation())
            .ok()
            .map(|data| data.claims.id)
    }

    /// Mints a token for `user_id`. Without a secret each token is signed
    /// with its own throwaway key.
    pub fn generate(&self, user_id: i64) -> Result<String, jsonwebtoken::errors::Error> {
        let key = match &self.secret {
            Some(secret) => secret.clone(),
            None => format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()),
        };

        encode(
            &Header::new(Algorithm::HS512),
            &TokenClaims { id: user_id },
            &EncodingKey::from_secret(key.as_bytes()),
        )
    }
}

const BEARER: &str = "Bearer";

/// The raw token from `Authorization`, with an optional `Bearer` scheme.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim_start();
    let token = match value.split_at_checked(BEARER.len()) {
        Some((scheme, rest))
            if scheme.eq_ignore_ascii_case(BEARER)
                && (rest.is_empty() || rest.starts_with(char::is_whitespace)) =>
        {
            rest
        }
        _ => value,
    }
    .trim();

    (!token.is_empty()).then_some(token)
}

/// First `X-Forwarded-For` entry, else the peer address, else `"unknown"`.
pub fn client_ip<B>(request: &Request<B>) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return first_ip.to_string();
                }
            }
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

/// Rate limit identity: the decimal user id when the bearer token decodes,
/// otherwise `host`.
pub fn resolve_identity(decoder: &TokenDecoder, headers: &HeaderMap, host: &str) -> String {
    bearer_token(headers)
        .and_then(|token| decoder.user_id(token))
        .map(|id| id.to_string())
        .unwrap_or_else(|| host.to_string())
}
