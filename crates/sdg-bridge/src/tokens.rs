// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bearer-token acquisition and caching.
//!
//! Both REST APIs hand out JWTs from a login endpoint. The token's lifetime
//! comes from its `exp` claim, decoded without signature verification (the
//! bridge is the party that just received it); tokens missing the claim get
//! a conservative default TTL. Login failures are retried forever - a bad
//! credential set must never take the process down.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::time::Clock;

const LOGIN_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Login endpoint credentials and token tuning.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// JSON key the login endpoint expects the username under (`"email"`,
    /// `"username"`, ...).
    pub username_key: String,
    pub username: String,
    pub password: String,
    pub login_url: String,
    /// Refresh when fewer than this many seconds of validity remain.
    pub grace_period: u64,
    /// Assumed TTL when the token has no `exp` claim.
    pub default_ttl: u64,
}

impl TokenConfig {
    pub fn new(username_key: &str, username: &str, password: &str, login_url: &str) -> Self {
        Self {
            username_key: username_key.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            login_url: login_url.to_string(),
            grace_period: 60,
            default_ttl: 600,
        }
    }
}

#[derive(Debug, Error)]
enum LoginError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("no access_token in login response")]
    MissingAccessToken,
}

struct CachedToken {
    token: String,
    expires_at: u64,
}

/// Caching token provider with single-flight refresh.
pub struct TokenProvider {
    cfg: TokenConfig,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
    state: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(cfg: TokenConfig, http: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        Self {
            cfg,
            http,
            clock,
            state: Mutex::new(None),
        }
    }

    /// Return a token with comfortable remaining validity, logging in if
    /// needed. Holding the state lock across the login makes concurrent
    /// callers wait for one refresh instead of issuing their own.
    pub async fn ensure_token(&self) -> String {
        let mut state = self.state.lock().await;

        if let Some(cached) = state.as_ref() {
            let now = self.clock.now();
            if now < cached.expires_at.saturating_sub(self.cfg.grace_period) {
                return cached.token.clone();
            }
        }

        let (token, expires_at) = self.login().await;
        *state = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        token
    }

    /// Drop the cached token (used after a 401).
    pub async fn invalidate(&self) {
        *self.state.lock().await = None;
    }

    async fn login(&self) -> (String, u64) {
        loop {
            match self.try_login().await {
                Ok(result) => return result,
                Err(err) => {
                    tracing::error!("Login to {} failed: {}", self.cfg.login_url, err);
                    tokio::time::sleep(LOGIN_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn try_login(&self) -> Result<(String, u64), LoginError> {
        let mut body = serde_json::Map::new();
        body.insert(
            self.cfg.username_key.clone(),
            serde_json::Value::String(self.cfg.username.clone()),
        );
        body.insert(
            "password".to_string(),
            serde_json::Value::String(self.cfg.password.clone()),
        );

        let response = self
            .http
            .post(&self.cfg.login_url)
            .json(&serde_json::Value::Object(body))
            .send()
            .await?
            .error_for_status()?;

        let payload: serde_json::Value = response.json().await?;
        let token = payload
            .get("access_token")
            .and_then(|t| t.as_str())
            .ok_or(LoginError::MissingAccessToken)?;

        let expires_at =
            decode_exp(token).unwrap_or_else(|| self.clock.now() + self.cfg.default_ttl);
        tracing::debug!(
            "Logged in to {}, token valid until {}",
            self.cfg.login_url,
            expires_at
        );

        Ok((token.to_string(), expires_at))
    }
}

/// Extract the `exp` claim (epoch seconds) from a JWT without verifying the
/// signature. Returns `None` for malformed tokens or a missing claim.
pub fn decode_exp(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("exp")?.as_u64()
}
