//! Bearer-token verification delegated to the auth collaborator.
//!
//! The orchestrator never issues or validates credentials itself; it asks
//! the external identity service and caches the verified principal for a
//! short window. Session endpoints under `/auth/*` are proxied through.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stark_common::{Error, Result};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }
}

struct CachedPrincipal {
    principal: Principal,
    verified_at: Instant,
}

pub struct Authenticator {
    client: reqwest::Client,
    endpoint: String,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, CachedPrincipal>>,
}

impl Authenticator {
    pub fn new(endpoint: String, cache_ttl: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Verify a bearer token against the auth collaborator.
    pub async fn verify_token(&self, token: &str) -> Result<Principal> {
        if let Some(cached) = self.cache.lock().get(token)
            && cached.verified_at.elapsed() < self.cache_ttl
        {
            return Ok(cached.principal.clone());
        }

        let resp = self
            .client
            .get(format!("{}/verify", self.endpoint))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("auth collaborator: {e}")))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.cache.lock().remove(token);
            return Err(Error::Auth("invalid or expired token".into()));
        }
        if !resp.status().is_success() {
            return Err(Error::BackendUnavailable(format!(
                "auth collaborator returned {}",
                resp.status()
            )));
        }

        let principal: Principal = resp
            .json()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("auth collaborator body: {e}")))?;
        self.cache.lock().insert(
            token.to_string(),
            CachedPrincipal {
                principal: principal.clone(),
                verified_at: Instant::now(),
            },
        );
        Ok(principal)
    }

    /// Proxy a session call (`login`, `logout`, `refresh`, ...) unchanged.
    pub async fn proxy_session(
        &self,
        action: &str,
        body: serde_json::Value,
    ) -> Result<(u16, serde_json::Value)> {
        let resp = self
            .client
            .post(format!("{}/auth/{action}", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("auth collaborator: {e}")))?;
        let status = resp.status().as_u16();
        let body = resp
            .json()
            .await
            .unwrap_or_else(|_| serde_json::json!({ "success": false }));
        Ok((status, body))
    }
}

fn bearer_token(request: &Request) -> Result<&str> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| Error::Auth("missing Authorization header".into()))?
        .to_str()
        .map_err(|_| Error::Auth("malformed Authorization header".into()))?;
    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| Error::Auth("expected a bearer token".into()))
}

/// Layer for the protected API surface: verifies the token and stashes the
/// principal as a request extension.
pub async fn require_principal(
    State(auth): State<Arc<Authenticator>>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, Error> {
    let token = bearer_token(&request)?.to_string();
    let principal = auth.verify_token(&token).await?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}
