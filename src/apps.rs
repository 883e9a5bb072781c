//! App-name resolution
//!
//! Turns package identifiers such as `com.mbmobile` into a human-readable
//! name. Resolution never fails: any lookup problem falls back to the last
//! dot segment, capitalized. Only names returned by a lookup service are
//! authoritative; a fallback name is derived from the caller's own input.

use crate::error::GatekeeperError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Display name for a package identifier and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub name: String,
    /// True only when a lookup service vouched for the name
    pub authoritative: bool,
}

impl ResolvedName {
    pub fn authoritative(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authoritative: true,
        }
    }

    pub fn derived(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authoritative: false,
        }
    }
}

#[async_trait]
pub trait AppNameResolver: Send + Sync {
    async fn resolve(&self, identifier: &str) -> ResolvedName;
}

/// `com.vietcombank.app` -> `App`, `com.mbmobile` -> `Mbmobile`.
/// Identifiers without a dot are returned trimmed but otherwise unchanged.
pub fn fallback_app_name(identifier: &str) -> String {
    let identifier = identifier.trim();
    if !identifier.contains('.') {
        return identifier.to_string();
    }

    let segment = identifier
        .rsplit('.')
        .find(|s| !s.is_empty())
        .unwrap_or(identifier);

    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Offline resolver: always the fallback rule.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackAppNameResolver;

#[async_trait]
impl AppNameResolver for FallbackAppNameResolver {
    async fn resolve(&self, identifier: &str) -> ResolvedName {
        ResolvedName::derived(fallback_app_name(identifier))
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    name: String,
}

/// Lookup service client: GET {base_url}/{identifier} -> {"name": "..."}.
/// Successful lookups are cached for the life of the process.
pub struct HttpAppNameResolver {
    client: Client,
    base_url: String,
    cache: RwLock<HashMap<String, String>>,
}

impl HttpAppNameResolver {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache: RwLock::new(HashMap::new()),
        })
    }

    async fn lookup(&self, identifier: &str) -> Result<String> {
        let url = format!("{}/{}", self.base_url, identifier);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatekeeperError::Unknown(format!(
                "app-name lookup returned {} for {}",
                status, identifier
            )));
        }

        let body: LookupResponse = response.json().await?;
        let name = body.name.trim();
        if name.is_empty() {
            return Err(GatekeeperError::Unknown(format!(
                "app-name lookup returned an empty name for {}",
                identifier
            )));
        }

        Ok(name.to_string())
    }
}

#[async_trait]
impl AppNameResolver for HttpAppNameResolver {
    async fn resolve(&self, identifier: &str) -> ResolvedName {
        let identifier = identifier.trim();
        if !identifier.contains('.') {
            return ResolvedName::derived(identifier);
        }

        if let Some(name) = self.cache.read().await.get(identifier) {
            return ResolvedName::authoritative(name.clone());
        }

        match self.lookup(identifier).await {
            Ok(name) => {
                debug!(%identifier, %name, "Resolved app name");
                self.cache
                    .write()
                    .await
                    .insert(identifier.to_string(), name.clone());
                ResolvedName::authoritative(name)
            }
            Err(e) => {
                warn!(%identifier, error = %e, "App-name lookup failed, using fallback");
                ResolvedName::derived(fallback_app_name(identifier))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    #[test]
    fn test_fallback_last_segment_capitalized() {
        assert_eq!(fallback_app_name("com.mbmobile"), "Mbmobile");
        assert_eq!(fallback_app_name("com.VNPAY.WALLET"), "Wallet");
        assert_eq!(fallback_app_name("vn.com.techcombank.bb.app"), "App");
    }

    #[test]
    fn test_fallback_without_dot_unchanged() {
        assert_eq!(fallback_app_name("MBBank"), "MBBank");
        assert_eq!(fallback_app_name("  Zalo "), "Zalo");
    }

    #[test]
    fn test_fallback_ignores_trailing_dot() {
        assert_eq!(fallback_app_name("com.momo."), "Momo");
    }

    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    async fn lookup_server() -> String {
        let app = Router::new().route(
            "/:identifier",
            get(|Path(identifier): Path<String>| async move {
                match identifier.as_str() {
                    "com.mbmobile" => (StatusCode::OK, Json(json!({"name": "MB Bank"}))),
                    "com.blank.app" => (StatusCode::OK, Json(json!({"name": "  "}))),
                    _ => (StatusCode::NOT_FOUND, Json(json!({"error": "unknown"}))),
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_resolver_falls_back_when_unreachable() {
        let base_url = format!("http://127.0.0.1:{}", closed_port().await);
        let resolver = HttpAppNameResolver::new(&base_url, Duration::from_millis(500)).unwrap();

        assert_eq!(
            resolver.resolve("com.mbmobile").await,
            ResolvedName::derived("Mbmobile")
        );
        assert_eq!(resolver.resolve("MBBank").await, ResolvedName::derived("MBBank"));
    }

    #[tokio::test]
    async fn test_http_resolver_lookup_is_authoritative() {
        let resolver = HttpAppNameResolver::new(&lookup_server().await, Duration::from_secs(2)).unwrap();

        assert_eq!(
            resolver.resolve("com.mbmobile").await,
            ResolvedName::authoritative("MB Bank")
        );
        // Served from cache the second time
        assert_eq!(
            resolver.resolve("com.mbmobile").await,
            ResolvedName::authoritative("MB Bank")
        );
        assert_eq!(
            resolver.resolve("com.scammer.phish.mbbank").await,
            ResolvedName::derived("Mbbank")
        );
        assert_eq!(
            resolver.resolve("com.blank.app").await,
            ResolvedName::derived("App")
        );
    }

    #[tokio::test]
    async fn test_offline_resolver_is_never_authoritative() {
        let resolved = FallbackAppNameResolver.resolve("com.zing.zalo").await;
        assert_eq!(resolved, ResolvedName::derived("Zalo"));
        assert!(!resolved.authoritative);
    }
}
