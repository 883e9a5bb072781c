//! Trust verification for finance notifications
//!
//! A finance notification is only allowed to touch the ledger when its
//! source app is one of the user's registered institutions.
//! Deterministic enforcement: no oracle is consulted here.

use crate::apps::AppNameResolver;
use crate::config::TrustPolicy;
use crate::models::Account;
use crate::state::Store;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const VERIFIED_REASON: &str = "Verified Source";
pub const TRUST_DISABLED_REASON: &str = "Trust check disabled";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrustVerdict {
    pub is_trusted: bool,
    pub reason: String,
    /// Registered institution the source matched, in its stored casing
    pub matched_institution: Option<String>,
}

impl TrustVerdict {
    fn untrusted(source_app: &str) -> Self {
        Self {
            is_trusted: false,
            reason: format!(
                "UNTRUSTED SOURCE: '{}' is not in your registered accounts.",
                source_app
            ),
            matched_institution: None,
        }
    }
}

/// Whitelist check against the user's accounts. Case-insensitive; either the
/// raw identifier or an authoritative display name may match.
pub fn evaluate(accounts: &[Account], source_app: &str, resolved_name: Option<&str>) -> TrustVerdict {
    let candidates: Vec<String> = std::iter::once(source_app)
        .chain(resolved_name)
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let matched = accounts
        .iter()
        .find(|account| candidates.contains(&account.institution_name.trim().to_lowercase()));

    match matched {
        Some(account) => TrustVerdict {
            is_trusted: true,
            reason: VERIFIED_REASON.to_string(),
            matched_institution: Some(account.institution_name.clone()),
        },
        None => TrustVerdict::untrusted(source_app),
    }
}

pub struct TrustVerifier {
    store: Arc<dyn Store>,
    resolver: Arc<dyn AppNameResolver>,
    policy: TrustPolicy,
}

impl TrustVerifier {
    pub fn new(store: Arc<dyn Store>, resolver: Arc<dyn AppNameResolver>, policy: TrustPolicy) -> Self {
        Self {
            store,
            resolver,
            policy,
        }
    }

    pub fn policy(&self) -> TrustPolicy {
        self.policy
    }

    /// Decide whether `source_app` may drive ledger mutations for `user_id`.
    pub async fn verify_source(&self, user_id: Uuid, source_app: &str) -> Result<TrustVerdict> {
        let resolved = self.resolver.resolve(source_app).await;

        if self.policy == TrustPolicy::Disabled {
            return Ok(TrustVerdict {
                is_trusted: true,
                reason: TRUST_DISABLED_REASON.to_string(),
                matched_institution: Some(resolved.name),
            });
        }

        // A derived name comes from the sender's own identifier and proves nothing.
        let vouched = resolved.authoritative.then_some(resolved.name.as_str());

        let accounts = self.store.accounts_for_user(user_id).await?;
        let verdict = evaluate(&accounts, source_app, vouched);

        if verdict.is_trusted {
            info!(%user_id, %source_app, institution = ?verdict.matched_institution, "Source verified");
        } else {
            warn!(
                %user_id,
                %source_app,
                resolved = %resolved.name,
                authoritative = resolved.authoritative,
                "Untrusted finance source"
            );
        }

        Ok(verdict)
    }
}
