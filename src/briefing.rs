//! Mobile briefing and alert feed built from notification logs

use crate::models::Category;
use crate::state::Store;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub const NO_UPDATES: &str = "No new updates.";
pub const DEFAULT_ALERT_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Briefing {
    pub briefing: String,
    pub items: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertItem {
    pub source: String,
    pub summary: String,
    pub category: Category,
}

pub struct BriefingService {
    store: Arc<dyn Store>,
}

impl BriefingService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Summaries not yet briefed, newest first. Each log is briefed once.
    pub async fn fetch_briefing(&self, user_id: Uuid) -> Result<Briefing> {
        let mut tx = self.store.begin().await?;
        let logs = tx.pending_briefing_logs(user_id).await?;

        if logs.is_empty() {
            return Ok(Briefing {
                briefing: NO_UPDATES.to_string(),
                items: 0,
            });
        }

        let briefing = logs
            .iter()
            .map(|log| format!("- {}", log.summary))
            .collect::<Vec<_>>()
            .join("\n");

        let ids: Vec<Uuid> = logs.iter().map(|log| log.id).collect();
        tx.mark_included_in_briefing(&ids).await?;
        tx.commit().await?;

        info!(%user_id, items = ids.len(), "Briefing delivered");

        Ok(Briefing {
            briefing,
            items: ids.len(),
        })
    }

    /// Newest RISK and FINANCE logs.
    pub async fn recent_alerts(&self, user_id: Uuid, limit: usize) -> Result<Vec<AlertItem>> {
        let logs = self.store.logs_for_user(user_id).await?;

        Ok(logs
            .into_iter()
            .filter(|log| matches!(log.category, Category::Risk | Category::Finance))
            .take(limit)
            .map(|log| AlertItem {
                source: log.source_app,
                summary: log.summary,
                category: log.category,
            })
            .collect())
    }
}
