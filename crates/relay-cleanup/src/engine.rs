use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use relay_conversations::ConversationManager;
use relay_messages::MessageStore;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// How many ids each report category carries for operator inspection.
const SAMPLE_CAP: usize = 10;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// Messages referencing a conversation id that no longer exists.
    pub orphaned_messages: u64,
    /// Messages of soft-deleted conversations, purged ahead of retention.
    pub tombstone_messages: u64,
    /// Tombstones past the retention window, hard-deleted with their rows.
    pub expired_conversations: u64,
    pub sample_orphan_conversations: Vec<String>,
    pub sample_expired_conversations: Vec<String>,
    pub dry_run: bool,
}

pub struct CleanupEngine {
    conversations: Arc<ConversationManager>,
    messages: Arc<MessageStore>,
    retention_days: i64,
    interval: Duration,
}

impl CleanupEngine {
    pub fn new(
        conversations: Arc<ConversationManager>,
        messages: Arc<MessageStore>,
        retention_days: i64,
        interval: Duration,
    ) -> Self {
        Self {
            conversations,
            messages,
            retention_days,
            interval,
        }
    }

    /// Dry run: same scan as a real pass, no mutation.
    pub fn analyze(&self) -> CleanupReport {
        self.reconcile(true)
    }

    /// One mutating reconciliation pass.
    pub fn run_once(&self) -> CleanupReport {
        self.reconcile(false)
    }

    /// Periodic loop. Runs until `shutdown` flips to true; a failed pass is
    /// logged and the next tick runs normally.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            retention_days = self.retention_days,
            "cleanup reconciler started"
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // consume the immediate first tick so the first pass runs one
        // interval after startup, not during it
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.run_once();
                    info!(
                        orphaned = report.orphaned_messages,
                        tombstoned = report.tombstone_messages,
                        expired = report.expired_conversations,
                        "cleanup pass finished"
                    );
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cleanup reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    // --- private helpers ---------------------------------------------------

    fn reconcile(&self, dry_run: bool) -> CleanupReport {
        let mut report = CleanupReport {
            dry_run,
            ..Default::default()
        };

        let live: HashSet<String> = match self.conversations.live_ids() {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                error!(error = %e, "live-conversation scan failed, skipping pass");
                return report;
            }
        };
        let tombstoned: HashSet<String> = match self.conversations.soft_deleted_ids() {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                error!(error = %e, "tombstone scan failed, skipping pass");
                return report;
            }
        };

        // Phases 1 + 2: message documents whose conversation is gone or
        // tombstoned. Purge is transactional per conversation.
        let referenced = match self.messages.referenced_conversation_ids() {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "message scan failed, skipping pass");
                return report;
            }
        };
        for conversation_id in referenced {
            if live.contains(&conversation_id) {
                continue;
            }
            let is_tombstone = tombstoned.contains(&conversation_id);
            let count = if dry_run {
                self.messages
                    .count_for_conversation(&conversation_id)
                    .unwrap_or(0)
            } else {
                match self.messages.delete_conversation_messages(&conversation_id) {
                    Ok(count) => count,
                    Err(e) => {
                        warn!(conversation_id, error = %e, "message purge failed, continuing");
                        continue;
                    }
                }
            };
            if is_tombstone {
                report.tombstone_messages += count;
            } else {
                report.orphaned_messages += count;
                if report.sample_orphan_conversations.len() < SAMPLE_CAP {
                    report.sample_orphan_conversations.push(conversation_id);
                }
            }
        }

        // Phase 3: tombstones past retention lose their remaining rows.
        let cutoff = (Utc::now() - chrono::Duration::days(self.retention_days)).to_rfc3339();
        let expired = match self.conversations.soft_deleted_before(&cutoff) {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "retention scan failed");
                return report;
            }
        };
        for conversation_id in expired {
            if !dry_run {
                if let Err(e) = self.messages.delete_conversation_messages(&conversation_id) {
                    warn!(conversation_id, error = %e, "residual message purge failed, continuing");
                    continue;
                }
                if let Err(e) = self.conversations.purge_rows(&conversation_id) {
                    warn!(conversation_id, error = %e, "row purge failed, continuing");
                    continue;
                }
            }
            report.expired_conversations += 1;
            if report.sample_expired_conversations.len() < SAMPLE_CAP {
                report.sample_expired_conversations.push(conversation_id);
            }
        }

        report
    }
}
