//! Fleet evaluation - one task per bot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::engine::{BotEvaluation, LifecycleEngine};
use crate::sizing::AccountSnapshot;
use crate::types::TelemetrySnapshot;

/// One bot's inputs for a fleet run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetEntry {
    pub snapshot: TelemetrySnapshot,
    #[serde(default)]
    pub account: Option<AccountSnapshot>,
}

/// Evaluate every bot concurrently. Results are ordered by bot id; a task
/// that panics is logged and left out.
pub async fn evaluate_fleet(
    engine: Arc<LifecycleEngine>,
    entries: Vec<FleetEntry>,
    now: DateTime<Utc>,
) -> Vec<BotEvaluation> {
    let total = entries.len();
    let mut join_set = JoinSet::new();
    for entry in entries {
        let engine = Arc::clone(&engine);
        join_set.spawn(async move {
            engine.evaluate_bot(&entry.snapshot, entry.account.as_ref(), now)
        });
    }

    let mut results = Vec::with_capacity(total);
    while let Some(res) = join_set.join_next().await {
        match res {
            Ok(evaluation) => results.push(evaluation),
            Err(e) => error!("Bot evaluation task failed: {}", e),
        }
    }
    results.sort_by_key(|e| e.bot_id);

    let promotable = results.iter().filter(|e| e.promotion.allowed).count();
    info!(
        bots = total,
        evaluated = results.len(),
        promotable,
        "Fleet evaluation complete"
    );
    results
}
