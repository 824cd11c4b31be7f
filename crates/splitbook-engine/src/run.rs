use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::aggregate::Aggregator;
use crate::error::EngineError;
use crate::split::{allocate, AgentStanding};
use crate::transfers;
use splitbook_store::{BalanceStore, InstanceRegistry};
use splitbook_types::{
    AgentWeekSummary, ManualAdjustment, RawFigureRecord, RejectedRecord, SettlementConfig,
    SettlementReport, WeeklyFigure,
};

/// One-shot settlement engine: resolves raw rows to player instances,
/// aggregates the week, allocates the split, and plans the transfers.
#[derive(Debug, Clone)]
pub struct SettlementEngine {
    config: SettlementConfig,
}

impl SettlementEngine {
    pub fn new(config: SettlementConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Settle one week.
    ///
    /// Malformed rows (missing identifiers, duplicate figures) are rejected
    /// individually and listed in the report; partial success is a normal,
    /// reportable outcome. Invariant violations and structural configuration
    /// problems are fatal and surface as [`EngineError`].
    pub async fn settle(
        &self,
        registry: &mut InstanceRegistry,
        balances: &BalanceStore,
        period: NaiveDate,
        raw: &[RawFigureRecord],
        adjustments: &[ManualAdjustment],
    ) -> Result<SettlementReport, EngineError> {
        let mut rejected: Vec<RejectedRecord> = Vec::new();
        let mut figures: Vec<WeeklyFigure> = Vec::new();
        let mut seen = HashSet::new();

        for record in raw {
            if record.external_id.trim().is_empty() || record.agent.trim().is_empty() {
                warn!(
                    external_id = %record.external_id,
                    agent = %record.agent,
                    "rejecting row with missing identifiers"
                );
                rejected.push(RejectedRecord {
                    instance: None,
                    external_id: record.external_id.clone(),
                    agent: record.agent.clone(),
                    reason: "missing player id or agent".to_string(),
                });
                continue;
            }

            let instance = registry.resolve(
                &record.external_id,
                &record.display_name,
                &record.agent,
                period,
            )?;

            if !seen.insert(instance) {
                warn!(external_id = %record.external_id, "rejecting duplicate weekly row");
                rejected.push(RejectedRecord {
                    instance: Some(instance),
                    external_id: record.external_id.clone(),
                    agent: record.agent.clone(),
                    reason: "duplicate weekly figure for player".to_string(),
                });
                continue;
            }

            figures.push(WeeklyFigure {
                period,
                instance,
                amount_minor: record.amount_minor,
                pending_minor: record.pending_minor,
            });
        }

        let aggregate = Aggregator::new(registry, balances, &self.config)
            .aggregate(period, &figures, adjustments)
            .await?;
        rejected.extend(aggregate.rejected);

        let standings: Vec<AgentStanding> = aggregate
            .agents
            .iter()
            .map(|(agent, bucket)| AgentStanding {
                agent: agent.clone(),
                net_minor: bucket.net_minor,
                participants: bucket.participants,
            })
            .collect();

        let decision = allocate(&standings, aggregate.book_total_minor)?;
        let entitled = transfers::entitlements(&decision.shares, aggregate.book_total_minor);

        let nets: BTreeMap<String, i64> = aggregate
            .agents
            .iter()
            .map(|(agent, bucket)| (agent.clone(), bucket.net_minor))
            .collect();
        let transfers = transfers::plan(&nets, &entitled, self.config.tolerance_minor);

        let agents: Vec<AgentWeekSummary> = aggregate
            .agents
            .into_iter()
            .map(|(agent, bucket)| {
                let percent = decision.shares.get(&agent).copied().unwrap_or(0.0);
                let entitlement_minor = entitled.get(&agent).copied().unwrap_or(0);
                AgentWeekSummary {
                    agent,
                    net_minor: bucket.net_minor,
                    participants: bucket.participants,
                    percent,
                    entitlement_minor,
                    explanation: decision.explanation.clone(),
                    players: bucket.players,
                }
            })
            .collect();

        info!(
            %period,
            book_total_minor = aggregate.book_total_minor,
            transfers = transfers.len(),
            rejected = rejected.len(),
            rule = %decision.explanation,
            "settlement run complete"
        );

        Ok(SettlementReport {
            period,
            book_total_minor: aggregate.book_total_minor,
            agents,
            transfers,
            smoothing: aggregate.smoothing,
            rejected,
        })
    }
}
