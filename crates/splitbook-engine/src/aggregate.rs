use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::smoother::BubbleSmoother;
use splitbook_store::{BalanceStore, InstanceRegistry};
use splitbook_types::{
    InstanceId, ManualAdjustment, PlayerAction, PlayerRow, RejectedRecord, SettlementConfig,
    SmoothingReport, WeeklyFigure,
};

/// Per-agent accumulation for one week.
#[derive(Debug, Clone, Default)]
pub struct AgentBucket {
    pub net_minor: i64,
    pub participants: usize,
    pub players: Vec<PlayerRow>,
}

/// Aggregated week, before allocation.
#[derive(Debug, Clone)]
pub struct WeekAggregate {
    pub period: NaiveDate,
    pub agents: BTreeMap<String, AgentBucket>,
    pub book_total_minor: i64,
    pub smoothing: Option<SmoothingReport>,
    pub rejected: Vec<RejectedRecord>,
}

/// Sums per-instance weekly figures and manual adjustments into per-agent
/// nets, routing the designated counterparty through the bubble smoother.
#[derive(Debug)]
pub struct Aggregator<'a> {
    registry: &'a InstanceRegistry,
    balances: &'a BalanceStore,
    config: &'a SettlementConfig,
}

impl<'a> Aggregator<'a> {
    pub fn new(
        registry: &'a InstanceRegistry,
        balances: &'a BalanceStore,
        config: &'a SettlementConfig,
    ) -> Self {
        Self {
            registry,
            balances,
            config,
        }
    }

    /// Aggregate one week. Figures referencing unknown instances are
    /// rejected individually; the rest of the batch continues.
    ///
    /// Sign convention: a positive figure means the counterparty gained and
    /// the settling party owes the owning agent, so it adds to the agent's
    /// net as-is. No inversion happens anywhere in this pipeline.
    pub async fn aggregate(
        &self,
        period: NaiveDate,
        figures: &[WeeklyFigure],
        adjustments: &[ManualAdjustment],
    ) -> Result<WeekAggregate, EngineError> {
        let mut adjusted: BTreeMap<InstanceId, i64> = BTreeMap::new();
        for adj in adjustments.iter().filter(|a| a.period == period) {
            *adjusted.entry(adj.instance).or_insert(0) += adj.amount_minor;
        }

        let smoother = BubbleSmoother::new(self.config.smoothing_threshold_minor);
        let mut agents: BTreeMap<String, AgentBucket> = BTreeMap::new();
        let mut smoothing: Option<SmoothingReport> = None;
        let mut rejected = Vec::new();
        let mut seen: HashSet<InstanceId> = HashSet::new();

        for figure in figures {
            if figure.period != period {
                return Err(EngineError::Configuration(format!(
                    "figure for instance {} belongs to period {}, not {period}",
                    figure.instance, figure.period
                )));
            }
            if !seen.insert(figure.instance) {
                return Err(EngineError::Configuration(format!(
                    "more than one weekly figure for instance {} in period {period}",
                    figure.instance
                )));
            }

            let Some(instance) = self.registry.get(figure.instance) else {
                warn!(instance = %figure.instance, "rejecting figure for unknown instance");
                rejected.push(RejectedRecord {
                    instance: Some(figure.instance),
                    external_id: String::new(),
                    agent: String::new(),
                    reason: "unknown player instance".to_string(),
                });
                continue;
            };

            if self.config.excluded_agents.contains(&instance.agent) {
                debug!(agent = %instance.agent, "skipping figure for excluded agent");
                continue;
            }

            let total_minor =
                figure.amount_minor + adjusted.get(&figure.instance).copied().unwrap_or(0);

            let effective_minor = if self
                .config
                .smoothed_external_id
                .as_deref()
                .is_some_and(|id| id == instance.external_id)
            {
                let outcome = smoother
                    .smooth(self.balances, figure.instance, total_minor)
                    .await?;
                smoothing = Some(SmoothingReport {
                    instance: figure.instance,
                    external_id: instance.external_id.clone(),
                    effective_minor: outcome.effective_minor,
                    balance_after_minor: outcome.balance_after_minor,
                    released: outcome.released,
                    explanation: outcome.explanation,
                });
                outcome.effective_minor
            } else {
                total_minor
            };

            let action = if effective_minor > 0 {
                PlayerAction::Pay
            } else {
                PlayerAction::Request
            };

            let bucket = agents.entry(instance.agent.clone()).or_default();
            bucket.net_minor += effective_minor;
            bucket.participants += 1;
            bucket.players.push(PlayerRow {
                instance: figure.instance,
                external_id: instance.external_id.clone(),
                display_name: instance.display_name.clone(),
                agent: instance.agent.clone(),
                amount_minor: effective_minor,
                pending_minor: figure.pending_minor,
                action,
                abs_minor: effective_minor.abs(),
            });
        }

        for bucket in agents.values_mut() {
            bucket.players.sort_by(|a, b| {
                let order = |action: PlayerAction| match action {
                    PlayerAction::Pay => 0,
                    PlayerAction::Request => 1,
                };
                (order(a.action), a.display_name.to_lowercase())
                    .cmp(&(order(b.action), b.display_name.to_lowercase()))
            });
        }

        let book_total_minor = agents.values().map(|b| b.net_minor).sum();

        Ok(WeekAggregate {
            period,
            agents,
            book_total_minor,
            smoothing,
            rejected,
        })
    }
}
