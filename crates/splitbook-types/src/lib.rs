//! Shared domain types for the splitbook settlement workspace.
//!
//! All monetary values are signed minor units (cents). Positive amounts mean
//! the counterparty gained and the settling party owes the owning agent;
//! negative amounts mean the counterparty lost.

#![deny(unsafe_code)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Surrogate identifier for a player instance.
///
/// External player ids are reused over time for different people, so they are
/// never used as a primary key; every instance gets its own surrogate id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One durable binding of (external id, display name, agent) to a validity
/// period. Append-only: a hand-off clears the current flag and creates a new
/// instance rather than mutating this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInstance {
    pub id: InstanceId,
    /// Reused external identifier, e.g. "pyr103". Not globally unique over time.
    pub external_id: String,
    pub display_name: String,
    /// Owning agent name.
    pub agent: String,
    pub first_active: NaiveDate,
    pub last_active: NaiveDate,
    /// At most one current instance exists per external id.
    pub current: bool,
    pub created_at: DateTime<Utc>,
}

/// Raw weekly row as handed over by the ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFigureRecord {
    pub external_id: String,
    pub display_name: String,
    pub agent: String,
    pub amount_minor: i64,
    pub pending_minor: i64,
}

impl RawFigureRecord {
    pub fn new(
        external_id: impl Into<String>,
        display_name: impl Into<String>,
        agent: impl Into<String>,
        amount_minor: i64,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            display_name: display_name.into(),
            agent: agent.into(),
            amount_minor,
            pending_minor: 0,
        }
    }
}

/// One counterparty's net result for one week, attributed to the instance
/// active in that week. At most one figure per (period, instance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyFigure {
    pub period: NaiveDate,
    pub instance: InstanceId,
    pub amount_minor: i64,
    pub pending_minor: i64,
}

/// Out-of-feed correction applied additively at aggregation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualAdjustment {
    pub period: NaiveDate,
    pub instance: InstanceId,
    pub amount_minor: i64,
    pub note: Option<String>,
}

/// Direction of the weekly action toward a player, from the book's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerAction {
    /// The player gained; the book pays out.
    Pay,
    /// The player lost; the book collects.
    Request,
}

/// Per-player display row for one settled week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRow {
    pub instance: InstanceId,
    pub external_id: String,
    pub display_name: String,
    pub agent: String,
    /// Effective amount after adjustments and smoothing.
    pub amount_minor: i64,
    pub pending_minor: i64,
    pub action: PlayerAction,
    pub abs_minor: i64,
}

/// Per-agent settlement view for one week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentWeekSummary {
    pub agent: String,
    pub net_minor: i64,
    pub participants: usize,
    pub percent: f64,
    pub entitlement_minor: i64,
    pub explanation: String,
    pub players: Vec<PlayerRow>,
}

/// Single settlement transfer between two agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: String,
    pub to: String,
    pub amount_minor: i64,
}

/// Identifies one record that could not be settled, with the reason.
///
/// Raw rows carry the external id and agent from the feed; an
/// already-resolved figure whose instance is missing from the registry has
/// only its surrogate id to report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub instance: Option<InstanceId>,
    pub external_id: String,
    pub agent: String,
    pub reason: String,
}

/// Post-run state of the smoothed counterparty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmoothingReport {
    pub instance: InstanceId,
    pub external_id: String,
    /// Amount that entered aggregation after the bubble rule.
    pub effective_minor: i64,
    pub balance_after_minor: i64,
    pub released: bool,
    pub explanation: String,
}

/// Running balance view for the smoothed counterparty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceStatus {
    pub balance_minor: i64,
    pub threshold_minor: i64,
    pub active: bool,
}

/// Full engine output for one settlement run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub period: NaiveDate,
    pub book_total_minor: i64,
    /// Sorted by agent name.
    pub agents: Vec<AgentWeekSummary>,
    pub transfers: Vec<Transfer>,
    pub smoothing: Option<SmoothingReport>,
    pub rejected: Vec<RejectedRecord>,
}

/// Engine configuration for one book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// External id of the one counterparty whose weekly figure is smoothed.
    pub smoothed_external_id: Option<String>,
    /// Bubble threshold; accumulated balances under this stay invisible.
    pub smoothing_threshold_minor: i64,
    /// Agents present in storage but excluded from aggregation and allocation.
    pub excluded_agents: BTreeSet<String>,
    /// Transfers under this are dropped as rounding noise.
    pub tolerance_minor: i64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            smoothed_external_id: None,
            smoothing_threshold_minor: 10_000,
            excluded_agents: BTreeSet::new(),
            tolerance_minor: 1,
        }
    }
}

impl SettlementConfig {
    pub fn with_smoothing(mut self, external_id: impl Into<String>, threshold_minor: i64) -> Self {
        self.smoothed_external_id = Some(external_id.into().to_lowercase());
        self.smoothing_threshold_minor = threshold_minor;
        self
    }

    pub fn exclude_agent(mut self, agent: impl Into<String>) -> Self {
        self.excluded_agents.insert(agent.into());
        self
    }
}
