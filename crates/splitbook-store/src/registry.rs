use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use splitbook_types::{InstanceId, PlayerInstance};

/// Authoritative roster row used when rebuilding the current set wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub external_id: String,
    pub display_name: String,
    pub agent: String,
}

/// Append-only table of player instances with exact-triple resolution.
///
/// The same external id legitimately denotes different people over time, so
/// identity is keyed on the full (external id, display name, agent) triple.
/// A change in display name or agent is treated as a hand-off, never as a
/// correction: the old instance keeps its history and loses the current
/// flag, and a fresh instance is appended.
#[derive(Debug, Clone, Default)]
pub struct InstanceRegistry {
    instances: Vec<PlayerInstance>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehydrate a registry from persisted instances, verifying that the
    /// current-flag and triple-uniqueness invariants still hold.
    pub fn from_instances(instances: Vec<PlayerInstance>) -> Result<Self, StoreError> {
        for (i, a) in instances.iter().enumerate() {
            for b in &instances[i + 1..] {
                if a.external_id == b.external_id
                    && a.display_name == b.display_name
                    && a.agent == b.agent
                {
                    return Err(StoreError::InvariantViolation(format!(
                        "duplicate instance triple ({}, {}, {})",
                        a.external_id, a.display_name, a.agent
                    )));
                }
                if a.current && b.current && a.external_id == b.external_id {
                    return Err(StoreError::InvariantViolation(format!(
                        "more than one current instance for external id {}",
                        a.external_id
                    )));
                }
            }
        }
        Ok(Self { instances })
    }

    /// Map an observed (external id, display name, agent) triple to a durable
    /// instance for the given week.
    ///
    /// An exact triple match extends the existing instance's activity window
    /// and reasserts its current flag. Anything else is a hand-off: the
    /// previously current instance for this external id is deactivated and a
    /// new instance is appended.
    pub fn resolve(
        &mut self,
        external_id: &str,
        display_name: &str,
        agent: &str,
        period: NaiveDate,
    ) -> Result<InstanceId, StoreError> {
        let external_id = external_id.to_lowercase();

        if let Some(existing) = self.instances.iter_mut().find(|inst| {
            inst.external_id == external_id
                && inst.display_name == display_name
                && inst.agent == agent
        }) {
            existing.last_active = existing.last_active.max(period);
            existing.current = true;
            let id = existing.id;
            // A reactivated match supersedes any other current holder of the id.
            self.clear_current_except(&external_id, Some(id))?;
            return Ok(id);
        }

        self.clear_current_except(&external_id, None)?;

        let instance = PlayerInstance {
            id: InstanceId::new(),
            external_id: external_id.clone(),
            display_name: display_name.to_string(),
            agent: agent.to_string(),
            first_active: period,
            last_active: period,
            current: true,
            created_at: Utc::now(),
        };
        let id = instance.id;
        debug!(%id, external_id, agent, "created player instance");
        self.instances.push(instance);
        Ok(id)
    }

    /// Mark every instance historical, then reactivate or create the exact
    /// triple for each roster entry. Weekly history keeps pointing at the
    /// instances it was recorded against.
    pub fn rebuild_current(
        &mut self,
        roster: &[RosterEntry],
        period: NaiveDate,
    ) -> Result<Vec<InstanceId>, StoreError> {
        for inst in &mut self.instances {
            inst.current = false;
        }

        let mut activated = Vec::with_capacity(roster.len());
        for entry in roster {
            let id = self.resolve(&entry.external_id, &entry.display_name, &entry.agent, period)?;
            activated.push(id);
        }
        Ok(activated)
    }

    /// Current instance for an external id, if any. More than one current
    /// holder is an invariant violation surfaced as an error.
    pub fn current_instance(&self, external_id: &str) -> Result<Option<&PlayerInstance>, StoreError> {
        let external_id = external_id.to_lowercase();
        let mut found = None;
        for inst in self.instances.iter().filter(|i| i.current && i.external_id == external_id) {
            if found.is_some() {
                return Err(StoreError::InvariantViolation(format!(
                    "more than one current instance for external id {external_id}"
                )));
            }
            found = Some(inst);
        }
        Ok(found)
    }

    pub fn current_instances(&self) -> impl Iterator<Item = &PlayerInstance> {
        self.instances.iter().filter(|i| i.current)
    }

    /// Full version history for an external id, oldest first.
    pub fn instances_for(&self, external_id: &str) -> Vec<&PlayerInstance> {
        let external_id = external_id.to_lowercase();
        self.instances
            .iter()
            .filter(|i| i.external_id == external_id)
            .collect()
    }

    pub fn get(&self, id: InstanceId) -> Option<&PlayerInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn instances(&self) -> &[PlayerInstance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn clear_current_except(
        &mut self,
        external_id: &str,
        keep: Option<InstanceId>,
    ) -> Result<(), StoreError> {
        let mut cleared = 0usize;
        for inst in self
            .instances
            .iter_mut()
            .filter(|i| i.current && i.external_id == external_id && Some(i.id) != keep)
        {
            inst.current = false;
            cleared += 1;
        }
        if cleared > 1 {
            // The table already held two current holders before this call.
            return Err(StoreError::InvariantViolation(format!(
                "more than one current instance for external id {external_id}"
            )));
        }
        if cleared == 1 {
            debug!(external_id, "deactivated superseded player instance");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn week(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn roster(entries: &[(&str, &str, &str)]) -> Vec<RosterEntry> {
        entries
            .iter()
            .map(|(external_id, display_name, agent)| RosterEntry {
                external_id: external_id.to_string(),
                display_name: display_name.to_string(),
                agent: agent.to_string(),
            })
            .collect()
    }

    #[test]
    fn exact_match_extends_activity_window() {
        let mut registry = InstanceRegistry::new();
        let first = registry
            .resolve("pyr103", "John", "AgentA", week(2024, 1, 1))
            .unwrap();
        let second = registry
            .resolve("pyr103", "John", "AgentA", week(2024, 2, 5))
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        let inst = registry.get(first).unwrap();
        assert_eq!(inst.first_active, week(2024, 1, 1));
        assert_eq!(inst.last_active, week(2024, 2, 5));
        assert!(inst.current);
    }

    #[test]
    fn earlier_period_does_not_shrink_last_active() {
        let mut registry = InstanceRegistry::new();
        let id = registry
            .resolve("pyr103", "John", "AgentA", week(2024, 3, 4))
            .unwrap();
        registry
            .resolve("pyr103", "John", "AgentA", week(2024, 1, 1))
            .unwrap();
        assert_eq!(registry.get(id).unwrap().last_active, week(2024, 3, 4));
    }

    #[test]
    fn handoff_creates_new_instance_and_preserves_history() {
        let mut registry = InstanceRegistry::new();
        let john = registry
            .resolve("pyr103", "John", "AgentA", week(2021, 1, 1))
            .unwrap();
        let sarah = registry
            .resolve("pyr103", "Sarah", "AgentB", week(2024, 1, 1))
            .unwrap();

        assert_ne!(john, sarah);
        assert_eq!(registry.len(), 2);

        let john_inst = registry.get(john).unwrap();
        assert!(!john_inst.current);
        assert_eq!(john_inst.display_name, "John");
        assert_eq!(john_inst.agent, "AgentA");
        assert_eq!(john_inst.last_active, week(2021, 1, 1));

        let current = registry.current_instance("pyr103").unwrap().unwrap();
        assert_eq!(current.id, sarah);
        assert_eq!(current.display_name, "Sarah");
    }

    #[test]
    fn agent_change_alone_is_a_handoff() {
        let mut registry = InstanceRegistry::new();
        let a = registry
            .resolve("pyr200", "Mike", "AgentA", week(2024, 1, 1))
            .unwrap();
        let b = registry
            .resolve("pyr200", "Mike", "AgentB", week(2024, 1, 8))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn at_most_one_current_per_external_id() {
        let mut registry = InstanceRegistry::new();
        registry
            .resolve("pyr103", "John", "AgentA", week(2024, 1, 1))
            .unwrap();
        registry
            .resolve("pyr103", "Sarah", "AgentB", week(2024, 2, 1))
            .unwrap();
        registry
            .resolve("pyr103", "John", "AgentA", week(2024, 3, 1))
            .unwrap();

        let current: Vec<_> = registry
            .current_instances()
            .filter(|i| i.external_id == "pyr103")
            .collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].display_name, "John");
    }

    #[test]
    fn external_id_is_normalized_to_lowercase() {
        let mut registry = InstanceRegistry::new();
        let a = registry
            .resolve("PYR103", "John", "AgentA", week(2024, 1, 1))
            .unwrap();
        let b = registry
            .resolve("pyr103", "John", "AgentA", week(2024, 1, 8))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rehydration_rejects_duplicate_current_flags() {
        let mut registry = InstanceRegistry::new();
        registry
            .resolve("pyr103", "John", "AgentA", week(2024, 1, 1))
            .unwrap();
        let mut instances = registry.instances().to_vec();
        let mut twin = instances[0].clone();
        twin.id = InstanceId::new();
        twin.display_name = "Sarah".to_string();
        instances.push(twin);

        let err = InstanceRegistry::from_instances(instances).unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation(_)));
    }

    #[test]
    fn rehydration_rejects_duplicate_triples() {
        let mut registry = InstanceRegistry::new();
        registry
            .resolve("pyr103", "John", "AgentA", week(2024, 1, 1))
            .unwrap();
        let mut instances = registry.instances().to_vec();
        let mut twin = instances[0].clone();
        twin.id = InstanceId::new();
        twin.current = false;
        instances.push(twin);

        let err = InstanceRegistry::from_instances(instances).unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation(_)));
    }

    #[test]
    fn rebuild_current_reactivates_exact_matches() {
        let mut registry = InstanceRegistry::new();
        let john = registry
            .resolve("pyr103", "John", "AgentA", week(2024, 1, 1))
            .unwrap();
        registry
            .resolve("pyr104", "Dana", "AgentB", week(2024, 1, 1))
            .unwrap();

        let activated = registry
            .rebuild_current(
                &roster(&[("pyr103", "John", "AgentA"), ("pyr105", "Cole", "AgentC")]),
                week(2024, 6, 3),
            )
            .unwrap();

        assert_eq!(activated.len(), 2);
        assert_eq!(activated[0], john);
        assert!(registry.get(john).unwrap().current);
        assert!(registry.current_instance("pyr104").unwrap().is_none());
        assert!(registry.current_instance("pyr105").unwrap().is_some());
        // Dana's history survives deactivation.
        assert_eq!(registry.instances_for("pyr104").len(), 1);
    }
}
