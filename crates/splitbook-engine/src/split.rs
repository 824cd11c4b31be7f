use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::EngineError;

/// Low exposure: fewer than this many players.
pub const LOW_EXPOSURE_MAX_PLAYERS: usize = 5;
/// Low exposure: absolute net under this.
pub const LOW_EXPOSURE_NET_MINOR: i64 = 50_000;
/// Dominant winner rule only engages above this book total.
pub const DOMINANT_BOOK_MINOR: i64 = 100_000;

/// One agent's inputs to the split rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStanding {
    pub agent: String,
    pub net_minor: i64,
    pub participants: usize,
}

/// Selected split, as a fraction per agent, plus the one-line narrative for
/// the branch that fired.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitDecision {
    pub shares: BTreeMap<String, f64>,
    pub explanation: String,
}

/// Select and apply one allocation rule from the prioritized cascade.
///
/// The rule set is defined only for exactly three agents; any other count is
/// a configuration error rather than a silent fallback, since it would mask
/// a structural assumption violation.
///
/// All thresholds are strict: a participant count of exactly 5, an absolute
/// net of exactly $500, a book total of exactly $1000, and a winnings share
/// of exactly 75% do not trigger their rules.
pub fn allocate(
    standings: &[AgentStanding],
    book_total_minor: i64,
) -> Result<SplitDecision, EngineError> {
    if standings.len() != 3 {
        return Err(EngineError::Configuration(format!(
            "split rules require exactly 3 participating agents, got {}",
            standings.len()
        )));
    }
    let names: BTreeSet<&str> = standings.iter().map(|s| s.agent.as_str()).collect();
    if names.len() != 3 {
        return Err(EngineError::Configuration(
            "split rules require distinct agent names".to_string(),
        ));
    }

    let low: Vec<&AgentStanding> = standings
        .iter()
        .filter(|s| {
            s.participants < LOW_EXPOSURE_MAX_PLAYERS && s.net_minor.abs() < LOW_EXPOSURE_NET_MINOR
        })
        .collect();

    let positive_total_minor: i64 = standings.iter().map(|s| s.net_minor.max(0)).sum();
    let dominant: Option<&AgentStanding> = if book_total_minor > DOMINANT_BOOK_MINOR {
        // Strictly more than 75% of the positive winnings: 4*net > 3*total.
        standings
            .iter()
            .find(|s| s.net_minor > 0 && 4 * s.net_minor > 3 * positive_total_minor)
    } else {
        None
    };

    let decision = if let Some(dom) = dominant {
        let low_others: Vec<&&AgentStanding> =
            low.iter().filter(|s| s.agent != dom.agent).collect();

        if low_others.len() == 1 {
            // Dominant 45%, low 15%, and the middle agent takes the 40%
            // remainder so the shares sum to one.
            let low_agent = low_others[0];
            let shares = standings
                .iter()
                .map(|s| {
                    let share = if s.agent == dom.agent {
                        0.45
                    } else if s.agent == low_agent.agent {
                        0.15
                    } else {
                        0.40
                    };
                    (s.agent.clone(), share)
                })
                .collect();
            SplitDecision {
                shares,
                explanation: format!(
                    "{} had a great week, {} didn't have enough volume",
                    dom.agent, low_agent.agent
                ),
            }
        } else {
            // Dominant resolution also covers the degenerate case where the
            // dominant agent itself qualifies as low exposure, and the
            // unnarrated case of two low agents alongside a dominant one.
            let shares = standings
                .iter()
                .map(|s| {
                    let share = if s.agent == dom.agent { 0.40 } else { 0.30 };
                    (s.agent.clone(), share)
                })
                .collect();
            SplitDecision {
                shares,
                explanation: format!("{} had a great week", dom.agent),
            }
        }
    } else {
        match low.len() {
            1 => {
                let low_agent = low[0];
                let shares = standings
                    .iter()
                    .map(|s| {
                        let share = if s.agent == low_agent.agent { 0.20 } else { 0.40 };
                        (s.agent.clone(), share)
                    })
                    .collect();
                SplitDecision {
                    shares,
                    explanation: format!(
                        "{} didn't have enough players or volume",
                        low_agent.agent
                    ),
                }
            }
            2 => {
                // Each low agent takes the 20% role; the remaining agent
                // takes the whole 60% remainder so the shares still sum to one.
                let low_names: BTreeSet<&str> = low.iter().map(|s| s.agent.as_str()).collect();
                let shares = standings
                    .iter()
                    .map(|s| {
                        let share = if low_names.contains(s.agent.as_str()) { 0.20 } else { 0.60 };
                        (s.agent.clone(), share)
                    })
                    .collect();
                let mut named: Vec<&str> = low_names.into_iter().collect();
                named.sort_unstable();
                SplitDecision {
                    shares,
                    explanation: format!(
                        "{} and {} didn't have enough players or volume",
                        named[0], named[1]
                    ),
                }
            }
            // No qualifying agent, or all three: even split.
            _ => SplitDecision {
                shares: standings
                    .iter()
                    .map(|s| (s.agent.clone(), 1.0 / 3.0))
                    .collect(),
                explanation: "Standard splits this week".to_string(),
            },
        }
    };

    debug!(
        book_total_minor,
        explanation = %decision.explanation,
        "split rule selected"
    );
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn standing(agent: &str, net_minor: i64, participants: usize) -> AgentStanding {
        AgentStanding {
            agent: agent.to_string(),
            net_minor,
            participants,
        }
    }

    fn share(decision: &SplitDecision, agent: &str) -> f64 {
        decision.shares[agent]
    }

    #[test]
    fn even_split_when_no_rule_fires() {
        let decision = allocate(
            &[
                standing("Gabe", 50_000, 8),
                standing("Trev", -30_000, 6),
                standing("Orso", 10_000, 7),
            ],
            30_000,
        )
        .unwrap();

        for agent in ["Gabe", "Trev", "Orso"] {
            assert!((share(&decision, agent) - 1.0 / 3.0).abs() < 1e-12);
        }
        assert_eq!(decision.explanation, "Standard splits this week");
    }

    #[test]
    fn one_low_exposure_agent_takes_twenty_percent() {
        let decision = allocate(
            &[
                standing("Gabe", 60_000, 8),
                standing("Trev", -30_000, 6),
                standing("Orso", 10_000, 3),
            ],
            40_000,
        )
        .unwrap();

        assert_eq!(share(&decision, "Orso"), 0.20);
        assert_eq!(share(&decision, "Gabe"), 0.40);
        assert_eq!(share(&decision, "Trev"), 0.40);
        assert_eq!(
            decision.explanation,
            "Orso didn't have enough players or volume"
        );
    }

    #[test]
    fn dominant_winner_takes_forty_percent() {
        let decision = allocate(
            &[
                standing("Gabe", 90_000, 8),
                standing("Trev", 10_000, 6),
                standing("Orso", 10_000, 7),
            ],
            110_000,
        )
        .unwrap();

        assert_eq!(share(&decision, "Gabe"), 0.40);
        assert_eq!(share(&decision, "Trev"), 0.30);
        assert_eq!(share(&decision, "Orso"), 0.30);
        assert_eq!(decision.explanation, "Gabe had a great week");
    }

    #[test]
    fn combined_rule_splits_forty_five_forty_fifteen() {
        let decision = allocate(
            &[
                standing("Gabe", 150_000, 8),
                standing("Trev", -20_000, 6),
                standing("Orso", 10_000, 3),
            ],
            140_000,
        )
        .unwrap();

        assert_eq!(share(&decision, "Gabe"), 0.45);
        assert_eq!(share(&decision, "Trev"), 0.40);
        assert_eq!(share(&decision, "Orso"), 0.15);
        assert_eq!(
            decision.explanation,
            "Gabe had a great week, Orso didn't have enough volume"
        );
    }

    #[test]
    fn combined_rule_shares_sum_to_one() {
        let decision = allocate(
            &[
                standing("Gabe", 400_000, 10),
                standing("Trev", 10_000, 2),
                standing("Orso", 20_000, 10),
            ],
            430_000,
        )
        .unwrap();

        assert_eq!(
            decision.explanation,
            "Gabe had a great week, Trev didn't have enough volume"
        );
        let total: f64 = decision.shares.values().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(share(&decision, "Orso"), 0.40);
    }

    #[test]
    fn two_low_exposure_agents_split_twenty_each() {
        let decision = allocate(
            &[
                standing("Gabe", 40_000, 9),
                standing("Trev", 10_000, 2),
                standing("Orso", -5_000, 3),
            ],
            45_000,
        )
        .unwrap();

        assert_eq!(share(&decision, "Trev"), 0.20);
        assert_eq!(share(&decision, "Orso"), 0.20);
        assert_eq!(share(&decision, "Gabe"), 0.60);
    }

    #[test]
    fn all_three_low_exposure_falls_back_to_even_split() {
        let decision = allocate(
            &[
                standing("Gabe", 10_000, 2),
                standing("Trev", 5_000, 3),
                standing("Orso", -5_000, 1),
            ],
            10_000,
        )
        .unwrap();

        for agent in ["Gabe", "Trev", "Orso"] {
            assert!((share(&decision, agent) - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn exact_boundaries_do_not_trigger_rules() {
        // participants exactly 5 and |net| exactly $500: not low exposure.
        // book exactly $1000: dominant test disabled.
        let decision = allocate(
            &[
                standing("Gabe", 90_000, 5),
                standing("Trev", 50_000, 5),
                standing("Orso", -40_000, 5),
            ],
            100_000,
        )
        .unwrap();
        assert_eq!(decision.explanation, "Standard splits this week");

        // Winnings share exactly 75%: not dominant.
        let decision = allocate(
            &[
                standing("Gabe", 90_000, 8),
                standing("Trev", 30_000, 6),
                standing("Orso", -15_000, 7),
            ],
            105_000,
        )
        .unwrap();
        assert_eq!(decision.explanation, "Standard splits this week");
    }

    #[test]
    fn just_past_the_dominance_boundary_triggers() {
        let decision = allocate(
            &[
                standing("Gabe", 90_001, 8),
                standing("Trev", 30_000, 6),
                standing("Orso", -15_000, 7),
            ],
            105_001,
        )
        .unwrap();
        assert_eq!(decision.explanation, "Gabe had a great week");
    }

    #[test]
    fn wrong_agent_count_is_a_configuration_error() {
        let err = allocate(
            &[standing("Gabe", 10_000, 5), standing("Trev", 10_000, 5)],
            20_000,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn duplicate_agent_names_are_rejected() {
        let err = allocate(
            &[
                standing("Gabe", 10_000, 5),
                standing("Gabe", 5_000, 5),
                standing("Trev", 1_000, 5),
            ],
            16_000,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    proptest! {
        #[test]
        fn shares_always_sum_to_one(
            nets in prop::array::uniform3(-500_000i64..500_000),
            participants in prop::array::uniform3(0usize..20),
        ) {
            let standings = vec![
                standing("Gabe", nets[0], participants[0]),
                standing("Trev", nets[1], participants[1]),
                standing("Orso", nets[2], participants[2]),
            ];
            let book = nets.iter().sum();
            let decision = allocate(&standings, book).unwrap();
            let total: f64 = decision.shares.values().sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
        }
    }
}
