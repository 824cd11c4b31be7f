use std::collections::BTreeMap;

use tracing::debug;

use splitbook_types::Transfer;

/// Dollar entitlement per agent from the allocated shares.
///
/// Each entitlement is rounded to the cent; any rounding residue is folded
/// into the largest entitlement so the total always equals the book exactly
/// and no error carries across runs.
pub fn entitlements(
    shares: &BTreeMap<String, f64>,
    book_total_minor: i64,
) -> BTreeMap<String, i64> {
    let mut rounded: BTreeMap<String, i64> = shares
        .iter()
        .map(|(agent, share)| (agent.clone(), (share * book_total_minor as f64).round() as i64))
        .collect();

    let residue = book_total_minor - rounded.values().sum::<i64>();
    if residue != 0 {
        if let Some(agent) = rounded
            .iter()
            .max_by_key(|(agent, minor)| (minor.abs(), std::cmp::Reverse(agent.as_str())))
            .map(|(agent, _)| agent.clone())
        {
            debug!(residue, agent = %agent, "folding rounding residue into largest entitlement");
            if let Some(minor) = rounded.get_mut(&agent) {
                *minor += residue;
            }
        }
    }
    rounded
}

/// Minimal transfer set that moves every agent from its net to its
/// entitlement.
///
/// Imbalance is `net - entitlement`: positive pays out, negative receives.
/// The largest surplus is repeatedly matched against the largest deficit;
/// three participants always resolve in at most two transfers. Amounts under
/// `tolerance_minor` are dropped as rounding noise.
pub fn plan(
    nets: &BTreeMap<String, i64>,
    entitlements: &BTreeMap<String, i64>,
    tolerance_minor: i64,
) -> Vec<Transfer> {
    let mut payers: Vec<(String, i64)> = Vec::new();
    let mut receivers: Vec<(String, i64)> = Vec::new();

    for (agent, net) in nets {
        let entitled = entitlements.get(agent).copied().unwrap_or(0);
        let imbalance = net - entitled;
        if imbalance > tolerance_minor {
            payers.push((agent.clone(), imbalance));
        } else if imbalance < -tolerance_minor {
            receivers.push((agent.clone(), -imbalance));
        }
    }

    // Largest first; name breaks ties deterministically.
    payers.sort_by(|a, b| (b.1, a.0.as_str()).cmp(&(a.1, b.0.as_str())));
    receivers.sort_by(|a, b| (b.1, a.0.as_str()).cmp(&(a.1, b.0.as_str())));

    let mut transfers = Vec::new();
    let mut i = 0;
    let mut j = 0;

    while i < payers.len() && j < receivers.len() {
        let amount_minor = payers[i].1.min(receivers[j].1);
        if amount_minor >= tolerance_minor {
            transfers.push(Transfer {
                from: payers[i].0.clone(),
                to: receivers[j].0.clone(),
                amount_minor,
            });
        }

        payers[i].1 -= amount_minor;
        receivers[j].1 -= amount_minor;

        if payers[i].1 <= tolerance_minor {
            i += 1;
        }
        if receivers[j].1 <= tolerance_minor {
            j += 1;
        }
    }

    transfers
}
