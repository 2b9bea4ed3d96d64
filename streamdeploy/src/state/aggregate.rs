//! Reduction of per-stage states to one pipeline state.

use std::collections::BTreeSet;

use crate::core::LifecycleState;
use crate::errors::{ConflictError, ConflictKind};

/// Reduces stage states to the pipeline state.
///
/// Rules, first match wins:
/// 1. one distinct state: that state (`unknown` reads as `undeployed`)
/// 2. no states, or any `error`: `error`
/// 3. any `failed`: `failed`
/// 4. any `deploying`: `deploying`
/// 5. otherwise `partial`
#[must_use]
pub fn aggregate(states: &[LifecycleState]) -> LifecycleState {
    let distinct: BTreeSet<LifecycleState> = states.iter().copied().collect();

    if distinct.len() == 1 {
        return match distinct.first().copied() {
            Some(LifecycleState::Unknown) | None => LifecycleState::Undeployed,
            Some(state) => state,
        };
    }
    if distinct.is_empty() || distinct.contains(&LifecycleState::Error) {
        return LifecycleState::Error;
    }
    if distinct.contains(&LifecycleState::Failed) {
        return LifecycleState::Failed;
    }
    if distinct.contains(&LifecycleState::Deploying) {
        return LifecycleState::Deploying;
    }
    LifecycleState::Partial
}

/// Rejects a deploy unless the pipeline is undeployed.
///
/// # Errors
///
/// `AlreadyDeploying` for `deploying`, `AlreadyDeployed` for any other
/// active state.
pub fn ensure_deployable(name: &str, state: LifecycleState) -> Result<(), ConflictError> {
    match state {
        s if s.allows_deploy() => Ok(()),
        LifecycleState::Deploying => Err(ConflictError::new(ConflictKind::AlreadyDeploying, name)),
        _ => Err(ConflictError::new(ConflictKind::AlreadyDeployed, name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::{Deployed, Deploying, Error, Failed, Partial, Undeployed, Unknown};

    /// Every sequence of up to `max_len` states.
    fn sequences(max_len: usize) -> Vec<Vec<LifecycleState>> {
        let mut all = vec![Vec::new()];
        let mut frontier = vec![Vec::new()];
        for _ in 0..max_len {
            let mut next = Vec::new();
            for seq in &frontier {
                for state in LifecycleState::ALL {
                    let mut extended: Vec<LifecycleState> = seq.clone();
                    extended.push(state);
                    next.push(extended);
                }
            }
            all.extend(next.iter().cloned());
            frontier = next;
        }
        all
    }

    #[test]
    fn test_examples() {
        assert_eq!(aggregate(&[Deployed, Deployed]), Deployed);
        assert_eq!(aggregate(&[Deployed, Deploying]), Deploying);
        assert_eq!(aggregate(&[Deployed, Failed, Deploying]), Failed);
        assert_eq!(aggregate(&[Failed, Error]), Error);
        assert_eq!(aggregate(&[Deployed, Undeployed]), Partial);
        assert_eq!(aggregate(&[Unknown, Unknown]), Undeployed);
        assert_eq!(aggregate(&[]), Error);
    }

    #[test]
    fn test_total_over_small_inputs() {
        for seq in sequences(3) {
            let result = aggregate(&seq);
            assert_ne!(result, Unknown, "{seq:?} aggregated to unknown");
        }
    }

    #[test]
    fn test_permutation_invariant() {
        for seq in sequences(3) {
            let expected = aggregate(&seq);
            let mut reversed = seq.clone();
            reversed.reverse();
            assert_eq!(aggregate(&reversed), expected, "{seq:?}");
            if seq.len() == 3 {
                let rotated = vec![seq[1], seq[2], seq[0]];
                assert_eq!(aggregate(&rotated), expected, "{seq:?}");
            }
        }
    }

    #[test]
    fn test_singleton_idempotent() {
        for state in LifecycleState::ALL {
            let expected = if state == Unknown { Undeployed } else { state };
            for n in 1..=4 {
                assert_eq!(aggregate(&vec![state; n]), expected);
            }
        }
    }

    #[test]
    fn test_dominance_order() {
        for seq in sequences(3) {
            let distinct: BTreeSet<_> = seq.iter().copied().collect();
            if distinct.len() < 2 {
                continue;
            }
            let result = aggregate(&seq);
            if distinct.contains(&Error) {
                assert_eq!(result, Error, "{seq:?}");
            } else if distinct.contains(&Failed) {
                assert_eq!(result, Failed, "{seq:?}");
            } else if distinct.contains(&Deploying) {
                assert_eq!(result, Deploying, "{seq:?}");
            } else {
                assert_eq!(result, Partial, "{seq:?}");
            }
        }
    }

    #[test]
    fn test_guard() {
        assert!(ensure_deployable("p", Undeployed).is_ok());
        assert!(ensure_deployable("p", Unknown).is_ok());
        assert_eq!(
            ensure_deployable("p", Deploying).unwrap_err().kind,
            ConflictKind::AlreadyDeploying
        );
        for state in [Deployed, Failed, Error, Partial] {
            assert_eq!(ensure_deployable("p", state).unwrap_err().kind, ConflictKind::AlreadyDeployed);
        }
    }
}
