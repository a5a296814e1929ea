//! # Phase State Machine
//!
//! ```text
//! (none) ─Observed─▶ Validating ─Succeeded─▶ Ready
//!                        │  ▲                  │
//!                        │  └────Observed──────┤
//!                        └──Failed──▶ Error ───┘ (Observed)
//!
//! any ─DeletionRequested─▶ Deleting ─CleanedUp─▶ Terminated
//! ```

use crate::crd::ReconcilePhase;
use thiserror::Error;

/// Inputs driving phase changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// The spec or its credential Secret was (re)observed
    Observed,
    /// Credentials resolved and the registration is in place
    Succeeded,
    /// Reconciliation failed
    Failed,
    /// The resource carries a deletion timestamp
    DeletionRequested,
    /// Registration and mapping are gone
    CleanedUp,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("event {event:?} is not valid in phase {from:?}")]
pub struct InvalidTransition {
    pub from: Option<ReconcilePhase>,
    pub event: ReconcileEvent,
}

/// Next phase after `event`, starting from `from` (`None` for a resource never reconciled)
pub fn transition(
    from: Option<ReconcilePhase>,
    event: ReconcileEvent,
) -> Result<ReconcilePhase, InvalidTransition> {
    use ReconcileEvent as E;
    use ReconcilePhase as P;

    let next = match (from, event) {
        (Some(P::Terminated), _) => None,
        (_, E::DeletionRequested) => Some(P::Deleting),
        (Some(P::Deleting), E::CleanedUp) => Some(P::Terminated),
        (Some(P::Deleting), _) => None,
        (None | Some(P::Validating | P::Ready | P::Error), E::Observed) => Some(P::Validating),
        (Some(P::Validating), E::Succeeded) => Some(P::Ready),
        (Some(P::Validating), E::Failed) => Some(P::Error),
        _ => None,
    };
    next.ok_or(InvalidTransition { from, event })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReconcileEvent as E;
    use ReconcilePhase as P;

    #[test]
    fn test_happy_path() {
        let validating = transition(None, E::Observed).unwrap();
        assert_eq!(validating, P::Validating);
        assert_eq!(transition(Some(validating), E::Succeeded), Ok(P::Ready));
        assert_eq!(transition(Some(P::Ready), E::Observed), Ok(P::Validating));
        assert_eq!(transition(Some(P::Validating), E::Failed), Ok(P::Error));
        assert_eq!(transition(Some(P::Error), E::Observed), Ok(P::Validating));
    }

    #[test]
    fn test_deletion_reachable_from_any_live_phase() {
        for from in [None, Some(P::Validating), Some(P::Ready), Some(P::Error), Some(P::Deleting)] {
            assert_eq!(transition(from, E::DeletionRequested), Ok(P::Deleting));
        }
        assert_eq!(transition(Some(P::Deleting), E::CleanedUp), Ok(P::Terminated));
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        assert!(transition(Some(P::Ready), E::Succeeded).is_err());
        assert!(transition(None, E::Failed).is_err());
        assert!(transition(Some(P::Deleting), E::Observed).is_err());
        assert!(transition(Some(P::Terminated), E::DeletionRequested).is_err());
    }
}
