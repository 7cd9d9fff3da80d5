//! # Progress Plan
//!
//! Fixed progress shares per phase.
//!
//! ```text
//!  0        10                    40         55         70      80          100
//!  ├─────────┼─────────────────────┼──────────┼──────────┼───────┼────────────┤
//!  validation      extensions 30     themes 15  database 15 media 10  finalize
//! ```
//!
//! Within a phase N items split the share evenly and the last item always
//! lands on the phase end, so the cumulative percentage after a phase does
//! not depend on how many items it had. A phase with nothing selected is
//! credited its whole share when the orchestrator passes it.

use crate::types::ComponentKind;

/// Progress once both environments have been validated.
pub const VALIDATION_END: u8 = 10;

/// Progress of a finished operation.
pub const COMPLETE: u8 = 100;

/// Share of each component phase, in execution order.
pub fn share(kind: ComponentKind) -> u8 {
    match kind {
        ComponentKind::Extension => 30,
        ComponentKind::Theme => 15,
        ComponentKind::Table => 15,
        ComponentKind::Media => 10,
    }
}

/// Cumulative progress where a phase starts.
pub fn phase_start(kind: ComponentKind) -> u8 {
    ComponentKind::ORDER
        .iter()
        .take_while(|k| **k != kind)
        .fold(VALIDATION_END, |acc, k| acc + share(*k))
}

/// Cumulative progress where a phase ends.
pub fn phase_end(kind: ComponentKind) -> u8 {
    phase_start(kind) + share(kind)
}

/// Cumulative progress after item `index` (0-based) of `count` in a phase.
pub fn item_progress(kind: ComponentKind, index: usize, count: usize) -> u8 {
    if count == 0 {
        return phase_end(kind);
    }
    let done = (index + 1).min(count);
    let earned = usize::from(share(kind)) * done / count;
    phase_start(kind) + earned as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_boundaries() {
        assert_eq!(phase_start(ComponentKind::Extension), 10);
        assert_eq!(phase_end(ComponentKind::Extension), 40);
        assert_eq!(phase_end(ComponentKind::Theme), 55);
        assert_eq!(phase_end(ComponentKind::Table), 70);
        assert_eq!(phase_end(ComponentKind::Media), 80);
    }

    #[test]
    fn test_phase_end_independent_of_count() {
        for kind in ComponentKind::ORDER {
            for count in 1..=7 {
                assert_eq!(item_progress(kind, count - 1, count), phase_end(kind));
            }
        }
    }

    #[test]
    fn test_items_split_share_evenly() {
        assert_eq!(item_progress(ComponentKind::Extension, 0, 3), 20);
        assert_eq!(item_progress(ComponentKind::Extension, 1, 3), 30);
        assert_eq!(item_progress(ComponentKind::Extension, 2, 3), 40);
    }

    #[test]
    fn test_progress_monotonic_within_phase() {
        let mut last = 0;
        for i in 0..11 {
            let p = item_progress(ComponentKind::Theme, i, 11);
            assert!(p >= last);
            last = p;
        }
    }

    #[test]
    fn test_empty_phase_credits_full_share() {
        assert_eq!(item_progress(ComponentKind::Media, 0, 0), 80);
    }
}
