//! Difficulty tiers
//!
//! Each tier fixes the statement kinds the generator may draw from and
//! the exact size the finished tree must reach. The tiers nest: every
//! kind available at one tier stays available at the next.

use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::generator::StatementKind;

static SIMPLE_KINDS: Lazy<Vec<StatementKind>> = Lazy::new(|| {
    vec![
        StatementKind::Delay,
        StatementKind::Print,
        StatementKind::Task,
        StatementKind::DeferredAwait,
    ]
});

static SYNCHRONIZATION_KINDS: Lazy<Vec<StatementKind>> = Lazy::new(|| {
    let mut kinds = SIMPLE_KINDS.clone();
    kinds.extend([
        StatementKind::Scope,
        StatementKind::Join,
        StatementKind::Cancel,
    ]);
    kinds
});

static EXCEPTION_KINDS: Lazy<Vec<StatementKind>> = Lazy::new(|| {
    let mut kinds = SYNCHRONIZATION_KINDS.clone();
    kinds.extend([
        StatementKind::Throw,
        StatementKind::TryCatch,
        StatementKind::Supervised,
    ]);
    kinds
});

/// A named challenge tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Simple,
    Synchronization,
    Exceptions,
}

impl Difficulty {
    /// Every tier, easiest first.
    pub const ALL: [Difficulty; 3] = [
        Difficulty::Simple,
        Difficulty::Synchronization,
        Difficulty::Exceptions,
    ];

    /// The statement kinds the generator may use at this tier.
    pub fn kinds(self) -> &'static [StatementKind] {
        match self {
            Difficulty::Simple => &SIMPLE_KINDS,
            Difficulty::Synchronization => &SYNCHRONIZATION_KINDS,
            Difficulty::Exceptions => &EXCEPTION_KINDS,
        }
    }

    /// Units of statement cost the finished tree must total.
    pub fn target_units(self) -> usize {
        match self {
            Difficulty::Simple => 8,
            Difficulty::Synchronization => 11,
            Difficulty::Exceptions => 14,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Difficulty::Simple => "simple",
            Difficulty::Synchronization => "synchronization",
            Difficulty::Exceptions => "exceptions",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ALL_KINDS;

    #[test]
    fn test_tiers_nest() {
        assert!(Difficulty::Synchronization
            .kinds()
            .starts_with(Difficulty::Simple.kinds()));
        assert!(Difficulty::Exceptions
            .kinds()
            .starts_with(Difficulty::Synchronization.kinds()));
    }

    #[test]
    fn test_the_top_tier_covers_every_kind() {
        let kinds = Difficulty::Exceptions.kinds();
        assert_eq!(kinds.len(), ALL_KINDS.len());
        for kind in ALL_KINDS {
            assert!(kinds.contains(&kind));
        }
    }

    #[test]
    fn test_targets_grow_with_difficulty() {
        let targets: Vec<usize> = Difficulty::ALL
            .iter()
            .map(|tier| tier.target_units())
            .collect();
        assert_eq!(targets, vec![8, 11, 14]);
    }

    #[test]
    fn test_labels_match_display() {
        for tier in Difficulty::ALL {
            assert_eq!(tier.to_string(), tier.label());
        }
    }
}
