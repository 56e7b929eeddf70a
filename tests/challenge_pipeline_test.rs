//! Whole-pipeline properties
//!
//! Seed sweeps over generate -> simplify -> evaluate, then the builder
//! and the stores on top. Everything here is expected to hold for every
//! seed in the sweep, not for a lucky few; the ranges just keep the
//! suite fast.

use suspense::challenge::{build, Challenge};
use suspense::difficulty::Difficulty;
use suspense::generator::generate;
use suspense::interpreter::evaluate;
use suspense::persistence::{ChallengeStore, DirectoryStore, MemoryStore};
use suspense::program::Statement;
use suspense::simplifier::simplify;
use suspense::supply::Supply;

/// Test helper growing one tree for a tier.
fn grown(tier: Difficulty, seed: u64) -> Statement {
    let mut supply = Supply::new(seed);
    generate(&mut supply, tier.target_units(), tier.kinds()).unwrap()
}

/// Test helper scanning seeds upward for the first accepted challenge.
/// Rejection rates vary by tier, so nothing here bets on a particular
/// seed being accepted.
fn first_accepted(tier: Difficulty) -> Challenge {
    for seed in 0..20 {
        if let Ok(challenge) = build(tier, seed) {
            return challenge;
        }
    }
    panic!("no accepted {} challenge in 20 seeds", tier);
}

fn is_print(statement: &Statement) -> bool {
    matches!(statement, Statement::Print { .. })
}

fn is_delay(statement: &Statement) -> bool {
    matches!(statement, Statement::Delay { .. })
}

/// Every block body in the tree, the root's included.
fn bodies(tree: &Statement) -> Vec<Vec<Statement>> {
    let mut all = Vec::new();
    if let Some(body) = tree.body() {
        all.push(body.to_vec());
    }
    for path in tree.statement_paths() {
        if let Some(body) = tree.get(&path).and_then(Statement::body) {
            all.push(body.to_vec());
        }
    }
    all
}

// === GENERATION ===

#[test]
fn test_every_tier_grows_to_its_exact_size() {
    for tier in Difficulty::ALL {
        for seed in 0..30 {
            let tree = grown(tier, seed);
            assert_eq!(
                tree.body_units(),
                tier.target_units(),
                "{} seed {}",
                tier,
                seed
            );
        }
    }
}

#[test]
fn test_generated_trees_keep_their_bindings_paired() {
    for tier in Difficulty::ALL {
        for seed in 0..30 {
            let tree = grown(tier, seed);
            assert!(tree.check_well_formed().is_ok(), "{} seed {}", tier, seed);
        }
    }
}

#[test]
fn test_simple_tier_uses_only_its_own_statements() {
    for seed in 0..30 {
        let tree = grown(Difficulty::Simple, seed);
        for path in tree.statement_paths() {
            let statement = tree.get(&path).unwrap();
            let allowed = matches!(
                statement,
                Statement::Delay { .. }
                    | Statement::Print { .. }
                    | Statement::Task { .. }
                    | Statement::Deferred { .. }
                    | Statement::AwaitPrint { .. }
            );
            assert!(allowed, "seed {} grew {:?}", seed, statement);
        }
    }
}

// === SIMPLIFICATION ===

#[test]
fn test_evaluation_is_deterministic_across_the_sweep() {
    for seed in 0..30 {
        let tree = grown(Difficulty::Exceptions, seed);
        assert_eq!(evaluate(&tree).unwrap(), evaluate(&tree).unwrap());
    }
}

#[test]
fn test_simplified_trees_have_no_adjacent_noise() {
    for seed in 0..30 {
        let simplified = simplify(&grown(Difficulty::Exceptions, seed)).unwrap();
        for body in bodies(&simplified) {
            for pair in body.windows(2) {
                assert!(
                    !(is_print(&pair[0]) && is_print(&pair[1])),
                    "adjacent prints, seed {}",
                    seed
                );
                assert!(
                    !(is_delay(&pair[0]) && is_delay(&pair[1])),
                    "adjacent delays, seed {}",
                    seed
                );
            }
            for window in body.windows(4) {
                let alternating = (is_print(&window[0])
                    && is_delay(&window[1])
                    && is_print(&window[2])
                    && is_delay(&window[3]))
                    || (is_delay(&window[0])
                        && is_print(&window[1])
                        && is_delay(&window[2])
                        && is_print(&window[3]));
                assert!(!alternating, "repeated alternation, seed {}", seed);
            }
        }
    }
}

#[test]
fn test_declared_and_used_names_stay_balanced() {
    for seed in 0..30 {
        let simplified = simplify(&grown(Difficulty::Synchronization, seed)).unwrap();
        let mut declared = Vec::new();
        let mut used = Vec::new();
        for path in simplified.statement_paths() {
            let statement = simplified.get(&path).unwrap();
            if let Some(name) = statement.declared_name() {
                declared.push(name.to_string());
            }
            if let Some(name) = statement.used_name() {
                used.push(name.to_string());
            }
        }
        declared.sort();
        used.sort();
        assert_eq!(declared, used, "seed {}", seed);
        let total = declared.len();
        declared.dedup();
        assert_eq!(declared.len(), total, "duplicate names, seed {}", seed);
    }
}

// === CHALLENGES ===

#[test]
fn test_challenges_rebuild_identically_from_their_seed() {
    for tier in Difficulty::ALL {
        let challenge = first_accepted(tier);
        let again = build(tier, challenge.seed).unwrap();
        assert_eq!(challenge, again);
    }
}

#[test]
fn test_accepted_challenges_answer_with_distinct_instants() {
    for tier in Difficulty::ALL {
        let challenge = first_accepted(tier);
        assert!(challenge.trace.timestamps_distinct());
        assert!(!challenge.trace.is_empty());
        assert!(challenge.source.starts_with("runBlocking {"));
    }
}

// === STORAGE ===

#[test]
fn test_a_built_challenge_survives_the_directory_store() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut store = DirectoryStore::new(temp_dir.path()).unwrap();
    let challenge = first_accepted(Difficulty::Simple);

    store.save(&challenge).unwrap();
    assert_eq!(
        store.fetch(challenge.tier, challenge.seed).unwrap(),
        Some(challenge)
    );
}

#[test]
fn test_memory_store_holds_all_three_tiers() {
    let mut store = MemoryStore::new();
    let mut challenges = Vec::new();
    for tier in Difficulty::ALL {
        let challenge = first_accepted(tier);
        store.save(&challenge).unwrap();
        challenges.push(challenge);
    }
    for challenge in challenges {
        assert_eq!(
            store.fetch(challenge.tier, challenge.seed).unwrap(),
            Some(challenge)
        );
    }
}
