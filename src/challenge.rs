//! Challenge assembly
//!
//! Drives the whole pipeline for one tier and seed: grow a tree,
//! simplify it, evaluate it, and accept the result only when the
//! simplified tree still has the tier's exact size, keeps its
//! structural invariants, and prints every line at a distinct instant.
//! A rejected tree restarts the supply so the next attempt draws fresh
//! material instead of replaying the same choices.

use std::error::Error;
use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::difficulty::Difficulty;
use crate::generator::{self, GenerateError};
use crate::interpreter::{evaluate, EvalError, Trace};
use crate::program::Statement;
use crate::render::render;
use crate::simplifier::simplify;
use crate::supply::Supply;

/// How many rejected trees one seed tolerates before giving up.
const ATTEMPT_LIMIT: usize = 1000;

/// A finished puzzle: the rendered source and the trace it produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub tier: Difficulty,
    pub seed: u64,
    pub source: String,
    pub trace: Trace,
}

#[derive(Debug)]
pub enum ChallengeError {
    Generate(GenerateError),
    Eval(EvalError),
    /// Every attempt for this seed was rejected.
    Exhausted { tier: Difficulty, attempts: usize },
}

impl fmt::Display for ChallengeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeError::Generate(inner) => write!(f, "{}", inner),
            ChallengeError::Eval(inner) => write!(f, "{}", inner),
            ChallengeError::Exhausted { tier, attempts } => write!(
                f,
                "no acceptable {} challenge after {} attempts",
                tier, attempts
            ),
        }
    }
}

impl Error for ChallengeError {}

impl From<GenerateError> for ChallengeError {
    fn from(inner: GenerateError) -> Self {
        ChallengeError::Generate(inner)
    }
}

impl From<EvalError> for ChallengeError {
    fn from(inner: EvalError) -> Self {
        ChallengeError::Eval(inner)
    }
}

/// Build the challenge for one tier and seed. Deterministic: the same
/// pair always yields the same challenge or the same error.
pub fn build(tier: Difficulty, seed: u64) -> Result<Challenge, ChallengeError> {
    let mut supply = Supply::new(seed);
    for attempt in 0..ATTEMPT_LIMIT {
        let grown = generator::generate(&mut supply, tier.target_units(), tier.kinds())?;
        let simplified = simplify(&grown)?;
        let trace = evaluate(&simplified)?;
        match rejection(&simplified, &trace, tier) {
            None => {
                debug!(
                    "accepted a {} tree for seed {} on attempt {}",
                    tier,
                    seed,
                    attempt + 1
                );
                return Ok(Challenge {
                    tier,
                    seed,
                    source: render(&simplified),
                    trace,
                });
            }
            Some(reason) => {
                debug!("rejected {} attempt {}: {}", tier, attempt + 1, reason);
                supply.restart(&simplified);
            }
        }
    }
    warn!(
        "every {} attempt for seed {} was rejected",
        tier, seed
    );
    Err(ChallengeError::Exhausted {
        tier,
        attempts: ATTEMPT_LIMIT,
    })
}

fn rejection(tree: &Statement, trace: &Trace, tier: Difficulty) -> Option<&'static str> {
    if tree.body_units() != tier.target_units() {
        return Some("simplification shrank it below the target size");
    }
    if tree.check_well_formed().is_err() {
        return Some("the tree lost a structural invariant");
    }
    if !trace.timestamps_distinct() {
        return Some("two lines print at the same instant");
    }
    None
}
