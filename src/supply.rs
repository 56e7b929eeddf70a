//! Name and value supply - the single random source behind generation
//!
//! Three independent, pre-enumerated ordered pools hand out deferred
//! variable names, task names and string literals; one seeded `ChaCha8Rng`
//! drives every other random decision. A supply belongs to exactly one
//! generation session, so the same seed always grows the same program.

use std::collections::{HashSet, VecDeque};

use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::program::Statement;

/// How many numbered names each pool enumerates before running dry.
const POOL_SPAN: usize = 1000;

/// Which pool ran dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Values,
    Tasks,
    Literals,
}

/// Pool exhaustion. Fatal: it means a caller asked for an unreasonably
/// large program, not something generation can recover from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupplyError {
    Exhausted(Pool),
}

impl std::fmt::Display for SupplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupplyError::Exhausted(Pool::Values) => write!(f, "deferred-name pool is exhausted"),
            SupplyError::Exhausted(Pool::Tasks) => write!(f, "task-name pool is exhausted"),
            SupplyError::Exhausted(Pool::Literals) => write!(f, "literal pool is exhausted"),
        }
    }
}

impl std::error::Error for SupplyError {}

/// Deterministic source of fresh names, literals and random draws.
pub struct Supply {
    seed: u64,
    rng: ChaCha8Rng,
    values: VecDeque<String>,
    tasks: VecDeque<String>,
    literals: VecDeque<String>,
}

impl Supply {
    pub fn new(seed: u64) -> Self {
        Supply {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            values: full_value_pool(),
            tasks: full_task_pool(),
            literals: full_literal_pool(),
        }
    }

    /// The seed this supply was created with. Recorded on finished
    /// challenges so a run can be reproduced.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Next deferred variable name: `value1`, `value2`, ...
    pub fn next_value_name(&mut self) -> Result<String, SupplyError> {
        self.values
            .pop_front()
            .ok_or(SupplyError::Exhausted(Pool::Values))
    }

    /// Next task name: `job1`, `job2`, ...
    pub fn next_task_name(&mut self) -> Result<String, SupplyError> {
        self.tasks
            .pop_front()
            .ok_or(SupplyError::Exhausted(Pool::Tasks))
    }

    /// Next string literal: `A`..`Z`, then `v1`, `v2`, ...
    pub fn next_literal(&mut self) -> Result<String, SupplyError> {
        self.literals
            .pop_front()
            .ok_or(SupplyError::Exhausted(Pool::Literals))
    }

    /// A delay duration in whole virtual seconds, 1000..=3000 ms.
    pub fn next_delay_millis(&mut self) -> u64 {
        1000 * self.rng.gen_range(1..=3u64)
    }

    /// Flavour of a throw statement: one in four raises a cancellation.
    pub fn next_cancellation_flag(&mut self) -> bool {
        self.rng.gen_bool(0.25)
    }

    /// Uniform index below `bound`. `bound` must be positive.
    pub fn gen_index(&mut self, bound: usize) -> usize {
        self.rng.gen_range(0..bound)
    }

    /// Refill every pool to its full ordered list minus the names still
    /// alive in `tree`, so regenerating after an abandoned attempt never
    /// re-issues a name that tree is holding. The random stream is left
    /// alone: a restart continues the session, it does not replay it.
    pub fn restart(&mut self, tree: &Statement) {
        let alive = AliveNames::collect(tree);
        self.values = filtered(full_value_pool(), &alive.values);
        self.tasks = filtered(full_task_pool(), &alive.tasks);
        self.literals = filtered(full_literal_pool(), &alive.literals);
        debug!(
            "supply restarted: {} value names, {} task names, {} literals withheld",
            alive.values.len(),
            alive.tasks.len(),
            alive.literals.len()
        );
    }
}

impl std::fmt::Debug for Supply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supply")
            .field("seed", &self.seed)
            .field("values_left", &self.values.len())
            .field("tasks_left", &self.tasks.len())
            .field("literals_left", &self.literals.len())
            .finish()
    }
}

struct AliveNames {
    values: HashSet<String>,
    tasks: HashSet<String>,
    literals: HashSet<String>,
}

impl AliveNames {
    fn collect(tree: &Statement) -> Self {
        let mut alive = AliveNames {
            values: HashSet::new(),
            tasks: HashSet::new(),
            literals: HashSet::new(),
        };
        alive.visit(tree);
        alive
    }

    fn visit(&mut self, node: &Statement) {
        match node {
            Statement::Print { text } => {
                self.literals.insert(text.clone());
            }
            Statement::Join { name } | Statement::Cancel { name } => {
                self.tasks.insert(name.clone());
            }
            Statement::AwaitPrint { name } => {
                self.values.insert(name.clone());
            }
            Statement::NamedTask { name, .. } => {
                self.tasks.insert(name.clone());
            }
            Statement::Deferred { name, result, .. } => {
                self.values.insert(name.clone());
                self.literals.insert(result.clone());
            }
            Statement::Delay { .. } | Statement::ThrowError { .. } => {}
            Statement::Scope { .. }
            | Statement::Task { .. }
            | Statement::TryCatch { .. }
            | Statement::Supervised { .. } => {}
        }
        if let Some(body) = node.body() {
            for child in body {
                self.visit(child);
            }
        }
    }
}

fn full_value_pool() -> VecDeque<String> {
    (1..=POOL_SPAN).map(|n| format!("value{}", n)).collect()
}

fn full_task_pool() -> VecDeque<String> {
    (1..=POOL_SPAN).map(|n| format!("job{}", n)).collect()
}

fn full_literal_pool() -> VecDeque<String> {
    (b'A'..=b'Z')
        .map(|c| (c as char).to_string())
        .chain((1..=POOL_SPAN).map(|n| format!("v{}", n)))
        .collect()
}

fn filtered(pool: VecDeque<String>, alive: &HashSet<String>) -> VecDeque<String> {
    pool.into_iter()
        .filter(|name| !alive.contains(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pools_pop_in_order() {
        let mut supply = Supply::new(0);
        assert_eq!(supply.next_value_name().unwrap(), "value1");
        assert_eq!(supply.next_value_name().unwrap(), "value2");
        assert_eq!(supply.next_task_name().unwrap(), "job1");
        assert_eq!(supply.next_literal().unwrap(), "A");
        assert_eq!(supply.next_literal().unwrap(), "B");
    }

    #[test]
    fn test_literal_pool_switches_to_numbered_names() {
        let mut supply = Supply::new(0);
        for _ in 0..26 {
            supply.next_literal().unwrap();
        }
        assert_eq!(supply.next_literal().unwrap(), "v1");
    }

    #[test]
    fn test_drained_pool_reports_exhaustion() {
        let mut supply = Supply::new(0);
        for _ in 0..POOL_SPAN {
            supply.next_task_name().unwrap();
        }
        assert_eq!(
            supply.next_task_name(),
            Err(SupplyError::Exhausted(Pool::Tasks))
        );
    }

    #[test]
    fn test_same_seed_same_draws() {
        let mut a = Supply::new(99);
        let mut b = Supply::new(99);
        for _ in 0..32 {
            assert_eq!(a.next_delay_millis(), b.next_delay_millis());
            assert_eq!(a.gen_index(7), b.gen_index(7));
            assert_eq!(a.next_cancellation_flag(), b.next_cancellation_flag());
        }
    }

    #[test]
    fn test_delays_are_whole_seconds() {
        let mut supply = Supply::new(3);
        for _ in 0..64 {
            let millis = supply.next_delay_millis();
            assert!(millis >= 1000 && millis <= 3000);
            assert_eq!(millis % 1000, 0);
        }
    }

    #[test]
    fn test_restart_withholds_names_alive_in_tree() {
        let mut supply = Supply::new(0);
        let _ = supply.next_task_name().unwrap();
        let _ = supply.next_literal().unwrap();
        let abandoned = Statement::scope(vec![
            Statement::named_task("job1", vec![Statement::print("A")]),
            Statement::deferred("value2", "C", vec![]),
            Statement::join("job1"),
            Statement::await_print("value2"),
        ]);
        supply.restart(&abandoned);
        assert_eq!(supply.next_task_name().unwrap(), "job2");
        assert_eq!(supply.next_value_name().unwrap(), "value1");
        assert_eq!(supply.next_value_name().unwrap(), "value3");
        assert_eq!(supply.next_literal().unwrap(), "B");
        assert_eq!(supply.next_literal().unwrap(), "D");
    }
}
