//! Tree simplification against an evaluation oracle
//!
//! Rewrites a program into a smaller, non-redundant form. Reductions
//! are speculative: build a candidate, evaluate it, keep it only when
//! the trace is byte-identical to the baseline. Normalizations come
//! after the reductions and are unconditional; they erase shapes that
//! make a poor challenge (degenerate catches, back-to-back prints,
//! simultaneous output) and re-baseline the trace they changed. Every
//! applied rewrite strictly shrinks the tree, so the fixpoint loop
//! terminates and simplification is idempotent.

use log::debug;

use crate::interpreter::{evaluate, EvalError, Trace};
use crate::program::Statement;

/// Simplify `tree` to a fixpoint of the rewrite rules. The result
/// evaluates to the final baseline trace; reductions never changed it,
/// normalizations moved it deliberately.
pub fn simplify(tree: &Statement) -> Result<Statement, EvalError> {
    let mut simplifier = Simplifier::new(tree.clone())?;
    simplifier.run()?;
    debug!(
        "simplified {} units down to {}",
        tree.body_units(),
        simplifier.current.body_units()
    );
    Ok(simplifier.into_tree())
}

struct Simplifier {
    current: Statement,
    baseline: Trace,
}

impl Simplifier {
    fn new(tree: Statement) -> Result<Self, EvalError> {
        let baseline = evaluate(&tree)?;
        Ok(Simplifier {
            current: tree,
            baseline,
        })
    }

    fn into_tree(self) -> Statement {
        self.current
    }

    fn run(&mut self) -> Result<(), EvalError> {
        while self.rewrite_once()? {}
        Ok(())
    }

    /// One applied rewrite, scanning the rules in order. After a hit the
    /// caller restarts the scan from the first rule on the new tree.
    fn rewrite_once(&mut self) -> Result<bool, EvalError> {
        Ok(self.inline_a_block()?
            || self.remove_a_statement()?
            || self.remove_an_empty_block()?
            || self.remove_a_degenerate_try_catch()?
            || self.collapse_adjacent_duplicates()?
            || self.collapse_simultaneous_prints()?)
    }

    /// Oracle gate: keep `candidate` only when its trace matches the
    /// baseline exactly.
    fn consider(&mut self, candidate: Statement) -> Result<bool, EvalError> {
        if evaluate(&candidate)? == self.baseline {
            self.current = candidate;
            return Ok(true);
        }
        Ok(false)
    }

    /// Install a normalized candidate and make its trace the new
    /// baseline. Only the unconditional rules come through here.
    fn accept(&mut self, candidate: Statement) -> Result<(), EvalError> {
        self.baseline = evaluate(&candidate)?;
        self.current = candidate;
        Ok(())
    }

    /// Replace a block with its children spliced into its position. A
    /// declaring block takes its paired usage with it; the children's
    /// own declarations move as a unit, so their bindings stay intact.
    /// Empty blocks are the removal rule's business, not an inline.
    fn inline_a_block(&mut self) -> Result<bool, EvalError> {
        for path in self.current.statement_paths() {
            let statement = match self.current.get(&path) {
                Some(statement) => statement,
                None => continue,
            };
            let children = match statement.body() {
                Some(body) if !body.is_empty() => body.to_vec(),
                _ => continue,
            };
            let declared = statement.declared_name().map(str::to_string);
            let (&index, parent) = match path.split_last() {
                Some(split) => split,
                None => continue,
            };
            let mut candidate = self.current.clone();
            let spliced = match candidate.get_mut(parent).and_then(Statement::body_mut) {
                Some(block) if index < block.len() => {
                    block.remove(index);
                    for (offset, child) in children.into_iter().enumerate() {
                        block.insert(index + offset, child);
                    }
                    true
                }
                _ => false,
            };
            if !spliced {
                continue;
            }
            if let Some(name) = declared {
                if let Some(usage) = candidate.find_usage(&name) {
                    candidate.remove(&usage);
                }
            }
            if self.consider(candidate)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Drop one statement, subtree and all. Bindings cut by the removal
    /// are cut completely: a removed declaration takes its usage along,
    /// a removed usage takes its declaration.
    fn remove_a_statement(&mut self) -> Result<bool, EvalError> {
        for path in self.current.statement_paths() {
            let empty_block = self
                .current
                .get(&path)
                .and_then(Statement::body)
                .map_or(false, |body| body.is_empty());
            if empty_block {
                // empty blocks belong to the dedicated rule below
                continue;
            }
            let mut candidate = self.current.clone();
            remove_with_pairs(&mut candidate, &path);
            if self.consider(candidate)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Drop a block with no children, plus its paired usage if it
    /// declared a name. Gated like the other reductions: an empty
    /// `Deferred` still feeds its await a result, so it may not go.
    fn remove_an_empty_block(&mut self) -> Result<bool, EvalError> {
        for path in self.current.statement_paths() {
            let empty_block = self
                .current
                .get(&path)
                .and_then(Statement::body)
                .map_or(false, |body| body.is_empty());
            if !empty_block {
                continue;
            }
            let mut candidate = self.current.clone();
            remove_with_pairs(&mut candidate, &path);
            if self.consider(candidate)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// A try/catch whose sole child is a plain throw only ever prints
    /// the fixed caught-error line. That is noise, not a challenge, and
    /// goes regardless of the trace. Cancellation throws stay: they are
    /// not caught, they tear the surrounding task down.
    fn remove_a_degenerate_try_catch(&mut self) -> Result<bool, EvalError> {
        for path in self.current.statement_paths() {
            let degenerate = match self.current.get(&path) {
                Some(Statement::TryCatch { body }) => matches!(
                    body.as_slice(),
                    [Statement::ThrowError {
                        cancellation: false
                    }]
                ),
                _ => false,
            };
            if !degenerate {
                continue;
            }
            let mut candidate = self.current.clone();
            candidate.remove(&path);
            self.accept(candidate)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Back-to-back prints or delays collapse to the later one, and a
    /// print/delay alternation repeated twice loses its second half.
    fn collapse_adjacent_duplicates(&mut self) -> Result<bool, EvalError> {
        let found = match self.find_adjacent_collapse() {
            Some(found) => found,
            None => return Ok(false),
        };
        let mut candidate = self.current.clone();
        match found {
            Collapse::Pair { block, index } => {
                let mut path = block;
                path.push(index);
                candidate.remove(&path);
            }
            Collapse::Window { block, index } => {
                let mut path = block;
                path.push(index + 2);
                candidate.remove(&path);
                // the fourth statement slid into the vacated position
                candidate.remove(&path);
            }
        }
        self.accept(candidate)?;
        Ok(true)
    }

    fn find_adjacent_collapse(&self) -> Option<Collapse> {
        let mut blocks = vec![Vec::new()];
        blocks.extend(
            self.current
                .statement_paths()
                .into_iter()
                .filter(|path| self.current.get(path).map_or(false, Statement::is_block)),
        );
        for block in blocks {
            let body = match self.current.get(&block).and_then(Statement::body) {
                Some(body) => body,
                None => continue,
            };
            for index in 0..body.len() {
                if index + 1 < body.len() {
                    let pair = (is_print(&body[index]) && is_print(&body[index + 1]))
                        || (is_delay(&body[index]) && is_delay(&body[index + 1]));
                    if pair {
                        return Some(Collapse::Pair { block, index });
                    }
                }
                if index + 3 < body.len() && alternates(&body[index..index + 4]) {
                    return Some(Collapse::Window { block, index });
                }
            }
        }
        None
    }

    /// Two printed lines on the same instant are visually ambiguous.
    /// Remove a literal print carrying one of the two texts; when both
    /// are still in the tree the earlier-positioned one goes. Texts
    /// that no literal print carries (await output, the caught-error
    /// line) leave nothing to remove here, and the builder's distinct-
    /// timestamp check disposes of the tree instead.
    fn collapse_simultaneous_prints(&mut self) -> Result<bool, EvalError> {
        let (first, second) = match self.baseline.first_simultaneous_texts() {
            Some((first, second)) => (first.to_string(), second.to_string()),
            None => return Ok(false),
        };
        let target = match (
            find_literal_print(&self.current, &first),
            find_literal_print(&self.current, &second),
        ) {
            (Some(a), Some(b)) => {
                if a <= b {
                    a
                } else {
                    b
                }
            }
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return Ok(false),
        };
        let mut candidate = self.current.clone();
        if candidate.remove(&target).is_none() {
            return Ok(false);
        }
        self.accept(candidate)?;
        Ok(true)
    }
}

enum Collapse {
    Pair { block: Vec<usize>, index: usize },
    Window { block: Vec<usize>, index: usize },
}

fn is_print(statement: &Statement) -> bool {
    matches!(statement, Statement::Print { .. })
}

fn is_delay(statement: &Statement) -> bool {
    matches!(statement, Statement::Delay { .. })
}

fn alternates(window: &[Statement]) -> bool {
    let print_first = is_print(&window[0])
        && is_delay(&window[1])
        && is_print(&window[2])
        && is_delay(&window[3]);
    let delay_first = is_delay(&window[0])
        && is_print(&window[1])
        && is_delay(&window[2])
        && is_print(&window[3]);
    print_first || delay_first
}

/// Remove the subtree at `path` together with every declaration or
/// usage elsewhere that the removal leaves unpaired. Cascades: a usage
/// buried in the removed subtree takes its outside declaration along,
/// body and all.
fn remove_with_pairs(tree: &mut Statement, path: &[usize]) {
    let removed = match tree.remove(path) {
        Some(statement) => statement,
        None => return,
    };
    let mut declared = Vec::new();
    let mut used = Vec::new();
    collect_names(&removed, &mut declared, &mut used);
    for name in declared {
        if let Some(usage) = tree.find_usage(&name) {
            tree.remove(&usage);
        }
    }
    for name in used {
        if let Some(declaration) = tree.find_declaration(&name) {
            remove_with_pairs(tree, &declaration);
        }
    }
}

fn collect_names(statement: &Statement, declared: &mut Vec<String>, used: &mut Vec<String>) {
    if let Some(name) = statement.declared_name() {
        declared.push(name.to_string());
    }
    if let Some(name) = statement.used_name() {
        used.push(name.to_string());
    }
    if let Some(body) = statement.body() {
        for child in body {
            collect_names(child, declared, used);
        }
    }
}

fn find_literal_print(tree: &Statement, text: &str) -> Option<Vec<usize>> {
    tree.statement_paths().into_iter().find(|path| {
        matches!(tree.get(path), Some(Statement::Print { text: found }) if found == text)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{generate, ALL_KINDS};
    use crate::supply::Supply;

    #[test]
    fn test_degenerate_try_catch_reduces_to_an_empty_scope() {
        let tree = Statement::scope(vec![Statement::try_catch(vec![Statement::throw(false)])]);
        assert_eq!(simplify(&tree).unwrap(), Statement::scope(vec![]));
    }

    #[test]
    fn test_cancellation_throw_is_not_degenerate_noise() {
        let tree = Statement::scope(vec![
            Statement::print("A"),
            Statement::delay(1000),
            Statement::try_catch(vec![Statement::throw(true)]),
        ]);
        // the wrapper inlines away (cancellation passes through it
        // unchanged), but the throw itself must survive
        let expected = Statement::scope(vec![
            Statement::print("A"),
            Statement::delay(1000),
            Statement::throw(true),
        ]);
        assert_eq!(simplify(&tree).unwrap(), expected);
    }

    #[test]
    fn test_empty_task_is_removed() {
        let tree = Statement::scope(vec![
            Statement::print("A"),
            Statement::task(vec![]),
            Statement::delay(1000),
            Statement::print("B"),
        ]);
        let expected = Statement::scope(vec![
            Statement::print("A"),
            Statement::delay(1000),
            Statement::print("B"),
        ]);
        assert_eq!(simplify(&tree).unwrap(), expected);
    }

    #[test]
    fn test_removing_a_usage_takes_the_declaration_along() {
        let tree = Statement::scope(vec![
            Statement::print("A"),
            Statement::named_task("job1", vec![]),
            Statement::delay(1000),
            Statement::join("job1"),
            Statement::print("B"),
        ]);
        let simplified = simplify(&tree).unwrap();
        assert!(simplified.find_declaration("job1").is_none());
        assert!(simplified.find_usage("job1").is_none());
        let expected = Statement::scope(vec![
            Statement::print("A"),
            Statement::delay(1000),
            Statement::print("B"),
        ]);
        assert_eq!(simplified, expected);
    }

    #[test]
    fn test_adjacent_prints_keep_the_later_one() {
        let tree = Statement::scope(vec![
            Statement::print("A"),
            Statement::print("B"),
            Statement::delay(1000),
        ]);
        let expected = Statement::scope(vec![Statement::print("B"), Statement::delay(1000)]);
        assert_eq!(simplify(&tree).unwrap(), expected);
    }

    #[test]
    fn test_adjacent_delays_keep_the_later_one() {
        let tree = Statement::scope(vec![
            Statement::print("A"),
            Statement::delay(1000),
            Statement::delay(2000),
            Statement::print("B"),
        ]);
        let expected = Statement::scope(vec![
            Statement::print("A"),
            Statement::delay(2000),
            Statement::print("B"),
        ]);
        assert_eq!(simplify(&tree).unwrap(), expected);
    }

    #[test]
    fn test_repeated_alternation_loses_its_second_half() {
        let tree = Statement::scope(vec![
            Statement::print("A"),
            Statement::delay(1000),
            Statement::print("B"),
            Statement::delay(2000),
        ]);
        let expected = Statement::scope(vec![Statement::print("A"), Statement::delay(1000)]);
        assert_eq!(simplify(&tree).unwrap(), expected);
    }

    #[test]
    fn test_simultaneous_prints_collapse_to_one_line() {
        let tree = Statement::scope(vec![
            Statement::task(vec![Statement::print("A")]),
            Statement::print("B"),
        ]);
        assert_eq!(
            simplify(&tree).unwrap(),
            Statement::scope(vec![Statement::print("B")])
        );
    }

    #[test]
    fn test_empty_deferred_survives_because_its_await_needs_it() {
        let tree = Statement::scope(vec![
            Statement::deferred("value1", "A", vec![]),
            Statement::delay(1000),
            Statement::await_print("value1"),
        ]);
        let simplified = simplify(&tree).unwrap();
        assert_eq!(simplified, tree);
    }

    #[test]
    fn test_inlining_promotes_a_scope_body_when_nothing_changes() {
        let tree = Statement::scope(vec![
            Statement::scope(vec![Statement::print("A"), Statement::delay(1000)]),
            Statement::print("B"),
        ]);
        let expected = Statement::scope(vec![
            Statement::print("A"),
            Statement::delay(1000),
            Statement::print("B"),
        ]);
        assert_eq!(simplify(&tree).unwrap(), expected);
    }

    #[test]
    fn test_simplify_is_idempotent_on_generated_trees() {
        for seed in 0..25 {
            let mut supply = Supply::new(seed);
            let tree = generate(&mut supply, 11, &ALL_KINDS).unwrap();
            let once = simplify(&tree).unwrap();
            let twice = simplify(&once).unwrap();
            assert_eq!(once, twice, "seed {}", seed);
        }
    }

    #[test]
    fn test_simplified_trees_stay_well_formed() {
        for seed in 0..40 {
            let mut supply = Supply::new(seed);
            let tree = generate(&mut supply, 14, &ALL_KINDS).unwrap();
            let simplified = simplify(&tree).unwrap();
            assert!(
                simplified.check_well_formed().is_ok(),
                "seed {}: {:?}",
                seed,
                simplified
            );
        }
    }
}
