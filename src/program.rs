//! Program tree model - the closed statement grammar every stage shares
//!
//! A program is a tree of `Statement` values: six leaf variants and six
//! block variants owning ordered bodies. The tree is handled as an
//! immutable value; the generator and simplifier clone it and edit the
//! clone, so a discarded candidate leaves no mark on the original.

use serde::{Deserialize, Serialize};

/// One node of a generated program.
///
/// The variant set is closed on purpose: the generator, interpreter and
/// simplifier all match exhaustively, so adding a variant refuses to
/// compile until every stage says what to do with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statement {
    /// Sleep the running task for a number of virtual milliseconds.
    Delay { millis: u64 },
    /// Emit a literal line at the current virtual time.
    Print { text: String },
    /// Raise an ordinary error, or a cancellation when the flag is set.
    ThrowError { cancellation: bool },
    /// Wait for the named task to settle. Produces no output.
    Join { name: String },
    /// Request cooperative cancellation of the named task. Never blocks.
    Cancel { name: String },
    /// Wait for the named deferred value, then print it.
    AwaitPrint { name: String },
    /// Structured scope: runs its body and waits for every task it owns.
    Scope { body: Vec<Statement> },
    /// Fire-and-forget child task.
    Task { body: Vec<Statement> },
    /// Child task bound to a name so a later `Join`/`Cancel` can reach it.
    NamedTask { name: String, body: Vec<Statement> },
    /// Child task bound to a name that settles with a result string.
    Deferred {
        name: String,
        result: String,
        body: Vec<Statement>,
    },
    /// Runs its body; an ordinary error unwinding out of it is replaced
    /// by a fixed caught-error print. Cancellation passes through.
    TryCatch { body: Vec<Statement> },
    /// Structured scope that contains a child task's ordinary error
    /// instead of cancelling the siblings.
    Supervised { body: Vec<Statement> },
}

/// An insertion point: a block (addressed by path) and an index into its
/// body, `0..=len`. Every slot across the whole tree is one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub block: Vec<usize>,
    pub index: usize,
}

/// Why a tree failed the usage-binding check.
///
/// Any of these after generation or simplification is a defect in the
/// stage that produced the tree, not a runtime condition to recover from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedTree {
    /// The same name is declared by more than one block.
    DuplicateDeclaration(String),
    /// The same name is referenced by more than one usage statement.
    DuplicateUsage(String),
    /// A usage references a name no block declares.
    UnboundUsage(String),
    /// A declared name has no usage statement left.
    UnusedDeclaration(String),
    /// The usage does not sit after its declaration.
    UsageBeforeDeclaration(String),
}

impl std::fmt::Display for MalformedTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedTree::DuplicateDeclaration(name) => {
                write!(f, "name '{}' is declared more than once", name)
            }
            MalformedTree::DuplicateUsage(name) => {
                write!(f, "name '{}' is referenced more than once", name)
            }
            MalformedTree::UnboundUsage(name) => {
                write!(f, "usage of '{}' has no declaration", name)
            }
            MalformedTree::UnusedDeclaration(name) => {
                write!(f, "declaration of '{}' is never used", name)
            }
            MalformedTree::UsageBeforeDeclaration(name) => {
                write!(f, "usage of '{}' does not come after its declaration", name)
            }
        }
    }
}

impl std::error::Error for MalformedTree {}

impl Statement {
    pub fn delay(millis: u64) -> Self {
        Statement::Delay { millis }
    }

    pub fn print(text: &str) -> Self {
        Statement::Print {
            text: text.to_string(),
        }
    }

    pub fn throw(cancellation: bool) -> Self {
        Statement::ThrowError { cancellation }
    }

    pub fn join(name: &str) -> Self {
        Statement::Join {
            name: name.to_string(),
        }
    }

    pub fn cancel(name: &str) -> Self {
        Statement::Cancel {
            name: name.to_string(),
        }
    }

    pub fn await_print(name: &str) -> Self {
        Statement::AwaitPrint {
            name: name.to_string(),
        }
    }

    pub fn scope(body: Vec<Statement>) -> Self {
        Statement::Scope { body }
    }

    pub fn task(body: Vec<Statement>) -> Self {
        Statement::Task { body }
    }

    pub fn named_task(name: &str, body: Vec<Statement>) -> Self {
        Statement::NamedTask {
            name: name.to_string(),
            body,
        }
    }

    pub fn deferred(name: &str, result: &str, body: Vec<Statement>) -> Self {
        Statement::Deferred {
            name: name.to_string(),
            result: result.to_string(),
            body,
        }
    }

    pub fn try_catch(body: Vec<Statement>) -> Self {
        Statement::TryCatch { body }
    }

    pub fn supervised(body: Vec<Statement>) -> Self {
        Statement::Supervised { body }
    }

    /// The ordered children of a block, or `None` for a leaf.
    pub fn body(&self) -> Option<&[Statement]> {
        match self {
            Statement::Scope { body }
            | Statement::Task { body }
            | Statement::NamedTask { body, .. }
            | Statement::Deferred { body, .. }
            | Statement::TryCatch { body }
            | Statement::Supervised { body } => Some(body),
            _ => None,
        }
    }

    pub(crate) fn body_mut(&mut self) -> Option<&mut Vec<Statement>> {
        match self {
            Statement::Scope { body }
            | Statement::Task { body }
            | Statement::NamedTask { body, .. }
            | Statement::Deferred { body, .. }
            | Statement::TryCatch { body }
            | Statement::Supervised { body } => Some(body),
            _ => None,
        }
    }

    pub fn is_block(&self) -> bool {
        self.body().is_some()
    }

    /// The name this statement declares, for the two declaring blocks.
    pub fn declared_name(&self) -> Option<&str> {
        match self {
            Statement::NamedTask { name, .. } | Statement::Deferred { name, .. } => Some(name),
            _ => None,
        }
    }

    /// The name this statement references, for the three usage leaves.
    pub fn used_name(&self) -> Option<&str> {
        match self {
            Statement::Join { name } | Statement::Cancel { name } | Statement::AwaitPrint { name } => {
                Some(name)
            }
            _ => None,
        }
    }

    /// Budget units this single node accounts for: 1 for a leaf, 2 for a
    /// block (the statement itself plus the container it opens). A
    /// declaration's paired usage is a separate leaf and pays its own 1.
    pub fn cost(&self) -> usize {
        if self.is_block() {
            2
        } else {
            1
        }
    }

    /// Units of this node and everything beneath it.
    pub fn units(&self) -> usize {
        let own = self.cost();
        match self.body() {
            Some(body) => own + body.iter().map(Statement::units).sum::<usize>(),
            None => own,
        }
    }

    /// Units of the body alone. Called on the root scope this is the
    /// program's statement count: the outermost wrapper itself is free.
    pub fn body_units(&self) -> usize {
        match self.body() {
            Some(body) => body.iter().map(Statement::units).sum(),
            None => 0,
        }
    }

    /// Follow a path of child indices down from this node.
    pub fn get(&self, path: &[usize]) -> Option<&Statement> {
        match path.split_first() {
            None => Some(self),
            Some((&index, rest)) => self.body()?.get(index)?.get(rest),
        }
    }

    pub(crate) fn get_mut(&mut self, path: &[usize]) -> Option<&mut Statement> {
        match path.split_first() {
            None => Some(self),
            Some((&index, rest)) => self.body_mut()?.get_mut(index)?.get_mut(rest),
        }
    }

    /// Remove and return the statement at `path`. Fails on the root path
    /// and on paths that lead nowhere.
    pub(crate) fn remove(&mut self, path: &[usize]) -> Option<Statement> {
        let (&index, parent) = path.split_last()?;
        let block = self.get_mut(parent)?.body_mut()?;
        if index < block.len() {
            Some(block.remove(index))
        } else {
            None
        }
    }

    /// Insert `stmt` into the block at `slot.block`, position `slot.index`.
    pub(crate) fn insert(&mut self, slot: &Slot, stmt: Statement) -> bool {
        match self.get_mut(&slot.block).and_then(Statement::body_mut) {
            Some(block) if slot.index <= block.len() => {
                block.insert(slot.index, stmt);
                true
            }
            _ => false,
        }
    }

    /// Paths of every statement below this node, depth first, parents
    /// before their children. The node itself (path `[]`) is not listed.
    pub fn statement_paths(&self) -> Vec<Vec<usize>> {
        let mut paths = Vec::new();
        collect_statement_paths(self, &mut Vec::new(), &mut paths);
        paths
    }

    /// Every insertion slot in the tree: one per position in every block,
    /// including this node's own body. Uniform selection over the result
    /// weights blocks by position count, exactly as generation wants.
    pub fn slots(&self) -> Vec<Slot> {
        let mut slots = Vec::new();
        collect_slots(self, &mut Vec::new(), &mut slots);
        slots
    }

    /// Slots a paired usage may legally take for the declaration at
    /// `decl`: later positions of the declaring block, or any slot inside
    /// a later sibling's subtree. The declaration's own body never
    /// qualifies, nor does anything before or above it.
    pub fn slots_after(&self, decl: &[usize]) -> Vec<Slot> {
        let mut slots = Vec::new();
        let (&decl_index, parent) = match decl.split_last() {
            Some(split) => split,
            None => return slots,
        };
        let block = match self.get(parent).and_then(Statement::body) {
            Some(block) => block,
            None => return slots,
        };
        for index in decl_index + 1..=block.len() {
            slots.push(Slot {
                block: parent.to_vec(),
                index,
            });
        }
        for (offset, sibling) in block.iter().enumerate().skip(decl_index + 1) {
            let mut prefix = parent.to_vec();
            prefix.push(offset);
            collect_slots(sibling, &mut prefix, &mut slots);
        }
        slots
    }

    /// Path of the block declaring `name`, if any.
    pub fn find_declaration(&self, name: &str) -> Option<Vec<usize>> {
        self.statement_paths().into_iter().find(|path| {
            self.get(path)
                .and_then(Statement::declared_name)
                .map_or(false, |declared| declared == name)
        })
    }

    /// Path of the usage statement referencing `name`, if any.
    pub fn find_usage(&self, name: &str) -> Option<Vec<usize>> {
        self.statement_paths().into_iter().find(|path| {
            self.get(path)
                .and_then(Statement::used_name)
                .map_or(false, |used| used == name)
        })
    }

    /// Check the usage-binding invariant over the whole tree: declared
    /// and referenced name sets match exactly, neither side has a
    /// duplicate, and each usage sits after its declaration (later in
    /// the declaring block, or inside a later sibling's subtree).
    pub fn check_well_formed(&self) -> Result<(), MalformedTree> {
        let mut declarations: Vec<(String, Vec<usize>)> = Vec::new();
        let mut usages: Vec<(String, Vec<usize>)> = Vec::new();
        for path in self.statement_paths() {
            let statement = match self.get(&path) {
                Some(statement) => statement,
                None => continue,
            };
            if let Some(name) = statement.declared_name() {
                if declarations.iter().any(|(declared, _)| declared == name) {
                    return Err(MalformedTree::DuplicateDeclaration(name.to_string()));
                }
                declarations.push((name.to_string(), path.clone()));
            }
            if let Some(name) = statement.used_name() {
                if usages.iter().any(|(used, _)| used == name) {
                    return Err(MalformedTree::DuplicateUsage(name.to_string()));
                }
                usages.push((name.to_string(), path.clone()));
            }
        }
        for (name, _) in &usages {
            if !declarations.iter().any(|(declared, _)| declared == name) {
                return Err(MalformedTree::UnboundUsage(name.clone()));
            }
        }
        for (name, decl_path) in &declarations {
            let usage_path = match usages.iter().find(|(used, _)| used == name) {
                Some((_, path)) => path,
                None => return Err(MalformedTree::UnusedDeclaration(name.clone())),
            };
            if !usage_follows_declaration(decl_path, usage_path) {
                return Err(MalformedTree::UsageBeforeDeclaration(name.clone()));
            }
        }
        Ok(())
    }
}

/// A usage follows its declaration when both hang off the same block and
/// the usage's branch index there is strictly greater. Deeper nesting on
/// the usage side is fine; landing inside the declaration itself is not.
fn usage_follows_declaration(decl: &[usize], usage: &[usize]) -> bool {
    let (&decl_index, parent) = match decl.split_last() {
        Some(split) => split,
        None => return false,
    };
    usage.len() > parent.len()
        && usage[..parent.len()] == *parent
        && usage[parent.len()] > decl_index
}

fn collect_statement_paths(node: &Statement, prefix: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
    if let Some(body) = node.body() {
        for (index, child) in body.iter().enumerate() {
            prefix.push(index);
            out.push(prefix.clone());
            collect_statement_paths(child, prefix, out);
            prefix.pop();
        }
    }
}

fn collect_slots(node: &Statement, prefix: &mut Vec<usize>, out: &mut Vec<Slot>) {
    if let Some(body) = node.body() {
        for index in 0..=body.len() {
            out.push(Slot {
                block: prefix.clone(),
                index,
            });
        }
        for (index, child) in body.iter().enumerate() {
            prefix.push(index);
            collect_slots(child, prefix, out);
            prefix.pop();
        }
    }
}
