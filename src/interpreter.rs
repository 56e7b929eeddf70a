//! Virtual-clock interpreter - deterministic cooperative evaluation
//!
//! Evaluation runs a single-threaded simulation: numbered tasks execute
//! statements until they suspend, one global clock advances only when no
//! task is runnable, and among runnable tasks the lowest number always
//! goes first. Every interleaving is therefore a pure function of the
//! tree, which is what lets the simplifier use traces as an equivalence
//! oracle and lets a challenge ship its output as the answer key.
//!
//! Failure handling follows structured concurrency: a failing child
//! takes its owning scope down with it (cancelling the siblings), a
//! try/catch block catches ordinary errors but never cancellation, and a
//! supervised scope contains a child's error without giving up on the
//! rest. Cancellation requested through `Cancel` is quiet - the owner
//! absorbs it - while a thrown cancellation propagates like an error
//! that nothing can catch.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::program::Statement;

/// Terminal marker appended when the whole program settles normally.
pub const DONE_MARKER: &str = "(done)";
/// Terminal marker when an ordinary error escapes the root.
pub const ERROR_MARKER: &str = "(exception)";
/// Terminal marker when a cancellation escapes the root.
pub const CANCELLED_MARKER: &str = "(cancellation exception)";

/// Text printed by a try/catch block that caught an error.
pub const CAUGHT_TEXT: &str = "Got exception";

/// One observable event: a text that became visible at a virtual time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub at: u64,
    pub text: String,
}

/// The ordered output of one evaluation, terminal marker included.
/// Timestamps are non-decreasing; ties mean simultaneous output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Trace {
    pub events: Vec<TraceEvent>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// True when no two printed events share a timestamp. Finished
    /// challenges are required to pass this so every line has its own
    /// moment. The terminal marker is exempt: it lands at the instant
    /// the last activity finished and may share that timestamp.
    pub fn timestamps_distinct(&self) -> bool {
        self.printed()
            .windows(2)
            .all(|pair| pair[0].at != pair[1].at)
    }

    /// Texts of the first pair of printed events sharing a timestamp,
    /// if any. The terminal marker never takes part in a pair.
    pub fn first_simultaneous_texts(&self) -> Option<(&str, &str)> {
        self.printed()
            .windows(2)
            .find(|pair| pair[0].at == pair[1].at)
            .map(|pair| (pair[0].text.as_str(), pair[1].text.as_str()))
    }

    /// The events before the terminal marker.
    fn printed(&self) -> &[TraceEvent] {
        match self.events.split_last() {
            Some((last, rest))
                if last.text == DONE_MARKER
                    || last.text == ERROR_MARKER
                    || last.text == CANCELLED_MARKER =>
            {
                rest
            }
            _ => &self.events,
        }
    }
}

/// Defects surfaced by evaluation. A well-formed tree triggers none of
/// these; any occurrence points at the stage that produced the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// A usage referenced a name no running task was registered under.
    UnknownName(String),
    /// An await targeted a task that settled without a result value.
    NoResult(String),
    /// No task runnable, none sleeping, program not settled.
    Stuck { clock: u64 },
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::UnknownName(name) => {
                write!(f, "usage of '{}' references a task that was never spawned", name)
            }
            EvalError::NoResult(name) => {
                write!(f, "'{}' settled without a result to await", name)
            }
            EvalError::Stuck { clock } => {
                write!(f, "scheduler wedged at {} ms with no runnable task", clock)
            }
        }
    }
}

impl std::error::Error for EvalError {}

/// Evaluate a program tree to its canonical trace.
pub fn evaluate(tree: &Statement) -> Result<Trace, EvalError> {
    let mut machine = Machine::new(tree);
    let outcome = machine.run()?;
    let marker = match outcome {
        Settled::Done => DONE_MARKER,
        Settled::Failed(Failure::Error) => ERROR_MARKER,
        Settled::Failed(Failure::Cancelled) | Settled::Aborted => CANCELLED_MARKER,
    };
    machine.emit(marker);
    Ok(Trace {
        events: machine.trace,
    })
}

/// The two propagating failure flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    /// Ordinary error: catchable, contained by supervision.
    Error,
    /// Thrown cancellation: uncatchable, fails even a supervised scope.
    Cancelled,
}

/// What is currently travelling down a task's frame stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unwind {
    /// A failure looking for a handler or a scope to fail.
    Failed(Failure),
    /// Requested-cancellation teardown. Transparent to try/catch and
    /// quiet at the task bottom; a scope failure met on the way out
    /// replaces it, because the failure is the real completion cause.
    Teardown,
}

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Done,
    Failed(Failure),
    /// Requested cancellation ran its course. The owning scope treats
    /// this as a quiet settlement, which is what keeps `Cancel` a local
    /// synchronization tool rather than a program-wide abort.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Ready,
    Sleeping { until: u64 },
    WaitingTask { target: usize, awaits_result: bool },
    WaitingChildren,
    Settled(Settled),
}

/// One block body being executed. `scope` is `None` exactly for
/// try/catch frames, the only block kind that owns no child tasks.
#[derive(Debug)]
struct Frame {
    body: Vec<Statement>,
    ip: usize,
    scope: Option<usize>,
}

/// A structured scope instance: a task-body, scope or supervised frame.
/// Children are the tasks spawned while it was the innermost scope.
#[derive(Debug)]
struct ScopeInstance {
    owner_task: usize,
    supervised: bool,
    children: Vec<usize>,
    /// First failure delivered here; later ones are suppressed.
    failure: Option<Failure>,
}

#[derive(Debug)]
struct Task {
    owner: Option<usize>,
    result: Option<String>,
    frames: Vec<Frame>,
    state: TaskState,
    cancel_requested: bool,
    unwind: Option<Unwind>,
    /// Target of an await whose resumption is due at next burst start.
    pending_await: Option<usize>,
}

impl Task {
    fn is_settled(&self) -> bool {
        matches!(self.state, TaskState::Settled(_))
    }

    fn is_suspended(&self) -> bool {
        matches!(
            self.state,
            TaskState::Sleeping { .. } | TaskState::WaitingTask { .. } | TaskState::WaitingChildren
        )
    }
}

enum StepOutcome {
    Continue,
    Suspend,
}

struct Machine {
    clock: u64,
    tasks: Vec<Task>,
    scopes: Vec<ScopeInstance>,
    names: HashMap<String, usize>,
    trace: Vec<TraceEvent>,
}

impl Machine {
    fn new(tree: &Statement) -> Self {
        let mut machine = Machine {
            clock: 0,
            tasks: Vec::new(),
            scopes: Vec::new(),
            names: HashMap::new(),
            trace: Vec::new(),
        };
        machine.spawn(None, None, vec![tree.clone()]);
        machine
    }

    /// Run until the root task settles, then report how it settled.
    fn run(&mut self) -> Result<Settled, EvalError> {
        loop {
            if let Some(tid) = self.next_runnable() {
                self.run_burst(tid)?;
                continue;
            }
            if let TaskState::Settled(outcome) = self.tasks[0].state {
                return Ok(outcome);
            }
            let wake = self
                .tasks
                .iter()
                .filter_map(|task| match task.state {
                    TaskState::Sleeping { until } => Some(until),
                    _ => None,
                })
                .min();
            match wake {
                Some(until) => {
                    debug!("clock {} -> {}", self.clock, until);
                    self.clock = until;
                    for task in &mut self.tasks {
                        if task.state == (TaskState::Sleeping { until }) {
                            task.state = TaskState::Ready;
                        }
                    }
                }
                None => return Err(EvalError::Stuck { clock: self.clock }),
            }
        }
    }

    fn next_runnable(&self) -> Option<usize> {
        self.tasks
            .iter()
            .position(|task| task.state == TaskState::Ready)
    }

    fn emit(&mut self, text: &str) {
        self.trace.push(TraceEvent {
            at: self.clock,
            text: text.to_string(),
        });
    }

    /// Execute one task until it suspends or settles. A resumption first
    /// delivers a completed await, if one is due; otherwise a pending
    /// cancellation or scope failure is observed here, at the suspension
    /// point the task is resuming from.
    fn run_burst(&mut self, tid: usize) -> Result<(), EvalError> {
        if self.tasks[tid].unwind.is_none() {
            if let Some(target) = self.tasks[tid].pending_await.take() {
                self.finish_await(tid, target)?;
            } else if self.should_abort(tid) {
                self.tasks[tid].unwind = Some(Unwind::Teardown);
            }
        }
        loop {
            match self.step(tid)? {
                StepOutcome::Continue => continue,
                StepOutcome::Suspend => return Ok(()),
            }
        }
    }

    /// A task must stop running when it was asked to cancel or when any
    /// scope on its stack has failed. Checked only at suspension points:
    /// both conditions arise while the task itself is not running.
    fn should_abort(&self, tid: usize) -> bool {
        let task = &self.tasks[tid];
        task.cancel_requested
            || task
                .frames
                .iter()
                .filter_map(|frame| frame.scope)
                .any(|scope| self.scopes[scope].failure.is_some())
    }

    fn step(&mut self, tid: usize) -> Result<StepOutcome, EvalError> {
        if self.tasks[tid].unwind.is_some() {
            return self.unwind_step(tid);
        }
        let (ip, len) = match self.tasks[tid].frames.last() {
            Some(frame) => (frame.ip, frame.body.len()),
            None => return Err(EvalError::Stuck { clock: self.clock }),
        };
        if ip >= len {
            return self.leave_frame(tid);
        }
        let statement = {
            let frame = match self.tasks[tid].frames.last_mut() {
                Some(frame) => frame,
                None => return Err(EvalError::Stuck { clock: self.clock }),
            };
            frame.ip += 1;
            frame.body[ip].clone()
        };
        self.execute(tid, statement)
    }

    fn execute(&mut self, tid: usize, statement: Statement) -> Result<StepOutcome, EvalError> {
        match statement {
            Statement::Print { text } => {
                self.trace.push(TraceEvent {
                    at: self.clock,
                    text,
                });
                Ok(StepOutcome::Continue)
            }
            Statement::Delay { millis } => {
                if self.should_abort(tid) {
                    self.tasks[tid].unwind = Some(Unwind::Teardown);
                    return Ok(StepOutcome::Continue);
                }
                self.tasks[tid].state = TaskState::Sleeping {
                    until: self.clock + millis,
                };
                Ok(StepOutcome::Suspend)
            }
            Statement::ThrowError { cancellation } => {
                let failure = if cancellation {
                    Failure::Cancelled
                } else {
                    Failure::Error
                };
                self.tasks[tid].unwind = Some(Unwind::Failed(failure));
                Ok(StepOutcome::Continue)
            }
            Statement::Join { name } => {
                if self.should_abort(tid) {
                    self.tasks[tid].unwind = Some(Unwind::Teardown);
                    return Ok(StepOutcome::Continue);
                }
                let target = self.resolve(&name)?;
                if self.tasks[target].is_settled() {
                    // structured propagation already routed any failure
                    return Ok(StepOutcome::Continue);
                }
                self.tasks[tid].state = TaskState::WaitingTask {
                    target,
                    awaits_result: false,
                };
                Ok(StepOutcome::Suspend)
            }
            Statement::AwaitPrint { name } => {
                if self.should_abort(tid) {
                    self.tasks[tid].unwind = Some(Unwind::Teardown);
                    return Ok(StepOutcome::Continue);
                }
                let target = self.resolve(&name)?;
                if self.tasks[target].is_settled() {
                    self.finish_await(tid, target)?;
                    return Ok(StepOutcome::Continue);
                }
                self.tasks[tid].state = TaskState::WaitingTask {
                    target,
                    awaits_result: true,
                };
                Ok(StepOutcome::Suspend)
            }
            Statement::Cancel { name } => {
                let target = self.resolve(&name)?;
                self.cancel_task(target);
                Ok(StepOutcome::Continue)
            }
            Statement::Scope { body } => {
                self.push_scope_frame(tid, body, false);
                Ok(StepOutcome::Continue)
            }
            Statement::Supervised { body } => {
                self.push_scope_frame(tid, body, true);
                Ok(StepOutcome::Continue)
            }
            Statement::TryCatch { body } => {
                self.tasks[tid].frames.push(Frame {
                    body,
                    ip: 0,
                    scope: None,
                });
                Ok(StepOutcome::Continue)
            }
            Statement::Task { body } => {
                self.spawn(Some(tid), None, body);
                Ok(StepOutcome::Continue)
            }
            Statement::NamedTask { name, body } => {
                let child = self.spawn(Some(tid), None, body);
                self.names.insert(name, child);
                Ok(StepOutcome::Continue)
            }
            Statement::Deferred { name, result, body } => {
                let child = self.spawn(Some(tid), Some(result), body);
                self.names.insert(name, child);
                Ok(StepOutcome::Continue)
            }
        }
    }

    /// Pop one frame of an unwinding task. Try/catch converts an error
    /// into the fixed caught print; scope frames cancel and drain their
    /// children, then hand on the scope's first recorded failure.
    fn unwind_step(&mut self, tid: usize) -> Result<StepOutcome, EvalError> {
        let scope = match self.tasks[tid].frames.last() {
            Some(frame) => frame.scope,
            None => return Err(EvalError::Stuck { clock: self.clock }),
        };
        let scope = match scope {
            None => {
                // try/catch frame
                self.tasks[tid].frames.pop();
                if self.tasks[tid].unwind == Some(Unwind::Failed(Failure::Error)) {
                    self.tasks[tid].unwind = None;
                    self.emit(CAUGHT_TEXT);
                }
                return Ok(StepOutcome::Continue);
            }
            Some(scope) => scope,
        };
        // the task's own failure is the scope's failure, if it got in first
        if let Some(Unwind::Failed(failure)) = self.tasks[tid].unwind {
            if self.scopes[scope].failure.is_none() {
                self.scopes[scope].failure = Some(failure);
            }
        }
        let unsettled = self.unsettled_children(scope);
        if !unsettled.is_empty() {
            for child in unsettled {
                self.cancel_task(child);
            }
            self.tasks[tid].state = TaskState::WaitingChildren;
            return Ok(StepOutcome::Suspend);
        }
        self.finish_scope_frame(tid, scope)
    }

    /// Normal arrival at the end of the current frame's body.
    fn leave_frame(&mut self, tid: usize) -> Result<StepOutcome, EvalError> {
        let scope = match self.tasks[tid].frames.last() {
            Some(frame) => frame.scope,
            None => return Err(EvalError::Stuck { clock: self.clock }),
        };
        let scope = match scope {
            None => {
                self.tasks[tid].frames.pop();
                return Ok(StepOutcome::Continue);
            }
            Some(scope) => scope,
        };
        // the implicit wait for children is a suspension point
        if self.should_abort(tid) {
            self.tasks[tid].unwind = Some(Unwind::Teardown);
            return Ok(StepOutcome::Continue);
        }
        if !self.unsettled_children(scope).is_empty() {
            self.tasks[tid].state = TaskState::WaitingChildren;
            return Ok(StepOutcome::Suspend);
        }
        self.finish_scope_frame(tid, scope)
    }

    /// Children all settled: leave the scope. A recorded failure
    /// replaces whatever was unwinding and re-propagates below the
    /// frame; with no frame left the task itself settles.
    fn finish_scope_frame(&mut self, tid: usize, scope: usize) -> Result<StepOutcome, EvalError> {
        self.tasks[tid].frames.pop();
        if let Some(failure) = self.scopes[scope].failure.take() {
            self.tasks[tid].unwind = Some(Unwind::Failed(failure));
        }
        if !self.tasks[tid].frames.is_empty() {
            return Ok(StepOutcome::Continue);
        }
        let outcome = match self.tasks[tid].unwind.take() {
            None => Settled::Done,
            Some(Unwind::Failed(failure)) => Settled::Failed(failure),
            Some(Unwind::Teardown) => Settled::Aborted,
        };
        self.settle(tid, outcome);
        Ok(StepOutcome::Suspend)
    }

    /// Deliver a settled await at the awaiting task: print the result,
    /// or re-raise the deferred's failure at the await site. A deferred
    /// torn down by a requested cancellation re-raises as cancellation.
    fn finish_await(&mut self, tid: usize, target: usize) -> Result<(), EvalError> {
        let outcome = match self.tasks[target].state {
            TaskState::Settled(outcome) => outcome,
            _ => return Err(EvalError::Stuck { clock: self.clock }),
        };
        match outcome {
            Settled::Done => {
                let text = match self.tasks[target].result.clone() {
                    Some(text) => text,
                    None => return Err(EvalError::NoResult(self.name_of(target))),
                };
                self.trace.push(TraceEvent {
                    at: self.clock,
                    text,
                });
            }
            Settled::Failed(failure) => {
                self.tasks[tid].unwind = Some(Unwind::Failed(failure));
            }
            Settled::Aborted => {
                self.tasks[tid].unwind = Some(Unwind::Failed(Failure::Cancelled));
            }
        }
        Ok(())
    }

    /// Spawn a task owned by the spawner's innermost scope frame; the
    /// root task is the one spawn with no parent. Tasks are numbered in
    /// spawn order and the scheduler always favours lower numbers, so
    /// trace ties resolve to construction order.
    fn spawn(&mut self, parent: Option<usize>, result: Option<String>, body: Vec<Statement>) -> usize {
        // every task's bottom frame carries a scope, so a parented spawn
        // always finds an owner
        let owner = parent.and_then(|parent_tid| {
            self.tasks[parent_tid]
                .frames
                .iter()
                .rev()
                .find_map(|frame| frame.scope)
        });
        let tid = self.tasks.len();
        let scope = self.new_scope(tid, false);
        self.tasks.push(Task {
            owner,
            result,
            frames: vec![Frame {
                body,
                ip: 0,
                scope: Some(scope),
            }],
            state: TaskState::Ready,
            cancel_requested: false,
            unwind: None,
            pending_await: None,
        });
        if let Some(owner) = owner {
            self.scopes[owner].children.push(tid);
        }
        debug!("spawn task {} under scope {:?}", tid, owner);
        tid
    }

    fn push_scope_frame(&mut self, tid: usize, body: Vec<Statement>, supervised: bool) {
        let scope = self.new_scope(tid, supervised);
        self.tasks[tid].frames.push(Frame {
            body,
            ip: 0,
            scope: Some(scope),
        });
    }

    fn new_scope(&mut self, owner_task: usize, supervised: bool) -> usize {
        self.scopes.push(ScopeInstance {
            owner_task,
            supervised,
            children: Vec::new(),
            failure: None,
        });
        self.scopes.len() - 1
    }

    fn unsettled_children(&self, scope: usize) -> Vec<usize> {
        self.scopes[scope]
            .children
            .iter()
            .copied()
            .filter(|&child| !self.tasks[child].is_settled())
            .collect()
    }

    fn resolve(&self, name: &str) -> Result<usize, EvalError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| EvalError::UnknownName(name.to_string()))
    }

    fn name_of(&self, tid: usize) -> String {
        self.names
            .iter()
            .find(|(_, &candidate)| candidate == tid)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| format!("task {}", tid))
    }

    /// Record how a task ended and tell everyone who cares: tasks
    /// waiting on it resume, and its owning scope applies the failure
    /// policy. Quiet settlements stay quiet.
    fn settle(&mut self, tid: usize, outcome: Settled) {
        debug!("task {} settled {:?} at {}", tid, outcome, self.clock);
        self.tasks[tid].state = TaskState::Settled(outcome);
        for waiter in 0..self.tasks.len() {
            if let TaskState::WaitingTask {
                target,
                awaits_result,
            } = self.tasks[waiter].state
            {
                if target == tid {
                    self.tasks[waiter].state = TaskState::Ready;
                    if awaits_result {
                        self.tasks[waiter].pending_await = Some(tid);
                    }
                }
            }
        }
        let owner = match self.tasks[tid].owner {
            Some(owner) => owner,
            None => return,
        };
        match outcome {
            Settled::Done | Settled::Aborted => {}
            Settled::Failed(Failure::Error) if self.scopes[owner].supervised => {
                debug!("scope {} contained task {}'s error", owner, tid);
            }
            Settled::Failed(failure) => self.fail_scope(owner, failure),
        }
        let owner_task = self.scopes[owner].owner_task;
        if self.tasks[owner_task].state == TaskState::WaitingChildren {
            self.tasks[owner_task].state = TaskState::Ready;
        }
    }

    /// First failure wins: record it, cancel the scope's other children,
    /// and wake the owner so its body aborts at the resume point.
    fn fail_scope(&mut self, scope: usize, failure: Failure) {
        if self.scopes[scope].failure.is_some() {
            debug!("scope {} suppressed a later {:?}", scope, failure);
            return;
        }
        self.scopes[scope].failure = Some(failure);
        for child in self.unsettled_children(scope) {
            self.cancel_task(child);
        }
        let owner_task = self.scopes[scope].owner_task;
        if self.tasks[owner_task].is_suspended() {
            self.tasks[owner_task].state = TaskState::Ready;
        }
    }

    /// Request cooperative cancellation: flag the task and wake it if it
    /// is suspended, so a sleeper terminates now instead of at its
    /// deadline. A task that never suspends again finishes untouched.
    fn cancel_task(&mut self, tid: usize) {
        if self.tasks[tid].is_settled() {
            return;
        }
        if !self.tasks[tid].cancel_requested {
            debug!("cancel requested for task {}", tid);
            self.tasks[tid].cancel_requested = true;
        }
        if self.tasks[tid].is_suspended() {
            self.tasks[tid].state = TaskState::Ready;
        }
    }
}
