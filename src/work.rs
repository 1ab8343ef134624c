//! The build executor: owns the ready queue, tracks per-command readiness,
//! dispatches onto the runner, and propagates failures.
//!
//! All graph bookkeeping happens on the orchestrating thread; runner threads
//! only ever see the owned task they were handed. That makes every
//! dependency edge a happens-before edge for free: a dependent's
//! outdatedness check always observes its dependency's signature refresh.

use crate::command::{CommandKind, MaybeUnused};
use crate::context::ExecContext;
use crate::densemap::DenseMap;
use crate::error::{FailReason, SkipReason};
use crate::graph::{CommandId, Plan, PoolId};
use crate::outdated;
use crate::process::{ChildSpec, Termination};
use crate::progress::Progress;
use crate::store::FileStore;
use crate::task::{FinishedTask, Runner, Task};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    /// Dependencies not yet satisfied.
    Waiting,
    /// In the ready queue.
    Ready,
    /// Ready, but waiting for a resource pool slot.
    Parked,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

const STATE_COUNT: usize = 7;

fn state_index(state: BuildState) -> usize {
    match state {
        BuildState::Waiting => 0,
        BuildState::Ready => 1,
        BuildState::Parked => 2,
        BuildState::Running => 3,
        BuildState::Succeeded => 4,
        BuildState::Failed => 5,
        BuildState::Skipped => 6,
    }
}

fn is_terminal(state: BuildState) -> bool {
    matches!(
        state,
        BuildState::Succeeded | BuildState::Failed | BuildState::Skipped
    )
}

/// Counts of commands in each state, for progress display.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateCounts([usize; STATE_COUNT]);

impl StateCounts {
    pub fn get(&self, state: BuildState) -> usize {
        self.0[state_index(state)]
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }

    fn seed(&mut self, state: BuildState, n: usize) {
        self.0[state_index(state)] += n;
    }

    fn transfer(&mut self, from: BuildState, to: BuildState) {
        self.0[state_index(from)] -= 1;
        self.0[state_index(to)] += 1;
    }
}

pub struct Options {
    pub parallelism: usize,
    /// Keep dispatching commands outside a failure's transitive dependent
    /// set instead of draining.
    pub keep_going: bool,
    /// External cancellation, polled at scheduler boundaries. Running
    /// children are not killed; the build drains.
    pub cancel: Option<Arc<AtomicBool>>,
    /// Per-command deadlines; a child past its deadline is killed.
    pub timeouts: HashMap<CommandId, Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            parallelism: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1),
            keep_going: false,
            cancel: None,
            timeouts: HashMap::new(),
        }
    }
}

impl Options {
    /// Options seeded from the context's concurrency hint, so an embedder
    /// that pins `ExecContext::parallelism` gets that worker count.
    pub fn from_context(ctx: &ExecContext) -> Self {
        Options {
            parallelism: ctx.parallelism,
            ..Options::default()
        }
    }
}

pub struct BuildResult {
    pub succeeded: Vec<CommandId>,
    pub failed: Vec<(CommandId, FailReason)>,
    pub skipped: Vec<(CommandId, SkipReason)>,
    pub wall_time: Duration,
}

impl BuildResult {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn skipped_as(&self, reason: SkipReason) -> usize {
        self.skipped.iter().filter(|(_, r)| *r == reason).count()
    }
}

/// Priority key in the ready queue and the pool parking lots: strict-order
/// rank first, fingerprint as the deterministic tie-break.
type RankKey = ((i32, u64), CommandId);

pub struct Work<'a> {
    plan: &'a mut Plan,
    store: &'a FileStore,
    progress: &'a mut dyn Progress,
    options: Options,

    states: DenseMap<CommandId, BuildState>,
    counts: StateCounts,
    in_degree: DenseMap<CommandId, usize>,
    ready: BinaryHeap<Reverse<RankKey>>,
    parked: HashMap<PoolId, BinaryHeap<Reverse<RankKey>>>,
    /// Non-terminal command count per strict-order rank; a rank may start
    /// only once every lower rank hits zero.
    rank_outstanding: BTreeMap<i32, usize>,
    runner: Runner,
    draining: bool,

    succeeded: Vec<CommandId>,
    failed: Vec<(CommandId, FailReason)>,
    skipped: Vec<(CommandId, SkipReason)>,
}

impl<'a> Work<'a> {
    pub fn new(
        plan: &'a mut Plan,
        store: &'a FileStore,
        progress: &'a mut dyn Progress,
        options: Options,
    ) -> Self {
        let bound = plan.graph.command_bound();
        let mut in_degree = DenseMap::new_sized(bound, 0usize);
        for &id in plan.wanted() {
            *in_degree.get_mut(id) = plan.in_degree(id);
        }
        let mut counts = StateCounts::default();
        counts.seed(BuildState::Waiting, plan.wanted().len());
        let rank_outstanding = plan.ranks().clone();
        let runner = Runner::new(options.parallelism);
        Work {
            plan,
            store,
            progress,
            options,
            states: DenseMap::new_sized(bound, BuildState::Waiting),
            counts,
            in_degree,
            ready: BinaryHeap::new(),
            parked: HashMap::new(),
            rank_outstanding,
            runner,
            draining: false,
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn run(mut self) -> BuildResult {
        let build_start = Instant::now();

        let seeds: Vec<CommandId> = self
            .plan
            .wanted()
            .iter()
            .copied()
            .filter(|&id| *self.in_degree.get(id) == 0)
            .collect();
        for id in seeds {
            self.make_ready(id);
        }

        loop {
            if self.cancelled() {
                self.draining = true;
            }

            while !self.draining && self.runner.can_start_more() {
                let Some(id) = self.pop_eligible() else { break };
                if !self.claim_pool(id) {
                    continue;
                }
                match outdated::check(self.plan.command(id), self.store) {
                    Ok(verdict) if !verdict.must_run() => {
                        self.release_pool(id);
                        self.finish_skipped(id, SkipReason::UpToDate);
                    }
                    Ok(_) => self.start(id),
                    Err(err) => {
                        self.release_pool(id);
                        self.finish_failed(id, err.into(), &[]);
                    }
                }
            }

            if self.runner.is_running() {
                let fin = self.runner.wait();
                self.handle_finished(fin);
                continue;
            }
            break;
        }

        // Whatever never reached a terminal state was drained.
        let leftovers: Vec<CommandId> = self
            .plan
            .wanted()
            .iter()
            .copied()
            .filter(|&id| !is_terminal(*self.states.get(id)))
            .collect();
        for id in leftovers {
            self.set_state(id, BuildState::Skipped);
            self.progress
                .task_skipped(self.plan.command(id), SkipReason::Drained);
            self.skipped.push((id, SkipReason::Drained));
        }

        BuildResult {
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            wall_time: build_start.elapsed(),
        }
    }

    fn cancelled(&self) -> bool {
        self.options
            .cancel
            .as_ref()
            .map_or(false, |c| c.load(Ordering::Relaxed))
    }

    fn set_state(&mut self, id: CommandId, to: BuildState) {
        let state = self.states.get_mut(id);
        let from = *state;
        *state = to;
        self.counts.transfer(from, to);
        self.progress.update(&self.counts);
    }

    fn make_ready(&mut self, id: CommandId) {
        self.set_state(id, BuildState::Ready);
        let rank = self.plan.command(id).ordering_rank();
        self.ready.push(Reverse((rank, id)));
    }

    /// The lowest rank that still has non-terminal commands; nothing of a
    /// higher rank may start.
    fn open_rank(&self) -> Option<i32> {
        self.rank_outstanding
            .iter()
            .find(|&(_, &n)| n > 0)
            .map(|(&rank, _)| rank)
    }

    fn pop_eligible(&mut self) -> Option<CommandId> {
        let open_rank = self.open_rank()?;
        let &Reverse(((rank, _), _)) = self.ready.peek()?;
        if rank > open_rank {
            return None;
        }
        self.ready.pop().map(|Reverse((_, id))| id)
    }

    /// Takes the command's pool slot, or parks it to wait for one. Parked
    /// commands never occupy a runner slot.
    fn claim_pool(&mut self, id: CommandId) -> bool {
        let Some(pool_id) = self.plan.command(id).pool else {
            return true;
        };
        if self.plan.graph.pool(pool_id).try_acquire() {
            return true;
        }
        let rank = self.plan.command(id).ordering_rank();
        self.set_state(id, BuildState::Parked);
        self.parked.entry(pool_id).or_default().push(Reverse((rank, id)));
        false
    }

    fn release_pool(&mut self, id: CommandId) {
        let Some(pool_id) = self.plan.command(id).pool else {
            return;
        };
        self.plan.graph.pool(pool_id).release();
        // Hand the freed slot's chance to the best parked command.
        if let Some(queue) = self.parked.get_mut(&pool_id) {
            if let Some(Reverse((_, next))) = queue.pop() {
                self.make_ready(next);
            }
        }
    }

    fn start(&mut self, id: CommandId) {
        let timeout = self.options.timeouts.get(&id).copied();
        let cmd = self.plan.graph.command_mut(id);
        if cmd.remove_outputs_before_execution {
            for out in &cmd.outputs {
                let _ = std::fs::remove_file(out);
            }
        }
        let task = match cmd.kind {
            CommandKind::CopyFile => Task::Copy {
                from: cmd.inputs[0].clone(),
                to: cmd.outputs[0].clone(),
            },
            _ => Task::Child(ChildSpec {
                program: cmd.resolved_program().to_path_buf(),
                args: cmd.effective_args(),
                env: cmd.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                cwd: cmd.cwd.clone(),
                stdin: cmd.redirects.stdin.clone(),
                stdout: cmd.redirects.stdout.clone(),
                stderr: cmd.redirects.stderr.clone(),
                timeout,
            }),
        };
        self.set_state(id, BuildState::Running);
        self.progress.task_started(self.plan.command(id));
        self.runner.start(id, task);
    }

    fn handle_finished(&mut self, fin: FinishedTask) {
        let id = fin.id;
        self.release_pool(id);
        {
            let cmd = self.plan.graph.command_mut(id);
            cmd.state.executed = true;
            cmd.state.t_begin = Some(fin.span.0);
            cmd.state.t_end = Some(fin.span.1);
        }
        match fin.result {
            Ok(outcome) => {
                {
                    let cmd = self.plan.graph.command_mut(id);
                    cmd.state.exit_code = outcome.exit_code;
                    cmd.state.pid = outcome.pid;
                }
                match outcome.termination {
                    Termination::Success => self.finish_success(id, outcome.stdout),
                    Termination::Exit(code) => {
                        self.finish_failed(id, FailReason::NonZeroExit(code), &outcome.stderr)
                    }
                    Termination::Signal(sig) => {
                        self.finish_failed(id, FailReason::Signal(sig), &outcome.stderr)
                    }
                    Termination::Timeout => {
                        self.finish_failed(id, FailReason::Timeout, &outcome.stderr)
                    }
                }
            }
            Err(reason) => self.finish_failed(id, reason, &[]),
        }
    }

    fn finish_success(&mut self, id: CommandId, stdout: Vec<u8>) {
        // Capture commands route their collected stdout into the output.
        let capture_target = {
            let cmd = self.plan.command(id);
            (cmd.kind == CommandKind::Capture).then(|| cmd.outputs[0].clone())
        };
        if let Some(target) = &capture_target {
            if let Err(err) = std::fs::write(target, &stdout) {
                self.finish_failed(id, err.into(), &[]);
                return;
            }
        }

        // A zero exit does not excuse missing declared outputs.
        let outputs = self.plan.command(id).outputs.clone();
        for out in &outputs {
            match self.store.refresh(out) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    self.finish_failed(id, FailReason::OutputMissing(out.clone()), &[]);
                    return;
                }
                Err(err) => {
                    self.finish_failed(id, err.into(), &[]);
                    return;
                }
            }
        }

        {
            let cmd = self.plan.command(id);
            if let Some(primary) = cmd.primary_output_key() {
                self.store.set_fingerprint(&primary, cmd.fingerprint());
            }
            cmd.clean();
        }

        let console_stdout = if capture_target.is_some() { &[][..] } else { &stdout[..] };
        self.progress
            .task_finished(self.plan.command(id), console_stdout);
        self.set_state(id, BuildState::Succeeded);
        self.barrier_retire(id);
        self.succeeded.push(id);
        self.notify_dependents(id);
    }

    fn finish_failed(&mut self, id: CommandId, reason: FailReason, stderr: &[u8]) {
        self.progress.failed(self.plan.command(id), &reason, stderr);
        self.set_state(id, BuildState::Failed);
        self.barrier_retire(id);
        self.failed.push((id, reason));
        if !self.options.keep_going {
            self.draining = true;
        }
        self.block_dependents(id);
    }

    fn finish_skipped(&mut self, id: CommandId, reason: SkipReason) {
        self.set_state(id, BuildState::Skipped);
        self.barrier_retire(id);
        self.progress.task_skipped(self.plan.command(id), reason);
        self.skipped.push((id, reason));
        if reason == SkipReason::UpToDate {
            self.notify_dependents(id);
        }
    }

    fn barrier_retire(&mut self, id: CommandId) {
        let rank = self.plan.command(id).strict_order;
        if let Some(n) = self.rank_outstanding.get_mut(&rank) {
            *n = n.saturating_sub(1);
        }
    }

    fn notify_dependents(&mut self, id: CommandId) {
        for d in self.plan.graph.dependents(id).to_vec() {
            self.dep_satisfied(d);
        }
    }

    fn dep_satisfied(&mut self, id: CommandId) {
        if *self.states.get(id) != BuildState::Waiting {
            return;
        }
        let degree = self.in_degree.get_mut(id);
        *degree -= 1;
        if *degree == 0 {
            self.make_ready(id);
        }
    }

    /// Transitively resolves the dependents of a command whose outputs will
    /// never appear, honoring each upstream's maybe_unused declaration.
    fn block_dependents(&mut self, source: CommandId) {
        let mut work = vec![source];
        while let Some(up) = work.pop() {
            let policy = self.plan.command(up).maybe_unused;
            for d in self.plan.graph.dependents(up).to_vec() {
                if *self.states.get(d) != BuildState::Waiting {
                    continue;
                }
                let runnable = match policy {
                    MaybeUnused::Always => true,
                    MaybeUnused::IfInputsPresent => {
                        self.plan.command(d).inputs.iter().all(|p| p.exists())
                    }
                    MaybeUnused::No => false,
                };
                if runnable {
                    self.dep_satisfied(d);
                } else {
                    self.finish_skipped(d, SkipReason::UpstreamFailed);
                    work.push(d);
                }
            }
        }
    }
}
