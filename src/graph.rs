//! The command arena and plan construction.
//!
//! Commands are owned flat in an arena and refer to each other only by id,
//! with forward (dependency) and reverse (dependent) adjacency kept side by
//! side. A Plan is the frozen, validated, prepared form handed to the
//! executor.

use crate::command::{Command, CommandKind};
use crate::context::ExecContext;
use crate::densemap::{declare_id, DenseMap};
use crate::error::{PlanError, PrepareError};
use crate::pool::{Capacity, ResourcePool};
use crate::store::FileStore;
use std::collections::{BTreeMap, HashMap};

declare_id!(CommandId);
declare_id!(PoolId);

pub struct Graph {
    commands: DenseMap<CommandId, Command>,
    dependents: DenseMap<CommandId, Vec<CommandId>>,
    pools: DenseMap<PoolId, ResourcePool>,
}

impl Graph {
    pub fn command(&self, id: CommandId) -> &Command {
        self.commands.get(id)
    }

    pub fn command_mut(&mut self, id: CommandId) -> &mut Command {
        self.commands.get_mut(id)
    }

    pub fn dependents(&self, id: CommandId) -> &[CommandId] {
        self.dependents.get(id)
    }

    pub fn pool(&self, id: PoolId) -> &ResourcePool {
        self.pools.get(id)
    }

    /// One past the highest command id; sizes executor-side tables.
    pub(crate) fn command_bound(&self) -> CommandId {
        self.commands.next_id()
    }
}

/// The frozen command graph: every reachable command prepared, outputs
/// proven unique, dependencies proven acyclic.
pub struct Plan {
    pub graph: Graph,
    /// Reachable commands in dependency-first order.
    wanted: Vec<CommandId>,
    in_degree: DenseMap<CommandId, usize>,
    /// Count of wanted commands per strict-order rank.
    ranks: BTreeMap<i32, usize>,
}

impl Plan {
    pub fn command(&self, id: CommandId) -> &Command {
        self.graph.command(id)
    }

    pub fn wanted(&self) -> &[CommandId] {
        &self.wanted
    }

    pub fn len(&self) -> usize {
        self.wanted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wanted.is_empty()
    }

    pub(crate) fn in_degree(&self, id: CommandId) -> usize {
        *self.in_degree.get(id)
    }

    pub(crate) fn ranks(&self) -> &BTreeMap<i32, usize> {
        &self.ranks
    }
}

#[derive(Default)]
pub struct PlanBuilder {
    commands: DenseMap<CommandId, Command>,
    pools: DenseMap<PoolId, ResourcePool>,
    roots: Vec<CommandId>,
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

impl PlanBuilder {
    pub fn new() -> Self {
        PlanBuilder::default()
    }

    pub fn add_pool(&mut self, name: impl Into<String>, capacity: Capacity) -> PoolId {
        self.pools.push(ResourcePool::new(name, capacity))
    }

    pub fn add_command(&mut self, command: Command) -> CommandId {
        self.commands.push(command)
    }

    /// Access for wiring dependencies after insertion.
    pub fn command_mut(&mut self, id: CommandId) -> &mut Command {
        self.commands.get_mut(id)
    }

    pub fn add_root(&mut self, id: CommandId) {
        self.roots.push(id);
    }

    /// Computes the transitive closure of the roots, validates it, and
    /// prepares every command in it.
    pub fn finalize(mut self, ctx: &ExecContext, store: &FileStore) -> Result<Plan, PlanError> {
        let wanted = self.closure()?;

        for &id in &wanted {
            let cmd = self.commands.get_mut(id);
            let name = cmd.display_name();
            cmd.deps.sort();
            cmd.deps.dedup();
            let shape_problem = match cmd.kind {
                CommandKind::CopyFile if cmd.inputs.is_empty() || cmd.outputs.is_empty() => {
                    Some("copy command needs an input and an output")
                }
                CommandKind::Capture if cmd.outputs.is_empty() => {
                    Some("capture command needs an output")
                }
                _ => None,
            };
            if let Some(problem) = shape_problem {
                return Err(PlanError::Prepare {
                    command: name,
                    source: PrepareError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        problem,
                    )),
                });
            }
            if let Err(source) = cmd.prepare(ctx, store) {
                return Err(PlanError::Prepare { command: name, source });
            }
        }

        self.check_path_sets(&wanted)?;

        let mut dependents = DenseMap::new_sized(self.commands.next_id(), Vec::new());
        let mut in_degree = DenseMap::new_sized(self.commands.next_id(), 0usize);
        let mut ranks: BTreeMap<i32, usize> = BTreeMap::new();
        for &id in &wanted {
            let cmd = self.commands.get(id);
            *in_degree.get_mut(id) = cmd.deps.len();
            *ranks.entry(cmd.strict_order).or_insert(0) += 1;
            for &dep in &cmd.deps {
                dependents.get_mut(dep).push(id);
            }
        }

        Ok(Plan {
            graph: Graph {
                commands: self.commands,
                dependents,
                pools: self.pools,
            },
            wanted,
            in_degree,
            ranks,
        })
    }

    /// Iterative depth-first walk from the roots: collects the reachable set
    /// in dependency-first order and reports any cycle by its member names.
    fn closure(&self) -> Result<Vec<CommandId>, PlanError> {
        let mut color = DenseMap::new_sized(self.commands.next_id(), Color::White);
        let mut wanted = Vec::new();
        for &root in &self.roots {
            if *color.get(root) != Color::White {
                continue;
            }
            let mut frames: Vec<(CommandId, usize)> = vec![(root, 0)];
            *color.get_mut(root) = Color::Gray;
            while let Some(top) = frames.len().checked_sub(1) {
                let (id, next) = frames[top];
                let deps = &self.commands.get(id).deps;
                if next < deps.len() {
                    let dep = deps[next];
                    frames[top].1 += 1;
                    match *color.get(dep) {
                        Color::White => {
                            *color.get_mut(dep) = Color::Gray;
                            frames.push((dep, 0));
                        }
                        Color::Gray => {
                            let mut cycle: Vec<String> = frames
                                .iter()
                                .skip_while(|(f, _)| *f != dep)
                                .map(|(f, _)| self.commands.get(*f).display_name())
                                .collect();
                            cycle.push(self.commands.get(dep).display_name());
                            return Err(PlanError::Cyclic(cycle));
                        }
                        Color::Black => {}
                    }
                } else {
                    *color.get_mut(id) = Color::Black;
                    wanted.push(id);
                    frames.pop();
                }
            }
        }
        Ok(wanted)
    }

    /// Output uniqueness across commands, and input/output/intermediate
    /// disjointness within each command. Runs after prepare, once paths are
    /// absolute.
    fn check_path_sets(&self, wanted: &[CommandId]) -> Result<(), PlanError> {
        let mut owners: HashMap<String, CommandId> = HashMap::new();
        for &id in wanted {
            let cmd = self.commands.get(id);

            let inputs: Vec<String> = cmd.inputs.iter().map(|p| crate::norm::key_for(p)).collect();
            let mids: Vec<String> = cmd
                .intermediates
                .iter()
                .map(|p| crate::norm::key_for(p))
                .collect();
            for out in cmd.normalized_outputs() {
                if inputs.contains(&out) {
                    return Err(PlanError::OverlappingPaths {
                        command: cmd.display_name(),
                        path: out,
                        roles: "input and output",
                    });
                }
                if mids.contains(&out) {
                    return Err(PlanError::OverlappingPaths {
                        command: cmd.display_name(),
                        path: out,
                        roles: "intermediate and output",
                    });
                }
                if let Some(&first) = owners.get(&out) {
                    return Err(PlanError::DuplicateOutput {
                        path: out,
                        first: self.commands.get(first).display_name(),
                        second: cmd.display_name(),
                    });
                }
                owners.insert(out, id);
            }
            for mid in &mids {
                if inputs.contains(mid) {
                    return Err(PlanError::OverlappingPaths {
                        command: cmd.display_name(),
                        path: mid.clone(),
                        roles: "input and intermediate",
                    });
                }
            }
        }
        Ok(())
    }
}
