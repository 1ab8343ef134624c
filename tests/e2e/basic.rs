use super::*;
use bx::command::{Command, CommandKind};
use bx::error::SkipReason;
use bx::graph::{Plan, PlanBuilder};
use bx::work::Options;
use std::time::Duration;

#[test]
fn two_independent_commands_share_the_wall_clock() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let store = FileStore::new();
    let mut builder = PlanBuilder::new();
    for name in ["a", "b"] {
        let mut cmd = sh(&space, &format!("sleep 0.5 && touch {}", name));
        cmd.add_output(space.path(name));
        let id = builder.add_command(cmd);
        builder.add_root(id);
    }
    // Pin the context's concurrency hint; the executor takes it from there.
    let mut ctx = space.ctx()?;
    ctx.parallelism = 2;
    let mut plan = builder.finalize(&ctx, &store)?;

    let result = run_with(&mut plan, &store, Options::from_context(&ctx));
    assert!(result.all_succeeded());
    assert_eq!(result.succeeded.len(), 2);
    assert!(space.exists("a") && space.exists("b"));
    // Two half-second sleeps on two workers must beat one full second.
    assert!(
        result.wall_time < Duration::from_millis(950),
        "commands did not overlap: {:?}",
        result.wall_time
    );
    Ok(())
}

#[test]
fn diamond_runs_in_dependency_order_then_skips() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let store = FileStore::new();
    let mut builder = PlanBuilder::new();
    let a = builder.add_command(touch(&space, "a"));
    let b = builder.add_command(touch(&space, "b"));
    let c = builder.add_command(touch(&space, "c"));
    let d = builder.add_command(touch(&space, "d"));
    builder.command_mut(b).depend_on(a);
    builder.command_mut(c).depend_on(a);
    builder.command_mut(d).depend_on(b);
    builder.command_mut(d).depend_on(c);
    builder.add_root(d);
    let mut plan = builder.finalize(&space.ctx()?, &store)?;

    let result = run(&mut plan, &store);
    assert!(result.all_succeeded());
    assert_eq!(result.succeeded.len(), 4);

    // Dependency respect: an edge means the dependent starts only after the
    // dependency has fully finished.
    let span = |id| {
        let state = &plan.command(id).state;
        (state.t_begin.unwrap(), state.t_end.unwrap())
    };
    assert!(span(b).0 >= span(a).1);
    assert!(span(c).0 >= span(a).1);
    assert!(span(d).0 >= span(b).1);
    assert!(span(d).0 >= span(c).1);

    // Nothing changed, so a second run has no work to do.
    let rerun = run(&mut plan, &store);
    assert_eq!(rerun.succeeded.len(), 0);
    assert_eq!(rerun.skipped_as(SkipReason::UpToDate), 4);
    Ok(())
}

#[test]
fn incremental_skip_survives_store_round_trip() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let db = space.path("sigs");

    let build_plan = |store: &FileStore| -> anyhow::Result<Plan> {
        let mut builder = PlanBuilder::new();
        let id = builder.add_command(touch(&space, "out"));
        builder.add_root(id);
        Ok(builder.finalize(&space.ctx()?, store)?)
    };

    let store = FileStore::new();
    let mut plan = build_plan(&store)?;
    assert_eq!(run(&mut plan, &store).succeeded.len(), 1);
    store.save(&db)?;

    // A separate "process": fresh store loaded from disk, fresh plan.
    let (reloaded, warning) = FileStore::open_best_effort(&db);
    assert!(warning.is_none());
    let mut plan = build_plan(&reloaded)?;
    let rerun = run(&mut plan, &reloaded);
    assert_eq!(rerun.succeeded.len(), 0);
    assert_eq!(rerun.skipped_as(SkipReason::UpToDate), 1);
    Ok(())
}

#[test]
fn copy_commands_run_in_process() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let store = FileStore::new();
    space.write("src", "payload")?;

    let mut copy = Command::new("copy");
    copy.kind = CommandKind::CopyFile;
    copy.cwd = space.path(".");
    copy.add_input(space.path("src"));
    copy.add_output(space.path("dst"));

    let mut builder = PlanBuilder::new();
    let id = builder.add_command(copy);
    builder.add_root(id);
    let mut plan = builder.finalize(&space.ctx()?, &store)?;

    let result = run(&mut plan, &store);
    assert!(result.all_succeeded());
    assert_eq!(space.read("dst")?, b"payload");
    // No child was involved.
    assert_eq!(plan.command(id).state.pid, None);
    Ok(())
}

#[test]
fn capture_commands_write_stdout_to_their_output() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let store = FileStore::new();
    let mut cap = sh(&space, "printf captured-text");
    cap.kind = CommandKind::Capture;
    cap.add_output(space.path("log"));

    let mut builder = PlanBuilder::new();
    let id = builder.add_command(cap);
    builder.add_root(id);
    let mut plan = builder.finalize(&space.ctx()?, &store)?;

    let result = run(&mut plan, &store);
    assert!(result.all_succeeded());
    assert_eq!(space.read("log")?, b"captured-text");
    Ok(())
}

#[test]
fn intermediates_are_cleaned_after_success() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let store = FileStore::new();
    let mut cmd = sh(&space, "touch out scratch");
    cmd.add_output(space.path("out"));
    cmd.add_intermediate(space.path("scratch"));

    let mut builder = PlanBuilder::new();
    let id = builder.add_command(cmd);
    builder.add_root(id);
    let mut plan = builder.finalize(&space.ctx()?, &store)?;

    assert!(run(&mut plan, &store).all_succeeded());
    assert!(space.exists("out"));
    assert!(!space.exists("scratch"));
    Ok(())
}
