use super::*;
use bx::error::{FailReason, SkipReason};
use bx::graph::PlanBuilder;
use bx::work::Options;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn pre_cancelled_build_dispatches_nothing() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let store = FileStore::new();
    let mut builder = PlanBuilder::new();
    let id = builder.add_command(touch(&space, "a"));
    builder.add_root(id);
    let mut plan = builder.finalize(&space.ctx()?, &store)?;

    let cancel = Arc::new(AtomicBool::new(true));
    let result = run_with(
        &mut plan,
        &store,
        Options {
            cancel: Some(cancel),
            ..Default::default()
        },
    );
    assert_eq!(result.skipped, vec![(id, SkipReason::Drained)]);
    assert!(!space.exists("a"));
    Ok(())
}

#[test]
fn cancel_lets_in_flight_work_finish() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let store = FileStore::new();
    let mut builder = PlanBuilder::new();
    let mut slow = sh(&space, "sleep 0.3 && touch a");
    slow.add_output(space.path("a"));
    let first = builder.add_command(slow);
    let second = builder.add_command(touch(&space, "b"));
    builder.command_mut(second).depend_on(first);
    builder.add_root(second);
    let mut plan = builder.finalize(&space.ctx()?, &store)?;

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            cancel.store(true, Ordering::Relaxed);
        });
    }
    let result = run_with(
        &mut plan,
        &store,
        Options {
            cancel: Some(cancel),
            ..Default::default()
        },
    );
    // The running command was not killed; the dependent never started.
    assert_eq!(result.succeeded, vec![first]);
    assert_eq!(result.skipped, vec![(second, SkipReason::Drained)]);
    assert!(space.exists("a"));
    assert!(!space.exists("b"));
    Ok(())
}

#[test]
fn deadline_overrun_fails_with_timeout() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let store = FileStore::new();
    let mut builder = PlanBuilder::new();
    let mut cmd = sh(&space, "sleep 30");
    cmd.add_output(space.path("never"));
    let id = builder.add_command(cmd);
    builder.add_root(id);
    let mut plan = builder.finalize(&space.ctx()?, &store)?;

    let result = run_with(
        &mut plan,
        &store,
        Options {
            timeouts: HashMap::from([(id, Duration::from_millis(100))]),
            ..Default::default()
        },
    );
    assert!(matches!(&result.failed[..], [(failed, FailReason::Timeout)] if *failed == id));
    assert!(
        result.wall_time < Duration::from_secs(10),
        "timeout was not enforced: {:?}",
        result.wall_time
    );
    Ok(())
}
