use super::*;
use bx::error::SkipReason;
use bx::graph::{Plan, PlanBuilder};

fn script_plan(space: &TestSpace, script: &str, store: &FileStore) -> anyhow::Result<Plan> {
    let mut cmd = sh(space, script);
    cmd.add_output(space.path("out"));
    let mut builder = PlanBuilder::new();
    let id = builder.add_command(cmd);
    builder.add_root(id);
    Ok(builder.finalize(&space.ctx()?, store)?)
}

#[test]
fn changed_arguments_invalidate_the_command() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let db = space.path("sigs");

    let store = FileStore::new();
    let mut plan = script_plan(&space, "echo x > out", &store)?;
    assert_eq!(run(&mut plan, &store).succeeded.len(), 1);
    store.save(&db)?;

    // Same command line: nothing to do.
    let (store, _) = FileStore::open_best_effort(&db);
    let mut plan = script_plan(&space, "echo x > out", &store)?;
    let result = run(&mut plan, &store);
    assert_eq!(result.succeeded.len(), 0);
    assert_eq!(result.skipped_as(SkipReason::UpToDate), 1);
    store.save(&db)?;

    // Changed argument: the fingerprint differs, the command runs again.
    let (store, _) = FileStore::open_best_effort(&db);
    let mut plan = script_plan(&space, "echo y > out", &store)?;
    assert_eq!(run(&mut plan, &store).succeeded.len(), 1);
    assert_eq!(space.read("out")?, b"y\n");
    Ok(())
}

#[test]
fn edited_input_invalidates_the_command() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let db = space.path("sigs");
    space.write("in", "v1")?;

    let build = |store: &FileStore| -> anyhow::Result<Plan> {
        let mut cmd = sh(&space, "cat in > out");
        cmd.add_input(space.path("in"));
        cmd.add_output(space.path("out"));
        let mut builder = PlanBuilder::new();
        let id = builder.add_command(cmd);
        builder.add_root(id);
        Ok(builder.finalize(&space.ctx()?, store)?)
    };

    let store = FileStore::new();
    let mut plan = build(&store)?;
    assert_eq!(run(&mut plan, &store).succeeded.len(), 1);
    store.save(&db)?;

    // Edit the input after the output was built.
    std::thread::sleep(std::time::Duration::from_millis(5));
    space.write("in", "v2")?;

    let (store, _) = FileStore::open_best_effort(&db);
    let mut plan = build(&store)?;
    assert_eq!(run(&mut plan, &store).succeeded.len(), 1);
    assert_eq!(space.read("out")?, b"v2");
    Ok(())
}
