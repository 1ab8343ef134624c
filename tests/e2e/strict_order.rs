use super::*;
use bx::graph::PlanBuilder;
use bx::work::Options;

#[test]
fn higher_ranks_wait_for_every_lower_rank() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let store = FileStore::new();
    let mut builder = PlanBuilder::new();

    let mut c1 = sh(&space, "sleep 0.2 && touch a");
    c1.add_output(space.path("a"));
    let mut c2 = sh(&space, "sleep 0.2 && touch b");
    c2.add_output(space.path("b"));
    let mut c3 = touch(&space, "c");
    c3.strict_order = 1;

    let ids: Vec<_> = [c1, c2, c3]
        .into_iter()
        .map(|cmd| {
            let id = builder.add_command(cmd);
            builder.add_root(id);
            id
        })
        .collect();
    let mut plan = builder.finalize(&space.ctx()?, &store)?;

    let result = run_with(
        &mut plan,
        &store,
        Options {
            parallelism: 4,
            ..Default::default()
        },
    );
    assert!(result.all_succeeded());

    // The rank-1 command starts only after both rank-0 commands are done,
    // even with idle workers available.
    let begin = plan.command(ids[2]).state.t_begin.unwrap();
    assert!(begin >= plan.command(ids[0]).state.t_end.unwrap());
    assert!(begin >= plan.command(ids[1]).state.t_end.unwrap());
    Ok(())
}
