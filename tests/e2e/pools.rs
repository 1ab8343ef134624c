use super::*;
use bx::graph::PlanBuilder;
use bx::pool::Capacity;
use bx::work::Options;

#[test]
fn pool_of_one_serializes_in_priority_order() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let store = FileStore::new();
    let mut builder = PlanBuilder::new();
    let pool = builder.add_pool("heavy", Capacity::Slots(1));

    // Same rank, distinct arguments: each command gets its own fingerprint,
    // so the priority key alone decides who gets the slot next.
    let mut ids = Vec::new();
    for name in ["a", "b", "c", "d", "e"] {
        // No declared outputs, so every command always runs.
        let mut cmd = sh(
            &space,
            &format!("echo start-{n} >> log; sleep 0.05; echo end-{n} >> log", n = name),
        );
        cmd.pool = Some(pool);
        let id = builder.add_command(cmd);
        builder.add_root(id);
        ids.push((name, id));
    }
    let mut plan = builder.finalize(&space.ctx()?, &store)?;

    // The dispatch order the executor promises: the deterministic
    // (strict_order, fingerprint) key, readable once fingerprints are sealed.
    ids.sort_by_key(|&(_, id)| plan.command(id).ordering_rank());
    let expected: Vec<String> = ids
        .iter()
        .flat_map(|(name, _)| [format!("start-{name}"), format!("end-{name}")])
        .collect();

    let result = run_with(
        &mut plan,
        &store,
        Options {
            parallelism: 4,
            ..Default::default()
        },
    );
    assert!(result.all_succeeded());
    assert_eq!(result.succeeded.len(), 5);

    // With one slot the log must be strict start/end pairs (any overlap
    // would interleave them), and the pairs must follow the priority key:
    // the parked waiters are unparked best-rank-first.
    let log = String::from_utf8(space.read("log")?)?;
    let got: Vec<String> = log.lines().map(str::to_string).collect();
    assert_eq!(got, expected);
    Ok(())
}
