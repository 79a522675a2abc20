//! Barrier rendezvous between forked workers.

use std::time::{Duration, Instant};

use faultline_harness::orchestrator::{
    OrchestratorError, Role, RoleBarrier, RoleContext, WorkerSettings, run_roles,
};
use serial_test::serial;

#[test]
#[serial]
fn test_barrier_holds_early_party() {
    let barrier = RoleBarrier::new(2).unwrap();
    let early = barrier.clone();
    let roles = vec![
        Role::new("early", move |ctx: &RoleContext| {
            let started = Instant::now();
            early.wait(ctx)?;
            anyhow::ensure!(
                started.elapsed() >= Duration::from_millis(250),
                "left the barrier before the late party arrived"
            );
            early.wait(ctx)?;
            Ok(())
        }),
        Role::new("late", move |ctx: &RoleContext| {
            std::thread::sleep(Duration::from_millis(300));
            barrier.wait(ctx)?;
            barrier.wait(ctx)?;
            Ok(())
        }),
    ];

    run_roles(roles, Duration::from_secs(5), &WorkerSettings::default()).unwrap();
}

#[test]
#[serial]
fn test_missing_party_times_out() {
    let barrier = RoleBarrier::new(2).unwrap();
    let roles = vec![
        Role::new("waiting", move |ctx: &RoleContext| {
            barrier.wait(ctx)?;
            Ok(())
        }),
        Role::new("absent", |_: &RoleContext| {
            std::thread::sleep(Duration::from_secs(60));
            Ok(())
        }),
    ];

    let err = run_roles(roles, Duration::from_millis(500), &WorkerSettings::default()).unwrap_err();

    match err {
        OrchestratorError::TimedOut { outstanding, .. } => {
            assert_eq!(outstanding, vec!["waiting".to_string(), "absent".to_string()]);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
}
