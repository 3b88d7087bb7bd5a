//! Behavioural tests for the daemon bootstrap sequence.

use std::cell::RefCell;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use super::support::{self, BootstrapWorld, HealthEvent};

#[fixture]
fn world() -> RefCell<BootstrapWorld> {
    support::bootstrap_world()
}

#[given("a healthy configuration loader")]
fn given_healthy_loader(world: &RefCell<BootstrapWorld>) {
    world.borrow_mut().use_successful_loader();
}

#[given("a failing configuration loader")]
fn given_failing_loader(world: &RefCell<BootstrapWorld>) {
    world.borrow_mut().use_failing_loader();
}

#[given("a configuration loader with zero workers")]
fn given_invalid_loader(world: &RefCell<BootstrapWorld>) {
    world.borrow_mut().use_invalid_loader();
}

#[when("the daemon bootstrap runs")]
fn when_bootstrap_runs(world: &RefCell<BootstrapWorld>) {
    world.borrow_mut().bootstrap();
}

#[then("bootstrap succeeds")]
fn then_bootstrap_succeeds(world: &RefCell<BootstrapWorld>) {
    let world = world.borrow();
    assert!(
        world.bootstrap_error().is_none(),
        "bootstrap error: {:?}",
        world.bootstrap_error()
    );
    assert!(world.daemon().is_some(), "daemon should have been started");
}

#[then("bootstrap fails")]
fn then_bootstrap_fails(world: &RefCell<BootstrapWorld>) {
    let world = world.borrow();
    assert!(
        world.bootstrap_error().is_some(),
        "bootstrap succeeded unexpectedly"
    );
}

#[then("the reporter recorded bootstrap start")]
fn then_reporter_start(world: &RefCell<BootstrapWorld>) {
    assert!(
        world
            .borrow()
            .reporter
            .events()
            .contains(&HealthEvent::BootstrapStarting),
        "bootstrap start event missing"
    );
}

#[then("the reporter recorded bootstrap success")]
fn then_reporter_success(world: &RefCell<BootstrapWorld>) {
    let local = world.borrow().reporter.local_endpoint();
    assert!(
        local.is_some_and(|local| local.port() != 0),
        "bootstrap success event missing"
    );
}

#[then("the reporter recorded bootstrap failure")]
fn then_reporter_failure(world: &RefCell<BootstrapWorld>) {
    let events = world.borrow().reporter.events();
    let failed = events
        .iter()
        .any(|event| matches!(event, HealthEvent::BootstrapFailed(_)));
    assert!(failed, "bootstrap failure event missing: {events:?}");
}

#[then("the configured service is offered")]
fn then_service_offered(world: &RefCell<BootstrapWorld>) {
    let world = world.borrow();
    let daemon = world.daemon().expect("daemon started");
    let engine = daemon.engine();
    assert_eq!(engine.pending_queries(daemon.service()).ok(), Some(0));
    let duplicate = engine.offer(daemon.config().service_name());
    assert!(duplicate.is_err(), "service name should already be taken");
}

#[scenario(
    path = "tests/features/bootstrap.feature",
    name = "Bootstrap offers the configured service"
)]
fn bootstrap_offers_service(world: RefCell<BootstrapWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/bootstrap.feature",
    name = "Bootstrap surfaces configuration loading failures"
)]
fn bootstrap_load_failure(world: RefCell<BootstrapWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/bootstrap.feature",
    name = "Bootstrap rejects configuration that does not validate"
)]
fn bootstrap_validation_failure(world: RefCell<BootstrapWorld>) {
    drop(world);
}
