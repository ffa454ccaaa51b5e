mod common;

use livesynth::oracle::Frame;
use livesynth::runtime::heap::MemoryProgram;
use livesynth::search::Budget;
use livesynth::spec::Specification;
use livesynth::types::{Type, Value};

use common::*;

const WALK: Budget = Budget::Stochastic {
    iterations: 400,
    pool_cap: 200,
};

fn frame() -> Frame {
    Frame::new()
        .local("x", Type::int(), Value::Int(3))
        .local("y", Type::int(), Value::Int(4))
        .local("s", Type::string(), Value::str("ab"))
}

#[test]
fn walk_is_deterministic_for_a_seed() {
    init_logging();

    let run = || {
        let mut program = MemoryProgram::new();
        let spec = Specification::parse_value("7").unwrap();
        let report = try_run(&mut program, request(frame(), spec, WALK)).unwrap();
        report.sources().into_iter().map(str::to_string).collect::<Vec<_>>()
    };

    let first = run();
    assert!(first.contains(&"7".to_string()), "{first:?}");
    assert_eq!(first, run());
}

#[test]
fn walk_results_satisfy_the_specification() {
    init_logging();

    let mut program = MemoryProgram::new();
    let frame = frame().local("z", Type::int(), Value::Int(8));
    let spec = Specification::predicate("_rv > 5 && _rv < 10", None, &frame, &program).unwrap();
    let mut req = request(frame, spec, WALK);
    req.constraint = Some(livesynth::constraint::TypeConstraint::Exact(Type::int()));
    let report = try_run(&mut program, req).unwrap();

    assert!(report.sources().contains(&"z"));
    for c in &report.candidates {
        let v = c.result.value.as_int().unwrap();
        assert!(v > 5 && v < 10, "{} = {v}", c.source);
    }
}

#[test]
fn pool_cap_stops_the_walk() {
    init_logging();

    let mut program = MemoryProgram::new();
    let spec = Specification::type_named("String", &program).unwrap();
    let budget = Budget::Stochastic {
        iterations: 10_000,
        pool_cap: 8,
    };
    let report = try_run(&mut program, request(frame(), spec, budget)).unwrap();

    assert!(report.sources().contains(&"s"));
    assert!(report.stats.generation.generated < 10_000);
}
