mod common;

use livesynth::config::SearchConfig;
use livesynth::oracle::{Frame, Oracle};
use livesynth::placeholder::Placeholder;
use livesynth::runtime::heap::MemoryProgram;
use livesynth::runtime::Introspection;
use livesynth::spec::Specification;
use livesynth::types::{Type, Value};

use common::*;

fn ints(x: i32, y: i32) -> Frame {
    Frame::new()
        .local("x", Type::int(), Value::Int(x))
        .local("y", Type::int(), Value::Int(y))
}

#[test]
fn choose_narrows_to_chosen() {
    init_logging();

    let mut program = MemoryProgram::new();
    let spec = Specification::parse_value("7").unwrap();
    let report = run_depth(&mut program, ints(3, 4), spec, 1);

    let choose = Placeholder::from_candidates(Some("z"), &report.candidates).unwrap();
    assert!(!choose.is_resolved());
    let text = choose.to_string();
    assert!(text.starts_with("z = choose("), "{text}");

    // The statement survives a trip through the user's source.
    let is_type = |name: &str| program.is_type_name(name);
    let parsed = Placeholder::parse(&text, &is_type).unwrap();
    assert_eq!(parsed.to_string(), text);
    assert_eq!(parsed.alternatives().len(), report.candidates.len());

    // A later checkpoint with different locals and a new demonstration.
    let later = Specification::parse_value("3").unwrap();
    let mut oracle = Oracle::new(&mut program, ints(1, 2), SearchConfig::default());
    let chosen = parsed.refine(&mut oracle, &later).unwrap().unwrap();

    assert!(chosen.is_resolved());
    assert_eq!(chosen.to_string(), "z = chosen(x + y);");

    // Resolved statements are left alone.
    let again = chosen.clone().refine(&mut oracle, &Specification::parse_value("100").unwrap()).unwrap();
    assert_eq!(again, Some(chosen));
}

#[test]
fn refining_away_everything_leaves_nothing() {
    init_logging();

    let mut program = MemoryProgram::new();
    let parsed = Placeholder::parse("z = choose(x + y, x * y);", &|_: &str| false).unwrap();
    let spec = Specification::parse_value("100").unwrap();
    let mut oracle = Oracle::new(&mut program, ints(3, 4), SearchConfig::default());

    assert_eq!(parsed.refine(&mut oracle, &spec).unwrap(), None);
}

#[test]
fn single_candidate_is_chosen_directly() {
    init_logging();

    let mut program = MemoryProgram::new();
    let frame = Frame::new().local("s", Type::string(), Value::str("ab"));
    let spec = Specification::parse_value("\"ab\"").unwrap();
    let report = run_depth(&mut program, frame, spec, 0);

    assert_eq!(report.sources(), vec!["s"]);
    let placeholder = Placeholder::from_candidates(None, &report.candidates).unwrap();
    assert_eq!(placeholder.to_string(), "chosen(s);");
}
