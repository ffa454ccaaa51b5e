mod common;

use livesynth::config::SearchConfig;
use livesynth::corpus::Corpus;
use livesynth::error::SearchError;
use livesynth::oracle::{Frame, Oracle};
use livesynth::runtime::heap::{ClassBuilder, MemoryProgram};
use livesynth::runtime::{Fault, Introspection};
use livesynth::search::{search, Budget, CancelToken, Monitor, SearchReport};
use livesynth::spec::Specification;
use livesynth::synth::heuristic::CostModel;
use livesynth::types::{Type, Value};

use common::*;

fn assert_all_equal(report: &SearchReport, expected: &Value) {
    for c in &report.candidates {
        assert_eq!(&c.result.value, expected, "{} evaluated to {}", c.source, c.result.value);
    }
}

/// Recomputes each candidate's heuristic depth from scratch.
fn assert_within(program: &mut MemoryProgram, frame: Frame, report: &SearchReport, depth: usize) {
    let config = SearchConfig::default();
    let corpus = Corpus::default();
    let costs = CostModel::new(&corpus, &config);
    let mut oracle = Oracle::new(program, frame, config.clone());

    for c in &report.candidates {
        let cost = costs.cost(&c.expr, &mut oracle, false);
        assert!(cost <= depth, "{} costs {cost}, more than {depth}", c.source);
    }
}

fn two_ints() -> Frame {
    Frame::new()
        .local("x", Type::int(), Value::Int(3))
        .local("y", Type::int(), Value::Int(4))
}

#[test]
fn sum_of_locals() {
    init_logging();

    let mut program = MemoryProgram::new();
    let spec = Specification::parse_value("7").unwrap();
    let report = run_depth(&mut program, two_ints(), spec, 1);
    let sources = report.sources();

    assert!(sources.contains(&"x + y"), "{sources:?}");
    assert!(sources.contains(&"7"));
    assert!(!sources.contains(&"x * y"));
    assert!(!sources.contains(&"y + x"));
    assert_all_equal(&report, &Value::Int(7));
    assert_within(&mut program, two_ints(), &report, 1);
}

#[test]
fn doubled_upper_case() {
    init_logging();

    let mut program = MemoryProgram::new();
    let frame = Frame::new().local("s", Type::string(), Value::str("ab"));
    let spec = Specification::parse_value("\"ABAB\"").unwrap();
    let report = run_depth(&mut program, frame.clone(), spec, 2);
    let sources = report.sources();

    assert!(sources.contains(&"s.toUpperCase() + s.toUpperCase()"), "{sources:?}");
    assert!(sources.iter().all(|s| !s.contains("charAt")));
    assert_all_equal(&report, &Value::str("ABAB"));
    assert_within(&mut program, frame, &report, 2);
}

#[test]
fn objects_in_scope() {
    init_logging();

    let mut program = MemoryProgram::new();
    program.add_class(point_class());
    let p = program.heap_mut().alloc("Point", vec![("x", Value::Int(1)), ("y", Value::Int(2))]);
    let q = program.heap_mut().alloc("Point", vec![("x", Value::Int(5)), ("y", Value::Int(6))]);
    let frame = Frame::new()
        .local("x", Type::int(), Value::Int(3))
        .local("s", Type::string(), Value::str("ab"))
        .local("p", Type::class("Point"), p)
        .with_this(Type::class("Point"), q);

    let spec = Specification::type_named("Object", &program).unwrap();
    let report = run_depth(&mut program, frame.clone(), spec, 0);
    let sources = report.sources();

    for expected in ["x", "s", "p", "this"] {
        assert!(sources.contains(&expected), "{expected} missing from {sources:?}");
    }
    assert_within(&mut program, frame, &report, 0);
}

#[test]
fn increment_state() {
    init_logging();

    let mut program = MemoryProgram::new();
    let frame = Frame::new().local("x", Type::int(), Value::Int(5));
    let spec = Specification::state("after(x) == before(x) + 1", "x", &frame, &program).unwrap();
    let report = run_depth(&mut program, frame, spec, 1);
    let sources = report.sources();

    assert!(sources.contains(&"x + 1"), "{sources:?}");
    assert!(!sources.contains(&"x"));
    assert!(!sources.contains(&"x + 2"));
    assert_all_equal(&report, &Value::Int(6));
}

fn box_class() -> ClassBuilder {
    ClassBuilder::new("Box")
        .field("v", Type::int())
        .method("bump", &[], Type::class("Box"), |heap, this, _, _| {
            let this = this.ok_or_else(Fault::npe)?;
            let v = heap.get(this, "v")?.as_int().unwrap_or(0);
            heap.set(this, "v", Value::Int(v + 1))?;
            Ok(this.clone())
        })
}

#[test]
fn object_state_compares_against_the_state_before() {
    init_logging();

    let mut program = MemoryProgram::new();
    program.add_class(box_class());
    let b = program.heap_mut().alloc("Box", vec![("v", Value::Int(1))]);
    let frame = Frame::new().local("b", Type::class("Box"), b.clone());
    let spec = Specification::state("after(b).v == before(b).v + 1", "b", &frame, &program).unwrap();
    let report = run_depth(&mut program, frame, spec, 1);
    let sources = report.sources();

    assert!(sources.contains(&"b.bump()"), "{sources:?}");
    assert!(!sources.contains(&"b"), "{sources:?}");
    assert_eq!(program.heap().get(&b, "v"), Ok(Value::Int(1)));
}

#[test]
fn wide_argument_products_are_guarded() {
    init_logging();

    let mut program = MemoryProgram::new();
    program.add_class(
        ClassBuilder::new("Mixer").method("mix", &[Type::int(), Type::int(), Type::int()], Type::int(), |_, _, args, _| {
            let sum = args.iter().filter_map(Value::as_int).sum::<i32>();
            Ok(Value::Int(sum))
        }),
    );
    let m = program.heap_mut().alloc("Mixer", vec![]);
    let frame = Frame::new()
        .local("m", Type::class("Mixer"), m)
        .local("a", Type::int(), Value::Int(1))
        .local("b", Type::int(), Value::Int(2))
        .local("c", Type::int(), Value::Int(3));
    let spec = Specification::parse_value("6").unwrap();

    let loose = run_depth(&mut program, frame.clone(), spec.clone(), 1);
    assert!(loose.sources().iter().any(|s| s.starts_with("m.mix(")), "{:?}", loose.sources());

    // Five int classes give 125 triples, well past a threshold of 10.
    let mut tight = request(frame, spec, Budget::Depth(1));
    tight.config.policy.arg_combination_base = 1;
    let tight = try_run(&mut program, tight).unwrap();

    assert!(tight.sources().iter().all(|s| !s.starts_with("m.mix(")), "{:?}", tight.sources());
    assert!(tight.stats.generation.guarded > loose.stats.generation.guarded);
    assert!(tight.sources().contains(&"6"));
}

/// `Holder` keeps a `Point` in a field typed `Object`.
fn holder_of_point(program: &mut MemoryProgram, holder: ClassBuilder) -> (Value, Value) {
    program.add_class(point_class());
    program.add_class(holder.field("item", Type::object()));
    let pt = program.heap_mut().alloc("Point", vec![("x", Value::Int(1)), ("y", Value::Int(2))]);
    let h = program.heap_mut().alloc("Holder", vec![("item", pt.clone())]);

    (h, pt)
}

#[test]
fn loosely_typed_values_are_rescued_by_a_downcast() {
    init_logging();

    let mut program = MemoryProgram::new();
    let (h, pt) = holder_of_point(&mut program, ClassBuilder::new("Holder"));
    let frame = Frame::new().local("h", Type::class("Holder"), h);
    let spec = Specification::type_named("Point", &program).unwrap();

    let mut req = request(frame, spec, Budget::Depth(1));
    req.config.search_operators = false;
    let report = try_run(&mut program, req).unwrap();
    let sources = report.sources();

    assert!(sources.contains(&"(Point) h.item"), "{sources:?}");
    assert!(!sources.contains(&"h.item"), "{sources:?}");
    let rescued = report.candidates.iter().find(|c| c.source == "(Point) h.item").unwrap();
    assert_eq!(rescued.result.value, pt);
}

#[test]
fn narrower_phrasings_of_a_value_become_components() {
    init_logging();

    let mut program = MemoryProgram::new();
    let holder = ClassBuilder::new("Holder").method("get", &[], Type::class("Point"), |heap, this, _, _| {
        let this = this.ok_or_else(Fault::npe)?;
        heap.get(this, "item")
    });
    let (h, pt) = holder_of_point(&mut program, holder);
    let frame = Frame::new()
        .local("o", Type::object(), pt)
        .local("h", Type::class("Holder"), h);
    let spec = Specification::parse_value("1").unwrap();
    let report = run_depth(&mut program, frame, spec, 2);
    let sources = report.sources();

    // `h.get()` joins the class of `o`, but only its static type has `x`.
    assert!(sources.contains(&"h.get().x"), "{sources:?}");
    assert!(sources.contains(&"1"), "{sources:?}");
}

#[test]
fn constructors_come_last() {
    init_logging();

    let mut program = MemoryProgram::new();
    program.add_class(point_class().method("flip", &[], Type::class("Point"), |heap, this, _, _| {
        let this = this.ok_or_else(Fault::npe)?;
        let (x, y) = (heap.get(this, "x")?, heap.get(this, "y")?);
        Ok(heap.alloc("Point", vec![("x", y), ("y", x)]))
    }));
    let spec = Specification::type_named("Point", &program).unwrap();

    let plain = run_depth(&mut program, two_ints(), spec.clone(), 1);
    assert!(plain.sources().iter().all(|s| !s.contains("new ")), "{:?}", plain.sources());

    for depth in [1, 2] {
        let mut req = request(two_ints(), spec.clone(), Budget::Depth(depth));
        req.config.search_constructors = true;
        let report = try_run(&mut program, req).unwrap();
        let sources = report.sources();

        assert!(sources.contains(&"new Point(x, y)"), "{sources:?}");
        assert!(sources.iter().all(|s| !s.contains(").flip()")), "{sources:?}");
    }
}

#[test]
fn search_allocations_are_released() {
    init_logging();

    let mut program = MemoryProgram::new();
    program.add_class(point_class());
    let before = program.heap().len();
    let spec = Specification::type_named("Point", &program).unwrap();

    let mut req = request(two_ints(), spec, Budget::Depth(1));
    req.config.search_constructors = true;
    let report = try_run(&mut program, req).unwrap();

    let built = report.candidates.iter().find(|c| c.source == "new Point(x, y)").unwrap();
    assert!(built.display.starts_with("Point@"), "{}", built.display);
    assert_eq!(program.heap().len(), before);
}

#[test]
fn saturated_booleans_stop_growing() {
    init_logging();

    let mut program = MemoryProgram::new();
    let frame = Frame::new()
        .local("t", Type::boolean(), Value::Bool(true))
        .local("u", Type::boolean(), Value::Bool(false))
        .local("x", Type::int(), Value::Int(3))
        .local("y", Type::int(), Value::Int(4));
    let spec = Specification::type_named("Object", &program).unwrap();
    let report = run_depth(&mut program, frame, spec, 1);
    let sources = report.sources();

    // Both truth values exist at level 0, so further booleans cost a level
    // more than they would otherwise.
    assert!(sources.contains(&"t"), "{sources:?}");
    assert!(sources.contains(&"x + y"), "{sources:?}");
    for boolean in ["x < y", "!t", "t && u"] {
        assert!(!sources.contains(&boolean), "{boolean} in {sources:?}");
    }
}

#[test]
fn trivial_operations_are_pruned() {
    init_logging();

    let mut program = MemoryProgram::new();
    let three = run_depth(&mut program, two_ints(), Specification::parse_value("3").unwrap(), 1);
    let sources = three.sources();
    assert!(sources.contains(&"x"), "{sources:?}");
    for trivial in ["x + 0", "0 + x", "x - 0", "3 - 0"] {
        assert!(!sources.contains(&trivial), "{trivial} in {sources:?}");
    }

    let zero = run_depth(&mut program, two_ints(), Specification::parse_value("0").unwrap(), 1);
    let sources = zero.sources();
    assert!(sources.contains(&"0"), "{sources:?}");
    for trivial in ["x - x", "y - y", "x * 0", "0 * x"] {
        assert!(!sources.contains(&trivial), "{trivial} in {sources:?}");
    }

    let twelve = run_depth(&mut program, two_ints(), Specification::parse_value("12").unwrap(), 1);
    let sources = twelve.sources();
    assert!(sources.contains(&"x * y"), "{sources:?}");
    assert!(!sources.contains(&"y * x"), "{sources:?}");
}

#[test]
fn equal_valued_phrasings_expand_together() {
    init_logging();

    let mut program = MemoryProgram::new();
    let arr = program.heap_mut().alloc_array(Type::int(), vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let frame = Frame::new()
        .local("arr", Type::array_of(Type::int()), arr)
        .local("len", Type::int(), Value::Int(3));
    let spec = Specification::parse_value("3").unwrap();
    let report = run_depth(&mut program, frame.clone(), spec, 1);
    let sources = report.sources();

    assert!(sources.contains(&"arr.length"), "{sources:?}");
    assert!(sources.contains(&"len"), "{sources:?}");

    // Every member agrees when evaluated again from scratch.
    let mut oracle = Oracle::new(&mut program, frame, SearchConfig::default());
    for c in &report.candidates {
        let again = oracle.reevaluate(&c.expr).unwrap();
        assert_eq!(again.value, Value::Int(3), "{}", c.source);
    }
}

#[test]
fn cancelling_yields_no_partial_list() {
    init_logging();

    let mut program = MemoryProgram::new();
    let token = CancelToken::new();
    let trigger = token.clone();
    let mut monitor = Monitor::new(token).on_progress(move |progress| {
        if progress.level >= 1 {
            trigger.cancel();
        }
    });

    let spec = Specification::parse_value("7").unwrap();
    let res = search(
        &mut program,
        request(two_ints(), spec, Budget::Depth(2)),
        &Default::default(),
        &mut monitor,
    );

    assert!(matches!(res, Err(SearchError::Cancelled)), "{res:?}");
}

#[test]
fn enumeration_is_deterministic() {
    init_logging();

    let frame = Frame::new()
        .local("s", Type::string(), Value::str("ab"))
        .local("n", Type::int(), Value::Int(2));
    let run = || {
        let mut program = MemoryProgram::new();
        let spec = Specification::parse_value("\"AB\"").unwrap();
        let report = run_depth(&mut program, frame.clone(), spec, 2);
        (report.sources().into_iter().map(str::to_string).collect::<Vec<_>>(), report.stats.generation)
    };

    let (first, first_stats) = run();
    let (second, second_stats) = run();

    assert!(!first.is_empty());
    assert_eq!(first, second);
    assert_eq!(first_stats, second_stats);
}

#[test]
fn malformed_specifications_are_rejected_up_front() {
    let program = MemoryProgram::new();
    let frame = Frame::new().local("x", Type::int(), Value::Int(5));

    assert!(Specification::parse_value("x +").is_err());
    assert!(Specification::type_named("Nope", &program).is_err());
    assert!(Specification::state("after(y) == 1", "x", &frame, &program).is_err());
    assert!(Specification::predicate("x > 3", None, &frame, &program).is_err());
    assert!(program.is_type_name("Math"));
}

#[test]
fn nothing_found_is_not_an_error() {
    init_logging();

    let mut program = MemoryProgram::new();
    let frame = Frame::new().local("b", Type::boolean(), Value::Bool(true));
    let spec = Specification::parse_value("\"zzz\"").unwrap();
    let report = run_depth(&mut program, frame, spec, 1);

    assert!(report.is_empty());
}
