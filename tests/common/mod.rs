#![allow(dead_code)]

use livesynth::config::SearchConfig;
use livesynth::corpus::Corpus;
use livesynth::error::SearchError;
use livesynth::oracle::Frame;
use livesynth::runtime::heap::{ClassBuilder, MemoryProgram};
use livesynth::runtime::Fault;
use livesynth::search::{search, Budget, Monitor, SearchReport, SearchRequest};
use livesynth::spec::Specification;
use livesynth::types::{Type, Value};

pub fn init_logging() {
    let _ = colog::default_builder()
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

pub fn request(frame: Frame, spec: Specification, budget: Budget) -> SearchRequest {
    SearchRequest {
        frame,
        spec,
        constraint: None,
        budget,
        config: SearchConfig::default(),
    }
}

pub fn try_run(program: &mut MemoryProgram, request: SearchRequest) -> Result<SearchReport, SearchError> {
    search(program, request, &Corpus::default(), &mut Monitor::default())
}

pub fn run_depth(program: &mut MemoryProgram, frame: Frame, spec: Specification, depth: usize) -> SearchReport {
    try_run(program, request(frame, spec, Budget::Depth(depth))).unwrap()
}

pub fn point_class() -> ClassBuilder {
    ClassBuilder::new("Point")
        .field("x", Type::int())
        .field("y", Type::int())
        .record_constructor()
}

/// `Counter` with an int field `n` and members that touch it in various
/// ways. Returns the program and one instance with `n == 0`.
pub fn counter_program() -> (MemoryProgram, Value) {
    let mut program = MemoryProgram::new();
    program.add_class(
        ClassBuilder::new("Counter")
            .field("n", Type::int())
            .method("inc", &[], Type::int(), |heap, this, _, _| {
                let this = this.ok_or_else(Fault::npe)?;
                let n = heap.get(this, "n")?.as_int().unwrap_or(0) + 1;
                heap.set(this, "n", Value::Int(n))?;
                Ok(Value::Int(n))
            })
            .method("incThenThrow", &[], Type::int(), |heap, this, _, _| {
                let this = this.ok_or_else(Fault::npe)?;
                heap.set(this, "n", Value::Int(100))?;
                Err(Fault::threw("IllegalStateException"))
            })
            .method("spin", &[], Type::int(), |_, _, _, dog| loop {
                dog.check()?;
                std::hint::spin_loop();
            })
            .native_method("peek", &[], Type::int(), |heap, this, _, _| {
                let this = this.ok_or_else(Fault::npe)?;
                heap.get(this, "n")
            }),
    );
    let counter = program.heap_mut().alloc("Counter", vec![("n", Value::Int(0))]);

    (program, counter)
}
