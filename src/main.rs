use std::path::PathBuf;
use std::process;

use clap::{ArgGroup, Parser};
use log::{error, info, warn};

use livesynth::config::SearchConfig;
use livesynth::corpus::Corpus;
use livesynth::error::SearchError;
use livesynth::expr::Literal;
use livesynth::oracle::Frame;
use livesynth::placeholder::Placeholder;
use livesynth::runtime::heap::MemoryProgram;
use livesynth::search::{search, Budget, Monitor, SearchRequest};
use livesynth::spec::Specification;
use livesynth::syntax::parse_literal;
use livesynth::types::{Prim, Type, Value};

#[derive(Parser, Debug)]
#[command(name = "livesynth")]
#[command(about = "Find expressions over the locals in scope that match a demonstrated value, type or predicate")]
#[command(group(ArgGroup::new("spec").required(true).args(["value", "type_name", "state", "predicate"])))]
struct Args {
    /// A local in scope, e.g. `x:int=3`, `s:String="ab"` or `arr:int[]={1,2,3}`
    #[arg(long = "local", value_name = "NAME:TYPE=VALUE")]
    locals: Vec<String>,

    /// The value the expression must evaluate to
    #[arg(long)]
    value: Option<String>,

    /// The type the expression's value must be an instance of
    #[arg(long = "type")]
    type_name: Option<String>,

    /// A predicate over `before(var)` and `after(var)`
    #[arg(long, requires = "var")]
    state: Option<String>,

    /// The variable a `--state` predicate describes
    #[arg(long)]
    var: Option<String>,

    /// A boolean predicate over the bound result
    #[arg(long)]
    predicate: Option<String>,

    /// Name the `--predicate` binds the result to
    #[arg(long)]
    bound: Option<String>,

    #[arg(long, default_value_t = 2)]
    depth: usize,

    /// Use the weighted random walk instead of level enumeration
    #[arg(long)]
    stochastic: bool,

    #[arg(long, default_value_t = 2000)]
    iterations: usize,

    #[arg(long = "pool-cap", default_value_t = 500)]
    pool_cap: usize,

    #[arg(long = "no-operators")]
    no_operators: bool,

    #[arg(long)]
    constructors: bool,

    /// API usage frequencies (JSON)
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Search configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Variable the result will be assigned to
    #[arg(long)]
    assign: Option<String>,
}

fn bad_local(src: &str, why: &str) -> SearchError {
    SearchError::spec(format!("bad --local `{src}`: {why}"))
}

/// Parses a scalar. Longs may omit the `L` suffix and doubles may be
/// written as integers.
fn scalar(src: &str, ty: &Type) -> Result<Value, SearchError> {
    let src = src.trim();
    let lit = match ty {
        Type::Prim(Prim::Long) if !src.ends_with(['l', 'L']) => parse_literal(&format!("{src}L"))?,
        _ => parse_literal(src)?,
    };

    let value = match (lit, ty) {
        (Literal::Int(x), Type::Prim(Prim::Double)) => Value::Double(f64::from(x)),
        (lit, _) if lit.ty() == *ty => lit.to_value(),
        (Literal::Null, _) if ty.is_reference() => Value::Null,
        (lit, _) => return Err(bad_local(src, &format!("{lit} is not a {ty}"))),
    };

    Ok(value)
}

fn add_local(program: &mut MemoryProgram, frame: Frame, src: &str) -> Result<Frame, SearchError> {
    let (name, rest) = src.split_once(':').ok_or_else(|| bad_local(src, "expected NAME:TYPE=VALUE"))?;
    let (ty, value) = rest.split_once('=').ok_or_else(|| bad_local(src, "expected NAME:TYPE=VALUE"))?;
    let ty = Type::parse(ty).ok_or_else(|| bad_local(src, "unknown type"))?;

    let value = match ty.element() {
        Some(elem) => {
            let body = value.trim()
                .strip_prefix('{')
                .and_then(|v| v.strip_suffix('}'))
                .ok_or_else(|| bad_local(src, "arrays are written `{a, b, c}`"))?;
            let items = body.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| scalar(item, elem))
                .collect::<Result<Vec<_>, _>>()?;
            program.heap_mut().alloc_array(elem.clone(), items)
        },
        None => scalar(value, &ty)?,
    };

    Ok(frame.local(name.trim(), ty, value))
}

fn run(args: Args) -> Result<(), SearchError> {
    let mut program = MemoryProgram::new();
    let mut frame = Frame::new();
    for local in &args.locals {
        frame = add_local(&mut program, frame, local)?;
    }

    let spec = match (&args.value, &args.type_name, &args.state, &args.predicate) {
        (Some(value), ..) => Specification::parse_value(value)?,
        (_, Some(name), ..) => Specification::type_named(name, &program)?,
        (_, _, Some(state), _) => {
            let var = args.var.as_deref().ok_or_else(|| SearchError::spec("--state needs --var"))?;
            Specification::state(state, var, &frame, &program)?
        },
        (_, _, _, Some(predicate)) => Specification::predicate(predicate, args.bound.as_deref(), &frame, &program)?,
        _ => return Err(SearchError::spec("no specification given")),
    };

    let mut config = match &args.config {
        Some(path) => SearchConfig::from_json_file(path)?,
        None => SearchConfig::default(),
    };
    config.search_operators &= !args.no_operators;
    config.search_constructors |= args.constructors;
    if args.assign.is_some() {
        config.assigned_variable = args.assign.clone();
    }

    let corpus = match &args.corpus {
        Some(path) => Corpus::from_json_file(path)?,
        None => Corpus::default(),
    };

    let budget = if args.stochastic {
        Budget::Stochastic {
            iterations: args.iterations,
            pool_cap: args.pool_cap,
        }
    } else {
        Budget::Depth(args.depth)
    };

    let lhs = config.assigned_variable.clone()
        .or_else(|| spec.assigned_variable().map(str::to_string));
    let wanted = spec.to_string();

    let request = SearchRequest {
        frame,
        spec,
        constraint: None,
        budget,
        config,
    };
    let mut monitor = Monitor::default();
    let report = search(&mut program, request, &corpus, &mut monitor)?;

    for warning in &report.warnings {
        warn!("{warning}");
    }
    info!("{:?}", report.stats);

    if report.is_empty() {
        info!("Nothing matches {wanted}");
        return Ok(());
    }

    for (idx, candidate) in report.candidates.iter().enumerate() {
        println!("{:>3}. {}  => {}", idx + 1, candidate.source, candidate.display);
    }
    if let Some(placeholder) = Placeholder::from_candidates(lhs.as_deref(), &report.candidates) {
        println!();
        println!("{placeholder}");
    }

    Ok(())
}

fn main() {
    colog::init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("{e}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_cover_the_full_numeric_range() {
        assert_eq!(scalar("-2147483648", &Type::int()).unwrap(), Value::Int(i32::MIN));
        assert_eq!(scalar("3000000000", &Type::Prim(Prim::Long)).unwrap(), Value::Long(3_000_000_000));
        assert_eq!(scalar("-5L", &Type::Prim(Prim::Long)).unwrap(), Value::Long(-5));
        assert!(matches!(scalar("2", &Type::Prim(Prim::Double)).unwrap(), Value::Double(x) if x == 2.0));
        assert!(scalar("3000000000", &Type::int()).is_err());
        assert!(scalar("true", &Type::int()).is_err());
    }
}
