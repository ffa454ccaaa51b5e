use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{Prim, Type, Value};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Stable identity of an expression node. Derived data (types, results,
/// heuristic depth) is keyed by it in side tables, never stored on the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u64);

impl ExprId {
    fn fresh() -> Self {
        ExprId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnopKind {
    Negate,
    Not,
}

impl UnopKind {
    pub fn symbol(self) -> &'static str {
        match self {
            UnopKind::Negate => "-",
            UnopKind::Not => "!",
        }
    }

    pub fn result_type(self, ty: &Type) -> Option<Type> {
        match (self, ty) {
            (UnopKind::Negate, Type::Prim(p)) if p.is_numeric() => {
                p.promote(*p).map(Type::Prim)
            },
            (UnopKind::Not, Type::Prim(Prim::Boolean)) => Some(Type::boolean()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinopKind {
    Plus,
    Minus,
    Times,
    Divide,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinopKind {
    pub const ALL: [BinopKind; 13] = [
        BinopKind::Plus,
        BinopKind::Minus,
        BinopKind::Times,
        BinopKind::Divide,
        BinopKind::Rem,
        BinopKind::Eq,
        BinopKind::Ne,
        BinopKind::Lt,
        BinopKind::Le,
        BinopKind::Gt,
        BinopKind::Ge,
        BinopKind::And,
        BinopKind::Or,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            BinopKind::Plus => "+",
            BinopKind::Minus => "-",
            BinopKind::Times => "*",
            BinopKind::Divide => "/",
            BinopKind::Rem => "%",
            BinopKind::Eq => "==",
            BinopKind::Ne => "!=",
            BinopKind::Lt => "<",
            BinopKind::Le => "<=",
            BinopKind::Gt => ">",
            BinopKind::Ge => ">=",
            BinopKind::And => "&&",
            BinopKind::Or => "||",
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            BinopKind::Times | BinopKind::Divide | BinopKind::Rem => 60,
            BinopKind::Plus | BinopKind::Minus => 50,
            BinopKind::Lt | BinopKind::Le | BinopKind::Gt | BinopKind::Ge => 40,
            BinopKind::Eq | BinopKind::Ne => 30,
            BinopKind::And => 20,
            BinopKind::Or => 10,
        }
    }

    /// Whether swapping the operands cannot change the result. `+` on
    /// strings is concatenation and therefore excluded.
    pub fn is_commutative(self, l: &Type, r: &Type) -> bool {
        match self {
            BinopKind::Plus => !l.is_string() && !r.is_string(),
            BinopKind::Times | BinopKind::Eq | BinopKind::Ne | BinopKind::And | BinopKind::Or => true,
            _ => false,
        }
    }

    pub fn result_type(self, l: &Type, r: &Type) -> Option<Type> {
        let numeric = || match (l, r) {
            (Type::Prim(a), Type::Prim(b)) => a.promote(*b),
            _ => None,
        };

        match self {
            BinopKind::Plus if l.is_string() || r.is_string() => {
                match (l, r) {
                    (Type::Null, Type::Null) => None,
                    _ => Some(Type::string()),
                }
            },
            BinopKind::Plus
            | BinopKind::Minus
            | BinopKind::Times
            | BinopKind::Divide
            | BinopKind::Rem => numeric().map(Type::Prim),
            BinopKind::Lt | BinopKind::Le | BinopKind::Gt | BinopKind::Ge => {
                numeric().map(|_| Type::boolean())
            },
            BinopKind::Eq | BinopKind::Ne => {
                let ok = numeric().is_some()
                    || (l.is_boolean() && r.is_boolean())
                    || (l.is_reference() && r.is_reference());

                ok.then(Type::boolean)
            },
            BinopKind::And | BinopKind::Or => {
                (l.is_boolean() && r.is_boolean()).then(Type::boolean)
            },
        }
    }
}

/// A literal constant. Doubles are kept as bits so literals hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Null,
    Bool(bool),
    Char(char),
    Int(i32),
    Long(i64),
    Double(u64),
    Str(Rc<str>),
}

impl Literal {
    pub fn from_value(value: &Value) -> Option<Self> {
        let lit = match value {
            Value::Null => Literal::Null,
            Value::Bool(b) => Literal::Bool(*b),
            Value::Char(c) => Literal::Char(*c),
            Value::Int(x) => Literal::Int(*x),
            Value::Long(x) => Literal::Long(*x),
            Value::Double(x) => Literal::Double(x.to_bits()),
            Value::Str(s) => Literal::Str(s.clone()),
            Value::Object(_) | Value::Array(_) => return None,
        };

        Some(lit)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Char(c) => Value::Char(*c),
            Literal::Int(x) => Value::Int(*x),
            Literal::Long(x) => Value::Long(*x),
            Literal::Double(bits) => Value::Double(f64::from_bits(*bits)),
            Literal::Str(s) => Value::Str(s.clone()),
        }
    }

    pub fn ty(&self) -> Type {
        match self {
            Literal::Null => Type::Null,
            Literal::Bool(_) => Type::boolean(),
            Literal::Char(_) => Type::Prim(Prim::Char),
            Literal::Int(_) => Type::int(),
            Literal::Long(_) => Type::Prim(Prim::Long),
            Literal::Double(_) => Type::Prim(Prim::Double),
            Literal::Str(_) => Type::string(),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Char(c) => write!(f, "'{}'", escape(&c.to_string(), '\'')),
            Literal::Int(x) => write!(f, "{x}"),
            Literal::Long(x) => write!(f, "{x}L"),
            Literal::Double(_) => write!(f, "{}", self.to_value()),
            Literal::Str(s) => write!(f, "\"{}\"", escape(s, '"')),
        }
    }
}

fn escape(s: &str, quote: char) -> String {
    let mut out = String::with_capacity(s.len());

    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            },
            c => out.push(c),
        }
    }

    out
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprKind {
    Literal(Literal),
    Var(Rc<str>),
    /// A type used as the receiver of a static member, e.g. `Math`.
    StaticRef(Type),
    This,
    Field(Expr, Rc<str>),
    Index(Expr, Expr),
    Binop(BinopKind, Expr, Expr),
    Unop(UnopKind, Expr),
    Call(Expr, Rc<str>, Vec<Expr>),
    New(Type, Vec<Expr>),
    Cast(Type, Expr),
    Paren(Expr),
}

const PREC_UNARY: u8 = 90;
const PREC_POSTFIX: u8 = 100;

/// An immutable expression. Cloning is cheap; equality and hashing are
/// structural and ignore node identity.
#[derive(Clone)]
pub struct Expr {
    id: ExprId,
    kind: Rc<ExprKind>,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            id: ExprId::fresh(),
            kind: Rc::new(kind),
        }
    }

    pub fn literal(lit: Literal) -> Self {
        Expr::new(ExprKind::Literal(lit))
    }

    pub fn int(x: i32) -> Self {
        Expr::literal(Literal::Int(x))
    }

    pub fn null() -> Self {
        Expr::literal(Literal::Null)
    }

    pub fn var(name: &str) -> Self {
        Expr::new(ExprKind::Var(name.into()))
    }

    pub fn this() -> Self {
        Expr::new(ExprKind::This)
    }

    pub fn static_ref(ty: Type) -> Self {
        Expr::new(ExprKind::StaticRef(ty))
    }

    pub fn field(receiver: Expr, name: &str) -> Self {
        Expr::new(ExprKind::Field(receiver.wrap_below(PREC_POSTFIX), name.into()))
    }

    pub fn index(array: Expr, index: Expr) -> Self {
        Expr::new(ExprKind::Index(array.wrap_below(PREC_POSTFIX), index))
    }

    pub fn binop(op: BinopKind, l: Expr, r: Expr) -> Self {
        let prec = op.precedence();

        Expr::new(ExprKind::Binop(op, l.wrap_below(prec), r.wrap_below(prec + 1)))
    }

    pub fn unop(op: UnopKind, e: Expr) -> Self {
        Expr::new(ExprKind::Unop(op, e.wrap_below(PREC_UNARY)))
    }

    pub fn call(receiver: Expr, name: &str, args: Vec<Expr>) -> Self {
        Expr::new(ExprKind::Call(receiver.wrap_below(PREC_POSTFIX), name.into(), args))
    }

    pub fn new_instance(ty: Type, args: Vec<Expr>) -> Self {
        Expr::new(ExprKind::New(ty, args))
    }

    pub fn cast(ty: Type, e: Expr) -> Self {
        Expr::new(ExprKind::Cast(ty, e.wrap_below(PREC_UNARY)))
    }

    pub fn paren(e: Expr) -> Self {
        Expr::new(ExprKind::Paren(e))
    }

    fn wrap_below(self, prec: u8) -> Expr {
        if self.precedence() < prec {
            Expr::paren(self)
        } else {
            self
        }
    }

    pub fn id(&self) -> ExprId {
        self.id
    }

    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    pub fn precedence(&self) -> u8 {
        match &*self.kind {
            ExprKind::Binop(op, _, _) => op.precedence(),
            ExprKind::Unop(_, _) | ExprKind::Cast(_, _) => PREC_UNARY,
            _ => PREC_POSTFIX,
        }
    }

    pub fn children(&self) -> Vec<&Expr> {
        match &*self.kind {
            ExprKind::Literal(_) | ExprKind::Var(_) | ExprKind::StaticRef(_) | ExprKind::This => {
                Vec::new()
            },
            ExprKind::Field(recv, _) => vec![recv],
            ExprKind::Index(arr, idx) => vec![arr, idx],
            ExprKind::Binop(_, l, r) => vec![l, r],
            ExprKind::Unop(_, e) | ExprKind::Cast(_, e) | ExprKind::Paren(e) => vec![e],
            ExprKind::Call(recv, _, args) => std::iter::once(recv).chain(args).collect(),
            ExprKind::New(_, args) => args.iter().collect(),
        }
    }

    /// Rebuilds this node over new children, given in `children()` order.
    /// Parentheses are re-derived, so a substituted operand of lower
    /// precedence is wrapped as needed.
    pub fn with_children(&self, children: Vec<Expr>) -> Expr {
        debug_assert_eq!(children.len(), self.children().len());
        let mut it = children.into_iter();
        let mut next = || it.next().unwrap_or_else(Expr::null);

        match &*self.kind {
            ExprKind::Literal(_) | ExprKind::Var(_) | ExprKind::StaticRef(_) | ExprKind::This => {
                self.clone()
            },
            ExprKind::Field(_, name) => Expr::field(next(), name),
            ExprKind::Index(_, _) => {
                let arr = next();
                Expr::index(arr, next())
            },
            ExprKind::Binop(op, _, _) => {
                let l = next();
                Expr::binop(*op, l, next())
            },
            ExprKind::Unop(op, _) => Expr::unop(*op, next()),
            ExprKind::Call(_, name, args) => {
                let recv = next();
                let args = (0..args.len()).map(|_| next()).collect();
                Expr::call(recv, name, args)
            },
            ExprKind::New(ty, args) => {
                let args = (0..args.len()).map(|_| next()).collect();
                Expr::new_instance(ty.clone(), args)
            },
            ExprKind::Cast(ty, _) => Expr::cast(ty.clone(), next()),
            ExprKind::Paren(_) => {
                let inner = next();
                if inner.precedence() == PREC_POSTFIX {
                    inner
                } else {
                    Expr::paren(inner)
                }
            },
        }
    }

    /// Syntactic depth. Leaves are 0; parentheses and casts are free.
    pub fn raw_depth(&self) -> usize {
        let below = self.children()
            .into_iter()
            .map(Expr::raw_depth)
            .max();

        match &*self.kind {
            ExprKind::Paren(_) | ExprKind::Cast(_, _) => below.unwrap_or(0),
            ExprKind::Literal(_) | ExprKind::Var(_) | ExprKind::StaticRef(_) | ExprKind::This => 0,
            _ => below.map_or(1, |d| d + 1),
        }
    }

    /// Pre-order traversal.
    pub fn walk<F: FnMut(&Expr)>(&self, f: &mut F) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    pub fn contains_cast(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| found |= matches!(e.kind(), ExprKind::Cast(_, _)));
        found
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match &*self.kind {
            ExprKind::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        self.as_literal().is_some()
    }

    pub fn as_var(&self) -> Option<&str> {
        match &*self.kind {
            ExprKind::Var(name) => Some(name),
            _ => None,
        }
    }

    /// Strips parentheses.
    pub fn unparen(&self) -> &Expr {
        match &*self.kind {
            ExprKind::Paren(e) => e.unparen(),
            _ => self,
        }
    }

    /// Rewrites the tree bottom-up; `f` may replace any rebuilt node.
    pub fn rewrite<F: FnMut(&Expr) -> Option<Expr>>(&self, f: &mut F) -> Expr {
        let children = self.children();
        let node = if children.is_empty() {
            self.clone()
        } else {
            let rebuilt = children.into_iter().map(|c| c.rewrite(f)).collect();
            self.with_children(rebuilt)
        };

        f(&node).unwrap_or(node)
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.kind, &other.kind) || self.kind == other.kind
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state)
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{self}`")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |f: &mut fmt::Formatter<'_>, args: &[Expr]| {
            for (idx, arg) in args.iter().enumerate() {
                if idx > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{arg}")?;
            }
            Ok(())
        };

        match &*self.kind {
            ExprKind::Literal(lit) => write!(f, "{lit}"),
            ExprKind::Var(name) => f.write_str(name),
            ExprKind::StaticRef(ty) => write!(f, "{ty}"),
            ExprKind::This => f.write_str("this"),
            ExprKind::Field(recv, name) => write!(f, "{recv}.{name}"),
            ExprKind::Index(arr, idx) => write!(f, "{arr}[{idx}]"),
            ExprKind::Binop(op, l, r) => write!(f, "{l} {} {r}", op.symbol()),
            ExprKind::Unop(op, e) => write!(f, "{}{e}", op.symbol()),
            ExprKind::Call(recv, name, args) => {
                write!(f, "{recv}.{name}(")?;
                list(f, args)?;
                f.write_str(")")
            },
            ExprKind::New(ty, args) => {
                write!(f, "new {ty}(")?;
                list(f, args)?;
                f.write_str(")")
            },
            ExprKind::Cast(ty, e) => write!(f, "({ty}) {e}"),
            ExprKind::Paren(e) => write!(f, "({e})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_with_derived_parentheses() {
        let x = Expr::var("x");
        let y = Expr::var("y");
        let sum = Expr::binop(BinopKind::Plus, x.clone(), y.clone());
        let prod = Expr::binop(BinopKind::Times, sum.clone(), Expr::int(2));

        assert_eq!(prod.to_string(), "(x + y) * 2");
        assert_eq!(Expr::call(sum.clone(), "toString", vec![]).to_string(), "(x + y).toString()");
        assert_eq!(Expr::unop(UnopKind::Negate, sum).to_string(), "-(x + y)");

        let nested = Expr::binop(
            BinopKind::Minus,
            x.clone(),
            Expr::binop(BinopKind::Minus, y, Expr::int(1)),
        );
        assert_eq!(nested.to_string(), "x - (y - 1)");
    }

    #[test]
    fn depth_ignores_parens_and_casts() {
        let s = Expr::var("s");
        let upper = Expr::call(s.clone(), "toUpperCase", vec![]);
        let twice = Expr::binop(BinopKind::Plus, upper.clone(), upper);

        assert_eq!(s.raw_depth(), 0);
        assert_eq!(twice.raw_depth(), 2);

        let cast = Expr::cast(Type::string(), Expr::var("o"));
        assert_eq!(cast.raw_depth(), 0);
        assert!(cast.contains_cast());
        assert_eq!(Expr::call(Expr::static_ref(Type::class("Math")), "abs", vec![s]).raw_depth(), 1);
    }

    #[test]
    fn equality_is_structural() {
        let a = Expr::binop(BinopKind::Plus, Expr::var("x"), Expr::int(1));
        let b = Expr::binop(BinopKind::Plus, Expr::var("x"), Expr::int(1));

        assert_ne!(a.id(), b.id());
        assert_eq!(a, b);
    }

    #[test]
    fn ids_stay_unique_past_u32() {
        NEXT_ID.fetch_max(u64::from(u32::MAX), Ordering::Relaxed);
        let a = Expr::var("a");
        let b = Expr::var("b");

        assert!(a.id().0 >= u64::from(u32::MAX));
        assert!(a.id() < b.id());
    }

    #[test]
    fn with_children_rewraps() {
        let prod = Expr::binop(BinopKind::Times, Expr::var("len"), Expr::int(2));
        let sum = Expr::binop(BinopKind::Plus, Expr::var("a"), Expr::var("b"));
        let rebuilt = prod.with_children(vec![sum, Expr::int(2)]);

        assert_eq!(rebuilt.to_string(), "(a + b) * 2");
    }

    #[test]
    fn binop_typing() {
        let int = Type::int();
        let s = Type::string();

        assert_eq!(BinopKind::Plus.result_type(&s, &int), Some(Type::string()));
        assert_eq!(BinopKind::Lt.result_type(&int, &int), Some(Type::boolean()));
        assert_eq!(BinopKind::And.result_type(&int, &int), None);
        assert_eq!(BinopKind::Eq.result_type(&s, &Type::Null), Some(Type::boolean()));
        assert!(!BinopKind::Plus.is_commutative(&s, &s));
        assert!(BinopKind::Plus.is_commutative(&int, &int));
    }
}
