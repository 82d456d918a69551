//! Statement tree produced by the compiler and rendered per dialect.

use warden_proto::{AggregateFunction, LogicalOp};

use crate::query::function::FunctionKind;

/// A `SELECT` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// Selected expressions with their output aliases.
    pub columns: Vec<SelectItem>,
    /// Base table.
    pub from: TableRef,
    /// Joined tables, in dependency order.
    pub joins: Vec<Join>,
    /// `WHERE` clause.
    pub filter: Option<Predicate>,
    /// `GROUP BY` expressions.
    pub group_by: Vec<Expr>,
    /// `HAVING` clause.
    pub having: Option<Predicate>,
    /// `ORDER BY` entries.
    pub order_by: Vec<OrderBy>,
    /// Row limit.
    pub limit: Option<u64>,
    /// Rows skipped.
    pub offset: Option<u64>,
}

impl Select {
    /// A bare select of `source` aliased as `alias`.
    pub fn from(source: Source, alias: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            from: TableRef {
                source,
                alias: alias.into(),
            },
            joins: Vec::new(),
            filter: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}

/// A selected expression.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    /// Output alias, `None` for unaliased expressions such as `1`.
    pub alias: Option<String>,
}

/// A table in a `FROM` or `JOIN` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub source: Source,
    pub alias: String,
}

/// What a table reference reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// A named table.
    Table(String),
    /// A derived table, used for joins restricted by row permissions.
    Derived(Box<Select>),
}

/// A `LEFT JOIN`.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: TableRef,
    pub on: Predicate,
}

/// An `ORDER BY` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub descending: bool,
}

/// A value expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `alias.column`.
    Column { table: String, column: String },
    /// `alias.*`.
    AllColumns { table: String },
    /// A bound parameter, 1-based.
    Param(usize),
    /// Integer literal.
    Integer(i64),
    /// `LOWER(expr)`.
    Lower(Box<Expr>),
    /// Date or time part extraction.
    DatePart { part: FunctionKind, expr: Box<Expr> },
    /// Aggregate call; `arg: None` is `COUNT(*)`.
    Aggregate {
        function: AggregateFunction,
        arg: Option<Box<Expr>>,
    },
    /// `CASE WHEN .. THEN .. [ELSE ..] END`.
    Case {
        when: Box<Predicate>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    /// Scalar sub-select.
    Subquery(Box<Select>),
}

impl Expr {
    /// Column reference.
    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Keep the value only where `gate` holds, `NULL` elsewhere.
    pub fn gated(self, gate: Option<Predicate>) -> Self {
        match gate {
            Some(when) => Expr::Case {
                when: Box::new(when),
                then: Box::new(self),
                otherwise: None,
            },
            None => self,
        }
    }

    /// `1` where `gate` holds, `0` elsewhere.
    pub fn flag(gate: Predicate) -> Self {
        Expr::Case {
            when: Box::new(gate),
            then: Box::new(Expr::Integer(1)),
            otherwise: Some(Box::new(Expr::Integer(0))),
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// A boolean expression.
///
/// Negation is a flag on the node itself, never a rewrite of the subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub kind: PredicateKind,
    pub negate: bool,
}

/// Shape of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateKind {
    /// `1 = 1` or `1 = 0`.
    Constant(bool),
    Compare { lhs: Expr, op: CompareOp, rhs: Expr },
    InList { expr: Expr, list: Vec<Expr> },
    Between { expr: Expr, low: Expr, high: Expr },
    Like { expr: Expr, pattern: Expr },
    IsNull(Expr),
    Exists(Box<Select>),
    Logical { op: LogicalOp, children: Vec<Predicate> },
}

impl Predicate {
    pub fn new(kind: PredicateKind) -> Self {
        Self {
            kind,
            negate: false,
        }
    }

    pub fn constant(value: bool) -> Self {
        Self::new(PredicateKind::Constant(value))
    }

    pub fn compare(lhs: Expr, op: CompareOp, rhs: Expr) -> Self {
        Self::new(PredicateKind::Compare { lhs, op, rhs })
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Self::compare(lhs, CompareOp::Eq, rhs)
    }

    pub fn logical(op: LogicalOp, children: Vec<Predicate>) -> Self {
        Self::new(PredicateKind::Logical { op, children })
    }

    /// Conjunction that drops `1 = 1` terms and unwraps single children.
    pub fn all(children: impl IntoIterator<Item = Predicate>) -> Self {
        let mut children: Vec<Predicate> = children
            .into_iter()
            .filter(|p| !(p.kind == PredicateKind::Constant(true) && !p.negate))
            .collect();
        match children.len() {
            0 => Self::constant(true),
            1 => children.remove(0),
            _ => Self::logical(LogicalOp::And, children),
        }
    }

    /// Disjunction that unwraps single children; empty is `1 = 0`.
    pub fn any(children: impl IntoIterator<Item = Predicate>) -> Self {
        let mut children: Vec<Predicate> = children.into_iter().collect();
        match children.len() {
            0 => Self::constant(false),
            1 => children.remove(0),
            _ => Self::logical(LogicalOp::Or, children),
        }
    }

    /// Flip the negation flag.
    pub fn negate(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    /// Whether this is the unnegated `1 = 1`.
    pub fn is_true(&self) -> bool {
        self.kind == PredicateKind::Constant(true) && !self.negate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negate_round_trip() {
        let p = Predicate::eq(Expr::column("t", "a"), Expr::Param(1));
        let twice = p.clone().negate().negate();
        assert_eq!(twice, p);
        assert!(!twice.negate);
    }

    #[test]
    fn test_all_and_any() {
        let a = Predicate::eq(Expr::column("t", "a"), Expr::Param(1));
        assert_eq!(Predicate::all([Predicate::constant(true), a.clone()]), a);
        assert!(Predicate::all(Vec::new()).is_true());
        assert_eq!(Predicate::any(Vec::new()), Predicate::constant(false));
        assert!(matches!(
            Predicate::all([a.clone(), a]).kind,
            PredicateKind::Logical { op: LogicalOp::And, .. }
        ));
    }
}
