//! Rendering of statement trees to SQL text.

use serde::Serialize;
use warden_proto::{AggregateFunction, LogicalOp, Value};

use super::dialect::Dialect;
use super::ir::{Expr, Join, Predicate, PredicateKind, Select, Source, TableRef};

/// A rendered statement and the values bound to its placeholders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    /// Statement text.
    pub sql: String,
    /// Bound values. For positional dialects there is one entry per
    /// placeholder occurrence, otherwise one per distinct index.
    pub parameters: Vec<Value>,
}

/// Render `select` with `params` as its bound values.
pub fn render(dialect: Dialect, select: &Select, params: &[Value]) -> CompiledQuery {
    let mut f = Formatter {
        dialect,
        dst: String::new(),
        params,
        positional: Vec::new(),
    };
    f.select(select);

    let parameters = if dialect.positional() {
        f.positional
    } else {
        params.to_vec()
    };
    CompiledQuery {
        sql: f.dst,
        parameters,
    }
}

struct Formatter<'a> {
    dialect: Dialect,
    /// Where to write the serialized SQL.
    dst: String,
    params: &'a [Value],
    /// Values in placeholder order, for positional dialects.
    positional: Vec<Value>,
}

impl Formatter<'_> {
    fn push(&mut self, s: &str) {
        self.dst.push_str(s);
    }

    fn ident(&mut self, name: &str) {
        let quoted = self.dialect.quote(name);
        self.push(&quoted);
    }

    fn select(&mut self, select: &Select) {
        self.push("SELECT ");
        if self.dialect == Dialect::Mssql && select.limit == Some(0) {
            self.push("TOP (0) ");
        }

        if select.columns.is_empty() {
            self.push("*");
        }
        for (i, item) in select.columns.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(&item.expr);
            if let Some(alias) = &item.alias {
                self.push(" AS ");
                self.ident(alias);
            }
        }

        self.push(" FROM ");
        self.table(&select.from);
        for join in &select.joins {
            self.join(join);
        }

        if let Some(filter) = select.filter.as_ref().filter(|p| !p.is_true()) {
            self.push(" WHERE ");
            self.predicate(filter);
        }

        if !select.group_by.is_empty() {
            self.push(" GROUP BY ");
            self.expr_list(&select.group_by);
        }

        if let Some(having) = &select.having {
            self.push(" HAVING ");
            self.predicate(having);
        }

        if !select.order_by.is_empty() {
            self.push(" ORDER BY ");
            for (i, entry) in select.order_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.expr(&entry.expr);
                self.push(if entry.descending { " DESC" } else { " ASC" });
            }
        }

        let pagination =
            self.dialect
                .pagination(select.limit, select.offset, !select.order_by.is_empty());
        self.push(&pagination);
    }

    fn table(&mut self, table: &TableRef) {
        match &table.source {
            Source::Table(name) => {
                self.ident(name);
                if *name == table.alias {
                    return;
                }
            }
            Source::Derived(select) => {
                self.push("(");
                self.select(select);
                self.push(")");
            }
        }
        self.push(" AS ");
        self.ident(&table.alias);
    }

    fn join(&mut self, join: &Join) {
        self.push(" LEFT JOIN ");
        self.table(&join.table);
        self.push(" ON ");
        self.predicate(&join.on);
    }

    fn expr_list(&mut self, exprs: &[Expr]) {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(expr);
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Column { table, column } => {
                self.ident(table);
                self.push(".");
                self.ident(column);
            }
            Expr::AllColumns { table } => {
                self.ident(table);
                self.push(".*");
            }
            Expr::Param(index) => {
                if self.dialect.positional() {
                    let value = index
                        .checked_sub(1)
                        .and_then(|i| self.params.get(i))
                        .cloned()
                        .unwrap_or(Value::Null);
                    self.positional.push(value);
                }
                let placeholder = self.dialect.placeholder(*index);
                self.push(&placeholder);
            }
            Expr::Integer(i) => self.push(&i.to_string()),
            Expr::Lower(inner) => {
                self.push("LOWER(");
                self.expr(inner);
                self.push(")");
            }
            Expr::DatePart { part, expr } => {
                // Render the argument on its own so placeholders stay in order.
                let outer = std::mem::take(&mut self.dst);
                self.expr(expr);
                let inner = std::mem::replace(&mut self.dst, outer);
                let rendered = self.dialect.date_part(*part, &inner);
                self.push(&rendered);
            }
            Expr::Aggregate { function, arg } => {
                let (name, distinct) = match function {
                    AggregateFunction::Count | AggregateFunction::CountAll => ("COUNT", false),
                    AggregateFunction::CountDistinct => ("COUNT", true),
                    AggregateFunction::Sum => ("SUM", false),
                    AggregateFunction::SumDistinct => ("SUM", true),
                    AggregateFunction::Avg => ("AVG", false),
                    AggregateFunction::AvgDistinct => ("AVG", true),
                    AggregateFunction::Min => ("MIN", false),
                    AggregateFunction::Max => ("MAX", false),
                };
                self.push(name);
                self.push("(");
                match arg {
                    Some(arg) => {
                        if distinct {
                            self.push("DISTINCT ");
                        }
                        self.expr(arg);
                    }
                    None => self.push("*"),
                }
                self.push(")");
            }
            Expr::Case {
                when,
                then,
                otherwise,
            } => {
                self.push("CASE WHEN ");
                self.predicate(when);
                self.push(" THEN ");
                self.expr(then);
                if let Some(otherwise) = otherwise {
                    self.push(" ELSE ");
                    self.expr(otherwise);
                }
                self.push(" END");
            }
            Expr::Subquery(select) => {
                self.push("(");
                self.select(select);
                self.push(")");
            }
        }
    }

    fn predicate(&mut self, predicate: &Predicate) {
        let negate = predicate.negate;
        match &predicate.kind {
            PredicateKind::Constant(value) => {
                self.push(if *value != negate { "1 = 1" } else { "1 = 0" });
            }
            PredicateKind::Compare { lhs, op, rhs } => {
                if negate {
                    self.push("NOT (");
                }
                self.expr(lhs);
                self.push(" ");
                self.push(op.as_str());
                self.push(" ");
                self.expr(rhs);
                if negate {
                    self.push(")");
                }
            }
            PredicateKind::InList { expr, list } => {
                self.expr(expr);
                self.push(if negate { " NOT IN (" } else { " IN (" });
                self.expr_list(list);
                self.push(")");
            }
            PredicateKind::Between { expr, low, high } => {
                self.expr(expr);
                self.push(if negate { " NOT BETWEEN " } else { " BETWEEN " });
                self.expr(low);
                self.push(" AND ");
                self.expr(high);
            }
            PredicateKind::Like { expr, pattern } => {
                self.expr(expr);
                self.push(if negate { " NOT LIKE " } else { " LIKE " });
                self.expr(pattern);
            }
            PredicateKind::IsNull(expr) => {
                self.expr(expr);
                self.push(if negate { " IS NOT NULL" } else { " IS NULL" });
            }
            PredicateKind::Exists(select) => {
                self.push(if negate { "NOT EXISTS (" } else { "EXISTS (" });
                self.select(select);
                self.push(")");
            }
            PredicateKind::Logical { op, children } => {
                if negate {
                    self.push("NOT (");
                }
                if children.is_empty() {
                    self.push(match op {
                        LogicalOp::And => "1 = 1",
                        LogicalOp::Or => "1 = 0",
                    });
                }
                let separator = match op {
                    LogicalOp::And => " AND ",
                    LogicalOp::Or => " OR ",
                };
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        self.push(separator);
                    }
                    let grouped = matches!(child.kind, PredicateKind::Logical { .. }) && !child.negate;
                    if grouped {
                        self.push("(");
                    }
                    self.predicate(child);
                    if grouped {
                        self.push(")");
                    }
                }
                if negate {
                    self.push(")");
                }
            }
        }
    }
}
