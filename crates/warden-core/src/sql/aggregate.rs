//! Grouped and aggregated root reads.
//!
//! Output keys are the group fields followed by one key per aggregate:
//! `count->id`, `sum->price`, or the bare function name for `count: ["*"]`
//! and `countAll`. Aggregated columns are case-gated like plain fields, so
//! values hidden from the caller never reach an aggregate.

use warden_proto::{AggregateFunction, Filter};

use crate::catalog::FieldType;
use crate::error::{Error, Result};
use crate::query::ast::{Level, Node};
use crate::query::function::FunctionKind;
use crate::query::validate::{resolve_having, HavingTarget};

use super::alias::AliasScope;
use super::compiler::{aggregate_key, pagination, Base, Columns, Compilation};
use super::ir::{Expr, Predicate, Select, Source};

impl Compilation<'_> {
    /// Select of an aggregate root level.
    pub fn aggregate_select(&mut self, level: &Level, default_limit: Option<u64>) -> Result<Select> {
        let base = Base {
            collection: level.collection.clone(),
            alias: level.collection.clone(),
        };
        let mut joins = Vec::new();
        let mut outputs = Columns::default();
        let mut group_by = Vec::new();

        for child in &level.children {
            let gate = self.case_gate(&mut joins, &base, &level.cases, child.when_case())?;
            let expr = match child {
                Node::Field(node) => Expr::column(&base.alias, &node.name),
                Node::Function(node) => {
                    self.function_expr(&base, node.function, &node.target, AliasScope::Read)?
                }
                _ => continue,
            }
            .gated(gate);
            group_by.push(expr.clone());
            outputs.field(child.field_key().to_string(), expr);
        }

        for (function, fields) in level.query.aggregate.iter().flatten() {
            if *function == AggregateFunction::CountAll {
                outputs.field(
                    function.as_str().to_string(),
                    Expr::Aggregate {
                        function: *function,
                        arg: None,
                    },
                );
                continue;
            }
            for field in fields {
                if field == "*" {
                    outputs.field(
                        function.as_str().to_string(),
                        Expr::Aggregate {
                            function: *function,
                            arg: None,
                        },
                    );
                    continue;
                }
                let gate = self.field_gate(&mut joins, &base, field)?;
                let arg = Expr::column(&base.alias, field).gated(gate);
                outputs.field(
                    aggregate_key(*function, field),
                    Expr::Aggregate {
                        function: *function,
                        arg: Some(Box::new(arg)),
                    },
                );
            }
        }

        let conditions = self.where_terms(&mut joins, &base, level)?;
        let having = match &level.query.having {
            Some(having) => Some(self.having(level, &outputs, having)?),
            None => None,
        };
        let order_by = self.order_by(&mut joins, &base, level, Some(&outputs))?;
        let (limit, offset) = pagination(&level.query, default_limit);

        let mut select = Select::from(Source::Table(level.collection.clone()), base.alias);
        select.columns = outputs.into_items();
        select.joins = joins;
        select.filter = Some(Predicate::all(conditions));
        select.group_by = group_by;
        select.having = having;
        select.order_by = order_by;
        select.limit = limit;
        select.offset = offset;
        Ok(select)
    }

    fn having(&mut self, level: &Level, outputs: &Columns, filter: &Filter) -> Result<Predicate> {
        match filter {
            Filter::Empty => Ok(Predicate::constant(true)),
            Filter::Negate(inner) => Ok(self.having(level, outputs, inner)?.negate()),
            Filter::Logical { op, children } => {
                let mut predicates = Vec::with_capacity(children.len());
                for child in children {
                    predicates.push(self.having(level, outputs, child)?);
                }
                Ok(Predicate::logical(*op, predicates))
            }
            Filter::Condition(condition) => {
                let (key, ty) = match resolve_having(level, &condition.path)? {
                    HavingTarget::Group(name) => {
                        let ty = self.group_type(level, &name)?;
                        (name, ty)
                    }
                    HavingTarget::Aggregate(function, field) => {
                        let key = if field == "*" || function == AggregateFunction::CountAll {
                            function.as_str().to_string()
                        } else {
                            aggregate_key(function, &field)
                        };
                        let ty = match function {
                            AggregateFunction::Count
                            | AggregateFunction::CountDistinct
                            | AggregateFunction::CountAll => FieldType::BigInteger,
                            AggregateFunction::Avg | AggregateFunction::AvgDistinct => FieldType::Float,
                            _ => self.schema.require_field(&level.collection, &field)?.field_type.clone(),
                        };
                        (key, ty)
                    }
                };
                let expr = outputs.get(&key).cloned().ok_or_else(|| {
                    Error::AggregateValidation(format!("having refers to '{key}', which is not selected"))
                })?;
                self.operator(expr, &ty, condition.operator, &condition.value)
            }
        }
    }

    fn group_type(&self, level: &Level, name: &str) -> Result<FieldType> {
        match level.child(name) {
            Some(Node::Field(node)) => Ok(self
                .schema
                .require_field(&level.collection, &node.name)?
                .field_type
                .clone()),
            Some(Node::Function(node)) if node.function == FunctionKind::Count => {
                Ok(FieldType::BigInteger)
            }
            Some(Node::Function(_)) => Ok(FieldType::Integer),
            _ => Err(Error::AggregateValidation(format!(
                "'{name}' is not a group-by field"
            ))),
        }
    }
}
