//! Filter trees to predicates.
//!
//! Conditions through many-to-one hops join the related table. A condition
//! through a one-to-many hop becomes a correlated `EXISTS` over the related
//! collection; sibling conditions under the same one-to-many prefix share one
//! `EXISTS`. Negation only flips the flag of the predicate it wraps, so
//! `_none` reads as `NOT EXISTS`.

use indexmap::IndexMap;
use uuid::Uuid;
use warden_proto::{Condition, Filter, Operator, Value};

use crate::catalog::{FieldType, RelationKind};
use crate::error::{Error, Result};
use crate::query::ast::Level;
use crate::query::path::{resolve_path, split_scope};

use super::alias::AliasScope;
use super::compiler::{correlate, Base, Compilation};
use super::ir::{CompareOp, Expr, Join, Predicate, PredicateKind, Select, SelectItem, Source};

enum Slot {
    Done(Predicate),
    Exists(Vec<String>),
}

impl Compilation<'_> {
    /// Convert a filter evaluated against rows of `base`.
    pub fn filter(
        &mut self,
        joins: &mut Vec<Join>,
        base: &Base,
        filter: &Filter,
        scope: AliasScope,
    ) -> Result<Predicate> {
        match filter {
            Filter::Empty => Ok(Predicate::constant(true)),
            Filter::Condition(condition) => self.condition(joins, base, condition, scope),
            Filter::Negate(inner) => Ok(self.filter(joins, base, inner, scope)?.negate()),
            Filter::Logical { op, children } => {
                let mut slots = Vec::with_capacity(children.len());
                let mut groups: IndexMap<Vec<String>, Vec<Filter>> = IndexMap::new();

                for child in children {
                    if let Filter::Condition(condition) = child {
                        if let Some(hop) = self.many_hop(&base.collection, &condition.path) {
                            let prefix = condition.path[..=hop].to_vec();
                            if !groups.contains_key(&prefix) {
                                slots.push(Slot::Exists(prefix.clone()));
                            }
                            groups.entry(prefix).or_default().push(remainder(condition, hop));
                            continue;
                        }
                    }
                    slots.push(Slot::Done(self.filter(joins, base, child, scope)?));
                }

                let mut predicates = Vec::with_capacity(slots.len());
                for slot in slots {
                    match slot {
                        Slot::Done(predicate) => predicates.push(predicate),
                        Slot::Exists(prefix) => {
                            let mut inner = groups.swap_remove(&prefix).unwrap_or_default();
                            let inner = if inner.len() == 1 {
                                inner.remove(0)
                            } else {
                                Filter::Logical {
                                    op: *op,
                                    children: inner,
                                }
                            };
                            predicates.push(self.exists(joins, base, &prefix, &inner, scope)?);
                        }
                    }
                }
                Ok(Predicate::logical(*op, predicates))
            }
        }
    }

    fn condition(
        &mut self,
        joins: &mut Vec<Join>,
        base: &Base,
        condition: &Condition,
        scope: AliasScope,
    ) -> Result<Predicate> {
        if let Some(hop) = self.many_hop(&base.collection, &condition.path) {
            let inner = remainder(condition, hop);
            return self.exists(joins, base, &condition.path[..=hop], &inner, scope);
        }

        let schema = self.schema;
        let resolved = resolve_path(schema, &base.collection, &condition.path)?;
        let (target, mut terms) = self.path_expr(joins, base, &resolved, scope)?;
        terms.push(self.operator(target, &resolved.value_type, condition.operator, &condition.value)?);
        Ok(Predicate::all(terms))
    }

    /// Index of the first one-to-many hop of a path, if it is not the leaf.
    fn many_hop(&self, collection: &str, path: &[String]) -> Option<usize> {
        let schema = self.schema;
        let mut current = collection.to_string();
        for (index, segment) in path.iter().enumerate().take(path.len().saturating_sub(1)) {
            let (field, scope) = split_scope(segment);
            let relation = schema.relation(&current, field)?;
            current = match relation.kind {
                RelationKind::O2M => return Some(index),
                RelationKind::A2O => scope?.to_string(),
                RelationKind::M2O => relation.target()?.to_string(),
            };
        }
        None
    }

    /// `EXISTS` over the one-to-many relation ending `prefix`.
    fn exists(
        &mut self,
        joins: &mut Vec<Join>,
        base: &Base,
        prefix: &[String],
        inner: &Filter,
        scope: AliasScope,
    ) -> Result<Predicate> {
        let schema = self.schema;
        let Some((last, hops)) = prefix.split_last() else {
            return Err(Error::InvalidFilter("empty field path".into()));
        };

        let mut current = base.clone();
        let mut terms = Vec::new();
        for segment in hops {
            let (field, target) = split_scope(segment);
            if scope == AliasScope::Read {
                terms.extend(self.field_gate(joins, &current, field)?);
            }
            current = self.join(joins, &current, field, target, scope)?;
        }

        let (field, _) = split_scope(last);
        if scope == AliasScope::Read {
            terms.extend(self.field_gate(joins, &current, field)?);
        }
        let relation = schema.relation(&current.collection, field).ok_or_else(|| {
            Error::schema(format!("no relation for '{}.{field}'", current.collection))
        })?;
        let target = relation
            .target()
            .ok_or_else(|| Error::schema(format!("relation '{}.{field}' has no target", current.collection)))?;
        let (local, remote) = schema.join_columns(relation, target)?;

        let nested = Base {
            collection: target.to_string(),
            alias: self.aliases.fresh("s"),
        };
        let mut nested_joins = Vec::new();
        let mut conditions = correlate(&nested, &remote, &current, &local);
        if scope == AliasScope::Read {
            if let Some(row) = self.access.row_filter(target) {
                conditions.push(self.filter(&mut nested_joins, &nested, &row, AliasScope::System)?);
            }
        }
        conditions.push(self.filter(&mut nested_joins, &nested, inner, scope)?);

        let mut select = Select::from(Source::Table(target.to_string()), nested.alias);
        select.columns = vec![SelectItem {
            expr: Expr::Integer(1),
            alias: None,
        }];
        select.joins = nested_joins;
        select.filter = Some(Predicate::all(conditions));

        terms.push(Predicate::new(PredicateKind::Exists(Box::new(select))));
        Ok(Predicate::all(terms))
    }

    /// Apply an operator to `target`, binding operands as `ty`.
    pub fn operator(
        &mut self,
        target: Expr,
        ty: &FieldType,
        operator: Operator,
        value: &Value,
    ) -> Result<Predicate> {
        let compare = |this: &mut Self, op: CompareOp, target: Expr| {
            let index = this.params.bind(ty, coerce(ty, value));
            Predicate::compare(target, op, Expr::Param(index))
        };

        Ok(match operator {
            Operator::Eq if value.is_null() => Predicate::new(PredicateKind::IsNull(target)),
            Operator::Neq if value.is_null() => Predicate::new(PredicateKind::IsNull(target)).negate(),
            Operator::Eq => compare(self, CompareOp::Eq, target),
            Operator::Neq => compare(self, CompareOp::Ne, target),
            Operator::Lt => compare(self, CompareOp::Lt, target),
            Operator::Lte => compare(self, CompareOp::Le, target),
            Operator::Gt => compare(self, CompareOp::Gt, target),
            Operator::Gte => compare(self, CompareOp::Ge, target),

            Operator::In | Operator::Nin => {
                let items = operand_list(value);
                if items.is_empty() {
                    return Ok(Predicate::constant(operator == Operator::Nin));
                }
                let list = items
                    .iter()
                    .map(|item| Expr::Param(self.params.bind(ty, coerce(ty, item))))
                    .collect();
                let predicate = Predicate::new(PredicateKind::InList { expr: target, list });
                if operator == Operator::Nin {
                    predicate.negate()
                } else {
                    predicate
                }
            }

            Operator::Null | Operator::Nnull => {
                let predicate = Predicate::new(PredicateKind::IsNull(target));
                if (operator == Operator::Nnull) == is_truthy(value) {
                    predicate.negate()
                } else {
                    predicate
                }
            }

            Operator::Empty | Operator::Nempty => {
                let predicate = if ty.is_textual() {
                    let index = self.params.bind(ty, Value::String(String::new()));
                    Predicate::any([
                        Predicate::new(PredicateKind::IsNull(target.clone())),
                        Predicate::eq(target, Expr::Param(index)),
                    ])
                } else {
                    Predicate::new(PredicateKind::IsNull(target))
                };
                if (operator == Operator::Nempty) == is_truthy(value) {
                    predicate.negate()
                } else {
                    predicate
                }
            }

            Operator::Between | Operator::Nbetween => {
                let items = operand_list(value);
                let [low, high] = items.as_slice() else {
                    return Err(Error::InvalidFilter(format!(
                        "{operator} needs exactly two values, got {}",
                        items.len()
                    )));
                };
                let low = Expr::Param(self.params.bind(ty, coerce(ty, low)));
                let high = Expr::Param(self.params.bind(ty, coerce(ty, high)));
                let predicate = Predicate::new(PredicateKind::Between {
                    expr: target,
                    low,
                    high,
                });
                if operator == Operator::Nbetween {
                    predicate.negate()
                } else {
                    predicate
                }
            }

            pattern => {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.key(),
                };
                let insensitive = matches!(
                    pattern,
                    Operator::Icontains | Operator::IstartsWith | Operator::IendsWith
                );
                let (text, target) = if insensitive {
                    (text.to_lowercase(), Expr::Lower(Box::new(target)))
                } else {
                    (text, target)
                };
                let text = match pattern {
                    Operator::StartsWith | Operator::NstartsWith | Operator::IstartsWith => {
                        format!("{text}%")
                    }
                    Operator::EndsWith | Operator::NendsWith | Operator::IendsWith => {
                        format!("%{text}")
                    }
                    _ => format!("%{text}%"),
                };
                let index = self.params.bind(ty, Value::String(text));
                let predicate = Predicate::new(PredicateKind::Like {
                    expr: target,
                    pattern: Expr::Param(index),
                });
                if matches!(
                    pattern,
                    Operator::Ncontains | Operator::NstartsWith | Operator::NendsWith
                ) {
                    predicate.negate()
                } else {
                    predicate
                }
            }
        })
    }

    /// Free-text search over the searchable, readable fields of a level.
    ///
    /// Text fields match by case-insensitive substring, numeric fields by
    /// equality when the term parses for their type, UUID fields when the
    /// term is a UUID. Without any qualifying field nothing matches.
    pub fn search(
        &mut self,
        joins: &mut Vec<Join>,
        base: &Base,
        level: &Level,
        term: &str,
    ) -> Result<Predicate> {
        let schema = self.schema;
        let access = self.access;
        let def = schema.require_collection(&level.collection)?;
        let mut terms = Vec::new();

        for field in def.fields.values().filter(|f| f.is_searchable()) {
            if access.field_access(&level.collection, &field.name).is_none() {
                continue;
            }
            let ty = &field.field_type;
            let column = Expr::column(&base.alias, &field.name);

            let predicate = if ty.is_textual() {
                let index = self.params.bind(ty, Value::String(format!("%{}%", term.to_lowercase())));
                Predicate::new(PredicateKind::Like {
                    expr: Expr::Lower(Box::new(column)),
                    pattern: Expr::Param(index),
                })
            } else if ty.is_numeric() {
                let Some(number) = ty.parse_number(term) else {
                    continue;
                };
                Predicate::eq(column, Expr::Param(self.params.bind(ty, number)))
            } else if *ty == FieldType::Uuid {
                let Ok(uuid) = Uuid::parse_str(term) else {
                    continue;
                };
                Predicate::eq(column, Expr::Param(self.params.bind(ty, Value::Uuid(uuid))))
            } else {
                continue;
            };

            let gate = self.field_gate(joins, base, &field.name)?;
            terms.push(Predicate::all(gate.into_iter().chain([predicate])));
        }

        Ok(Predicate::any(terms))
    }
}

/// The part of a condition below its one-to-many hop.
fn remainder(condition: &Condition, hop: usize) -> Filter {
    Filter::Condition(Condition {
        path: condition.path[hop + 1..].to_vec(),
        operator: condition.operator,
        value: condition.value.clone(),
    })
}

fn operand_list(value: &Value) -> Vec<Value> {
    match value {
        Value::List(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Bool(false)) && value.as_str() != Some("false")
}

/// Convert string operands to the column's type when they parse.
fn coerce(ty: &FieldType, value: &Value) -> Value {
    let Value::String(text) = value else {
        return value.clone();
    };
    let coerced = match ty {
        t if t.is_integer() => text.parse::<i64>().ok().map(Value::Int),
        FieldType::Float | FieldType::Decimal { .. } => text
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::Float),
        FieldType::Boolean => match text.as_str() {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    };
    coerced.unwrap_or_else(|| value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce() {
        assert_eq!(coerce(&FieldType::Integer, &"42".into()), Value::Int(42));
        assert_eq!(coerce(&FieldType::Integer, &"4x".into()), Value::from("4x"));
        assert_eq!(coerce(&FieldType::Boolean, &"1".into()), Value::Bool(true));
        assert_eq!(coerce(&FieldType::String, &"42".into()), Value::from("42"));
        assert_eq!(coerce(&FieldType::Float, &"1.5".into()), Value::Float(1.5));
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&Value::Bool(true)));
        assert!(is_truthy(&Value::Null));
        assert!(!is_truthy(&Value::Bool(false)));
        assert!(!is_truthy(&"false".into()));
    }
}
