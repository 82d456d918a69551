//! Output formatters for command results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use warden_core::query::{Level, Node};
use warden_core::{CompiledQuery, Explain};
use warden_proto::{Item, Value};

use crate::commands::CliError;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format the items of a read.
    fn format_items(&self, items: &[Item]) -> String;

    /// Format a compiled statement.
    fn format_compiled(&self, compiled: &CompiledQuery) -> String;

    /// Format an annotated tree and its root statement.
    fn format_explain(&self, explain: &Explain) -> String;

    /// Format an error message.
    fn format_error(&self, error: &CliError) -> String {
        format!("Error: {error}")
    }
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_items(&self, items: &[Item]) -> String {
        if items.is_empty() {
            return "No results".to_string();
        }
        let columns = columns(items);
        let mut table = Table::new();
        table.set_header(columns.iter().map(Cell::new));
        for item in items {
            table.add_row(
                columns
                    .iter()
                    .map(|column| Cell::new(item.get(column).map(format_value).unwrap_or_default())),
            );
        }
        format!("{table}\n{} row(s)", items.len())
    }

    fn format_compiled(&self, compiled: &CompiledQuery) -> String {
        let mut output = compiled.sql.clone();
        if !compiled.parameters.is_empty() {
            let mut table = Table::new();
            table.set_header(vec!["#", "Value", "Type"]);
            for (i, value) in compiled.parameters.iter().enumerate() {
                table.add_row(vec![
                    Cell::new(i + 1),
                    Cell::new(format_value(value)),
                    Cell::new(value.type_name()),
                ]);
            }
            output.push_str("\n\n");
            output.push_str(&table.to_string());
        }
        output
    }

    fn format_explain(&self, explain: &Explain) -> String {
        let mut cases = Table::new();
        cases.set_header(vec!["Level", "Case", "Filter"]);
        let mut fields = Table::new();
        fields.set_header(vec!["Level", "Field", "Kind", "When case"]);
        let root = &explain.tree.root;
        let case_count = describe_level(root, &root.collection, &mut cases, &mut fields);

        let mut output = self.format_compiled(&explain.sql);
        output.push_str("\n\n");
        output.push_str(&fields.to_string());
        if case_count > 0 {
            output.push_str("\n\n");
            output.push_str(&cases.to_string());
        }
        output
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_items(&self, items: &[Item]) -> String {
        to_json(items)
    }

    fn format_compiled(&self, compiled: &CompiledQuery) -> String {
        to_json(compiled)
    }

    fn format_explain(&self, explain: &Explain) -> String {
        to_json(explain)
    }

    fn format_error(&self, error: &CliError) -> String {
        let code = match error {
            CliError::Engine(err) => err.code(),
            _ => "INTERNAL",
        };
        serde_json::json!({ "error": { "code": code, "message": error.to_string() } }).to_string()
    }
}

/// CSV formatter. Nested values are written as JSON.
pub struct CsvFormatter;

impl Formatter for CsvFormatter {
    fn format_items(&self, items: &[Item]) -> String {
        let columns = columns(items);
        let mut output = columns
            .iter()
            .map(|c| format!("\"{}\"", escape_csv(c)))
            .collect::<Vec<_>>()
            .join(",");
        for item in items {
            output.push('\n');
            let cells: Vec<String> = columns
                .iter()
                .map(|column| item.get(column).map(format_value_csv).unwrap_or_default())
                .collect();
            output.push_str(&cells.join(","));
        }
        output
    }

    fn format_compiled(&self, compiled: &CompiledQuery) -> String {
        let mut output = format!("\"sql\",\"{}\"", escape_csv(&compiled.sql));
        for value in &compiled.parameters {
            output.push_str(&format!("\n\"parameter\",{}", format_value_csv(value)));
        }
        output
    }

    fn format_explain(&self, explain: &Explain) -> String {
        self.format_compiled(&explain.sql)
    }
}

/// Output keys across all items, in first-seen order.
fn columns(items: &[Item]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for key in items.iter().flat_map(|item| item.keys()) {
        if !columns.contains(key) {
            columns.push(key.clone());
        }
    }
    columns
}

/// Add the rows of `level` and its nested levels; returns the number of cases.
fn describe_level(level: &Level, path: &str, cases: &mut Table, fields: &mut Table) -> usize {
    let mut case_count = level.cases.len();
    for (i, case) in level.cases.iter().enumerate() {
        cases.add_row(vec![
            Cell::new(path),
            Cell::new(i),
            Cell::new(case.to_json().to_string()),
        ]);
    }
    for child in &level.children {
        let kind = match child {
            Node::Field(_) => "field",
            Node::Function(_) => "function",
            Node::M2O(_) => "many-to-one",
            Node::O2M(_) => "one-to-many",
            Node::A2O(_) => "any-to-one",
        };
        let when_case = if level.cases.is_empty() {
            "always".to_string()
        } else {
            format!("{:?}", child.when_case())
        };
        fields.add_row(vec![
            Cell::new(path),
            Cell::new(child.field_key()),
            Cell::new(kind),
            Cell::new(when_case),
        ]);

        match child {
            Node::M2O(node) | Node::O2M(node) => {
                let nested = format!("{path}.{}", node.field_key);
                case_count += describe_level(&node.level, &nested, cases, fields);
            }
            Node::A2O(node) => {
                for (target, nested) in &node.levels {
                    let nested_path = format!("{path}.{}:{target}", node.field_key);
                    case_count += describe_level(nested, &nested_path, cases, fields);
                }
            }
            Node::Field(_) | Node::Function(_) => {}
        }
    }
    case_count
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}

/// Format a Value as a display string.
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        Value::BigInt(s) => s.clone(),
        Value::List(_) | Value::Object(_) => value.to_json().to_string(),
        other => other.key(),
    }
}

/// Format a Value for CSV output.
fn format_value_csv(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(_) | Value::List(_) | Value::Object(_) => {
            format!("\"{}\"", escape_csv(&format_value(value)))
        }
        _ => format_value(value),
    }
}

/// Escape a string for CSV.
fn escape_csv(s: &str) -> String {
    s.replace('"', "\"\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn items() -> Vec<Item> {
        let mut first = Item::new();
        first.insert("title".into(), Value::from("Hello, \"world\""));
        first.insert(
            "comments".into(),
            Value::List(vec![Value::Int(1), Value::Int(2)]),
        );
        let mut second = Item::new();
        second.insert("title".into(), Value::Null);
        second.insert("views".into(), Value::Int(7));
        vec![first, second]
    }

    #[test]
    fn test_columns_in_first_seen_order() {
        assert_eq!(columns(&items()), vec!["title", "comments", "views"]);
    }

    #[test]
    fn test_csv_items() {
        let csv = CsvFormatter.format_items(&items());
        assert_eq!(
            csv,
            "\"title\",\"comments\",\"views\"\n\
             \"Hello, \"\"world\"\"\",\"[1,2]\",\n\
             ,,7"
        );
    }

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("hello"), "hello");
        assert_eq!(escape_csv("say \"hi\""), "say \"\"hi\"\"");
    }

    #[test]
    fn test_table_compiled_lists_parameters() {
        let compiled = CompiledQuery {
            sql: "SELECT 1 WHERE x = $1".into(),
            parameters: vec![Value::Int(5)],
        };
        let output = TableFormatter.format_compiled(&compiled);
        assert!(output.starts_with("SELECT 1 WHERE x = $1\n\n"));
        assert!(output.contains("integer"));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&Value::Bool(true)), "true");
        assert_eq!(format_value(&Value::BigInt("18446744073709551616".into())), "18446744073709551616");
        assert_eq!(format_value(&Value::Null), "NULL");
    }
}
