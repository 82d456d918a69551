//! Field functions: `year(date_created)`, `count(comments)`, ...

use std::fmt;

use serde::Serialize;

use crate::catalog::FieldType;
use crate::error::{Error, Result};

/// A transform applied to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    Year,
    Month,
    Week,
    Day,
    Weekday,
    Hour,
    Minute,
    Second,
    /// Number of related rows of a one-to-many field.
    Count,
}

impl FunctionKind {
    /// Parse a function tag.
    pub fn parse(tag: &str) -> Option<Self> {
        Some(match tag {
            "year" => FunctionKind::Year,
            "month" => FunctionKind::Month,
            "week" => FunctionKind::Week,
            "day" => FunctionKind::Day,
            "weekday" => FunctionKind::Weekday,
            "hour" => FunctionKind::Hour,
            "minute" => FunctionKind::Minute,
            "second" => FunctionKind::Second,
            "count" => FunctionKind::Count,
            _ => return None,
        })
    }

    /// The function tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Year => "year",
            FunctionKind::Month => "month",
            FunctionKind::Week => "week",
            FunctionKind::Day => "day",
            FunctionKind::Weekday => "weekday",
            FunctionKind::Hour => "hour",
            FunctionKind::Minute => "minute",
            FunctionKind::Second => "second",
            FunctionKind::Count => "count",
        }
    }

    /// Whether this extracts a part of a date or time.
    pub fn is_date_part(&self) -> bool {
        !matches!(self, FunctionKind::Count)
    }

    /// Check that the function applies to a column of `field_type`.
    pub fn check_target(&self, field: &str, field_type: &FieldType) -> Result<()> {
        let ok = match self {
            FunctionKind::Year
            | FunctionKind::Month
            | FunctionKind::Week
            | FunctionKind::Day
            | FunctionKind::Weekday => field_type.has_date(),
            FunctionKind::Hour | FunctionKind::Minute | FunctionKind::Second => {
                field_type.has_time()
            }
            FunctionKind::Count => field_type.is_alias(),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidFilter(format!(
                "function {}() cannot be applied to field '{field}' of type {}",
                self.as_str(),
                field_type.kind()
            )))
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split `tag(field)` into its function and target field.
///
/// Returns `Ok(None)` for plain field names and an error for malformed calls
/// or unknown tags.
pub fn parse_function(name: &str) -> Result<Option<(FunctionKind, String)>> {
    let Some(open) = name.find('(') else {
        if name.contains(')') {
            return Err(Error::InvalidQuery(format!("malformed field '{name}'")));
        }
        return Ok(None);
    };

    let inner = name[open + 1..]
        .strip_suffix(')')
        .filter(|inner| !inner.is_empty() && !inner.contains(['(', ')']))
        .ok_or_else(|| Error::InvalidQuery(format!("malformed function call '{name}'")))?;

    let tag = &name[..open];
    let kind = FunctionKind::parse(tag)
        .ok_or_else(|| Error::InvalidQuery(format!("unknown function '{tag}' in '{name}'")))?;

    Ok(Some((kind, inner.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_function() {
        assert_eq!(
            parse_function("year(date_created)").unwrap(),
            Some((FunctionKind::Year, "date_created".to_string()))
        );
        assert_eq!(
            parse_function("count(comments)").unwrap(),
            Some((FunctionKind::Count, "comments".to_string()))
        );
        assert_eq!(parse_function("title").unwrap(), None);
    }

    #[test]
    fn test_rejects_unknown_and_malformed() {
        assert!(parse_function("sha1(title)").is_err());
        assert!(parse_function("year(").is_err());
        assert!(parse_function("year()").is_err());
        assert!(parse_function("year(a(b))").is_err());
        assert!(parse_function("title)").is_err());
    }

    #[test]
    fn test_target_types() {
        assert!(FunctionKind::Year
            .check_target("date_created", &FieldType::DateTime)
            .is_ok());
        assert!(FunctionKind::Hour.check_target("day", &FieldType::Date).is_err());
        assert!(FunctionKind::Year.check_target("title", &FieldType::String).is_err());
        assert!(FunctionKind::Count.check_target("comments", &FieldType::Alias).is_ok());
        assert!(FunctionKind::Count.check_target("title", &FieldType::String).is_err());
    }
}
