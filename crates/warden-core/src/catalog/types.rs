//! Storage types of collection fields.

use serde::{Deserialize, Serialize};
use warden_proto::Value;

/// Declared storage type of a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    BigInteger,
    /// Double precision floating point.
    Float,
    /// Fixed-precision decimal.
    Decimal {
        /// Total number of digits.
        precision: u8,
        /// Number of digits after decimal point.
        scale: u8,
    },
    /// Short string.
    String,
    /// Long text.
    Text,
    /// Comma-separated values stored as text.
    Csv,
    /// Hashed string (passwords).
    Hash,
    /// UUID.
    Uuid,
    /// Boolean.
    Boolean,
    /// Date and time.
    DateTime,
    /// Date only.
    Date,
    /// Time only.
    Time,
    /// Timestamp with time zone.
    Timestamp,
    /// JSON document.
    Json,
    /// Virtual field with no column, such as the one side of a relation.
    Alias,
    /// Any other database type.
    Unknown,
}

impl FieldType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Integer | FieldType::BigInteger | FieldType::Float | FieldType::Decimal { .. }
        )
    }

    /// Check if this type is an integer type.
    pub fn is_integer(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::BigInteger)
    }

    /// Check if this type holds free text.
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Text | FieldType::Csv)
    }

    /// Check if this type carries a date part.
    pub fn has_date(&self) -> bool {
        matches!(
            self,
            FieldType::DateTime | FieldType::Date | FieldType::Timestamp
        )
    }

    /// Check if this type carries a time part.
    pub fn has_time(&self) -> bool {
        matches!(
            self,
            FieldType::DateTime | FieldType::Time | FieldType::Timestamp
        )
    }

    /// Check if this type has a backing column.
    pub fn is_alias(&self) -> bool {
        matches!(self, FieldType::Alias)
    }

    /// Stable name used to scope parameter deduplication.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::BigInteger => "bigInteger",
            FieldType::Float => "float",
            FieldType::Decimal { .. } => "decimal",
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::Csv => "csv",
            FieldType::Hash => "hash",
            FieldType::Uuid => "uuid",
            FieldType::Boolean => "boolean",
            FieldType::DateTime => "dateTime",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::Timestamp => "timestamp",
            FieldType::Json => "json",
            FieldType::Alias => "alias",
            FieldType::Unknown => "unknown",
        }
    }

    /// Parse a search term into a value this numeric column can hold.
    ///
    /// Returns `None` when the term is not a number or falls outside the
    /// column's representable range.
    pub fn parse_number(&self, term: &str) -> Option<Value> {
        match self {
            FieldType::Integer => term
                .parse::<i64>()
                .ok()
                .filter(|n| *n >= i32::MIN as i64 && *n <= i32::MAX as i64)
                .map(Value::Int),
            FieldType::BigInteger => term.parse::<i64>().ok().map(Value::Int),
            FieldType::Float => term
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Value::Float),
            FieldType::Decimal { precision, scale } => {
                // Plain positional notation only.
                let unsigned = term.strip_prefix(['-', '+']).unwrap_or(term);
                let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
                let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
                if whole.len() + fraction.len() == 0 || !digits(whole) || !digits(fraction) {
                    return None;
                }
                let n = term.parse::<f64>().ok().filter(|n| n.is_finite())?;
                let whole_digits = whole.trim_start_matches('0').len();
                let max_whole = precision.saturating_sub(*scale) as usize;
                if whole_digits > max_whole || fraction.len() > *scale as usize {
                    return None;
                }
                Some(Value::Float(n))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_checks() {
        assert!(FieldType::Integer.is_numeric());
        assert!(FieldType::Decimal {
            precision: 10,
            scale: 2
        }
        .is_numeric());
        assert!(!FieldType::String.is_numeric());
        assert!(FieldType::Text.is_textual());
        assert!(FieldType::Timestamp.has_date());
        assert!(FieldType::Time.has_time());
        assert!(!FieldType::Date.has_time());
    }

    #[test]
    fn test_numeric_bounds() {
        assert_eq!(FieldType::Integer.parse_number("42"), Some(Value::Int(42)));
        assert_eq!(FieldType::Integer.parse_number("3000000000"), None);
        assert_eq!(
            FieldType::BigInteger.parse_number("3000000000"),
            Some(Value::Int(3_000_000_000))
        );
        assert_eq!(FieldType::Integer.parse_number("4.5"), None);
        assert_eq!(FieldType::Float.parse_number("4.5"), Some(Value::Float(4.5)));
        assert_eq!(FieldType::Float.parse_number("abc"), None);
        assert_eq!(FieldType::String.parse_number("42"), None);

        let decimal = FieldType::Decimal {
            precision: 3,
            scale: 0,
        };
        assert_eq!(decimal.parse_number("999"), Some(Value::Float(999.0)));
        assert_eq!(decimal.parse_number("-12"), Some(Value::Float(-12.0)));
        assert_eq!(decimal.parse_number("1000"), None);
        assert_eq!(decimal.parse_number("1e3"), None);
        assert_eq!(decimal.parse_number("9e99"), None);
        assert_eq!(decimal.parse_number("1E2"), None);
        assert_eq!(decimal.parse_number("inf"), None);
        assert_eq!(decimal.parse_number("."), None);

        let money = FieldType::Decimal {
            precision: 5,
            scale: 2,
        };
        assert_eq!(money.parse_number("123.45"), Some(Value::Float(123.45)));
        assert_eq!(money.parse_number("1234.5"), None);
        assert_eq!(money.parse_number("1.234"), None);
    }

    #[test]
    fn test_serde_names() {
        let ty: FieldType = serde_json::from_str("\"bigInteger\"").unwrap();
        assert_eq!(ty, FieldType::BigInteger);
        assert_eq!(ty.kind(), "bigInteger");
    }
}
