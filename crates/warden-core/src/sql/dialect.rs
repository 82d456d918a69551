//! SQL dialect differences: quoting, placeholders, date parts, pagination.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::query::function::FunctionKind;

/// Target SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    Sqlite,
    Mysql,
    Mssql,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
            Dialect::Mysql => "mysql",
            Dialect::Mssql => "mssql",
        }
    }

    /// Quote an identifier, doubling any embedded closing quote.
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
            Dialect::Mysql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Mssql => format!("[{}]", ident.replace(']', "]]")),
        }
    }

    /// Placeholder text for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
            Dialect::Mssql => format!("@p{index}"),
        }
    }

    /// Whether placeholders are anonymous and bound in order of appearance.
    pub fn positional(&self) -> bool {
        matches!(self, Dialect::Mysql)
    }

    /// Wrap `expr` in the extraction of a date or time part.
    pub fn date_part(&self, part: FunctionKind, expr: &str) -> String {
        match self {
            Dialect::Postgres => {
                let field = match part {
                    FunctionKind::Year => "YEAR",
                    FunctionKind::Month => "MONTH",
                    FunctionKind::Week => "WEEK",
                    FunctionKind::Day => "DAY",
                    FunctionKind::Weekday => "DOW",
                    FunctionKind::Hour => "HOUR",
                    FunctionKind::Minute => "MINUTE",
                    FunctionKind::Second | FunctionKind::Count => "SECOND",
                };
                format!("EXTRACT({field} FROM {expr})")
            }
            Dialect::Sqlite => {
                let format = match part {
                    FunctionKind::Year => "%Y",
                    FunctionKind::Month => "%m",
                    FunctionKind::Week => "%W",
                    FunctionKind::Day => "%d",
                    FunctionKind::Weekday => "%w",
                    FunctionKind::Hour => "%H",
                    FunctionKind::Minute => "%M",
                    FunctionKind::Second | FunctionKind::Count => "%S",
                };
                format!("CAST(strftime('{format}', {expr}) AS INTEGER)")
            }
            Dialect::Mysql => {
                let function = match part {
                    FunctionKind::Year => "YEAR",
                    FunctionKind::Month => "MONTH",
                    FunctionKind::Week => "WEEK",
                    FunctionKind::Day => "DAYOFMONTH",
                    FunctionKind::Weekday => "DAYOFWEEK",
                    FunctionKind::Hour => "HOUR",
                    FunctionKind::Minute => "MINUTE",
                    FunctionKind::Second | FunctionKind::Count => "SECOND",
                };
                format!("{function}({expr})")
            }
            Dialect::Mssql => {
                let datepart = match part {
                    FunctionKind::Year => "year",
                    FunctionKind::Month => "month",
                    FunctionKind::Week => "week",
                    FunctionKind::Day => "day",
                    FunctionKind::Weekday => "weekday",
                    FunctionKind::Hour => "hour",
                    FunctionKind::Minute => "minute",
                    FunctionKind::Second | FunctionKind::Count => "second",
                };
                format!("DATEPART({datepart}, {expr})")
            }
        }
    }

    /// Trailing pagination clause, empty when neither bound is set.
    ///
    /// SQL Server expresses pagination as part of `ORDER BY`; `ordered`
    /// tells whether the statement already has one. A zero limit there is
    /// rendered as `TOP (0)` by the caller instead.
    pub fn pagination(&self, limit: Option<u64>, offset: Option<u64>, ordered: bool) -> String {
        match self {
            Dialect::Mssql => {
                if limit == Some(0) || (limit.is_none() && offset.is_none()) {
                    return String::new();
                }
                let mut clause = String::new();
                if !ordered {
                    clause.push_str(" ORDER BY (SELECT NULL)");
                }
                clause.push_str(&format!(" OFFSET {} ROWS", offset.unwrap_or(0)));
                if let Some(limit) = limit {
                    clause.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
                }
                clause
            }
            _ => match (limit, offset) {
                (None, None) => String::new(),
                (Some(limit), None) => format!(" LIMIT {limit}"),
                (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
                (None, Some(offset)) => match self {
                    Dialect::Sqlite => format!(" LIMIT -1 OFFSET {offset}"),
                    Dialect::Mysql => format!(" LIMIT {} OFFSET {offset}", u64::MAX),
                    _ => format!(" OFFSET {offset}"),
                },
            },
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "mssql" | "sqlserver" => Ok(Dialect::Mssql),
            other => Err(Error::InvalidQuery(format!("unknown dialect '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes() {
        assert_eq!(Dialect::Postgres.quote("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::Mysql.quote("a`b"), "`a``b`");
        assert_eq!(Dialect::Mssql.quote("a]b"), "[a]]b]");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::Sqlite.placeholder(3), "?3");
        assert_eq!(Dialect::Mysql.placeholder(3), "?");
        assert_eq!(Dialect::Mssql.placeholder(3), "@p3");
    }

    #[test]
    fn test_offset_without_limit() {
        assert_eq!(Dialect::Postgres.pagination(None, Some(5), true), " OFFSET 5");
        assert_eq!(Dialect::Sqlite.pagination(None, Some(5), true), " LIMIT -1 OFFSET 5");
        assert_eq!(
            Dialect::Mysql.pagination(None, Some(5), true),
            " LIMIT 18446744073709551615 OFFSET 5"
        );
        assert_eq!(
            Dialect::Mssql.pagination(Some(10), Some(5), false),
            " ORDER BY (SELECT NULL) OFFSET 5 ROWS FETCH NEXT 10 ROWS ONLY"
        );
        assert_eq!(Dialect::Mssql.pagination(Some(0), Some(5), true), "");
    }

    #[test]
    fn test_date_parts() {
        assert_eq!(
            Dialect::Sqlite.date_part(FunctionKind::Year, "\"t\".\"d\""),
            "CAST(strftime('%Y', \"t\".\"d\") AS INTEGER)"
        );
        assert_eq!(
            Dialect::Postgres.date_part(FunctionKind::Weekday, "x"),
            "EXTRACT(DOW FROM x)"
        );
    }

    #[test]
    fn test_parse() {
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert!("oracle".parse::<Dialect>().is_err());
    }
}
