//! Dynamic variables in filters.
//!
//! Permission filters (and caller filters) may reference the request's
//! identity instead of literal values:
//!
//! | variable                  | value                                   |
//! |---------------------------|-----------------------------------------|
//! | `$CURRENT_USER`           | user id                                 |
//! | `$CURRENT_USER.<path>`    | field of the user record                |
//! | `$CURRENT_ROLE`           | primary role id                         |
//! | `$CURRENT_ROLE.<path>`    | field of the role record                |
//! | `$CURRENT_ROLES`          | every role id                           |
//! | `$CURRENT_POLICIES`       | every policy id                         |
//! | `$NOW`, `$NOW(-1 day)`    | current time, optionally adjusted       |

use chrono::{DateTime, Duration, Months, SecondsFormat, Utc};
use warden_proto::{Accountability, Filter, Item, Value};

use crate::error::{Error, Result};

const USER_PREFIX: &str = "$CURRENT_USER.";
const ROLE_PREFIX: &str = "$CURRENT_ROLE.";

/// Values dynamic variables resolve against.
#[derive(Debug, Clone)]
pub struct DynamicContext {
    /// Caller identity.
    pub accountability: Accountability,
    /// User record, for `$CURRENT_USER.<path>`.
    pub user: Option<Item>,
    /// Role record, for `$CURRENT_ROLE.<path>`.
    pub role: Option<Item>,
    /// Time `$NOW` resolves to.
    pub now: DateTime<Utc>,
}

impl DynamicContext {
    /// Context for a caller, at the current time.
    pub fn new(accountability: Accountability) -> Self {
        Self {
            accountability,
            user: None,
            role: None,
            now: Utc::now(),
        }
    }

    /// Attach the user record.
    pub fn with_user(mut self, user: Option<Item>) -> Self {
        self.user = user;
        self
    }

    /// Attach the role record.
    pub fn with_role(mut self, role: Option<Item>) -> Self {
        self.role = role;
        self
    }

    /// Pin the time `$NOW` resolves to.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Replace every dynamic variable in a filter.
    pub fn resolve_filter(&self, filter: &mut Filter) -> Result<()> {
        let mut result = Ok(());
        filter.map_conditions(&mut |condition| {
            if result.is_err() {
                return;
            }
            match self.resolve_value(&condition.value) {
                Ok(value) => condition.value = value,
                Err(err) => result = Err(err),
            }
        });
        result
    }

    /// Resolve a value, recursing into lists.
    pub fn resolve_value(&self, value: &Value) -> Result<Value> {
        match value {
            Value::String(s) if s.starts_with('$') => self.resolve_variable(s),
            Value::List(items) => items
                .iter()
                .map(|item| self.resolve_value(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            other => Ok(other.clone()),
        }
    }

    fn resolve_variable(&self, name: &str) -> Result<Value> {
        let acc = &self.accountability;
        let strings = |items: &[String]| Value::List(items.iter().cloned().map(Value::String).collect());

        Ok(match name {
            "$CURRENT_USER" => acc.user.clone().into(),
            "$CURRENT_ROLE" => acc.role.clone().into(),
            "$CURRENT_ROLES" => strings(&acc.roles),
            "$CURRENT_POLICIES" => strings(&acc.policies),
            "$NOW" => Value::String(format_time(self.now)),
            _ => {
                if let Some(path) = name.strip_prefix(USER_PREFIX) {
                    lookup(self.user.as_ref(), path)
                } else if let Some(path) = name.strip_prefix(ROLE_PREFIX) {
                    lookup(self.role.as_ref(), path)
                } else if let Some(adjustment) = name
                    .strip_prefix("$NOW(")
                    .and_then(|rest| rest.strip_suffix(')'))
                {
                    Value::String(format_time(adjust(self.now, adjustment)?))
                } else {
                    // Not a variable, a literal that happens to start with `$`.
                    Value::String(name.to_string())
                }
            }
        })
    }
}

/// Whether a filter references the user or role records.
pub fn needs_records(filter: &Filter) -> (bool, bool) {
    let mut user = false;
    let mut role = false;
    filter.for_each_condition(&mut |condition| {
        visit_strings(&condition.value, &mut |s| {
            user |= s.starts_with(USER_PREFIX);
            role |= s.starts_with(ROLE_PREFIX);
        });
    });
    (user, role)
}

fn visit_strings(value: &Value, f: &mut impl FnMut(&str)) {
    match value {
        Value::String(s) => f(s),
        Value::List(items) => {
            for item in items {
                visit_strings(item, f);
            }
        }
        _ => {}
    }
}

fn lookup(record: Option<&Item>, path: &str) -> Value {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return Value::Null;
    };
    let mut current = match record.and_then(|r| r.get(first)) {
        Some(value) => value,
        None => return Value::Null,
    };
    for segment in segments {
        current = match current.as_object().and_then(|o| o.get(segment)) {
            Some(value) => value,
            None => return Value::Null,
        };
    }
    current.clone()
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Apply an adjustment such as `-1 day` or `+2 hours`.
fn adjust(now: DateTime<Utc>, adjustment: &str) -> Result<DateTime<Utc>> {
    let invalid = || Error::InvalidFilter(format!("invalid $NOW adjustment '{adjustment}'"));

    let trimmed = adjustment.trim();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let (amount, unit) = rest.trim().split_once(char::is_whitespace).ok_or_else(invalid)?;
    let amount: u32 = amount.parse().map_err(|_| invalid())?;
    let unit = unit.trim();
    let unit = unit.strip_suffix('s').unwrap_or(unit);

    let span = |seconds: i64| Duration::try_seconds(seconds * amount as i64).ok_or_else(invalid);
    let shifted = match unit {
        "second" => shift(now, span(1)?, negative),
        "minute" => shift(now, span(60)?, negative),
        "hour" => shift(now, span(3_600)?, negative),
        "day" => shift(now, span(86_400)?, negative),
        "week" => shift(now, span(604_800)?, negative),
        "month" => shift_months(now, amount, negative),
        "year" => shift_months(now, amount.checked_mul(12).ok_or_else(invalid)?, negative),
        _ => None,
    };
    shifted.ok_or_else(invalid)
}

fn shift(now: DateTime<Utc>, span: Duration, negative: bool) -> Option<DateTime<Utc>> {
    if negative {
        now.checked_sub_signed(span)
    } else {
        now.checked_add_signed(span)
    }
}

fn shift_months(now: DateTime<Utc>, months: u32, negative: bool) -> Option<DateTime<Utc>> {
    if negative {
        now.checked_sub_months(Months::new(months))
    } else {
        now.checked_add_months(Months::new(months))
    }
}
