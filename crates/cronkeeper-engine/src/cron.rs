//! Five-field cron expressions.
//!
//! The accepted grammar is narrow: every field is `*`, `*/N`,
//! `N`, `A-B` or `A-B/N`. Lists, names and the `? L W #` extensions are
//! rejected. Evaluation happens in UTC.
//!
//! A validated expression is rendered into the seconds-prefixed format of the
//! `cron` crate, which computes upcoming fire instants. When both
//! day-of-month and day-of-week are restricted, a time matches if either of
//! them matches, as in classic cron.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::ScheduleError;

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Field {
    const ALL: [Field; 5] = [
        Field::Minute,
        Field::Hour,
        Field::DayOfMonth,
        Field::Month,
        Field::DayOfWeek,
    ];

    fn name(self) -> &'static str {
        match self {
            Field::Minute => "minute",
            Field::Hour => "hour",
            Field::DayOfMonth => "day-of-month",
            Field::Month => "month",
            Field::DayOfWeek => "day-of-week",
        }
    }

    fn bounds(self) -> (u32, u32) {
        match self {
            Field::Minute => (0, 59),
            Field::Hour => (0, 23),
            Field::DayOfMonth => (1, 31),
            Field::Month => (1, 12),
            Field::DayOfWeek => (0, 7),
        }
    }
}

/// Values matched by one field.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldSet {
    values: BTreeSet<u32>,
    /// False when the token starts with `*`.
    restricted: bool,
    full: bool,
}

impl FieldSet {
    fn render(&self, field: Field) -> String {
        if self.full {
            return "*".to_string();
        }
        let parts: Vec<String> = match field {
            Field::DayOfWeek => self
                .values
                .iter()
                .map(|v| DAY_NAMES[*v as usize].to_string())
                .collect(),
            _ => self.values.iter().map(|v| v.to_string()).collect(),
        };
        parts.join(",")
    }
}

/// A validated five-field cron expression.
#[derive(Clone)]
pub struct CronExpr {
    source: String,
    fields: Vec<FieldSet>,
    schedules: Vec<Schedule>,
}

impl CronExpr {
    /// Parse and validate an expression.
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let tokens: Vec<&str> = expr.split_whitespace().collect();
        if tokens.len() != 5 {
            return Err(ScheduleError::FieldCount {
                expr: expr.to_string(),
                found: tokens.len(),
            });
        }

        let mut fields = Vec::with_capacity(5);
        for (field, token) in Field::ALL.iter().zip(tokens.iter()) {
            fields.push(parse_field(expr, *field, token)?);
        }

        let schedules = build_schedules(expr, &fields)?;
        let parsed = Self {
            source: tokens.join(" "),
            fields,
            schedules,
        };

        if parsed.next_after(Utc::now()).is_none() {
            return Err(ScheduleError::NeverFires(expr.to_string()));
        }

        Ok(parsed)
    }

    /// The normalized expression (single spaces between fields).
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The first fire instant strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|s| s.after(&after).next())
            .min()
    }

    /// The next `count` fire instants strictly after `from`.
    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut out = Vec::with_capacity(count);
        let mut cursor = from;
        while out.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    out.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        out
    }
}

impl fmt::Debug for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpr").field(&self.source).finish()
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for CronExpr {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl FromStr for CronExpr {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Validate an expression without keeping the parsed form.
pub fn validate(expr: &str) -> Result<(), ScheduleError> {
    CronExpr::parse(expr).map(|_| ())
}

fn parse_field(expr: &str, field: Field, token: &str) -> Result<FieldSet, ScheduleError> {
    let (min, max) = field.bounds();
    let invalid = |reason: String| ScheduleError::Field {
        expr: expr.to_string(),
        field: field.name(),
        value: token.to_string(),
        reason,
    };

    let (base, step) = match token.split_once('/') {
        Some((base, step)) => {
            let step = parse_number(step).ok_or_else(|| invalid("has a non-numeric step".into()))?;
            if step == 0 {
                return Err(invalid("has a zero step".into()));
            }
            (base, Some(step))
        }
        None => (token, None),
    };

    let (start, end) = if base == "*" {
        (min, max)
    } else if let Some((a, b)) = base.split_once('-') {
        let a = parse_number(a).ok_or_else(|| invalid("is not a number or range".into()))?;
        let b = parse_number(b).ok_or_else(|| invalid("is not a number or range".into()))?;
        if a > b {
            return Err(invalid(format!("has an inverted range {}-{}", a, b)));
        }
        (a, b)
    } else {
        if step.is_some() {
            return Err(invalid("uses a step without '*' or a range".into()));
        }
        let n = parse_number(base).ok_or_else(|| invalid("is not a number or range".into()))?;
        (n, n)
    };

    if start < min || end > max {
        return Err(invalid(format!("is outside {}-{}", min, max)));
    }

    let mut values: BTreeSet<u32> = (start..=end).step_by(step.unwrap_or(1) as usize).collect();
    if field == Field::DayOfWeek && values.remove(&7) {
        values.insert(0);
    }

    let domain = match field {
        Field::DayOfWeek => 7,
        _ => (max - min + 1) as usize,
    };
    Ok(FieldSet {
        full: values.len() == domain,
        restricted: !token.starts_with('*'),
        values,
    })
}

/// Plain unsigned decimal. `str::parse` would also accept a leading `+`.
fn parse_number(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn build_schedules(expr: &str, fields: &[FieldSet]) -> Result<Vec<Schedule>, ScheduleError> {
    let render = |dom: &str, dow: &str| {
        format!(
            "0 {} {} {} {} {}",
            fields[0].render(Field::Minute),
            fields[1].render(Field::Hour),
            dom,
            fields[3].render(Field::Month),
            dow
        )
    };

    let dom = fields[2].render(Field::DayOfMonth);
    let dow = fields[4].render(Field::DayOfWeek);

    let rendered = if fields[2].restricted && fields[4].restricted {
        vec![render(&dom, "*"), render("*", &dow)]
    } else {
        vec![render(&dom, &dow)]
    };

    rendered
        .iter()
        .map(|s| {
            Schedule::from_str(s).map_err(|e| ScheduleError::Field {
                expr: expr.to_string(),
                field: "expression",
                value: s.clone(),
                reason: format!("was rejected by the evaluator: {}", e),
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "cron_tests.rs"]
mod tests;
