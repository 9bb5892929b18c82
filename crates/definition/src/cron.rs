// SPDX-License-Identifier: MIT

//! Five-field cron expressions with minute resolution.
//!
//! Supports `*`, lists, ranges, and steps (`*/6`, `10-40/5`). Day-of-month
//! and day-of-week combine the classic way: when both are restricted, either
//! matching fires the schedule.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    values: BTreeSet<u32>,
    /// True when the field was written `*` (or `*/1`), which changes
    /// dom/dow combination semantics.
    any: bool,
}

impl Field {
    fn contains(&self, v: u32) -> bool {
        self.values.contains(&v)
    }
}

/// A parsed `minute hour day-of-month month day-of-week` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: Field,
    hour: Field,
    dom: Field,
    month: Field,
    dow: Field,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!("expected 5 cron fields, got {} in {expr:?}", fields.len()));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            dom: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            dow: parse_dow(fields[4])?,
        })
    }

    /// Whether the schedule fires during the minute containing `at`.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        if !self.minute.contains(at.minute())
            || !self.hour.contains(at.hour())
            || !self.month.contains(at.month())
        {
            return false;
        }
        let dom_ok = self.dom.contains(at.day());
        let dow_ok = self.dow.contains(at.weekday().num_days_from_sunday());
        match (self.dom.any, self.dow.any) {
            // Both restricted: vixie cron fires when either matches.
            (false, false) => dom_ok || dow_ok,
            (false, true) => dom_ok,
            (true, false) => dow_ok,
            (true, true) => true,
        }
    }
}

fn parse_field(spec: &str, min: u32, max: u32) -> Result<Field, String> {
    let mut values = BTreeSet::new();
    let mut any = false;
    for part in spec.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 =
                    s.parse().map_err(|_| format!("invalid cron step in {part:?}"))?;
                if step == 0 {
                    return Err(format!("zero cron step in {part:?}"));
                }
                (r, step)
            }
            None => (part, 1),
        };
        let (lo, hi) = if range == "*" {
            if step == 1 {
                any = true;
            }
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let lo: u32 = a.parse().map_err(|_| format!("invalid cron range in {part:?}"))?;
            let hi: u32 = b.parse().map_err(|_| format!("invalid cron range in {part:?}"))?;
            (lo, hi)
        } else {
            let v: u32 = range.parse().map_err(|_| format!("invalid cron value in {part:?}"))?;
            (v, v)
        };
        if lo < min || hi > max || lo > hi {
            return Err(format!("cron value out of range [{min},{max}] in {part:?}"));
        }
        let mut v = lo;
        while v <= hi {
            values.insert(v);
            v += step;
        }
    }
    Ok(Field { values, any })
}

/// Day-of-week accepts 0-7 with both 0 and 7 meaning Sunday.
fn parse_dow(spec: &str) -> Result<Field, String> {
    let mut field = parse_field(spec, 0, 7)?;
    if field.values.remove(&7) {
        field.values.insert(0);
    }
    Ok(field)
}

#[cfg(test)]
#[path = "cron_tests.rs"]
mod tests;
