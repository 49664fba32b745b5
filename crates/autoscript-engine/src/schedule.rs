//! Time trigger schedules
//!
//! ```text
//! startup | shutdown
//! once(2020-07-01 12:00[:00])      one shot, `/` date separators accepted
//! once(12:00[:00])                 every day at that time
//! cron(min hour dom mon dow)       classic five-field cron, dow 0 (or 7) = Sunday
//! period(START, INTERVAL)          START is `now` or a once() argument,
//!                                  INTERVAL like 10, 30s, 5m, 1.5h, 1d
//! ```

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use regex::Regex;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("unrecognized schedule '{0}'")]
    Unrecognized(String),

    #[error("invalid date/time '{0}'")]
    InvalidDateTime(String),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("invalid period interval '{0}'")]
    InvalidInterval(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Startup,
    Shutdown,
    Once(NaiveDateTime),
    Daily(NaiveTime),
    Cron(Box<CronSpec>),
    Period { start: PeriodStart, interval: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodStart {
    /// The moment the trigger was armed
    Now,
    At(NaiveDateTime),
    /// That time of day on the day the trigger was armed
    Daily(NaiveTime),
}

fn call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(once|cron|period)\s*\((.*)\)$").expect("valid schedule regex")
    })
}

fn interval_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+(?:\.\d+)?)\s*(s|sec|m|min|h|hr|d|day)?$").expect("valid interval regex")
    })
}

enum OnceArg {
    At(NaiveDateTime),
    Daily(NaiveTime),
}

fn parse_once_arg(s: &str) -> Result<OnceArg, ScheduleError> {
    let s = s.trim();
    let normalized = s.replace('/', "-");
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return Ok(OnceArg::At(dt));
        }
    }
    for fmt in ["%H:%M:%S", "%H:%M"] {
        if let Ok(t) = NaiveTime::parse_from_str(s, fmt) {
            return Ok(OnceArg::Daily(t));
        }
    }
    Err(ScheduleError::InvalidDateTime(s.to_string()))
}

/// Longest accepted period interval, 100 years in milliseconds
const MAX_INTERVAL_MILLIS: f64 = 100.0 * 366.0 * 86_400_000.0;

fn parse_interval(s: &str) -> Result<Duration, ScheduleError> {
    let s = s.trim();
    let caps = interval_re()
        .captures(s)
        .ok_or_else(|| ScheduleError::InvalidInterval(s.to_string()))?;
    let amount: f64 = caps[1]
        .parse()
        .map_err(|_| ScheduleError::InvalidInterval(s.to_string()))?;
    let unit_secs = match caps.get(2).map(|m| m.as_str()) {
        None | Some("s") | Some("sec") => 1.0,
        Some("m") | Some("min") => 60.0,
        Some("h") | Some("hr") => 3600.0,
        _ => 86400.0,
    };
    let millis = (amount * unit_secs * 1000.0).round();
    if !(1.0..=MAX_INTERVAL_MILLIS).contains(&millis) {
        return Err(ScheduleError::InvalidInterval(s.to_string()));
    }
    Ok(Duration::milliseconds(millis as i64))
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "startup" => return Ok(Schedule::Startup),
            "shutdown" => return Ok(Schedule::Shutdown),
            _ => {}
        }

        let caps = call_re()
            .captures(s)
            .ok_or_else(|| ScheduleError::Unrecognized(s.to_string()))?;
        let body = caps[2].trim();

        match &caps[1] {
            "once" => Ok(match parse_once_arg(body)? {
                OnceArg::At(dt) => Schedule::Once(dt),
                OnceArg::Daily(t) => Schedule::Daily(t),
            }),
            "cron" => Ok(Schedule::Cron(Box::new(body.parse()?))),
            _ => {
                let (start, interval) = body
                    .split_once(',')
                    .ok_or_else(|| ScheduleError::Unrecognized(s.to_string()))?;
                let start = match start.trim() {
                    "now" => PeriodStart::Now,
                    other => match parse_once_arg(other)? {
                        OnceArg::At(dt) => PeriodStart::At(dt),
                        OnceArg::Daily(t) => PeriodStart::Daily(t),
                    },
                };
                Ok(Schedule::Period {
                    start,
                    interval: parse_interval(interval)?,
                })
            }
        }
    }
}

impl Schedule {
    /// Startup and shutdown fire on host signals, not on the clock
    pub fn is_symbolic(&self) -> bool {
        matches!(self, Schedule::Startup | Schedule::Shutdown)
    }

    /// First fire time strictly after `after`
    ///
    /// `armed_at` anchors `period(now, ...)` and daily period starts.
    /// Returns `None` when the schedule never fires again or the next fire
    /// time is past the end of the calendar.
    pub fn next_after(&self, after: NaiveDateTime, armed_at: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Schedule::Startup | Schedule::Shutdown => None,
            Schedule::Once(at) => (*at > after).then_some(*at),
            Schedule::Daily(time) => {
                let today = after.date().and_time(*time);
                if today > after {
                    Some(today)
                } else {
                    today.checked_add_signed(Duration::days(1))
                }
            }
            Schedule::Cron(cron) => cron.next_after(after),
            Schedule::Period { start, interval } => {
                let start = match start {
                    PeriodStart::Now => armed_at,
                    PeriodStart::At(dt) => *dt,
                    PeriodStart::Daily(t) => armed_at.date().and_time(*t),
                };
                if start > after {
                    return Some(start);
                }
                let step = interval.num_milliseconds();
                let elapsed = (after - start).num_milliseconds();
                let offset = (elapsed / step + 1).checked_mul(step)?;
                start.checked_add_signed(Duration::milliseconds(offset))
            }
        }
    }
}

/// Parsed five-field cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSpec {
    minutes: Vec<bool>,
    hours: Vec<bool>,
    days_of_month: Vec<bool>,
    months: Vec<bool>,
    days_of_week: Vec<bool>,
    dom_restricted: bool,
    dow_restricted: bool,
}

fn parse_cron_field(expr: &str, field: &str, min: u32, max: u32) -> Result<(Vec<bool>, bool), ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidCron {
        expr: expr.to_string(),
        reason,
    };
    let parse_num = |s: &str| -> Result<u32, ScheduleError> {
        let n: u32 = s
            .parse()
            .map_err(|_| invalid(format!("'{}' is not a number", s)))?;
        if n < min || n > max {
            return Err(invalid(format!("{} out of range {}-{}", n, min, max)));
        }
        Ok(n)
    };

    let mut set = vec![false; (max + 1) as usize];
    let mut restricted = false;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("bad step '{}'", step)))?;
                if step == 0 {
                    return Err(invalid("step cannot be 0".to_string()));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let (a, b) = (parse_num(a)?, parse_num(b)?);
            if a > b {
                return Err(invalid(format!("empty range {}-{}", a, b)));
            }
            (a, b)
        } else {
            let a = parse_num(range)?;
            (a, if step > 1 { max } else { a })
        };

        if range != "*" || step > 1 {
            restricted = true;
        }
        let mut v = lo;
        while v <= hi {
            set[v as usize] = true;
            v += step;
        }
    }

    Ok((set, restricted))
}

impl FromStr for CronSpec {
    type Err = ScheduleError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::InvalidCron {
                expr: expr.to_string(),
                reason: format!("expected 5 fields, got {}", fields.len()),
            });
        }

        let (minutes, _) = parse_cron_field(expr, fields[0], 0, 59)?;
        let (hours, _) = parse_cron_field(expr, fields[1], 0, 23)?;
        let (days_of_month, dom_restricted) = parse_cron_field(expr, fields[2], 1, 31)?;
        let (months, _) = parse_cron_field(expr, fields[3], 1, 12)?;
        let (mut days_of_week, dow_restricted) = parse_cron_field(expr, fields[4], 0, 7)?;
        if days_of_week[7] {
            days_of_week[0] = true;
        }

        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted,
            dow_restricted,
        })
    }
}

impl CronSpec {
    fn day_matches(&self, date: NaiveDate) -> bool {
        if !self.months[date.month() as usize] {
            return false;
        }
        let dom = self.days_of_month[date.day() as usize];
        let dow = self.days_of_week[date.weekday().num_days_from_sunday() as usize];
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let start = after
            .with_second(0)?
            .with_nanosecond(0)?
            .checked_add_signed(Duration::minutes(1))?;
        let first_day = start.date();

        // Five years covers every Feb 29 combination.
        for offset in 0..(366 * 5) {
            let date = first_day.checked_add_signed(Duration::days(offset))?;
            if !self.day_matches(date) {
                continue;
            }
            for hour in 0..24u32 {
                if !self.hours[hour as usize] {
                    continue;
                }
                for minute in 0..60u32 {
                    if !self.minutes[minute as usize] {
                        continue;
                    }
                    let candidate = date.and_hms_opt(hour, minute, 0)?;
                    if candidate >= start {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }
}
