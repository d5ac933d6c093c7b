// sheetbackup/src/scheduler/trigger.rs
//
// Trigger construction for schedule definitions. Interval triggers fire
// every fixed period, first fire one period after registration. Cron
// triggers follow per-field expressions; an omitted field means "every
// value of that field".

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use crate::models::{CronFieldValue, CronSpec, IntervalSpec, ScheduleConfig, ScheduleType};

const SECONDS_PER_DAY: i64 = 86_400;

/// Weekday numbering follows the scheduler convention: 0 is Monday.
const DOW_NAMES: &[&str] = &["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// Upper bound for the next-fire search; a cron spec that matches no
/// instant within four years is treated as never firing.
const MAX_SEARCH_DAYS: i64 = 1462;

/// Allowed values of one cron field. `None` means every value.
#[derive(Debug, Clone, PartialEq)]
struct CronField {
    allowed: Option<Vec<u32>>,
}

impl CronField {
    fn any() -> Self {
        Self { allowed: None }
    }

    /// Parses `*`, `*/n`, `a`, `a-b`, `a-b/n` and comma lists thereof.
    /// Returns `None` for expressions outside `min..=max` or otherwise
    /// malformed.
    fn parse(expr: &str, min: u32, max: u32, names: &[&str]) -> Option<Self> {
        let expr = expr.trim();
        if expr.is_empty() || expr == "*" {
            return Some(Self::any());
        }

        let mut values = Vec::new();
        for token in expr.split(',') {
            let token = token.trim();
            let (range_part, step) = match token.split_once('/') {
                Some((range_part, step)) => {
                    (range_part, step.trim().parse::<u32>().ok().filter(|n| *n > 0)?)
                }
                None => (token, 1),
            };

            let (lo, hi) = if range_part == "*" {
                (min, max)
            } else if let Some((a, b)) = range_part.split_once('-') {
                (
                    resolve_field_value(a.trim(), names)?,
                    resolve_field_value(b.trim(), names)?,
                )
            } else {
                let value = resolve_field_value(range_part, names)?;
                // "5/2" means "from 5 upwards in steps of 2".
                if step == 1 { (value, value) } else { (value, max) }
            };

            if lo < min || hi > max || lo > hi {
                return None;
            }
            let mut value = lo;
            while value <= hi {
                values.push(value);
                value += step;
            }
        }

        values.sort_unstable();
        values.dedup();
        if values.is_empty() {
            return None;
        }
        Some(Self {
            allowed: Some(values),
        })
    }

    fn matches(&self, value: u32) -> bool {
        match &self.allowed {
            None => true,
            Some(values) => values.binary_search(&value).is_ok(),
        }
    }

    fn values_in(&self, min: u32, max: u32) -> Vec<u32> {
        match &self.allowed {
            None => (min..=max).collect(),
            Some(values) => values.clone(),
        }
    }
}

fn resolve_field_value(token: &str, names: &[&str]) -> Option<u32> {
    if let Ok(value) = token.parse::<u32>() {
        return Some(value);
    }
    let lowered = token.to_ascii_lowercase();
    names.iter().position(|n| *n == lowered).map(|i| i as u32)
}

#[derive(Debug, Clone)]
pub struct CronSchedule {
    second: CronField,
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronSchedule {
    fn from_spec(spec: &CronSpec) -> Option<Self> {
        Some(Self {
            second: parse_field(&spec.second, 0, 59, &[])?,
            minute: parse_field(&spec.minute, 0, 59, &[])?,
            hour: parse_field(&spec.hour, 0, 23, &[])?,
            day: parse_field(&spec.day, 1, 31, &[])?,
            month: parse_field(&spec.month, 1, 12, &[])?,
            day_of_week: parse_field(&spec.day_of_week, 0, 6, DOW_NAMES)?,
        })
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        self.month.matches(date.month())
            && self.day.matches(date.day())
            && self.day_of_week.matches(date.weekday().num_days_from_monday())
    }

    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_nanosecond(0)? + Duration::seconds(1);

        for day_offset in 0..MAX_SEARCH_DAYS {
            let moment = start + Duration::days(day_offset);
            let date = moment.date_naive();
            if !self.date_matches(date) {
                continue;
            }
            let lower = if day_offset == 0 {
                (start.hour(), start.minute(), start.second())
            } else {
                (0, 0, 0)
            };
            if let Some((h, m, s)) = self.next_hms(lower) {
                let naive = date.and_hms_opt(h, m, s)?;
                return Some(Utc.from_utc_datetime(&naive));
            }
        }
        None
    }

    /// Smallest allowed (hour, minute, second) at or after the bound,
    /// or `None` when nothing fits in the remainder of the day.
    fn next_hms(&self, (lower_h, lower_m, lower_s): (u32, u32, u32)) -> Option<(u32, u32, u32)> {
        for h in self.hour.values_in(0, 23) {
            if h < lower_h {
                continue;
            }
            for m in self.minute.values_in(0, 59) {
                if h == lower_h && m < lower_m {
                    continue;
                }
                for s in self.second.values_in(0, 59) {
                    if h == lower_h && m == lower_m && s < lower_s {
                        continue;
                    }
                    return Some((h, m, s));
                }
            }
        }
        None
    }
}

fn parse_field(
    field: &Option<CronFieldValue>,
    min: u32,
    max: u32,
    names: &[&str],
) -> Option<CronField> {
    match field {
        None => Some(CronField::any()),
        Some(value) => CronField::parse(&value.as_expr(), min, max, names),
    }
}

#[derive(Debug, Clone)]
pub enum Trigger {
    Interval(Duration),
    Cron(CronSchedule),
}

impl Trigger {
    pub fn first_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval(period) => Some(now + *period),
            Trigger::Cron(schedule) => schedule.next_after(now),
        }
    }

    pub fn next_after(&self, previous: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval(period) => Some(previous + *period),
            Trigger::Cron(schedule) => schedule.next_after(previous),
        }
    }
}

/// Builds the trigger for a schedule definition. Returns `None` (after
/// logging) when the configuration cannot produce one; the caller must
/// not register a job in that case.
pub fn build_trigger(schedule_type: ScheduleType, config: &ScheduleConfig) -> Option<Trigger> {
    match schedule_type {
        ScheduleType::Interval => {
            let spec = config.interval.clone().unwrap_or_default();
            Some(Trigger::Interval(interval_period(&spec)))
        }
        ScheduleType::Cron => {
            let spec = config.cron.clone().unwrap_or_default();
            match CronSchedule::from_spec(&spec) {
                Some(schedule) => Some(Trigger::Cron(schedule)),
                None => {
                    tracing::error!("invalid cron configuration: {spec:?}");
                    None
                }
            }
        }
    }
}

/// Sums the interval fields into one period. With no field present (or
/// all zero) the documented default of one day applies.
fn interval_period(spec: &IntervalSpec) -> Duration {
    let mut seconds = 0i64;
    seconds += i64::from(spec.seconds.unwrap_or(0));
    seconds += i64::from(spec.minutes.unwrap_or(0)) * 60;
    seconds += i64::from(spec.hours.unwrap_or(0)) * 3_600;
    seconds += i64::from(spec.days.unwrap_or(0)) * SECONDS_PER_DAY;
    seconds += i64::from(spec.weeks.unwrap_or(0)) * 7 * SECONDS_PER_DAY;
    if seconds == 0 {
        seconds = SECONDS_PER_DAY;
    }
    Duration::seconds(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s)
            .single()
            .expect("valid timestamp")
    }

    fn cron_config(spec: CronSpec) -> ScheduleConfig {
        ScheduleConfig {
            interval: None,
            cron: Some(spec),
        }
    }

    #[test]
    fn test_empty_interval_defaults_to_one_day() {
        let trigger = build_trigger(ScheduleType::Interval, &ScheduleConfig::default())
            .expect("trigger should build");
        let now = at(2024, 3, 1, 12, 0, 0);
        assert_eq!(trigger.first_fire(now), Some(at(2024, 3, 2, 12, 0, 0)));

        // Explicit zeros count as absent too.
        let config = ScheduleConfig {
            interval: Some(IntervalSpec {
                seconds: Some(0),
                ..Default::default()
            }),
            cron: None,
        };
        let trigger = build_trigger(ScheduleType::Interval, &config).expect("trigger should build");
        assert_eq!(trigger.next_after(now), Some(at(2024, 3, 2, 12, 0, 0)));
    }

    #[test]
    fn test_interval_fields_are_summed() {
        let config = ScheduleConfig {
            interval: Some(IntervalSpec {
                hours: Some(1),
                minutes: Some(30),
                ..Default::default()
            }),
            cron: None,
        };
        let trigger = build_trigger(ScheduleType::Interval, &config).expect("trigger should build");
        let now = at(2024, 3, 1, 12, 0, 0);
        assert_eq!(trigger.first_fire(now), Some(at(2024, 3, 1, 13, 30, 0)));
    }

    #[test]
    fn test_cron_daily_time() {
        let trigger = build_trigger(
            ScheduleType::Cron,
            &cron_config(CronSpec {
                second: Some(CronFieldValue::Number(0)),
                minute: Some(CronFieldValue::Number(30)),
                hour: Some(CronFieldValue::Number(2)),
                ..Default::default()
            }),
        )
        .expect("trigger should build");

        // Before today's slot: fires today.
        assert_eq!(
            trigger.next_after(at(2024, 3, 1, 1, 0, 0)),
            Some(at(2024, 3, 1, 2, 30, 0))
        );
        // After it: fires tomorrow.
        assert_eq!(
            trigger.next_after(at(2024, 3, 1, 3, 0, 0)),
            Some(at(2024, 3, 2, 2, 30, 0))
        );
        // Exactly at the slot: strictly after.
        assert_eq!(
            trigger.next_after(at(2024, 3, 1, 2, 30, 0)),
            Some(at(2024, 3, 2, 2, 30, 0))
        );
    }

    #[test]
    fn test_cron_step_expression() {
        let trigger = build_trigger(
            ScheduleType::Cron,
            &cron_config(CronSpec {
                second: Some(CronFieldValue::Number(0)),
                minute: Some(CronFieldValue::Expr("*/15".to_string())),
                ..Default::default()
            }),
        )
        .expect("trigger should build");

        assert_eq!(
            trigger.next_after(at(2024, 3, 1, 10, 7, 30)),
            Some(at(2024, 3, 1, 10, 15, 0))
        );
        assert_eq!(
            trigger.next_after(at(2024, 3, 1, 10, 45, 0)),
            Some(at(2024, 3, 1, 11, 0, 0))
        );
    }

    #[test]
    fn test_cron_day_of_week_names() {
        // 2024-03-01 is a Friday; the next Monday is 2024-03-04.
        let trigger = build_trigger(
            ScheduleType::Cron,
            &cron_config(CronSpec {
                second: Some(CronFieldValue::Number(0)),
                minute: Some(CronFieldValue::Number(0)),
                hour: Some(CronFieldValue::Number(9)),
                day_of_week: Some(CronFieldValue::Expr("mon".to_string())),
                ..Default::default()
            }),
        )
        .expect("trigger should build");

        assert_eq!(
            trigger.next_after(at(2024, 3, 1, 12, 0, 0)),
            Some(at(2024, 3, 4, 9, 0, 0))
        );
    }

    #[test]
    fn test_empty_cron_bag_fires_every_second() {
        let trigger = build_trigger(ScheduleType::Cron, &ScheduleConfig::default())
            .expect("empty cron bag is accepted");
        let now = at(2024, 3, 1, 10, 0, 0);
        assert_eq!(trigger.next_after(now), Some(at(2024, 3, 1, 10, 0, 1)));
    }

    #[test]
    fn test_out_of_range_cron_field_fails() {
        let config = cron_config(CronSpec {
            second: Some(CronFieldValue::Number(61)),
            ..Default::default()
        });
        assert!(build_trigger(ScheduleType::Cron, &config).is_none());

        let config = cron_config(CronSpec {
            day_of_week: Some(CronFieldValue::Expr("noday".to_string())),
            ..Default::default()
        });
        assert!(build_trigger(ScheduleType::Cron, &config).is_none());
    }

    #[test]
    fn test_unknown_schedule_kind_is_rejected_at_parse() {
        assert!(ScheduleType::parse("weekly").is_none());
        assert_eq!(ScheduleType::parse("interval"), Some(ScheduleType::Interval));
        assert_eq!(ScheduleType::parse("cron"), Some(ScheduleType::Cron));
    }

    #[test]
    fn test_cron_list_and_range_expressions() {
        let field = CronField::parse("1,3,5", 0, 59, &[]).expect("list should parse");
        assert!(field.matches(3));
        assert!(!field.matches(2));

        let field = CronField::parse("10-12", 0, 23, &[]).expect("range should parse");
        assert_eq!(field.values_in(0, 23), vec![10, 11, 12]);

        assert!(CronField::parse("5-1", 0, 59, &[]).is_none());
        assert!(CronField::parse("*/0", 0, 59, &[]).is_none());
    }
}
