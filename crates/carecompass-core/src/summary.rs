//! Weekly log summaries for patient charts.
//!
//! Logs are bucketed into the seven calendar days ending today, oldest day
//! first. Calendar days are taken in the time zone of the `now` argument, so
//! the same logs can be summarized for any viewer.

use crate::model::{non_empty, LogEntry, PatientStatus};
use crate::CoreError;
use chrono::{DateTime, Days, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

/// Number of day slots in a summary.
pub const DAYS_PER_WEEK: u64 = 7;

/// Assumed bedtime when a log only records the wake-up time.
pub const DEFAULT_SLEEP_START: &str = "22:00";
/// Assumed wake-up time when a log only records the bedtime.
pub const DEFAULT_SLEEP_END: &str = "06:00";

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Number of recent logs inspected by [`status_from_logs`].
const STATUS_WINDOW: usize = 3;

/// Aggregates for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySummary {
    pub date: NaiveDate,
    /// Chart label such as `12 Jan`
    pub label: String,
    /// Hours slept, `None` when no sleep was logged or it could not be read
    pub sleep_hours: Option<f64>,
    pub incidents: u32,
    pub hydration: u32,
    pub meals: u32,
    pub meds: u32,
}

impl DaySummary {
    /// Summarize one day's logs, given most recent first.
    fn from_logs(date: NaiveDate, logs: &[&LogEntry]) -> Self {
        let sleep_hours = logs.iter().find(|log| log.has_sleep()).and_then(|log| {
            sleep_hours(non_empty(&log.sleep_start), non_empty(&log.sleep_end))
        });

        Self {
            date,
            label: day_label(date),
            sleep_hours,
            incidents: count(logs, LogEntry::is_incident),
            hydration: count(logs, LogEntry::drank),
            meals: count(logs, LogEntry::ate_meal),
            meds: count(logs, LogEntry::meds_given),
        }
    }
}

/// Seven consecutive day summaries, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklySummary {
    pub days: Vec<DaySummary>,
}

/// Column-oriented view of a summary, one array per chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyChart {
    pub labels: Vec<String>,
    pub sleeps: Vec<Option<f64>>,
    pub behaviors: Vec<u32>,
    pub water: Vec<u32>,
    pub food: Vec<u32>,
    pub meds: Vec<u32>,
}

impl WeeklySummary {
    pub fn labels(&self) -> Vec<String> {
        self.days.iter().map(|d| d.label.clone()).collect()
    }

    pub fn sleep(&self) -> Vec<(String, Option<f64>)> {
        self.series(|d| d.sleep_hours)
    }

    pub fn incidents(&self) -> Vec<(String, u32)> {
        self.series(|d| d.incidents)
    }

    pub fn hydration(&self) -> Vec<(String, u32)> {
        self.series(|d| d.hydration)
    }

    pub fn meals(&self) -> Vec<(String, u32)> {
        self.series(|d| d.meals)
    }

    pub fn meds(&self) -> Vec<(String, u32)> {
        self.series(|d| d.meds)
    }

    pub fn chart(&self) -> WeeklyChart {
        WeeklyChart {
            labels: self.labels(),
            sleeps: self.days.iter().map(|d| d.sleep_hours).collect(),
            behaviors: self.days.iter().map(|d| d.incidents).collect(),
            water: self.days.iter().map(|d| d.hydration).collect(),
            food: self.days.iter().map(|d| d.meals).collect(),
            meds: self.days.iter().map(|d| d.meds).collect(),
        }
    }

    fn series<T>(&self, value: impl Fn(&DaySummary) -> T) -> Vec<(String, T)> {
        self.days
            .iter()
            .map(|d| (d.label.clone(), value(d)))
            .collect()
    }
}

/// Bucket logs into the seven calendar days ending on `now`'s date.
pub fn weekly_summary<Tz: TimeZone>(logs: &[LogEntry], now: &DateTime<Tz>) -> WeeklySummary {
    let tz = now.timezone();
    let today = now.date_naive();

    let mut dated: Vec<(NaiveDate, &LogEntry)> = logs
        .iter()
        .filter_map(|log| {
            tz.timestamp_millis_opt(log.created_at)
                .single()
                .map(|at| (at.date_naive(), log))
        })
        .collect();
    // Stable, so equal timestamps keep their input order.
    dated.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));

    let days = (0..DAYS_PER_WEEK)
        .rev()
        .filter_map(|offset| today.checked_sub_days(Days::new(offset)))
        .map(|date| {
            let day_logs: Vec<&LogEntry> = dated
                .iter()
                .filter(|(d, _)| *d == date)
                .map(|(_, log)| *log)
                .collect();
            DaySummary::from_logs(date, &day_logs)
        })
        .collect();

    WeeklySummary { days }
}

/// Hours between bedtime and wake-up, crossing midnight when `end <= start`.
///
/// Missing times fall back to [`DEFAULT_SLEEP_START`] and
/// [`DEFAULT_SLEEP_END`]. Returns `None` if either time does not parse.
pub fn sleep_hours(start: Option<&str>, end: Option<&str>) -> Option<f64> {
    let start = i64::from(parse_clock(start.unwrap_or(DEFAULT_SLEEP_START)).ok()?);
    let mut end = i64::from(parse_clock(end.unwrap_or(DEFAULT_SLEEP_END)).ok()?);
    if end <= start {
        end += i64::from(MINUTES_PER_DAY);
    }
    // out-of-range hours can leave end before start; the result goes negative
    Some((end - start) as f64 / 60.0)
}

/// Parse `H:MM` / `HH:MM` into minutes after midnight.
///
/// Extra `:SS` components are ignored. Hours and minutes are not range
/// checked, matching what caregivers type into free-form fields. An empty
/// hour or minute next to the colon counts as zero, so `"7:"` is 07:00.
/// Values too large to represent are rejected.
pub fn parse_clock(value: &str) -> Result<u32, CoreError> {
    let invalid = || CoreError::InvalidTime(value.to_string());
    let mut parts = value.trim().split(':');
    let hours = parts.next().and_then(clock_field).ok_or_else(invalid)?;
    let minutes = parts.next().and_then(clock_field).ok_or_else(invalid)?;
    hours
        .checked_mul(60)
        .and_then(|h| h.checked_add(minutes))
        .ok_or_else(invalid)
}

fn clock_field(part: &str) -> Option<u32> {
    let part = part.trim();
    if part.is_empty() {
        Some(0)
    } else {
        part.parse().ok()
    }
}

/// `risk` if any of the three most recent logs mentions aggression or an
/// outburst, `stable` otherwise.
pub fn status_from_logs(logs: &[LogEntry]) -> PatientStatus {
    let mut recent: Vec<&LogEntry> = logs.iter().collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let flagged = recent.iter().take(STATUS_WINDOW).any(|log| {
        let behavior = log.behavior.as_deref().unwrap_or_default().to_lowercase();
        behavior.contains("aggression") || behavior.contains("outburst")
    });

    if flagged {
        PatientStatus::Risk
    } else {
        PatientStatus::Stable
    }
}

fn day_label(date: NaiveDate) -> String {
    date.format("%-d %b").to_string()
}

fn count(logs: &[&LogEntry], predicate: impl Fn(&LogEntry) -> bool) -> u32 {
    logs.iter().filter(|log| predicate(log)).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .timestamp_millis()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 12, 15, 0, 0).unwrap()
    }

    fn log(created_at: i64) -> LogEntry {
        LogEntry::new("alex", created_at)
    }

    #[test]
    fn test_empty_week_has_seven_labelled_days() {
        let summary = weekly_summary(&[], &now());
        assert_eq!(summary.days.len(), 7);
        assert_eq!(
            summary.labels(),
            vec!["6 Jan", "7 Jan", "8 Jan", "9 Jan", "10 Jan", "11 Jan", "12 Jan"]
        );
        assert!(summary.sleep().iter().all(|(_, v)| v.is_none()));
        assert!(summary.incidents().iter().all(|(_, v)| *v == 0));
    }

    #[test]
    fn test_counts_bucket_by_day() {
        let mut drink = log(at(2024, 1, 12, 9, 0));
        drink.hydration = Some("drank".to_string());
        let mut drink_again = log(at(2024, 1, 12, 11, 0));
        drink_again.hydration = Some("drank".to_string());
        let mut skipped = log(at(2024, 1, 12, 12, 0));
        skipped.hydration = Some("refused".to_string());

        let mut lunch = log(at(2024, 1, 10, 12, 0));
        lunch.food = Some("full".to_string());
        let mut snack = log(at(2024, 1, 10, 16, 0));
        snack.food = Some("partial".to_string());

        let mut dose = log(at(2024, 1, 6, 8, 0));
        dose.meds = Some("given".to_string());
        let mut outburst = log(at(2024, 1, 6, 9, 0));
        outburst.behavior = Some("Outburst".to_string());

        let logs = vec![drink, drink_again, skipped, lunch, snack, dose, outburst];
        let summary = weekly_summary(&logs, &now());

        assert_eq!(summary.hydration()[6], ("12 Jan".to_string(), 2));
        assert_eq!(summary.meals()[4], ("10 Jan".to_string(), 2));
        assert_eq!(summary.meds()[0], ("6 Jan".to_string(), 1));
        assert_eq!(summary.incidents()[0], ("6 Jan".to_string(), 1));
        assert_eq!(summary.incidents()[6].1, 0);
    }

    #[test]
    fn test_logs_outside_week_are_ignored() {
        let mut old = log(at(2024, 1, 5, 23, 59));
        old.behavior = Some("hit".to_string());
        let mut future = log(at(2024, 1, 13, 0, 0));
        future.behavior = Some("hit".to_string());

        let summary = weekly_summary(&[old, future], &now());
        assert!(summary.incidents().iter().all(|(_, v)| *v == 0));
    }

    #[test]
    fn test_sleep_uses_most_recent_log_of_day() {
        let mut early = log(at(2024, 1, 11, 7, 0));
        early.sleep_start = Some("21:00".to_string());
        early.sleep_end = Some("07:00".to_string());
        let mut later = log(at(2024, 1, 11, 8, 0));
        later.sleep_start = Some("23:30".to_string());
        later.sleep_end = Some("06:00".to_string());

        // Input order must not matter.
        let summary = weekly_summary(&[later, early], &now());
        assert_eq!(summary.sleep()[5].1, Some(6.5));
    }

    #[test]
    fn test_sleep_defaults_missing_side() {
        let mut only_end = log(at(2024, 1, 12, 7, 0));
        only_end.sleep_end = Some("07:00".to_string());
        let mut only_start = log(at(2024, 1, 11, 7, 0));
        only_start.sleep_start = Some("20:00".to_string());

        let summary = weekly_summary(&[only_end, only_start], &now());
        assert_eq!(summary.sleep()[6].1, Some(9.0));
        assert_eq!(summary.sleep()[5].1, Some(10.0));
    }

    #[test]
    fn test_unparseable_sleep_does_not_fall_back() {
        let mut good = log(at(2024, 1, 12, 6, 0));
        good.sleep_start = Some("22:00".to_string());
        good.sleep_end = Some("06:00".to_string());
        let mut bad = log(at(2024, 1, 12, 8, 0));
        bad.sleep_start = Some("late".to_string());

        let summary = weekly_summary(&[good, bad], &now());
        assert_eq!(summary.sleep()[6].1, None);
    }

    #[test]
    fn test_sleep_hours_rules() {
        assert_eq!(sleep_hours(Some("22:00"), Some("06:00")), Some(8.0));
        assert_eq!(sleep_hours(Some("01:00"), Some("09:15")), Some(8.25));
        assert_eq!(sleep_hours(Some("08:00"), Some("08:00")), Some(24.0));
        assert_eq!(sleep_hours(None, None), Some(8.0));
        assert_eq!(sleep_hours(Some("7"), None), None);
        assert_eq!(parse_clock("7:05").unwrap(), 425);
        assert_eq!(parse_clock("07:05:59").unwrap(), 425);
        assert!(parse_clock("").is_err());
    }

    #[test]
    fn test_clock_edges() {
        assert_eq!(parse_clock("7:").unwrap(), 420);
        assert_eq!(parse_clock(":30").unwrap(), 30);
        assert_eq!(parse_clock("25:00").unwrap(), 1500);
        assert_eq!(parse_clock("7:75").unwrap(), 495);
        assert!(parse_clock("7").is_err());
        assert!(parse_clock("-1:00").is_err());
        assert!(parse_clock("ab:00").is_err());
        assert!(matches!(
            parse_clock("99999999:00"),
            Err(CoreError::InvalidTime(_))
        ));
        assert_eq!(parse_clock("71582788:15").unwrap(), u32::MAX);
        assert!(parse_clock("71582788:16").is_err());

        // hour past midnight still counts as the next morning
        assert_eq!(sleep_hours(Some("22:00"), Some("25:00")), Some(3.0));
        // bedtime past 24h is not wrapped a second time
        assert_eq!(sleep_hours(Some("30:00"), Some("1:00")), Some(-5.0));
        assert_eq!(sleep_hours(Some("99999999:00"), None), None);
    }

    #[test]
    fn test_huge_hour_does_not_panic() {
        let mut entry = log(at(2024, 1, 12, 7, 0));
        entry.sleep_start = Some("99999999:00".to_string());
        entry.sleep_end = Some("06:00".to_string());
        let summary = weekly_summary(&[entry], &now());
        assert_eq!(summary.days[6].sleep_hours, None);
    }

    #[test]
    fn test_calendar_day_follows_time_zone() {
        // 23:30 UTC on the 11th is already the 12th at UTC+2.
        let mut late = log(at(2024, 1, 11, 23, 30));
        late.behavior = Some("bit sleeve".to_string());
        let logs = vec![late];

        let utc = weekly_summary(&logs, &now());
        assert_eq!(utc.incidents()[5].1, 1);

        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let local_now = now().with_timezone(&plus_two);
        let local = weekly_summary(&logs, &local_now);
        assert_eq!(local.incidents()[6].1, 1);
        assert_eq!(local.incidents()[5].1, 0);
    }

    #[test]
    fn test_midnight_belongs_to_new_day() {
        let mut midnight = log(at(2024, 1, 12, 0, 0));
        midnight.meds = Some("given".to_string());
        let summary = weekly_summary(&[midnight], &now());
        assert_eq!(summary.meds()[6].1, 1);
        assert_eq!(summary.meds()[5].1, 0);
    }

    #[test]
    fn test_chart_columns_line_up() {
        let mut entry = log(at(2024, 1, 12, 9, 0));
        entry.hydration = Some("drank".to_string());
        let chart = weekly_summary(&[entry], &now()).chart();
        assert_eq!(chart.labels.len(), 7);
        assert_eq!(chart.water, vec![0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(chart.sleeps, vec![None; 7]);
    }

    #[test]
    fn test_status_from_recent_logs() {
        let mut calm = log(3);
        calm.behavior = Some("played".to_string());
        let mut aggressive = log(1);
        aggressive.behavior = Some("Physical AGGRESSION".to_string());

        assert_eq!(
            status_from_logs(&[calm.clone(), aggressive.clone()]),
            PatientStatus::Risk
        );

        // Aggression is the fourth most recent, outside the window.
        let newer: Vec<LogEntry> = (10..13).map(log).collect();
        let mut logs = newer;
        logs.push(aggressive);
        assert_eq!(status_from_logs(&logs), PatientStatus::Stable);
        assert_eq!(status_from_logs(&[]), PatientStatus::Stable);
    }
}
