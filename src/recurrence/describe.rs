//! Human-readable rendering of recurrence definitions

use chrono::{Month, Weekday};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::RecurrenceLabel;

/// Pattern family of a recurring series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Daily,
    Weekly,
    AbsoluteMonthly,
    RelativeMonthly,
    AbsoluteYearly,
    RelativeYearly,
    Regenerating,
}

impl PatternKind {
    /// Parse a pattern name as either backend spells it
    /// (`weekly`, `WeeklyRecurrence`, `DailyRegeneration`, ...)
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        if name.contains("regenerat") {
            return Some(PatternKind::Regenerating);
        }
        let stem = name
            .trim_end_matches("recurrence")
            .trim_end_matches("pattern");
        match stem {
            "daily" => Some(PatternKind::Daily),
            "weekly" => Some(PatternKind::Weekly),
            "absolutemonthly" => Some(PatternKind::AbsoluteMonthly),
            "relativemonthly" => Some(PatternKind::RelativeMonthly),
            "absoluteyearly" => Some(PatternKind::AbsoluteYearly),
            "relativeyearly" => Some(PatternKind::RelativeYearly),
            _ => None,
        }
    }

    fn label(&self, locale: ReportLocale) -> &'static str {
        match (locale, self) {
            (ReportLocale::English, PatternKind::Daily) => "Daily",
            (ReportLocale::English, PatternKind::Weekly) => "Weekly",
            (ReportLocale::English, PatternKind::AbsoluteMonthly) => "AbsoluteMonthly",
            (ReportLocale::English, PatternKind::RelativeMonthly) => "RelativeMonthly",
            (ReportLocale::English, PatternKind::AbsoluteYearly) => "AbsoluteYearly",
            (ReportLocale::English, PatternKind::RelativeYearly) => "RelativeYearly",
            (ReportLocale::English, PatternKind::Regenerating) => "Regenerating",
            (ReportLocale::Chinese, PatternKind::Daily) => "按天",
            (ReportLocale::Chinese, PatternKind::Weekly) => "按周",
            (ReportLocale::Chinese, PatternKind::AbsoluteMonthly) => "按月(固定)",
            (ReportLocale::Chinese, PatternKind::RelativeMonthly) => "按月(相对)",
            (ReportLocale::Chinese, PatternKind::AbsoluteYearly) => "按年(固定)",
            (ReportLocale::Chinese, PatternKind::RelativeYearly) => "按年(相对)",
            (ReportLocale::Chinese, PatternKind::Regenerating) => "重新生成",
        }
    }
}

/// How often a series repeats
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrencePattern {
    pub kind: PatternKind,
    pub interval: Option<u32>,
    pub days_of_week: Vec<String>,
    pub day_of_month: Option<u32>,
    pub first_day_of_week: Option<String>,
    pub month: Option<u32>,
    pub index: Option<String>,
}

impl RecurrencePattern {
    pub fn new(kind: PatternKind) -> Self {
        Self {
            kind,
            interval: None,
            days_of_week: Vec::new(),
            day_of_month: None,
            first_day_of_week: None,
            month: None,
            index: None,
        }
    }
}

/// When a series stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecurrenceRange {
    pub end_date: Option<String>,
    pub occurrences: Option<u32>,
    pub no_end: bool,
}

/// Pattern plus range, as attached to a series master
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceDefinition {
    pub pattern: Option<RecurrencePattern>,
    pub range: RecurrenceRange,
}

/// Resolved duration of a series
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurationKind {
    EndsOn(String),
    Occurrences(u32),
    NoEnd,
    Unknown,
}

impl RecurrenceRange {
    /// End date first, then occurrence count, then the no-end marker
    pub fn duration(&self) -> DurationKind {
        if let Some(end) = self.end_date.as_deref().filter(|d| !d.trim().is_empty()) {
            return DurationKind::EndsOn(end.trim().to_string());
        }
        if let Some(count) = self.occurrences.filter(|n| *n > 0) {
            return DurationKind::Occurrences(count);
        }
        if self.no_end {
            return DurationKind::NoEnd;
        }
        DurationKind::Unknown
    }
}

/// Language used for recurrence texts in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
pub enum ReportLocale {
    #[default]
    #[serde(rename = "en")]
    #[value(name = "en")]
    English,
    #[serde(rename = "zh")]
    #[value(name = "zh")]
    Chinese,
}

impl ReportLocale {
    fn duration_text(&self, duration: &DurationKind) -> String {
        match (self, duration) {
            (ReportLocale::English, DurationKind::EndsOn(date)) => format!("Ends on {}", date),
            (ReportLocale::English, DurationKind::Occurrences(n)) => format!("{} occurrences", n),
            (ReportLocale::English, DurationKind::NoEnd) => "No end".to_string(),
            (ReportLocale::English, DurationKind::Unknown) => "Unknown".to_string(),
            (ReportLocale::Chinese, DurationKind::EndsOn(date)) => format!("结束于: {}", date),
            (ReportLocale::Chinese, DurationKind::Occurrences(n)) => format!("共 {} 次", n),
            (ReportLocale::Chinese, DurationKind::NoEnd) => "无限期".to_string(),
            (ReportLocale::Chinese, DurationKind::Unknown) => "未知".to_string(),
        }
    }

    fn weekday(&self, raw: &str) -> String {
        let day = match raw.trim().parse::<Weekday>() {
            Ok(day) => day,
            Err(_) => return raw.trim().to_string(),
        };
        match self {
            ReportLocale::English => match day {
                Weekday::Mon => "Monday",
                Weekday::Tue => "Tuesday",
                Weekday::Wed => "Wednesday",
                Weekday::Thu => "Thursday",
                Weekday::Fri => "Friday",
                Weekday::Sat => "Saturday",
                Weekday::Sun => "Sunday",
            },
            ReportLocale::Chinese => match day {
                Weekday::Mon => "周一",
                Weekday::Tue => "周二",
                Weekday::Wed => "周三",
                Weekday::Thu => "周四",
                Weekday::Fri => "周五",
                Weekday::Sat => "周六",
                Weekday::Sun => "周日",
            },
        }
        .to_string()
    }

    fn week_index(&self, raw: &str) -> String {
        let lower = raw.trim().to_lowercase();
        let text = match (self, lower.as_str()) {
            (ReportLocale::English, "first") => "First",
            (ReportLocale::English, "second") => "Second",
            (ReportLocale::English, "third") => "Third",
            (ReportLocale::English, "fourth") => "Fourth",
            (ReportLocale::English, "last") => "Last",
            (ReportLocale::Chinese, "first") => "第一个",
            (ReportLocale::Chinese, "second") => "第二个",
            (ReportLocale::Chinese, "third") => "第三个",
            (ReportLocale::Chinese, "fourth") => "第四个",
            (ReportLocale::Chinese, "last") => "最后一个",
            _ => return raw.trim().to_string(),
        };
        text.to_string()
    }

    fn pattern_details(&self, pattern: &RecurrencePattern) -> Vec<String> {
        let mut details = Vec::new();
        let zh = *self == ReportLocale::Chinese;

        if let Some(interval) = pattern.interval {
            details.push(if zh {
                format!("间隔={}", interval)
            } else {
                format!("Interval={}", interval)
            });
        }

        if !pattern.days_of_week.is_empty() {
            let days = pattern
                .days_of_week
                .iter()
                .map(|d| self.weekday(d))
                .collect::<Vec<_>>()
                .join(", ");
            details.push(if zh { format!("星期={}", days) } else { format!("Days={}", days) });
        }

        if let Some(day) = pattern.day_of_month {
            details.push(if zh { format!("日期={}日", day) } else { format!("Day={}", day) });
        }

        if let Some(first) = pattern.first_day_of_week.as_deref() {
            let first = self.weekday(first);
            details.push(if zh {
                format!("周首日={}", first)
            } else {
                format!("FirstDayOfWeek={}", first)
            });
        }

        if let Some(month) = pattern.month {
            details.push(if zh { format!("月份={}月", month) } else { format!("Month={}", month) });
        }

        if let Some(index) = pattern.index.as_deref() {
            let index = self.week_index(index);
            details.push(if zh { format!("索引={}", index) } else { format!("Index={}", index) });
        }

        details
    }
}

/// Parse a month given as a number or an English month name
pub fn parse_month(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if let Ok(number) = raw.parse::<u32>() {
        return (1..=12).contains(&number).then_some(number);
    }
    raw.parse::<Month>().ok().map(|m| m.number_from_month())
}

/// Report texts for a series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterDescription {
    pub pattern_name: String,
    pub pattern_details: String,
    pub duration_text: String,
    pub duration: DurationKind,
}

/// Render the recurrence of a master for the report columns
pub fn describe_master(definition: &RecurrenceDefinition, locale: ReportLocale) -> MasterDescription {
    let (pattern_name, pattern_details) = match definition.pattern.as_ref() {
        Some(pattern) => {
            let name = pattern.kind.label(locale).to_string();
            let details = locale.pattern_details(pattern);
            let rendered = if details.is_empty() {
                name.clone()
            } else {
                format!("{}: {}", name, details.join(", "))
            };
            (name, rendered)
        }
        None => (String::new(), String::new()),
    };

    let duration = definition.range.duration();
    MasterDescription {
        pattern_name,
        pattern_details,
        duration_text: locale.duration_text(&duration),
        duration,
    }
}

/// `IsEndless` column value: masters report True/False, everything else N/A
pub fn endless_flag(label: RecurrenceLabel, duration: Option<&DurationKind>) -> &'static str {
    if label != RecurrenceLabel::RecurringMaster {
        return "N/A";
    }
    match duration {
        Some(DurationKind::NoEnd) => "True",
        _ => "False",
    }
}
