use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::datefmt::parse_any;
use crate::datetime::{local_from_unix, parse_clock_time};
use crate::error::RecordError;

/// Course event `eventtype` values that mark the end of an activity.
const DEADLINE_EVENT_TYPES: [&str; 2] = ["due", "close"];

/// A course activity event as synced into the user document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseEntry {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub activityname: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub activitystr: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub url: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub popupname: String,
    /// Unix seconds, as text.
    #[serde(default, deserialize_with = "lenient::text")]
    pub timestart: String,
    /// `DD/MM/YYYY`.
    #[serde(default, deserialize_with = "lenient::text")]
    pub daystart: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub eventtype: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub coursename: String,
}

/// One session of a weekly class timetable (`lichTuan`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyClassEntry {
    #[serde(rename = "ngayBatDauHoc", default, deserialize_with = "lenient::text")]
    pub course_start: String,
    #[serde(rename = "tenPhong", default, deserialize_with = "lenient::text")]
    pub room: String,
    /// Weekday number, 2 = Monday through 8 = Sunday.
    #[serde(rename = "thu", default, deserialize_with = "lenient::text")]
    pub weekday: String,
    #[serde(rename = "tuTiet", default, deserialize_with = "lenient::number")]
    pub period_from: Option<u32>,
    #[serde(rename = "denTiet", default, deserialize_with = "lenient::number")]
    pub period_to: Option<u32>,
    #[serde(rename = "maLopHocPhan", default, deserialize_with = "lenient::text")]
    pub class_code: String,
    #[serde(rename = "tenMonHoc", default, deserialize_with = "lenient::text")]
    pub subject: String,
    #[serde(rename = "isTamNgung", default, deserialize_with = "lenient::flag")]
    pub suspended: bool,
    #[serde(rename = "timeToDisplay", default, deserialize_with = "lenient::text")]
    pub time_to_display: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub link: String,
    /// `DD/MM/YYYY`.
    #[serde(default, deserialize_with = "lenient::text")]
    pub daystart: String,
    /// Start time, `HH:MM` optionally followed by more text.
    #[serde(rename = "gioHoc", default, deserialize_with = "lenient::text")]
    pub class_time: String,
}

/// A personal schedule item created by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// `YYYY-MM-DD`.
    #[serde(default, deserialize_with = "lenient::text")]
    pub daystart: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    /// `HH:MM`.
    #[serde(default, deserialize_with = "lenient::text")]
    pub timestart: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub color: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    Courses,
    Classes,
    Schedule,
}

impl std::str::FromStr for RecordSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "courses" | "course" => Ok(RecordSource::Courses),
            "classes" | "class" => Ok(RecordSource::Classes),
            "schedule" | "schedules" => Ok(RecordSource::Schedule),
            other => Err(anyhow::anyhow!("unknown record source: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Category {
    /// A course activity opening.
    Opening,
    /// A course activity deadline (`due` / `close`).
    Deadline,
    Class { suspended: bool },
    Personal { color: String },
}

impl Category {
    pub fn source(&self) -> RecordSource {
        match self {
            Category::Opening | Category::Deadline => RecordSource::Courses,
            Category::Class { .. } => RecordSource::Classes,
            Category::Personal { .. } => RecordSource::Schedule,
        }
    }
}

/// A dated event normalized for one render pass. Dates are parsed once
/// here; nothing downstream looks at the stored strings again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub date: NaiveDate,
    pub start: Option<NaiveTime>,
    pub name: String,
    pub category: Category,
    /// Explicit weekday carried by weekly class sessions.
    pub weekday: Option<Weekday>,
    pub url: Option<String>,
    pub detail: Option<String>,
}

impl EventRecord {
    pub fn source(&self) -> RecordSource {
        self.category.source()
    }
}

/// Stored entry shapes that can be normalized into an [`EventRecord`].
pub trait StoredEntry {
    const KIND: &'static str;

    fn to_record(&self) -> Result<EventRecord, RecordError>;
}

impl StoredEntry for CourseEntry {
    const KIND: &'static str = "course";

    fn to_record(&self) -> Result<EventRecord, RecordError> {
        let date = required_date("daystart", &self.daystart)?;

        let start = self
            .timestart
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(local_from_unix)
            .map(|local| local.time());
        if start.is_none() && !self.timestart.trim().is_empty() {
            debug!(timestart = %self.timestart, "course start time not usable");
        }

        let eventtype = self.eventtype.trim().to_ascii_lowercase();
        let category = if DEADLINE_EVENT_TYPES.contains(&eventtype.as_str()) {
            Category::Deadline
        } else {
            Category::Opening
        };

        let name = first_non_empty(&[
            self.name.as_str(),
            self.activityname.as_str(),
            self.popupname.as_str(),
        ])
        .unwrap_or_else(|| format!("Course event {}", self.id));
        let detail = self
            .coursename
            .split(" - ")
            .nth(1)
            .or(Some(self.coursename.as_str()))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        Ok(EventRecord {
            date,
            start,
            name,
            category,
            weekday: None,
            url: non_empty(&self.url),
            detail,
        })
    }
}

impl StoredEntry for WeeklyClassEntry {
    const KIND: &'static str = "weekly class";

    fn to_record(&self) -> Result<EventRecord, RecordError> {
        let date = required_date("daystart", &self.daystart)?;
        let weekday = parse_weekday_number(&self.weekday)?;
        if date.weekday() != weekday {
            return Err(RecordError::WeekdayMismatch {
                weekday: weekday.number_from_monday() + 1,
                date: date.to_string(),
            });
        }

        let periods = match (self.period_from, self.period_to) {
            (Some(from), Some(to)) => Some(format!("periods {from}-{to}")),
            _ => None,
        };
        let detail = match (non_empty(&self.room), periods) {
            (Some(room), Some(periods)) => Some(format!("{room} ({periods})")),
            (Some(room), None) => Some(room),
            (None, periods) => periods,
        };

        Ok(EventRecord {
            date,
            start: parse_clock_time(&self.class_time),
            name: first_non_empty(&[self.subject.as_str(), self.class_code.as_str()])
                .unwrap_or_else(|| "Class".to_string()),
            category: Category::Class {
                suspended: self.suspended,
            },
            weekday: Some(weekday),
            url: non_empty(&self.link),
            detail,
        })
    }
}

impl StoredEntry for ScheduleEntry {
    const KIND: &'static str = "schedule item";

    fn to_record(&self) -> Result<EventRecord, RecordError> {
        let date = required_date("daystart", &self.daystart)?;

        Ok(EventRecord {
            date,
            start: parse_clock_time(&self.timestart),
            name: self.name.trim().to_string(),
            category: Category::Personal {
                color: self.color.clone(),
            },
            weekday: None,
            url: None,
            detail: None,
        })
    }
}

/// Normalizes stored entries, skipping the ones that cannot be read.
#[tracing::instrument(skip(entries), fields(kind = T::KIND))]
pub fn ingest<T: StoredEntry>(entries: &[T]) -> Vec<EventRecord> {
    let records: Vec<EventRecord> = entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| match entry.to_record() {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(index, kind = T::KIND, error = %err, "skipping unreadable entry");
                None
            }
        })
        .collect();

    debug!(
        total = entries.len(),
        kept = records.len(),
        "entries normalized"
    );
    records
}

/// Maps the stored weekday numbering (2 = Monday .. 8 = Sunday, `CN`
/// for Sunday) onto chrono's weekday.
pub fn parse_weekday_number(raw: &str) -> Result<Weekday, RecordError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("cn") {
        return Ok(Weekday::Sun);
    }
    match trimmed.parse::<u32>() {
        Ok(2) => Ok(Weekday::Mon),
        Ok(3) => Ok(Weekday::Tue),
        Ok(4) => Ok(Weekday::Wed),
        Ok(5) => Ok(Weekday::Thu),
        Ok(6) => Ok(Weekday::Fri),
        Ok(7) => Ok(Weekday::Sat),
        Ok(8) => Ok(Weekday::Sun),
        _ if trimmed.is_empty() => Err(RecordError::MissingField("thu")),
        _ => Err(RecordError::BadWeekday(trimmed.to_string())),
    }
}

fn required_date(field: &'static str, raw: &str) -> Result<NaiveDate, RecordError> {
    if raw.trim().is_empty() {
        return Err(RecordError::MissingField(field));
    }
    parse_any(raw).ok_or_else(|| RecordError::BadDate {
        field,
        value: raw.to_string(),
    })
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn first_non_empty(candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|raw| non_empty(raw))
}

/// Deserializers that accept whatever shape a field was written in and
/// fall back to the default instead of failing the whole document.
pub mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;
    use tracing::warn;

    pub fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::String(raw)) => raw,
            Some(Value::Number(number)) => number.to_string(),
            Some(Value::Bool(flag)) => flag.to_string(),
            _ => String::new(),
        })
    }

    pub fn number<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::Number(number)) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
            Some(Value::String(raw)) => raw.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::Bool(flag)) => flag,
            Some(Value::Number(number)) => number.as_u64().is_some_and(|n| n != 0),
            Some(Value::String(raw)) => matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            ),
            _ => false,
        })
    }

    /// A list whose unreadable elements are dropped one by one.
    pub fn entries<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        let Some(Value::Array(items)) = value else {
            return Ok(Vec::new());
        };

        Ok(items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| match serde_json::from_value::<T>(item) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(index, error = %err, "dropping malformed stored entry");
                    None
                }
            })
            .collect())
    }
}
