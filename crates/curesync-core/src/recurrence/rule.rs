//! Recurrence rule variants and the stored-JSON codec.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{RecurrenceError, RecurrenceResult, TimeOfDay, Weekday};

/// Times used by the presentation layer when a medication has no schedule.
pub const DEFAULT_TIMES: [(u8, u8); 3] = [(8, 0), (14, 0), (20, 0)];

/// When a medication's reminders should fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecurrenceRule {
    /// Every day at each listed time.
    Daily { times: Vec<TimeOfDay> },
    /// On each listed weekday at each listed time.
    Weekly {
        times: Vec<TimeOfDay>,
        days_of_week: Vec<Weekday>,
    },
    /// Every `every_hours` hours, one series per anchor time.
    Interval {
        anchor_times: Vec<TimeOfDay>,
        every_hours: u32,
    },
}

/// Stored JSON shape. Field names match what the medication form writes.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSchedule {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    times: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    days_of_week: Option<Vec<i64>>,
    #[serde(default, alias = "everyHours", skip_serializing_if = "Option::is_none")]
    interval_hours: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    anchor_time: Option<String>,
}

impl RecurrenceRule {
    /// The presentation default: daily at 08:00, 14:00 and 20:00.
    ///
    /// Never persisted by the scheduler; a medication without a stored
    /// schedule gets no reminders.
    pub fn presentation_default() -> Self {
        let times = DEFAULT_TIMES
            .iter()
            .filter_map(|&(h, m)| TimeOfDay::new(h, m))
            .collect();
        RecurrenceRule::Daily { times }
    }

    /// Parse the stored JSON form, reporting why it was rejected.
    ///
    /// Times and weekdays are sorted and de-duplicated on the way in.
    /// Only a JSON object is accepted.
    pub fn parse_strict(raw: &str) -> RecurrenceResult<Self> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| RecurrenceError::Json(e.to_string()))?;
        if !value.is_object() {
            return Err(RecurrenceError::Json(format!(
                "expected a schedule object, got {}",
                json_kind(&value)
            )));
        }
        let stored: StoredSchedule =
            serde_json::from_value(value).map_err(|e| RecurrenceError::Json(e.to_string()))?;

        let times = parse_times(&stored.times)?;

        match stored.kind.as_str() {
            "daily" => {
                if times.is_empty() {
                    return Err(RecurrenceError::EmptyTimes);
                }
                Ok(RecurrenceRule::Daily { times })
            }
            "weekly" => {
                if times.is_empty() {
                    return Err(RecurrenceError::EmptyTimes);
                }
                let days = parse_days(stored.days_of_week.as_deref().unwrap_or_default())?;
                if days.is_empty() {
                    return Err(RecurrenceError::EmptyDays);
                }
                Ok(RecurrenceRule::Weekly {
                    times,
                    days_of_week: days,
                })
            }
            "interval" => {
                let hours = stored.interval_hours.unwrap_or(0);
                let every_hours = u32::try_from(hours)
                    .ok()
                    .filter(|h| *h >= 1)
                    .ok_or(RecurrenceError::InvalidInterval(hours))?;

                let mut anchors: BTreeSet<TimeOfDay> = times.into_iter().collect();
                if let Some(anchor) = stored.anchor_time.as_deref() {
                    anchors.insert(anchor.parse()?);
                }
                if anchors.is_empty() {
                    return Err(RecurrenceError::EmptyTimes);
                }
                Ok(RecurrenceRule::Interval {
                    anchor_times: anchors.into_iter().collect(),
                    every_hours,
                })
            }
            other => Err(RecurrenceError::UnknownKind(other.to_string())),
        }
    }

    /// Check the rule invariants: non-empty unique times, unique weekdays,
    /// and a positive interval.
    pub fn validate(&self) -> bool {
        match self {
            RecurrenceRule::Daily { times } => !times.is_empty() && all_unique(times),
            RecurrenceRule::Weekly {
                times,
                days_of_week,
            } => {
                !times.is_empty()
                    && all_unique(times)
                    && !days_of_week.is_empty()
                    && all_unique(days_of_week)
            }
            RecurrenceRule::Interval {
                anchor_times,
                every_hours,
            } => !anchor_times.is_empty() && all_unique(anchor_times) && *every_hours >= 1,
        }
    }

    /// Serialize to the stored JSON form accepted by [`Self::parse_strict`].
    pub fn to_stored_json(&self) -> String {
        let stored = match self {
            RecurrenceRule::Daily { times } => StoredSchedule {
                kind: "daily".into(),
                times: times.iter().map(ToString::to_string).collect(),
                ..Default::default()
            },
            RecurrenceRule::Weekly {
                times,
                days_of_week,
            } => StoredSchedule {
                kind: "weekly".into(),
                times: times.iter().map(ToString::to_string).collect(),
                days_of_week: Some(days_of_week.iter().map(|d| i64::from(d.index())).collect()),
                ..Default::default()
            },
            RecurrenceRule::Interval {
                anchor_times,
                every_hours,
            } => StoredSchedule {
                kind: "interval".into(),
                times: anchor_times.iter().map(ToString::to_string).collect(),
                interval_hours: Some(i64::from(*every_hours)),
                ..Default::default()
            },
        };
        // Plain strings and integers only; serialization cannot fail.
        serde_json::to_string(&stored).unwrap_or_default()
    }

    /// Wall-clock times named by the rule (the anchors for intervals).
    pub fn times(&self) -> Vec<TimeOfDay> {
        match self {
            RecurrenceRule::Daily { times } | RecurrenceRule::Weekly { times, .. } => {
                times.clone()
            }
            RecurrenceRule::Interval { anchor_times, .. } => anchor_times.clone(),
        }
    }

    /// Short label for logs and UI ("daily", "weekly", "interval").
    pub fn kind_label(&self) -> &'static str {
        match self {
            RecurrenceRule::Daily { .. } => "daily",
            RecurrenceRule::Weekly { .. } => "weekly",
            RecurrenceRule::Interval { .. } => "interval",
        }
    }
}

fn parse_times(raw: &[String]) -> RecurrenceResult<Vec<TimeOfDay>> {
    let set = raw
        .iter()
        .map(|t| t.parse::<TimeOfDay>())
        .collect::<RecurrenceResult<BTreeSet<_>>>()?;
    Ok(set.into_iter().collect())
}

fn parse_days(raw: &[i64]) -> RecurrenceResult<Vec<Weekday>> {
    let set = raw
        .iter()
        .map(|&d| {
            u8::try_from(d)
                .ok()
                .and_then(Weekday::new)
                .ok_or(RecurrenceError::InvalidWeekday(d))
        })
        .collect::<RecurrenceResult<BTreeSet<_>>>()?;
    Ok(set.into_iter().collect())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn all_unique<T: Ord>(items: &[T]) -> bool {
    items.iter().collect::<BTreeSet<_>>().len() == items.len()
}
