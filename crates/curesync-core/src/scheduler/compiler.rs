//! Trigger compiler: expands a recurrence rule into device trigger specs.
//!
//! Compilation is pure and deterministic. Specs come out ordered by
//! time of day, then by weekday index for weekly rules.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::recurrence::{RecurrenceRule, TimeOfDay, Weekday};

/// One not-yet-registered instruction for the device notification service.
///
/// Every trigger kind repeats until cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Every day at `time`.
    Daily { time: TimeOfDay },
    /// Every week on `weekday` at `time`.
    Weekly { weekday: Weekday, time: TimeOfDay },
    /// Every `every_hours` hours, anchored at `anchor`.
    ///
    /// Hosts typically only offer "every N seconds from registration", so
    /// an alarm registered away from the anchor drifts from the anchored
    /// series that [`TriggerSpec::next_fire_after`] computes.
    Interval { anchor: TimeOfDay, every_hours: u32 },
}

/// A trigger spec the device service accepted, with its opaque identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTrigger {
    pub medication_id: i64,
    pub identifier: String,
    pub spec: TriggerSpec,
}

/// Compile a rule into trigger specs. `None` compiles to nothing.
pub fn compile(rule: Option<&RecurrenceRule>) -> Vec<TriggerSpec> {
    let Some(rule) = rule else {
        return Vec::new();
    };
    if !rule.validate() {
        tracing::warn!(kind = rule.kind_label(), "Refusing to compile invalid rule");
        return Vec::new();
    }

    let mut specs = match rule {
        RecurrenceRule::Daily { times } => times
            .iter()
            .map(|&time| TriggerSpec::Daily { time })
            .collect::<Vec<_>>(),
        RecurrenceRule::Weekly {
            times,
            days_of_week,
        } => times
            .iter()
            .flat_map(|&time| {
                days_of_week
                    .iter()
                    .map(move |&weekday| TriggerSpec::Weekly { weekday, time })
            })
            .collect(),
        RecurrenceRule::Interval {
            anchor_times,
            every_hours,
        } => anchor_times
            .iter()
            .map(|&anchor| TriggerSpec::Interval {
                anchor,
                every_hours: *every_hours,
            })
            .collect(),
    };

    // Hand-built rules may list times or days out of order.
    specs.sort_by_key(TriggerSpec::sort_key);
    specs
}

/// The next instant after `now` at which any trigger of `rule` fires.
pub fn next_occurrence(rule: Option<&RecurrenceRule>, now: NaiveDateTime) -> Option<NaiveDateTime> {
    compile(rule)
        .iter()
        .map(|spec| spec.next_fire_after(now))
        .min()
}

/// Wall-clock times at which `rule` fires on `date`, ascending.
pub fn occurrences_on(rule: Option<&RecurrenceRule>, date: NaiveDate) -> Vec<NaiveTime> {
    let day_start = date.and_time(NaiveTime::MIN);
    let day_end = day_start + Duration::days(1);
    // Strictly-after search, so begin one second before midnight.
    let from = day_start - Duration::seconds(1);

    let mut times: Vec<NaiveTime> = compile(rule)
        .iter()
        .flat_map(|spec| {
            std::iter::successors(Some(spec.next_fire_after(from)), move |prev| {
                Some(spec.next_fire_after(*prev))
            })
            .take_while(move |at| *at < day_end)
        })
        .map(|at| at.time())
        .collect();
    times.sort();
    times.dedup();
    times
}

impl TriggerSpec {
    fn sort_key(&self) -> (TimeOfDay, u8) {
        match self {
            TriggerSpec::Daily { time } => (*time, 0),
            TriggerSpec::Weekly { weekday, time } => (*time, weekday.index()),
            TriggerSpec::Interval { anchor, .. } => (*anchor, 0),
        }
    }

    /// Wall-clock time of day this trigger is pinned to.
    pub fn time_of_day(&self) -> TimeOfDay {
        self.sort_key().0
    }

    /// Repeat period in seconds for interval triggers.
    pub fn interval_seconds(&self) -> Option<u64> {
        match self {
            TriggerSpec::Interval { every_hours, .. } => Some(u64::from(*every_hours) * 3600),
            _ => None,
        }
    }

    /// The first fire time strictly after `now`, in local wall-clock time.
    ///
    /// Interval triggers are anchored at the anchor time on 1970-01-01, so
    /// the series is stable across reschedules and day boundaries.
    pub fn next_fire_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        match self {
            TriggerSpec::Daily { time } => {
                let candidate = now.date().and_time(time.to_naive_time());
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
            TriggerSpec::Weekly { weekday, time } => {
                let ahead = weekday.days_from(Weekday::of(now.date()));
                let candidate = (now.date() + Duration::days(i64::from(ahead)))
                    .and_time(time.to_naive_time());
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::weeks(1)
                }
            }
            TriggerSpec::Interval {
                anchor,
                every_hours,
            } => {
                let origin = NaiveDate::default().and_time(anchor.to_naive_time());
                let period = i64::from(*every_hours).max(1) * 3600;
                let elapsed = (now - origin).num_seconds();
                let steps = elapsed.div_euclid(period) + 1;
                origin + Duration::seconds(steps * period)
            }
        }
    }
}
