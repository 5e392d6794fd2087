//! Today's dose timeline and adherence summaries.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::models::{DoseRecord, DoseStatus, Medication};
use crate::recurrence::{RecurrenceRule, TimeOfDay};
use crate::scheduler::occurrences_on;

/// One expected dose on today's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Stable key: `<medication id>-<HH:MM>`
    pub id: String,
    pub medication_id: i64,
    pub medication_name: String,
    pub time: TimeOfDay,
    /// The slot time has been reached
    pub is_past: bool,
}

/// Expand each medication's schedule into today's slots, sorted by time.
///
/// Medications without a usable schedule show `default_rule`.
pub fn build_timeline(
    medications: &[Medication],
    now: NaiveDateTime,
    default_rule: &RecurrenceRule,
) -> Vec<TimeSlot> {
    let current = TimeOfDay::from_naive_time(now.time());

    let mut slots: Vec<TimeSlot> = medications
        .iter()
        .flat_map(|med| {
            let rule = med.recurrence().unwrap_or_else(|| default_rule.clone());
            occurrences_on(Some(&rule), now.date())
                .into_iter()
                .map(TimeOfDay::from_naive_time)
                .map(move |time| TimeSlot {
                    id: format!("{}-{}", med.id, time),
                    medication_id: med.id,
                    medication_name: med.name.clone(),
                    time,
                    is_past: time <= current,
                })
        })
        .collect();

    slots.sort_by_key(|slot| (slot.time, slot.medication_id));
    slots
}

/// Taken/skipped counts over a set of dose records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdherenceSummary {
    pub taken: u32,
    pub skipped: u32,
    /// Taken as a share of all logged doses, rounded; 0 when nothing logged
    pub rate_percent: u32,
}

impl AdherenceSummary {
    pub fn from_records(records: &[DoseRecord]) -> Self {
        let taken = count(records, DoseStatus::Taken);
        let skipped = count(records, DoseStatus::Skipped);
        let logged = taken + skipped;
        let rate_percent = if logged == 0 {
            0
        } else {
            (f64::from(taken) * 100.0 / f64::from(logged)).round() as u32
        };
        Self {
            taken,
            skipped,
            rate_percent,
        }
    }
}

/// Share of today's slots with a taken dose, in `0.0..=1.0`.
pub fn dose_progress(slots: &[TimeSlot], records: &[DoseRecord]) -> f64 {
    if slots.is_empty() {
        return 0.0;
    }
    let taken = f64::from(count(records, DoseStatus::Taken));
    (taken / slots.len() as f64).min(1.0)
}

fn count(records: &[DoseRecord], status: DoseStatus) -> u32 {
    records.iter().filter(|r| r.status == status).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn med(id: i64, frequency: Option<&str>) -> Medication {
        Medication {
            id,
            name: format!("Med {id}"),
            dosage: None,
            frequency: frequency.map(Into::into),
            inventory_count: 0,
            color: None,
            icon: None,
            created_at: String::new(),
        }
    }

    fn dose(status: DoseStatus) -> DoseRecord {
        DoseRecord {
            id: 0,
            medication_id: 1,
            taken_at: String::new(),
            status,
        }
    }

    fn noon() -> NaiveDateTime {
        // 2024-03-11 is a Monday
        NaiveDate::from_ymd_opt(2024, 3, 11)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_timeline_sorted_with_past_flags() {
        let meds = vec![
            med(1, Some(r#"{"type":"daily","times":["20:00","08:00"]}"#)),
            med(2, Some(r#"{"type":"daily","times":["12:00"]}"#)),
        ];
        let slots = build_timeline(&meds, noon(), &RecurrenceRule::presentation_default());

        let summary: Vec<_> = slots
            .iter()
            .map(|s| (s.id.as_str(), s.is_past))
            .collect();
        assert_eq!(
            summary,
            vec![("1-08:00", true), ("2-12:00", true), ("1-20:00", false)]
        );
    }

    #[test]
    fn test_timeline_uses_default_for_missing_schedule() {
        let slots = build_timeline(&[med(3, None)], noon(), &RecurrenceRule::presentation_default());
        let times: Vec<_> = slots.iter().map(|s| s.time.to_string()).collect();
        assert_eq!(times, vec!["08:00", "14:00", "20:00"]);
    }

    #[test]
    fn test_timeline_weekly_only_on_listed_days() {
        let meds = vec![
            med(1, Some(r#"{"type":"weekly","times":["09:00"],"daysOfWeek":[1]}"#)),
            med(2, Some(r#"{"type":"weekly","times":["09:00"],"daysOfWeek":[2]}"#)),
        ];
        let slots = build_timeline(&meds, noon(), &RecurrenceRule::presentation_default());
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].medication_id, 1);
    }

    #[test]
    fn test_timeline_expands_interval() {
        let meds = vec![med(
            1,
            Some(r#"{"type":"interval","times":["06:00"],"intervalHours":6}"#),
        )];
        let slots = build_timeline(&meds, noon(), &RecurrenceRule::presentation_default());
        let times: Vec<_> = slots.iter().map(|s| s.time.to_string()).collect();
        assert_eq!(times, vec!["00:00", "06:00", "12:00", "18:00"]);
    }

    #[test]
    fn test_adherence_summary() {
        let records = vec![
            dose(DoseStatus::Taken),
            dose(DoseStatus::Taken),
            dose(DoseStatus::Skipped),
        ];
        assert_eq!(
            AdherenceSummary::from_records(&records),
            AdherenceSummary {
                taken: 2,
                skipped: 1,
                rate_percent: 67
            }
        );
        assert_eq!(AdherenceSummary::from_records(&[]).rate_percent, 0);
    }

    #[test]
    fn test_dose_progress() {
        let slots = build_timeline(&[med(3, None)], noon(), &RecurrenceRule::presentation_default());
        assert_eq!(dose_progress(&slots, &[dose(DoseStatus::Taken)]), 1.0 / 3.0);
        assert_eq!(dose_progress(&[], &[dose(DoseStatus::Taken)]), 0.0);
    }
}
