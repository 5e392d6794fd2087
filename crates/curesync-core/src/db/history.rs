//! Dose history database operations.

use rusqlite::{params, Row};

use super::{now_timestamp, Database, DbError, DbResult};
use crate::models::{DoseRecord, DoseStatus};

impl Database {
    /// Log a dose outcome.
    ///
    /// A taken dose also decrements the medication's inventory when it is
    /// above zero. Both writes share one transaction.
    pub fn record_dose(&mut self, medication_id: i64, status: DoseStatus) -> DbResult<DoseRecord> {
        let taken_at = now_timestamp();
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO history (med_id, taken_at, status) VALUES (?1, ?2, ?3)",
            params![medication_id, taken_at, status.as_str()],
        )?;
        let id = tx.last_insert_rowid();

        if status == DoseStatus::Taken {
            tx.execute(
                "UPDATE medications SET inventory_count = inventory_count - 1 WHERE id = ? AND inventory_count > 0",
                [medication_id],
            )?;
        }
        tx.commit()?;

        Ok(DoseRecord {
            id,
            medication_id,
            taken_at,
            status,
        })
    }

    /// All dose records logged at or after `since` (RFC 3339), oldest first.
    pub fn history_since(&self, since: &str) -> DbResult<Vec<DoseRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, med_id, taken_at, status
            FROM history
            WHERE taken_at >= ?
            ORDER BY taken_at, id
            "#,
        )?;
        let rows = stmt.query_map([since], DoseRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.try_into()?);
        }
        Ok(records)
    }

    /// Dose records for one medication, newest first.
    pub fn history_for_medication(&self, medication_id: i64) -> DbResult<Vec<DoseRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, med_id, taken_at, status
            FROM history
            WHERE med_id = ?
            ORDER BY taken_at DESC, id DESC
            "#,
        )?;
        let rows = stmt.query_map([medication_id], DoseRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.try_into()?);
        }
        Ok(records)
    }
}

/// Intermediate row struct for database mapping.
struct DoseRow {
    id: i64,
    med_id: i64,
    taken_at: String,
    status: String,
}

impl DoseRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            med_id: row.get(1)?,
            taken_at: row.get(2)?,
            status: row.get(3)?,
        })
    }
}

impl TryFrom<DoseRow> for DoseRecord {
    type Error = DbError;

    fn try_from(row: DoseRow) -> Result<Self, Self::Error> {
        let status = DoseStatus::parse(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("Unknown dose status: {}", row.status)))?;
        Ok(DoseRecord {
            id: row.id,
            medication_id: row.med_id,
            taken_at: row.taken_at,
            status,
        })
    }
}
