//! Notification ledger database operations.
//!
//! Row order within a medication follows insertion (`rowid`), which is the
//! compiled trigger order.

use rusqlite::{params, Row, Transaction};

use super::{Database, DbError, DbResult};
use crate::scheduler::{LedgerEntry, ScheduledTrigger, TriggerSpec};

impl Database {
    /// Append registered triggers for a medication in one transaction.
    pub fn insert_ledger_entries(
        &mut self,
        medication_id: i64,
        triggers: &[ScheduledTrigger],
    ) -> DbResult<()> {
        if triggers.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        insert_entries(&tx, medication_id, triggers)?;
        tx.commit()?;
        Ok(())
    }

    /// Swap a medication's entries for a new set in one transaction.
    pub fn replace_ledger_entries(
        &mut self,
        medication_id: i64,
        triggers: &[ScheduledTrigger],
    ) -> DbResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM notifications WHERE med_id = ?", [medication_id])?;
        insert_entries(&tx, medication_id, triggers)?;
        tx.commit()?;
        Ok(())
    }

    /// Ledger entries for a medication, in registration order.
    pub fn ledger_entries_for(&self, medication_id: i64) -> DbResult<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, med_id, scheduled_time, trigger
            FROM notifications
            WHERE med_id = ?
            ORDER BY rowid
            "#,
        )?;
        let rows = stmt.query_map([medication_id], entry_from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Remove all entries for a medication. Returns the number removed.
    pub fn delete_ledger_entries(&self, medication_id: i64) -> DbResult<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM notifications WHERE med_id = ?", [medication_id])?)
    }

    /// Remove a single entry by identifier.
    pub fn delete_ledger_entry(&self, identifier: &str) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM notifications WHERE id = ?", [identifier])?;
        Ok(rows_affected > 0)
    }

    /// Entries whose medication row no longer exists.
    ///
    /// Cascading deletes should make this empty; rows only appear here if
    /// foreign keys were disabled when a medication was removed.
    pub fn orphaned_ledger_entries(&self) -> DbResult<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT n.id, n.med_id, n.scheduled_time, n.trigger
            FROM notifications n
            LEFT JOIN medications m ON m.id = n.med_id
            WHERE m.id IS NULL
            ORDER BY n.rowid
            "#,
        )?;
        let rows = stmt.query_map([], entry_from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

fn insert_entries(
    tx: &Transaction<'_>,
    medication_id: i64,
    triggers: &[ScheduledTrigger],
) -> DbResult<()> {
    let registered_at = chrono::Utc::now().timestamp_millis();
    let mut stmt = tx.prepare(
        "INSERT INTO notifications (id, med_id, scheduled_time, trigger) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for trigger in triggers {
        if trigger.medication_id != medication_id {
            return Err(DbError::Constraint(format!(
                "Trigger {} belongs to medication {}, not {}",
                trigger.identifier, trigger.medication_id, medication_id
            )));
        }
        let spec_json = serde_json::to_string(&trigger.spec)?;
        stmt.execute(params![
            trigger.identifier,
            medication_id,
            registered_at,
            spec_json
        ])?;
    }
    Ok(())
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let identifier: String = row.get(0)?;
    let trigger_json: Option<String> = row.get(3)?;
    let trigger = trigger_json.and_then(|json| {
        serde_json::from_str::<TriggerSpec>(&json)
            .map_err(|e| {
                tracing::warn!(identifier = %identifier, error = %e, "Unreadable trigger in ledger");
            })
            .ok()
    });
    Ok(LedgerEntry {
        identifier,
        medication_id: row.get(1)?,
        registered_at: row.get(2)?,
        trigger,
    })
}
