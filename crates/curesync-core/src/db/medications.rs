//! Medication database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_timestamp, Database, DbError, DbResult};
use crate::models::{Medication, NewMedication};

const MEDICATION_COLUMNS: &str =
    "id, name, dosage, frequency, inventory_count, color, icon, created_at";

impl Database {
    /// Insert a new medication and return the stored record.
    pub fn insert_medication(&self, med: &NewMedication) -> DbResult<Medication> {
        med.validate()
            .map_err(|e| DbError::Constraint(e.to_string()))?;

        let created_at = now_timestamp();
        self.conn.execute(
            r#"
            INSERT INTO medications (
                name, dosage, frequency, inventory_count, color, icon, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                med.name,
                med.dosage,
                med.frequency,
                med.inventory_count,
                med.color,
                med.icon,
                created_at,
            ],
        )?;

        Ok(Medication {
            id: self.conn.last_insert_rowid(),
            name: med.name.clone(),
            dosage: med.dosage.clone(),
            frequency: med.frequency.clone(),
            inventory_count: med.inventory_count,
            color: med.color.clone(),
            icon: med.icon.clone(),
            created_at,
        })
    }

    /// Update the editable fields of a medication.
    pub fn update_medication(&self, med: &Medication) -> DbResult<bool> {
        med.validate()
            .map_err(|e| DbError::Constraint(e.to_string()))?;

        let rows_affected = self.conn.execute(
            r#"
            UPDATE medications SET
                name = ?2,
                dosage = ?3,
                frequency = ?4,
                inventory_count = ?5,
                color = ?6,
                icon = ?7
            WHERE id = ?1
            "#,
            params![
                med.id,
                med.name,
                med.dosage,
                med.frequency,
                med.inventory_count,
                med.color,
                med.icon,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a medication by id.
    pub fn get_medication(&self, id: i64) -> DbResult<Option<Medication>> {
        let sql = format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE id = ?");
        Ok(self
            .conn
            .query_row(&sql, [id], medication_from_row)
            .optional()?)
    }

    /// List all medications in creation order.
    pub fn list_medications(&self) -> DbResult<Vec<Medication>> {
        let sql = format!("SELECT {MEDICATION_COLUMNS} FROM medications ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], medication_from_row)?;

        let mut meds = Vec::new();
        for row in rows {
            meds.push(row?);
        }
        Ok(meds)
    }

    /// Delete a medication. History and ledger rows cascade.
    pub fn delete_medication(&self, id: i64) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM medications WHERE id = ?", [id])?;
        Ok(rows_affected > 0)
    }

    /// Check whether a medication row exists.
    pub fn medication_exists(&self, id: i64) -> DbResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM medications WHERE id = ?", [id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }
}

fn medication_from_row(row: &Row<'_>) -> rusqlite::Result<Medication> {
    Ok(Medication {
        id: row.get(0)?,
        name: row.get(1)?,
        dosage: row.get(2)?,
        frequency: row.get(3)?,
        inventory_count: row.get(4)?,
        color: row.get(5)?,
        icon: row.get(6)?,
        created_at: row.get(7)?,
    })
}
