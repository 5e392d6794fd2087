//! SQLite schema definition.

/// Complete database schema for curesync.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Medications
-- ============================================================================

CREATE TABLE IF NOT EXISTS medications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL CHECK (trim(name) <> ''),
    dosage TEXT,
    frequency TEXT,                              -- JSON schedule, see recurrence module
    inventory_count INTEGER NOT NULL DEFAULT 0 CHECK (inventory_count >= 0),
    color TEXT,                                  -- Hex code for UI
    icon TEXT,                                   -- Icon name for UI
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

-- ============================================================================
-- Dose History
-- ============================================================================

CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    med_id INTEGER NOT NULL REFERENCES medications(id) ON DELETE CASCADE,
    taken_at TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('taken', 'skipped'))
);

CREATE INDEX IF NOT EXISTS idx_history_med ON history(med_id);
CREATE INDEX IF NOT EXISTS idx_history_taken_at ON history(taken_at);

-- ============================================================================
-- Notification Ledger (device alarm identifiers per medication)
-- ============================================================================

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,                         -- Device-assigned identifier
    med_id INTEGER NOT NULL REFERENCES medications(id) ON DELETE CASCADE,
    scheduled_time INTEGER NOT NULL,             -- Registration time, unix millis
    trigger TEXT                                 -- JSON TriggerSpec
);

CREATE INDEX IF NOT EXISTS idx_notifications_med ON notifications(med_id);
"#;
