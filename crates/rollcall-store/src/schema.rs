/// SQL DDL for the rollcall database.
/// WAL mode + foreign keys enabled at connection time.
///
/// Dates are stored as `YYYY-MM-DD`, times of day as `HH:MM`, and
/// timestamps as `YYYY-MM-DD HH:MM:SS`, so lexicographic order matches
/// chronological order.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    max_participants INTEGER NOT NULL CHECK (max_participants > 0),
    end_date TEXT NOT NULL,
    event_time TEXT NOT NULL,
    info TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS registrations (
    user_id INTEGER NOT NULL,
    event_id INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
    username TEXT NOT NULL,
    registered_at TEXT NOT NULL,
    PRIMARY KEY (user_id, event_id)
);

CREATE INDEX IF NOT EXISTS idx_events_start ON events(end_date, event_time);
CREATE INDEX IF NOT EXISTS idx_registrations_event ON registrations(event_id);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

/// Layout used for `created_at` / `registered_at` columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
