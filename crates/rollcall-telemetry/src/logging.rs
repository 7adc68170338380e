//! Warn+ records persisted to SQLite, tagged with the event and actor they
//! concern so `rollcall logs --event N` can find them later.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    /// The event message followed by its remaining fields as `key=value`.
    pub message: String,
    pub event_id: Option<i64>,
    pub actor_id: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct LogFilter {
    /// Matched case-insensitively against the stored level.
    pub level: Option<String>,
    pub event_id: Option<i64>,
    pub limit: u32,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            level: None,
            event_id: None,
            limit: 50,
        }
    }
}

pub struct WarningLog {
    conn: Mutex<Connection>,
}

impl WarningLog {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS warnings (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 logged_at TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 event_id INTEGER,
                 actor_id INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_warnings_event ON warnings(event_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn append(&self, entry: &LogEntry) -> Result<(), rusqlite::Error> {
        self.conn.lock().execute(
            "INSERT INTO warnings (logged_at, level, target, message, event_id, actor_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.timestamp,
                entry.level,
                entry.target,
                entry.message,
                entry.event_id,
                entry.actor_id,
            ],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn recent(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT logged_at, level, target, message, event_id, actor_id FROM warnings
             WHERE (?1 IS NULL OR level = upper(?1)) AND (?2 IS NULL OR event_id = ?2)
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![filter.level, filter.event_id, filter.limit], |row| {
            Ok(LogEntry {
                timestamp: row.get(0)?,
                level: row.get(1)?,
                target: row.get(2)?,
                message: row.get(3)?,
                event_id: row.get(4)?,
                actor_id: row.get(5)?,
            })
        })?;
        rows.collect()
    }
}

/// Layer writing WARN and ERROR events to a [`WarningLog`]. Ids missing
/// from the event itself are taken from the closest enclosing span.
pub struct WarningLayer {
    log: Arc<WarningLog>,
}

impl WarningLayer {
    pub fn new(log: Arc<WarningLog>) -> Self {
        Self { log }
    }
}

#[derive(Default)]
struct Ids {
    event_id: Option<i64>,
    actor_id: Option<i64>,
}

impl Ids {
    fn fill_from(&mut self, other: &Ids) {
        self.event_id = self.event_id.or(other.event_id);
        self.actor_id = self.actor_id.or(other.actor_id);
    }

    fn complete(&self) -> bool {
        self.event_id.is_some() && self.actor_id.is_some()
    }
}

#[derive(Default)]
struct Collector {
    ids: Ids,
    message: String,
    extra: String,
}

impl Collector {
    fn take_id(&mut self, name: &str, raw: &str) -> bool {
        let slot = match name {
            "event_id" => &mut self.ids.event_id,
            "actor_id" => &mut self.ids.actor_id,
            _ => return false,
        };
        *slot = raw.trim_matches('"').parse().ok();
        true
    }

    fn push(&mut self, field: &Field, value: &dyn std::fmt::Display) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value}");
        } else {
            let _ = write!(self.extra, " {}={value}", field.name());
        }
    }

    fn finish(self) -> String {
        self.message + &self.extra
    }
}

impl Visit for Collector {
    fn record_i64(&mut self, field: &Field, value: i64) {
        if !self.take_id(field.name(), &value.to_string()) {
            self.push(field, &value);
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if !self.take_id(field.name(), &value.to_string()) {
            self.push(field, &value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if !self.take_id(field.name(), value) {
            self.push(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        if !self.take_id(field.name(), &rendered) {
            self.push(field, &rendered);
        }
    }
}

impl<S> Layer<S> for WarningLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut collector = Collector::default();
        attrs.record(&mut collector);
        let ids = collector.ids;
        if ids.event_id.is_none() && ids.actor_id.is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(ids);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut collector = Collector::default();
        event.record(&mut collector);
        let mut ids = std::mem::take(&mut collector.ids);
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if ids.complete() {
                    break;
                }
                if let Some(span_ids) = span.extensions().get::<Ids>() {
                    ids.fill_from(span_ids);
                }
            }
        }

        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            target: event.metadata().target().to_string(),
            message: collector.finish(),
            event_id: ids.event_id,
            actor_id: ids.actor_id,
        };
        // Nowhere left to report a failure to record a failure.
        let _ = self.log.append(&entry);
    }
}
