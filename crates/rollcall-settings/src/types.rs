//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a partial
//! JSON file only needs the keys it changes.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// SQLite database holding events and registrations. A leading `~/`
    /// resolves against `$HOME`.
    pub database_path: String,
    /// Actors allowed to create, edit, delete and message participants.
    pub admin_ids: Vec<i64>,
    pub reminders: ReminderSettings,
    pub events: EventSettings,
    pub sessions: SessionSettings,
    pub server: ServerSettings,
    pub broadcast: BroadcastSettings,
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: "~/.rollcall/rollcall.db".to_string(),
            admin_ids: Vec::new(),
            reminders: ReminderSettings::default(),
            events: EventSettings::default(),
            sessions: SessionSettings::default(),
            server: ServerSettings::default(),
            broadcast: BroadcastSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Upper bound for hour-based windows, about a century.
pub const MAX_WINDOW_HOURS: u64 = 24 * 366 * 100;

impl Settings {
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.database_path)
    }

    /// Reject combinations that would leave the service unable to run.
    pub fn validate(&self) -> Result<()> {
        if self.reminders.remind_before_minutes == 0 {
            return Err(SettingsError::InvalidValue(
                "reminders.remindBeforeMinutes must be positive".into(),
            ));
        }
        if self.reminders.remind_before_minutes > MAX_WINDOW_HOURS * 60 {
            return Err(SettingsError::InvalidValue(format!(
                "reminders.remindBeforeMinutes must be at most {}",
                MAX_WINDOW_HOURS * 60
            )));
        }
        if self.events.active_grace_hours > MAX_WINDOW_HOURS
            || self.events.past_after_hours > MAX_WINDOW_HOURS
        {
            return Err(SettingsError::InvalidValue(format!(
                "events windows must be at most {MAX_WINDOW_HOURS} hours"
            )));
        }
        if self.reminders.delivery_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "reminders.deliveryTimeoutMs must be positive".into(),
            ));
        }
        if self.server.workers == 0 {
            return Err(SettingsError::InvalidValue("server.workers must be at least 1".into()));
        }
        if self.server.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.queueCapacity must be at least 1".into(),
            ));
        }
        if self.sessions.idle_timeout_secs == 0 || self.sessions.sweep_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "sessions timeouts must be positive".into(),
            ));
        }
        if !self.broadcast.link_template.contains("{link}") {
            return Err(SettingsError::InvalidValue(
                "broadcast.linkTemplate must contain {link}".into(),
            ));
        }
        Ok(())
    }
}

/// Reminder timing and wording.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReminderSettings {
    /// Lead time between the reminder and the event start.
    pub remind_before_minutes: u64,
    /// Per-recipient delivery timeout.
    pub delivery_timeout_ms: u64,
    /// Reminder text. `{date}`, `{time}` and `{info}` are substituted.
    pub template: String,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            remind_before_minutes: 180,
            delivery_timeout_ms: 10_000,
            template: "Reminder: the event starts on {date} at {time}.\n{info}".to_string(),
        }
    }
}

impl ReminderSettings {
    pub fn remind_before(&self) -> Duration {
        Duration::from_secs(self.remind_before_minutes * 60)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

/// Visibility windows for listings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventSettings {
    /// How long after its start an event still counts as active.
    pub active_grace_hours: u64,
    /// Default age for the `past` maintenance listing.
    pub past_after_hours: u64,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            active_grace_hours: 6,
            past_after_hours: 6,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Inactivity ceiling after which a workflow is discarded.
    pub idle_timeout_secs: u64,
    /// How often expired sessions are swept.
    pub sweep_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 900,
            sweep_interval_secs: 60,
        }
    }
}

impl SessionSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Inbound action processing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Number of worker tasks draining the inbound queue.
    pub workers: usize,
    /// Bound of the inbound queue.
    pub queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastSettings {
    /// Wrapper for shared links; must contain `{link}`.
    pub link_template: String,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            link_template: "Event link: {link}".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level directive (`trace` .. `error`). `RUST_LOG` wins.
    pub level: String,
    /// Persist warn+ records to SQLite.
    pub log_to_sqlite: bool,
    pub log_db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_sqlite: true,
            log_db_path: "~/.rollcall/logs.db".to_string(),
        }
    }
}

impl LoggingSettings {
    pub fn log_db_path(&self) -> PathBuf {
        expand_home(&self.log_db_path)
    }
}

/// Resolve a leading `~/` against `$HOME` (falling back to `/tmp`).
pub fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(raw),
    }
}

pub(crate) fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
