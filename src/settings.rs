use crate::error::{Error, Result};
use crate::parameters::{Parameter, PumpParameters};
use crate::session::SessionSnapshot;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error, warn};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

pub const KEY_TIMES_LOADED: &str = "timesLoaded";
pub const KEY_START_TIME: &str = "startTime";
pub const KEY_SPM: &str = "spm";
pub const KEY_TAP_COUNT: &str = "tapCount";

/// Durable string key/value slots
pub trait Defaults: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// SQLite-backed defaults; every write autocommits
#[derive(Debug)]
pub struct SqliteDefaults {
    conn: Connection,
}

impl SqliteDefaults {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS defaults (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
            [],
        )?;
        Ok(Self { conn })
    }
}

impl Defaults for SqliteDefaults {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM defaults WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO defaults (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM defaults WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryDefaults {
    values: HashMap<String, String>,
}

impl MemoryDefaults {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Defaults for MemoryDefaults {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// Typed access to the persisted parameters, launch counter and session slot
pub struct SettingsStore {
    backend: Box<dyn Defaults>,
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore").finish_non_exhaustive()
    }
}

impl SettingsStore {
    pub fn new(backend: impl Defaults + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryDefaults::new())
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.backend.get(key) {
            Ok(value) => value,
            Err(e) => {
                error!("failed to read '{key}': {e}");
                None
            }
        }
    }

    fn read_f64(&self, key: &str) -> Option<f64> {
        let raw = self.read(key)?;
        match raw.parse::<f64>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("ignoring unparsable value '{raw}' for '{key}'");
                None
            }
        }
    }

    /// Reads both parameters, writing the default back for any slot that
    /// is missing, zero or corrupt.
    pub fn load_parameters(&mut self) -> PumpParameters {
        PumpParameters {
            coefficient: self.load_parameter(Parameter::Coefficient),
            efficiency: self.load_parameter(Parameter::Efficiency),
        }
    }

    fn load_parameter(&mut self, parameter: Parameter) -> f64 {
        match self.read_f64(parameter.key()) {
            Some(v) if v.is_finite() && v > 0.0 => v,
            _ => {
                let fallback = parameter.default_value();
                debug!("{parameter} unset, seeding default {fallback}");
                if let Err(e) = self.save_parameter(parameter, fallback) {
                    error!("failed to persist default {parameter}: {e}");
                }
                fallback
            }
        }
    }

    /// Caller validates; the store writes whatever it is given
    pub fn save_parameter(&mut self, parameter: Parameter, value: f64) -> Result<()> {
        self.backend.set(parameter.key(), &value.to_string())
    }

    /// Last persisted value of a parameter, if any, without default seeding
    pub fn stored_parameter(&self, parameter: Parameter) -> Option<f64> {
        self.read_f64(parameter.key())
    }

    pub fn load_snapshot(&self) -> Option<SessionSnapshot> {
        let raw = self.read(KEY_START_TIME)?;
        let start_time = match parse_timestamp(&raw) {
            Ok(t) => t,
            Err(e) => {
                warn!("discarding session snapshot: {e}");
                return None;
            }
        };
        let spm = self
            .read_f64(KEY_SPM)
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(0.0);
        let tap_count = self
            .read(KEY_TAP_COUNT)
            .and_then(|raw| raw.parse::<u32>().ok())
            .unwrap_or(0);

        Some(SessionSnapshot {
            start_time: Some(start_time),
            tap_count,
            spm,
        })
    }

    pub fn save_snapshot(&mut self, snapshot: &SessionSnapshot) -> Result<()> {
        let Some(start_time) = snapshot.start_time else {
            return self.clear_snapshot();
        };
        self.backend.set(KEY_START_TIME, &format_timestamp(start_time))?;
        self.backend.set(KEY_SPM, &snapshot.spm.to_string())?;
        self.backend
            .set(KEY_TAP_COUNT, &snapshot.tap_count.to_string())?;
        Ok(())
    }

    pub fn clear_snapshot(&mut self) -> Result<()> {
        self.backend.remove(KEY_START_TIME)?;
        self.backend.remove(KEY_TAP_COUNT)?;
        self.backend.remove(KEY_SPM)?;
        Ok(())
    }

    pub fn increment_launch_count(&mut self) -> Result<u64> {
        let count = self
            .read(KEY_TIMES_LOADED)
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        self.backend.set(KEY_TIMES_LOADED, &count.to_string())?;
        Ok(count)
    }
}

fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| Error::Timestamp(raw.to_string()))
}
