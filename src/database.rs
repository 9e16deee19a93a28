//! Almacenamiento SQLite de usuarios y lecturas.
//!
//! La conexión va protegida por un `Mutex` para que el hilo lector de la
//! sesión y el hilo principal puedan compartir la misma `Database`.

use std::path::Path;

use chrono::NaiveDateTime;
use log::info;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;
use crate::reading::{Reading, ReadingKind, StampedReading, UserId};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS user (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE COLLATE NOCASE,
    age INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS bpm_table (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES user(id) ON DELETE CASCADE,
    bpm INTEGER NOT NULL,
    time_stamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS oxygen_level_table (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES user(id) ON DELETE CASCADE,
    oxygen_level INTEGER NOT NULL,
    time_stamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bpm_user_ts ON bpm_table (user_id, time_stamp);
CREATE INDEX IF NOT EXISTS idx_oxygen_user_ts ON oxygen_level_table (user_id, time_stamp);
";

/// Destino de las lecturas producidas por una sesión.
pub trait ReadingStore: Sync {
    fn insert_heart_rate(
        &self,
        user_id: UserId,
        bpm: i32,
        at: NaiveDateTime,
    ) -> Result<(), StorageError>;

    fn insert_oxygen_saturation(
        &self,
        user_id: UserId,
        percent: i32,
        at: NaiveDateTime,
    ) -> Result<(), StorageError>;

    fn insert_reading(&self, stamped: &StampedReading) -> Result<(), StorageError> {
        match stamped.reading {
            Reading::HeartRate(v) => self.insert_heart_rate(stamped.user_id, v, stamped.captured_at),
            Reading::OxygenSaturation(v) => {
                self.insert_oxygen_saturation(stamped.user_id, v, stamped.captured_at)
            }
        }
    }
}

/// Filtro de usuario para consultas de historial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserFilter {
    All,
    User(String),
}

impl UserFilter {
    /// "all" (o vacío) significa todos los usuarios.
    pub fn parse(input: &str) -> Self {
        let s = input.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            UserFilter::All
        } else {
            UserFilter::User(s.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub username: String,
    pub value: i32,
    pub timestamp: NaiveDateTime,
}

fn table_for(kind: ReadingKind) -> (&'static str, &'static str) {
    match kind {
        ReadingKind::HeartRate => ("bpm_table", "bpm"),
        ReadingKind::OxygenSaturation => ("oxygen_level_table", "oxygen_level"),
    }
}

fn row_to_log(row: &rusqlite::Row) -> rusqlite::Result<LogRow> {
    Ok(LogRow {
        username: row.get(0)?,
        value: row.get(1)?,
        timestamp: row.get(2)?,
    })
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let db = Self::init(conn)?;
        info!("🗄️ Base de datos abierta en {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    pub fn add_user(&self, username: &str, age: u32) -> Result<UserId, StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO user (username, age) VALUES (?1, ?2)",
            params![username, age],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Elimina el usuario y sus lecturas. `false` si no existía.
    pub fn remove_user(&self, username: &str) -> Result<bool, StorageError> {
        let n = self
            .conn
            .lock()
            .execute("DELETE FROM user WHERE username = ?1", params![username])?;
        Ok(n > 0)
    }

    pub fn get_user_id(&self, username: &str) -> Result<Option<UserId>, StorageError> {
        let id = self
            .conn
            .lock()
            .query_row(
                "SELECT id FROM user WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Historial de un tipo de lectura. Para todos los usuarios se ordena por
    /// nombre y luego por fecha; para uno solo, por fecha.
    pub fn query_readings(
        &self,
        kind: ReadingKind,
        filter: &UserFilter,
    ) -> Result<Vec<LogRow>, StorageError> {
        let (table, column) = table_for(kind);
        let conn = self.conn.lock();

        let rows = match filter {
            UserFilter::All => {
                let sql = format!(
                    "SELECT user.username, t.{column}, t.time_stamp FROM {table} t \
                     INNER JOIN user ON t.user_id = user.id \
                     ORDER BY user.username, t.time_stamp, t.id"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], row_to_log)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            UserFilter::User(name) => {
                let sql = format!(
                    "SELECT user.username, t.{column}, t.time_stamp FROM {table} t \
                     INNER JOIN user ON t.user_id = user.id \
                     WHERE user.username = ?1 \
                     ORDER BY t.time_stamp, t.id"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![name], row_to_log)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    /// Borra las lecturas de un usuario, o de todos con `None`. Devuelve las filas borradas.
    pub fn delete_readings(&self, user_id: Option<UserId>) -> Result<usize, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut borradas = 0;
        for kind in [ReadingKind::HeartRate, ReadingKind::OxygenSaturation] {
            let (table, _) = table_for(kind);
            borradas += match user_id {
                None => tx.execute(&format!("DELETE FROM {table}"), [])?,
                Some(id) => tx.execute(
                    &format!("DELETE FROM {table} WHERE user_id = ?1"),
                    params![id],
                )?,
            };
        }
        tx.commit()?;
        Ok(borradas)
    }

    fn insert(
        &self,
        kind: ReadingKind,
        user_id: UserId,
        value: i32,
        at: NaiveDateTime,
    ) -> Result<(), StorageError> {
        let (table, column) = table_for(kind);
        self.conn.lock().execute(
            &format!("INSERT INTO {table} (user_id, {column}, time_stamp) VALUES (?1, ?2, ?3)"),
            params![user_id, value, at],
        )?;
        Ok(())
    }
}

impl ReadingStore for Database {
    fn insert_heart_rate(
        &self,
        user_id: UserId,
        bpm: i32,
        at: NaiveDateTime,
    ) -> Result<(), StorageError> {
        self.insert(ReadingKind::HeartRate, user_id, bpm, at)
    }

    fn insert_oxygen_saturation(
        &self,
        user_id: UserId,
        percent: i32,
        at: NaiveDateTime,
    ) -> Result<(), StorageError> {
        self.insert(ReadingKind::OxygenSaturation, user_id, percent, at)
    }
}
