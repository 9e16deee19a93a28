//! Registro de frecuencia cardíaca y saturación de oxígeno desde un puerto serial.
//!
//! El dispositivo envía líneas de texto como `bpm:72,oxy:98`. Una sesión
//! (`session::run_session`) lee esas líneas en un hilo, las parsea con
//! `line_parser` y guarda cada lectura en `database` a nombre del usuario
//! activo, hasta que el operador presiona Esc o el puerto falla.

pub mod app;
pub mod cancel;
pub mod command;
pub mod config;
pub mod database;
pub mod error;
pub mod export;
pub mod line_parser;
pub mod reading;
pub mod serial_processor;
pub mod serial_reader;
pub mod serial_utils;
pub mod session;

pub use cancel::{CancelSource, CancelToken};
pub use database::{Database, ReadingStore, UserFilter};
pub use error::{LineError, SessionError, StorageError};
pub use line_parser::{parse_line, ParsedLine};
pub use reading::{Reading, ReadingKind, StampedReading, UserId};
pub use session::{run_session, SessionContext, SessionEvent, SessionSummary};
