use std::io;

use thiserror::Error;

use crate::reading::ReadingKind;

/// Errores que terminan (o impiden iniciar) una sesión de registro.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no hay usuario activo; use set_user primero")]
    NoActiveUser,

    #[error("no se pudo abrir el puerto serial {port}")]
    DeviceUnavailable {
        port: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("error de lectura del puerto serial")]
    DeviceRead(#[source] io::Error),

    #[error("error esperando la tecla de cancelación")]
    Watcher(#[source] io::Error),
}

/// Problemas de una sola línea. Nunca son fatales para la sesión.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("la línea no es UTF-8 válido: {0}")]
    Decode(String),

    #[error("formato inválido, no contiene bpm: ni oxy:")]
    Format,

    #[error("valor inválido para {kind} en '{segment}'")]
    FieldParse { kind: ReadingKind, segment: String },

    #[error("{discarded} bytes sin fin de línea descartados")]
    Overflow { discarded: usize },
}

#[derive(Debug, Error)]
#[error("error de almacenamiento: {0}")]
pub struct StorageError(#[from] pub rusqlite::Error);
