use std::fmt;

use chrono::NaiveDateTime;

/// Identificador estable de un usuario en la base de datos.
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadingKind {
    HeartRate,
    OxygenSaturation,
}

impl ReadingKind {
    /// Tag que identifica el tipo de lectura dentro de una línea del dispositivo.
    pub fn tag(self) -> &'static str {
        match self {
            ReadingKind::HeartRate => "bpm:",
            ReadingKind::OxygenSaturation => "oxy:",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReadingKind::HeartRate => "BPM",
            ReadingKind::OxygenSaturation => "Oxygen Level",
        }
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Una lectura biométrica ya parseada. Inmutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    HeartRate(i32),
    OxygenSaturation(i32),
}

impl Reading {
    pub fn kind(&self) -> ReadingKind {
        match self {
            Reading::HeartRate(_) => ReadingKind::HeartRate,
            Reading::OxygenSaturation(_) => ReadingKind::OxygenSaturation,
        }
    }

    pub fn value(&self) -> i32 {
        match *self {
            Reading::HeartRate(v) | Reading::OxygenSaturation(v) => v,
        }
    }

    pub(crate) fn new(kind: ReadingKind, value: i32) -> Self {
        match kind {
            ReadingKind::HeartRate => Reading::HeartRate(value),
            ReadingKind::OxygenSaturation => Reading::OxygenSaturation(value),
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::HeartRate(v) => write!(f, "{} BPM", v),
            Reading::OxygenSaturation(v) => write!(f, "{}% SpO2", v),
        }
    }
}

/// Lectura lista para persistir: usuario y momento de captura.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StampedReading {
    pub user_id: UserId,
    pub reading: Reading,
    pub captured_at: NaiveDateTime,
}
