use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::info;

use crate::database::{Database, LogRow, UserFilter};
use crate::reading::ReadingKind;

/// Qué historial exportar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportSelection {
    Bpm,
    Oxygen,
    All,
}

impl ExportSelection {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "bpm" => Some(ExportSelection::Bpm),
            "oxygen" => Some(ExportSelection::Oxygen),
            "all" => Some(ExportSelection::All),
            _ => None,
        }
    }

    fn kinds(self) -> &'static [ReadingKind] {
        match self {
            ExportSelection::Bpm => &[ReadingKind::HeartRate],
            ExportSelection::Oxygen => &[ReadingKind::OxygenSaturation],
            ExportSelection::All => &[ReadingKind::HeartRate, ReadingKind::OxygenSaturation],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Written {
        kind: ReadingKind,
        path: PathBuf,
        rows: usize,
    },
    Empty {
        kind: ReadingKind,
    },
}

/// Exporta a `dir` un archivo CSV por tipo de lectura con datos.
pub fn export_csv(
    db: &Database,
    selection: ExportSelection,
    filter: &UserFilter,
    dir: &Path,
    now: NaiveDateTime,
) -> Result<Vec<ExportOutcome>> {
    let mut resultados = Vec::new();
    for &kind in selection.kinds() {
        let rows = db
            .query_readings(kind, filter)
            .with_context(|| format!("Error consultando el historial de {}", kind))?;
        if rows.is_empty() {
            resultados.push(ExportOutcome::Empty { kind });
            continue;
        }

        let path = dir.join(file_name(kind, filter, now));
        write_rows(&path, kind, filter, &rows)
            .with_context(|| format!("Error escribiendo {}", path.display()))?;
        info!("💾 {} filas exportadas a {}", rows.len(), path.display());
        resultados.push(ExportOutcome::Written {
            kind,
            path,
            rows: rows.len(),
        });
    }
    Ok(resultados)
}

fn file_name(kind: ReadingKind, filter: &UserFilter, now: NaiveDateTime) -> String {
    let prefijo = match kind {
        ReadingKind::HeartRate => "bpm",
        ReadingKind::OxygenSaturation => "oxygen",
    };
    let quien = match filter {
        UserFilter::All => "all_users".to_string(),
        UserFilter::User(name) => name
            .to_lowercase()
            .chars()
            .map(|c| match c {
                'a'..='z' | '0'..='9' | '_' | '-' => c,
                _ => '_',
            })
            .collect(),
    };
    format!("{}_logs_{}_{}.csv", prefijo, quien, now.format("%Y%m%d_%H%M%S"))
}

fn write_rows(path: &Path, kind: ReadingKind, filter: &UserFilter, rows: &[LogRow]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    let con_usuario = matches!(filter, UserFilter::All);

    if con_usuario {
        writeln!(out, "Username,{},Timestamp", kind.label())?;
    } else {
        writeln!(out, "{},Timestamp", kind.label())?;
    }
    for row in rows {
        let ts = row.timestamp.format("%Y-%m-%d %H:%M:%S");
        if con_usuario {
            writeln!(out, "{},{},{}", csv_field(&row.username), row.value, ts)?;
        } else {
            writeln!(out, "{},{}", row.value, ts)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ReadingStore;
    use chrono::NaiveDate;
    use std::fs;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap()
    }

    #[test]
    fn exports_all_users_with_username_column() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let id = db.add_user("Ana, M.", 30).unwrap();
        db.insert_heart_rate(id, 72, now()).unwrap();

        let res = export_csv(&db, ExportSelection::All, &UserFilter::All, dir.path(), now()).unwrap();
        assert_eq!(res.len(), 2);
        let ExportOutcome::Written { path, rows, .. } = &res[0] else {
            panic!("se esperaba archivo de bpm");
        };
        assert_eq!(*rows, 1);
        assert!(path.ends_with("bpm_logs_all_users_20250102_030405.csv"));
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "Username,BPM,Timestamp\n\"Ana, M.\",72,2025-01-02 03:04:05\n"
        );
        assert_eq!(
            res[1],
            ExportOutcome::Empty {
                kind: ReadingKind::OxygenSaturation
            }
        );
    }

    #[test]
    fn exports_single_user_without_username_column() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let id = db.add_user("Bo", 30).unwrap();
        db.insert_oxygen_saturation(id, 96, now()).unwrap();

        let filtro = UserFilter::parse("Bo");
        let res = export_csv(&db, ExportSelection::Oxygen, &filtro, dir.path(), now()).unwrap();
        let ExportOutcome::Written { path, .. } = &res[0] else {
            panic!("se esperaba archivo de oxígeno");
        };
        assert!(path.ends_with("oxygen_logs_bo_20250102_030405.csv"));
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "Oxygen Level,Timestamp\n96,2025-01-02 03:04:05\n"
        );
    }

    #[test]
    fn username_cannot_escape_export_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let id = db.add_user("../x", 30).unwrap();
        db.insert_heart_rate(id, 70, now()).unwrap();

        let filtro = UserFilter::parse("../x");
        let res = export_csv(&db, ExportSelection::Bpm, &filtro, dir.path(), now()).unwrap();
        let ExportOutcome::Written { path, .. } = &res[0] else {
            panic!("se esperaba archivo de bpm");
        };
        assert_eq!(path.parent(), Some(dir.path()));
        assert!(path.ends_with("bpm_logs____x_20250102_030405.csv"));
        assert!(path.exists());
    }

    #[test]
    fn selection_parsing() {
        assert_eq!(ExportSelection::parse("BPM"), Some(ExportSelection::Bpm));
        assert_eq!(ExportSelection::parse("oxygen"), Some(ExportSelection::Oxygen));
        assert_eq!(ExportSelection::parse("both"), None);
    }
}
