//! Estado de la aplicación y ejecución de comandos del operador.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use crossterm::{cursor::MoveTo, execute, terminal::{Clear, ClearType}};
use log::{error, info, warn};

use crate::cancel::EscKey;
use crate::command::{Command, COMMANDS};
use crate::config::Config;
use crate::database::{Database, UserFilter};
use crate::export::{export_csv, ExportOutcome};
use crate::reading::{ReadingKind, UserId};
use crate::session::{run_session, SessionContext, SessionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct App {
    config: Config,
    config_path: PathBuf,
    db: Database,
    active_user: Option<(String, UserId)>,
}

impl App {
    pub fn open(config: Config, config_path: PathBuf) -> Result<Self> {
        let db = Database::open(Path::new(&config.database_path)).with_context(|| {
            format!("No se pudo abrir la base de datos {}", config.database_path)
        })?;
        Ok(Self::with_database(config, config_path, db))
    }

    pub fn with_database(config: Config, config_path: PathBuf, db: Database) -> Self {
        App {
            config,
            config_path,
            db,
            active_user: None,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn active_user(&self) -> Option<UserId> {
        self.active_user.as_ref().map(|(_, id)| *id)
    }

    /// Copia del usuario activo y del puerto para una sesión nueva.
    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            active_user: self.active_user(),
            device: self.config.device(),
        }
    }

    pub fn execute<W: Write>(&mut self, cmd: Command, out: &mut W) -> Result<Flow> {
        match cmd {
            Command::AddUser { username, age } => {
                self.db
                    .add_user(&username, age)
                    .with_context(|| format!("No se pudo agregar el usuario '{}'", username))?;
                writeln!(out, "Usuario '{}' agregado.", username)?;
            }
            Command::RemoveUser(username) => {
                if self.db.remove_user(&username)? {
                    if matches!(&self.active_user, Some((n, _)) if n.eq_ignore_ascii_case(&username)) {
                        self.active_user = None;
                    }
                    writeln!(out, "Usuario '{}' eliminado.", username)?;
                } else {
                    writeln!(out, "Usuario '{}' no encontrado.", username)?;
                }
            }
            Command::SetUser(username) => match self.db.get_user_id(&username)? {
                Some(id) => {
                    writeln!(out, "Usuario activo: '{}' (ID: {}).", username, id)?;
                    self.active_user = Some((username, id));
                }
                None => writeln!(out, "Usuario '{}' no encontrado.", username)?,
            },
            Command::ShowLog { kind, filter } => self.show_log(kind, &filter, out)?,
            Command::LogBio => self.log_bio(out)?,
            Command::OutputToCsv { selection, filter } => {
                let dir = Path::new(&self.config.export_dir);
                let now = Local::now().naive_local();
                for outcome in export_csv(&self.db, selection, &filter, dir, now)? {
                    match outcome {
                        ExportOutcome::Written { kind, path, rows } => writeln!(
                            out,
                            "{} filas de {} exportadas a '{}'.",
                            rows,
                            kind,
                            path.display()
                        )?,
                        ExportOutcome::Empty { kind } => {
                            writeln!(out, "No hay registros de {} para exportar.", kind)?
                        }
                    }
                }
            }
            Command::SetComport { port, baud_rate } => {
                let baud_rate = match baud_rate.map(|s| s.parse::<u32>()) {
                    None => self.config.baud_rate,
                    Some(Ok(b)) => b,
                    Some(Err(_)) => {
                        writeln!(out, "Baud rate inválido, se mantiene {}.", self.config.baud_rate)?;
                        self.config.baud_rate
                    }
                };
                self.config.serial_port = port;
                self.config.baud_rate = baud_rate;
                self.config.save_to_file(&self.config_path)?;
                info!("🔧 Puerto configurado: {} @ {}", self.config.serial_port, baud_rate);
                writeln!(
                    out,
                    "Puerto '{}' a {} baudios. Se usará en la próxima sesión.",
                    self.config.serial_port, baud_rate
                )?;
            }
            Command::DeleteLogs(filter) => match filter {
                UserFilter::All => {
                    let n = self.db.delete_readings(None)?;
                    writeln!(out, "Se borraron todos los registros ({}).", n)?;
                }
                UserFilter::User(username) => match self.db.get_user_id(&username)? {
                    Some(id) => {
                        let n = self.db.delete_readings(Some(id))?;
                        writeln!(out, "Se borraron {} registros de '{}'.", n, username)?;
                    }
                    None => writeln!(out, "Usuario '{}' no encontrado.", username)?,
                },
            },
            Command::Help => {
                writeln!(out, "Comandos disponibles:")?;
                for (nombre, args, desc) in COMMANDS {
                    writeln!(out, "  {:<16} {:<34} {}", nombre, args, desc)?;
                }
            }
            Command::Clear => execute!(out, Clear(ClearType::All), MoveTo(0, 0))?,
            Command::Exit => {
                writeln!(out, "Saliendo de la aplicación.")?;
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    fn show_log<W: Write>(&self, kind: ReadingKind, filter: &UserFilter, out: &mut W) -> Result<()> {
        let rows = self.db.query_readings(kind, filter)?;
        if rows.is_empty() {
            writeln!(out, "No hay registros de {}.", kind)?;
            return Ok(());
        }
        for row in rows {
            let ts = row.timestamp.format("%Y-%m-%d %H:%M:%S");
            match filter {
                UserFilter::All => {
                    writeln!(out, "Usuario: {}, {}: {}, Fecha: {}", row.username, kind, row.value, ts)?
                }
                UserFilter::User(_) => writeln!(out, "{}: {}, Fecha: {}", kind, row.value, ts)?,
            }
        }
        Ok(())
    }

    fn log_bio<W: Write>(&mut self, out: &mut W) -> Result<()> {
        let ctx = self.session_context();
        if ctx.active_user.is_none() {
            writeln!(out, "No hay usuario activo. Use set_user primero.")?;
            return Ok(());
        }

        writeln!(out, "Modo de registro biométrico. Presione Esc para salir.")?;
        let esc = EscKey::new().context("No se pudo preparar la terminal")?;
        write!(out, "{:<8}{:>8}{:>8}{:>8}\r\n", "User_ID", "BPM", "OXY%", "Time")?;
        out.flush()?;

        let mut tabla = LiveTable::new(&mut *out);
        let resultado = run_session(
            &ctx,
            |device| device.open_serial_port(),
            &self.db,
            esc,
            |event| tabla.show(&event),
        );

        match resultado {
            Ok(summary) => writeln!(
                out,
                "Fin del registro: {} lecturas guardadas, {} líneas con errores.",
                summary.readings_stored,
                summary.line_errors()
            )?,
            Err(e) => {
                error!("❌ {:#}", anyhow::Error::from(e));
                writeln!(out, "La sesión terminó con error.")?;
            }
        }
        Ok(())
    }
}

/// Fila de la tabla en vivo. Termina en "\r\n" porque la terminal está en modo raw.
pub fn format_row(event: &SessionEvent) -> String {
    let valor = |v: Option<i32>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
    format!(
        "{:<8}{:>8}{:>7}%{:>7}s\r\n",
        event.user_id,
        valor(event.heart_rate()),
        valor(event.oxygen()),
        event.elapsed.as_secs()
    )
}

/// Tabla en vivo de una sesión. Un fallo de escritura no detiene la sesión:
/// las lecturas ya están guardadas. Se avisa una sola vez.
pub struct LiveTable<W> {
    out: W,
    failed: bool,
}

impl<W: Write> LiveTable<W> {
    pub fn new(out: W) -> Self {
        LiveTable { out, failed: false }
    }

    pub fn show(&mut self, event: &SessionEvent) {
        let escrito = self
            .out
            .write_all(format_row(event).as_bytes())
            .and_then(|_| self.out.flush());
        if let Err(e) = escrito {
            if !self.failed {
                warn!("⚠️ No se pudo escribir la tabla en vivo: {}", e);
                self.failed = true;
            }
        }
    }

    /// Indica si alguna escritura falló.
    pub fn failed(&self) -> bool {
        self.failed
    }
}

/// Bucle de comandos: lee de `input` hasta `exit` o fin de entrada.
pub fn run_repl<R: BufRead, W: Write>(app: &mut App, mut input: R, out: &mut W) -> Result<()> {
    writeln!(out, "Terminal de registro biométrico")?;
    writeln!(out, "Escriba 'help' para ver los comandos o 'exit' para salir.")?;

    let mut linea = String::new();
    loop {
        write!(out, "> ")?;
        out.flush()?;
        linea.clear();
        if input.read_line(&mut linea)? == 0 {
            break;
        }
        if linea.trim().is_empty() {
            continue;
        }
        match Command::parse(&linea) {
            Ok(cmd) => match app.execute(cmd, out) {
                Ok(Flow::Exit) => break,
                Ok(Flow::Continue) => {}
                Err(e) => writeln!(out, "Error: {:#}", e)?,
            },
            Err(e) => writeln!(out, "{}", e)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::database::ReadingStore;
    use crate::reading::Reading;

    fn app(dir: &Path) -> App {
        let config = Config {
            export_dir: dir.display().to_string(),
            ..Config::default()
        };
        App::with_database(
            config,
            dir.join("config.toml"),
            Database::open_in_memory().unwrap(),
        )
    }

    fn run(app: &mut App, script: &str) -> String {
        let mut out = Vec::new();
        run_repl(app, script.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn set_user_snapshots_into_session_context() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());
        let salida = run(&mut app, "add_user ana 30\nset_user nadie\nset_user ANA\n");
        assert!(salida.contains("Usuario 'nadie' no encontrado."));

        let ctx = app.session_context();
        let id = app.database().get_user_id("ana").unwrap();
        assert_eq!(ctx.active_user, id);

        run(&mut app, "set_comport COM9 9600\n");
        // la copia tomada antes no cambia
        assert_eq!(ctx.device.port, "COM5");
        assert_eq!(app.session_context().device.port, "COM9");
    }

    #[test]
    fn log_bio_without_user_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());
        let salida = run(&mut app, "log_bio\n");
        assert!(salida.contains("No hay usuario activo"));
    }

    #[test]
    fn invalid_baud_keeps_previous_and_persists_port() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());
        let salida = run(&mut app, "set_comport /dev/ttyUSB1 rapido\n");
        assert!(salida.contains("Baud rate inválido"));
        let guardada = Config::load_from_file(&dir.path().join("config.toml")).unwrap();
        assert_eq!(guardada.serial_port, "/dev/ttyUSB1");
        assert_eq!(guardada.baud_rate, 115_200);
    }

    #[test]
    fn remove_active_user_clears_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());
        run(&mut app, "add_user bo 20\nset_user bo\n");
        assert!(app.active_user().is_some());
        run(&mut app, "remove_user BO\n");
        assert_eq!(app.active_user(), None);
    }

    #[test]
    fn show_and_delete_logs() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());
        run(&mut app, "add_user eva 41\n");
        let id = app.database().get_user_id("eva").unwrap().unwrap();
        let ts = Local::now().naive_local();
        app.database().insert_heart_rate(id, 66, ts).unwrap();

        let salida = run(&mut app, "show_bpm_log\nshow_oxygen_log eva\n");
        assert!(salida.contains("Usuario: eva, BPM: 66"));
        assert!(salida.contains("No hay registros de Oxygen Level."));

        let salida = run(&mut app, "delete_logs fantasma\ndelete_logs eva\nshow_bpm_log eva\n");
        assert!(salida.contains("Usuario 'fantasma' no encontrado."));
        assert!(salida.contains("Se borraron 1 registros de 'eva'."));
        assert!(salida.contains("No hay registros de BPM."));
    }

    #[test]
    fn errors_do_not_stop_the_repl() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());
        let salida = run(&mut app, "bailar\nadd_user x 1\nadd_user x 2\nhelp\nexit\nadd_user y 3\n");
        assert!(salida.contains("comando desconocido: bailar"));
        assert!(salida.contains("Error: No se pudo agregar el usuario 'x'"));
        assert!(salida.contains("output_to_csv"));
        assert!(salida.contains("Saliendo de la aplicación."));
        assert_eq!(app.database().get_user_id("y").unwrap(), None);
    }

    #[test]
    fn export_reports_each_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());
        run(&mut app, "add_user fer 33\n");
        let id = app.database().get_user_id("fer").unwrap().unwrap();
        app.database()
            .insert_oxygen_saturation(id, 95, Local::now().naive_local())
            .unwrap();

        let salida = run(&mut app, "output_to_csv all fer\n");
        assert!(salida.contains("No hay registros de BPM para exportar."));
        assert!(salida.contains("1 filas de Oxygen Level exportadas"));
    }

    struct BrokenPipe {
        writes: usize,
    }

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            self.writes += 1;
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn evento(bpm: i32) -> SessionEvent {
        SessionEvent {
            user_id: 1,
            readings: vec![Reading::HeartRate(bpm)],
            captured_at: Local::now().naive_local(),
            elapsed: Duration::from_secs(1),
        }
    }

    #[test]
    fn live_table_survives_write_failures() {
        let mut tabla = LiveTable::new(BrokenPipe { writes: 0 });
        tabla.show(&evento(70));
        tabla.show(&evento(71));
        assert!(tabla.failed());
        // sigue intentando en cada fila
        assert_eq!(tabla.out.writes, 2);
    }

    #[test]
    fn live_table_writes_rows() {
        let mut tabla = LiveTable::new(Vec::new());
        tabla.show(&evento(70));
        assert!(!tabla.failed());
        assert_eq!(tabla.out, format_row(&evento(70)).into_bytes());
    }

    #[test]
    fn invalid_baud_message_reaches_a_failing_writer_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path());
        let cmd = Command::parse("set_comport COM7 lento").unwrap();
        let r = app.execute(cmd, &mut BrokenPipe { writes: 0 });
        assert!(r.is_err());
        assert_eq!(app.config().serial_port, "COM5");
    }

    #[test]
    fn row_shows_dash_for_missing_values() {
        let event = SessionEvent {
            user_id: 3,
            readings: vec![Reading::HeartRate(72)],
            captured_at: Local::now().naive_local(),
            elapsed: Duration::from_secs(12),
        };
        assert_eq!(format_row(&event), "3             72      -%     12s\r\n");
    }
}
