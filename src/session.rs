//! Una sesión de registro: hilo lector del puerto más hilo vigía de cancelación.
//!
//! `run_session` lanza ambos hilos dentro de un `thread::scope` y no vuelve
//! hasta que los dos terminaron, así que ninguna lectura se procesa después
//! de que el llamador recibe el resultado.

use std::io::Read;
use std::panic;
use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use log::{error, info, warn};

use crate::cancel::{CancelSource, CancelToken};
use crate::config::DeviceConfig;
use crate::database::ReadingStore;
use crate::error::SessionError;
use crate::reading::{Reading, UserId};
use crate::serial_reader::SerialReader;

/// Datos fijados al inicio de la sesión. La sesión trabaja sobre una copia,
/// los cambios posteriores del operador no la afectan.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub active_user: Option<UserId>,
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub lines: usize,
    pub readings_stored: usize,
    pub decode_errors: usize,
    pub format_errors: usize,
    pub field_errors: usize,
    /// Veces que se descartó un fragmento demasiado largo sin '\n'.
    pub overflows: usize,
    pub storage_errors: usize,
}

impl SessionSummary {
    pub fn line_errors(&self) -> usize {
        self.decode_errors + self.format_errors + self.field_errors + self.overflows
    }
}

/// Lecturas de una línea ya guardadas, para mostrarlas en vivo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub user_id: UserId,
    pub readings: Vec<Reading>,
    pub captured_at: NaiveDateTime,
    pub elapsed: Duration,
}

impl SessionEvent {
    pub fn heart_rate(&self) -> Option<i32> {
        self.readings.iter().find_map(|r| match r {
            Reading::HeartRate(v) => Some(*v),
            _ => None,
        })
    }

    pub fn oxygen(&self) -> Option<i32> {
        self.readings.iter().find_map(|r| match r {
            Reading::OxygenSaturation(v) => Some(*v),
            _ => None,
        })
    }
}

/// Ejecuta una sesión completa.
///
/// `open` abre el dispositivo; cada `read` debe volver como máximo tras
/// `ctx.device.read_timeout`. `on_event` corre en el hilo llamador por cada
/// línea con lecturas guardadas.
pub fn run_session<D, O, S, C, F>(
    ctx: &SessionContext,
    open: O,
    store: &S,
    cancel: C,
    mut on_event: F,
) -> Result<SessionSummary, SessionError>
where
    D: Read + Send,
    O: FnOnce(&DeviceConfig) -> anyhow::Result<D>,
    S: ReadingStore,
    C: CancelSource,
    F: FnMut(SessionEvent),
{
    let user_id = ctx.active_user.ok_or(SessionError::NoActiveUser)?;
    let device = ctx.device.clone();

    let mut serial = open(&device).map_err(|source| {
        error!("❌ No se pudo abrir {}: {:#}", device.port, source);
        SessionError::DeviceUnavailable {
            port: device.port.clone(),
            source,
        }
    })?;
    info!(
        "✅ Escuchando en {} a {} baudios (usuario {})",
        device.port, device.baud_rate, user_id
    );

    let token = CancelToken::new();
    let (tx, rx) = flume::unbounded();
    let started = Instant::now();
    let tick = device.read_timeout;

    thread::scope(|scope| {
        let reader_token = token.clone();
        let reader = scope.spawn(move || {
            let resultado = SerialReader::new(user_id, store, tx, started)
                .run(&mut serial, &reader_token);
            // libera al vigía si el puerto falló
            reader_token.cancel();
            drop(serial);
            info!("🔌 Puerto serial cerrado");
            resultado
        });

        let watcher_token = token.clone();
        let watcher = scope.spawn(move || watch_cancel(cancel, &watcher_token, tick));

        // Termina cuando el lector suelta su Sender. Si `on_event` entra en
        // pánico, el guard levanta el token para que ambos hilos terminen.
        {
            let _guard = CancelOnDrop(&token);
            for event in rx.iter() {
                on_event(event);
            }
        }

        let resultado = reader.join().unwrap_or_else(|e| panic::resume_unwind(e));
        let vigia = watcher.join().unwrap_or_else(|e| panic::resume_unwind(e));

        match (resultado, vigia) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(summary), Ok(())) => {
                info!("👋 Sesión finalizada");
                Ok(summary)
            }
        }
    })
}

struct CancelOnDrop<'a>(&'a CancelToken);

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

fn watch_cancel<C: CancelSource>(
    mut source: C,
    token: &CancelToken,
    tick: Duration,
) -> Result<(), SessionError> {
    while !token.is_cancelled() {
        match source.poll_cancel(tick) {
            Ok(true) => {
                if token.cancel() {
                    info!("🛑 Cancelación solicitada por el operador");
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!("⚠️ Error leyendo la entrada de cancelación: {}", e);
                token.cancel();
                return Err(SessionError::Watcher(e));
            }
        }
    }
    Ok(())
}
