use std::io::{ErrorKind, Read};
use std::time::Instant;

use chrono::Local;
use flume::Sender;
use log::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::database::ReadingStore;
use crate::error::{LineError, SessionError};
use crate::line_parser::parse_line;
use crate::reading::{StampedReading, UserId};
use crate::serial_processor::LineAssembler;
use crate::serial_utils::sanitize_log_data;
use crate::session::{SessionEvent, SessionSummary};

/// Lado lector de una sesión: puerto serial -> parser -> almacenamiento.
pub struct SerialReader<'a, S> {
    user_id: UserId,
    store: &'a S,
    events: Sender<SessionEvent>,
    started: Instant,
    summary: SessionSummary,
}

impl<'a, S: ReadingStore> SerialReader<'a, S> {
    pub fn new(user_id: UserId, store: &'a S, events: Sender<SessionEvent>, started: Instant) -> Self {
        SerialReader {
            user_id,
            store,
            events,
            started,
            summary: SessionSummary::default(),
        }
    }

    /// Lee hasta que se levante `token` o el puerto falle.
    ///
    /// Cada lectura del puerto debe tener timeout: es lo único que acota
    /// cuánto tarda en verse la cancelación.
    pub fn run<R: Read>(
        mut self,
        serial: &mut R,
        token: &CancelToken,
    ) -> Result<SessionSummary, SessionError> {
        let mut buffer = [0u8; 1024];
        let mut assembler = LineAssembler::new();

        info!("🟡 Hilo de lectura serial iniciado. Esperando datos del sensor...");

        while !token.is_cancelled() {
            match serial.read(&mut buffer) {
                Ok(bytes_read) if bytes_read > 0 => {
                    let recibidos = &buffer[..bytes_read];
                    debug!("📥 Bytes leídos (crudo): {}", sanitize_log_data(recibidos));

                    for linea in assembler.push(recibidos) {
                        match linea {
                            Ok(linea) => self.process_line(&linea),
                            Err(e) => self.line_error(e),
                        }
                    }
                }
                Ok(_) => {
                    // Con timeout, 0 bytes significa que el puerto ya no entrega datos.
                    error!("❌ El puerto serial no devolvió datos (fin de flujo)");
                    self.log_summary();
                    return Err(SessionError::DeviceRead(ErrorKind::UnexpectedEof.into()));
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    // Timeout esperado, continuar
                }
                Err(e) => {
                    error!("❌ Error al leer del puerto serial: {}", e);
                    self.log_summary();
                    return Err(SessionError::DeviceRead(e));
                }
            }
        }

        if !assembler.pending().is_empty() {
            debug!(
                "🧩 Fragmento descartado al cerrar: {}",
                sanitize_log_data(assembler.pending())
            );
        }
        self.log_summary();
        Ok(self.summary)
    }

    fn process_line(&mut self, raw: &[u8]) {
        let texto = match std::str::from_utf8(raw) {
            Ok(t) => t.trim(),
            Err(_) => {
                self.summary.lines += 1;
                self.line_error(LineError::Decode(sanitize_log_data(raw)));
                return;
            }
        };
        if texto.is_empty() {
            return;
        }
        self.summary.lines += 1;
        debug!("✅ Línea recibida: {}", texto);

        let parsed = match parse_line(texto) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.line_error(e);
                return;
            }
        };
        for e in parsed.field_errors {
            self.line_error(e);
        }

        // Un solo timestamp para todas las lecturas de la línea.
        let captured_at = Local::now().naive_local();
        let mut guardadas = Vec::with_capacity(parsed.readings.len());
        for reading in parsed.readings {
            let stamped = StampedReading {
                user_id: self.user_id,
                reading,
                captured_at,
            };
            match self.store.insert_reading(&stamped) {
                Ok(()) => {
                    self.summary.readings_stored += 1;
                    guardadas.push(reading);
                }
                Err(e) => {
                    self.summary.storage_errors += 1;
                    warn!("⚠️ No se pudo guardar {} para el usuario {}: {}", reading, self.user_id, e);
                }
            }
        }

        if !guardadas.is_empty() {
            let _ = self.events.send(SessionEvent {
                user_id: self.user_id,
                readings: guardadas,
                captured_at,
                elapsed: self.started.elapsed(),
            });
        }
    }

    fn line_error(&mut self, e: LineError) {
        match e {
            LineError::Decode(_) => self.summary.decode_errors += 1,
            LineError::Format => self.summary.format_errors += 1,
            LineError::FieldParse { .. } => self.summary.field_errors += 1,
            LineError::Overflow { .. } => self.summary.overflows += 1,
        }
        warn!("⚠️ Error procesando línea: {}", e);
    }

    fn log_summary(&self) {
        let s = &self.summary;
        info!(
            "📊 Sesión: {} líneas, {} lecturas guardadas, {} errores de formato, {} errores de almacenamiento",
            s.lines,
            s.readings_stored,
            s.line_errors(),
            s.storage_errors
        );
    }
}
