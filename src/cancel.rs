use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;

/// Señal de cancelación compartida. Se levanta una sola vez.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devuelve `true` solo para la llamada que levantó la señal.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Origen del pedido de cancelación del operador.
pub trait CancelSource: Send {
    /// Bloquea como máximo `timeout`. `true` si se pidió cancelar.
    fn poll_cancel(&mut self, timeout: Duration) -> io::Result<bool>;
}

/// Cancela con Esc (o Ctrl-C, que en modo raw no genera SIGINT).
///
/// Mientras existe, la terminal queda en modo raw.
pub struct EscKey {
    _priv: (),
}

impl EscKey {
    pub fn new() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(EscKey { _priv: () })
    }
}

impl Drop for EscKey {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            log::warn!("⚠️ No se pudo restaurar la terminal: {}", e);
        }
    }
}

impl CancelSource for EscKey {
    fn poll_cancel(&mut self, timeout: Duration) -> io::Result<bool> {
        if !event::poll(timeout)? {
            return Ok(false);
        }
        Ok(matches!(event::read()?, Event::Key(key) if is_cancel_key(&key)))
    }
}

fn is_cancel_key(key: &KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    match key.code {
        KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_raised_once() {
        let token = CancelToken::new();
        let otro = token.clone();
        assert!(!otro.is_cancelled());
        assert!(token.cancel());
        assert!(!otro.cancel());
        assert!(otro.is_cancelled());
    }

    #[test]
    fn only_esc_and_ctrl_c_cancel() {
        let esc = KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE);
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        let c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE);
        let enter = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
        assert!(is_cancel_key(&esc));
        assert!(is_cancel_key(&ctrl_c));
        assert!(!is_cancel_key(&c));
        assert!(!is_cancel_key(&enter));

        let mut soltada = esc;
        soltada.kind = KeyEventKind::Release;
        assert!(!is_cancel_key(&soltada));
    }
}
