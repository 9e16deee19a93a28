use std::{fs, io::Write, path::Path, time::Duration};

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity, SerialPort, StopBits};

use crate::serial_utils::{data_bits_str, parity_str, stop_bits_str};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_serial_port")]
    pub serial_port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(
        default = "default_data_bits",
        deserialize_with = "crate::serial_utils::deserialize_data_bits"
    )]
    pub data_bits: DataBits,
    #[serde(
        default = "default_parity",
        deserialize_with = "crate::serial_utils::deserialize_parity"
    )]
    pub parity: Parity,
    #[serde(
        default = "default_stop_bits",
        deserialize_with = "crate::serial_utils::deserialize_stop_bits"
    )]
    pub stop_bits: StopBits,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_export_dir")]
    pub export_dir: String,
}

fn default_serial_port() -> String { "COM5".to_string() }
fn default_baud_rate() -> u32 { 115_200 }
fn default_data_bits() -> DataBits { DataBits::Eight }
fn default_parity() -> Parity { Parity::None }
fn default_stop_bits() -> StopBits { StopBits::One }
fn default_timeout_ms() -> u64 { 1000 }
fn default_database_path() -> String { "biometrics.db".to_string() }
fn default_export_dir() -> String { ".".to_string() }

impl Default for Config {
    fn default() -> Self {
        Config {
            serial_port: default_serial_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
            timeout_ms: default_timeout_ms(),
            database_path: default_database_path(),
            export_dir: default_export_dir(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Error leyendo archivo de configuración {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| "Error parseando archivo TOML con serde")?;
        Ok(config)
    }

    /// Igual que `load_from_file`, pero un archivo inexistente da la configuración por defecto.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(
                "📄 {} no existe, usando configuración por defecto",
                path.display()
            );
            return Ok(Config::default());
        }
        Self::load_from_file(path)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(&ConfigFile::from(self))
            .context("Error serializando la configuración")?;
        fs::write(path, content)
            .with_context(|| format!("Error escribiendo {}", path.display()))?;
        Ok(())
    }

    /// Copia de los parámetros del puerto para una sesión.
    pub fn device(&self) -> DeviceConfig {
        DeviceConfig {
            port: self.serial_port.clone(),
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
            read_timeout: Duration::from_millis(self.timeout_ms),
        }
    }

    pub fn log_config(&self) {
        info!("📦 Configuración cargada:");
        info!("  Serial port           : {}", self.serial_port);
        info!("  Baud rate             : {}", self.baud_rate);
        info!("  Data bits             : {:?}", self.data_bits);
        info!("  Parity                : {:?}", self.parity);
        info!("  Stop bits             : {:?}", self.stop_bits);
        info!("  Timeout (ms)          : {}", self.timeout_ms);
        info!("  Base de datos         : {}", self.database_path);
        info!("  Directorio CSV        : {}", self.export_dir);
    }
}

/// Forma serializable de `Config`; los tipos de serialport no implementan `Serialize`.
#[derive(Debug, Serialize)]
struct ConfigFile<'a> {
    serial_port: &'a str,
    baud_rate: u32,
    data_bits: &'static str,
    parity: &'static str,
    stop_bits: &'static str,
    timeout_ms: u64,
    database_path: &'a str,
    export_dir: &'a str,
}

impl<'a> From<&'a Config> for ConfigFile<'a> {
    fn from(cfg: &'a Config) -> Self {
        ConfigFile {
            serial_port: &cfg.serial_port,
            baud_rate: cfg.baud_rate,
            data_bits: data_bits_str(cfg.data_bits),
            parity: parity_str(cfg.parity),
            stop_bits: stop_bits_str(cfg.stop_bits),
            timeout_ms: cfg.timeout_ms,
            database_path: &cfg.database_path,
            export_dir: &cfg.export_dir,
        }
    }
}

/// Parámetros del puerto serial, fijados al inicio de cada sesión.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub read_timeout: Duration,
}

impl DeviceConfig {
    pub fn open_serial_port(&self) -> Result<Box<dyn SerialPort>> {
        serialport::new(&self.port, self.baud_rate)
            .data_bits(self.data_bits)
            .parity(self.parity)
            .stop_bits(self.stop_bits)
            .timeout(self.read_timeout)
            .open()
            .with_context(|| format!("No se pudo abrir el puerto serial {}", self.port))
    }
}

/// Durante una sesión la terminal está en modo raw, por eso cada línea termina en "\r\n".
pub fn init_logging() {
    use env_logger::{Builder, Env};
    Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            write!(
                buf,
                "{} [{}] - {}\r\n",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.serial_port, "COM5");
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.device().read_timeout, Duration::from_secs(1));
        assert_eq!(cfg.data_bits, DataBits::Eight);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.database_path, "biometrics.db");
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "baud_rate = \"rapido\"").unwrap();
        assert!(Config::load_or_default(&path).is_err());
    }

    #[test]
    fn save_then_load_keeps_port_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config {
            serial_port: "/dev/ttyACM0".into(),
            baud_rate: 9600,
            parity: Parity::Odd,
            ..Config::default()
        };
        cfg.save_to_file(&path).unwrap();

        let leida = Config::load_from_file(&path).unwrap();
        assert_eq!(leida.device(), cfg.device());
        assert_eq!(leida.export_dir, ".");
    }
}
