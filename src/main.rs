use std::io;
use std::path::PathBuf;

use anyhow::Result;

use pulse_logger::app::{self, App};
use pulse_logger::config::{self, Config};

fn main() -> Result<()> {
    config::init_logging();

    // Leer el argumento de línea de comandos (opcional)
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    log::info!("📄 Cargando configuración desde {}", config_path.display());
    let config = Config::load_or_default(&config_path)?;
    config.log_config();

    let mut app = App::open(config, config_path)?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    app::run_repl(&mut app, stdin.lock(), &mut stdout)?;

    log::info!("👋 Aplicación finalizada");
    Ok(())
}
