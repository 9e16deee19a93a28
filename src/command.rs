use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::database::UserFilter;
use crate::export::ExportSelection;
use crate::reading::ReadingKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddUser { username: String, age: u32 },
    RemoveUser(String),
    SetUser(String),
    ShowLog { kind: ReadingKind, filter: UserFilter },
    LogBio,
    OutputToCsv { selection: ExportSelection, filter: UserFilter },
    /// El baud rate queda como texto: uno inválido se informa y se conserva el anterior.
    SetComport { port: String, baud_rate: Option<String> },
    DeleteLogs(UserFilter),
    Help,
    Clear,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("comando desconocido: {0}. Escriba 'help' para ver los comandos")]
    Unknown(String),

    #[error("uso: {0}")]
    Usage(&'static str),
}

/// (nombre, argumentos, descripción)
pub const COMMANDS: &[(&str, &str, &str)] = &[
    ("add_user", "<usuario> <edad>", "Agrega un usuario"),
    ("remove_user", "<usuario>", "Elimina un usuario y sus registros"),
    ("set_user", "<usuario>", "Define el usuario activo"),
    ("show_bpm_log", "[all|<usuario>]", "Muestra el historial de BPM"),
    ("show_oxygen_log", "[all|<usuario>]", "Muestra el historial de oxígeno"),
    ("log_bio", "", "Registra datos del puerto serial (Esc para salir)"),
    ("output_to_csv", "<bpm|oxygen|all> [all|<usuario>]", "Exporta el historial a CSV"),
    ("set_comport", "<puerto> [baudios]", "Configura puerto y baud rate"),
    ("delete_logs", "<all|usuario>", "Borra registros de un usuario o de todos"),
    ("help", "", "Muestra los comandos disponibles"),
    ("clear", "", "Limpia la pantalla"),
    ("exit", "", "Sale de la aplicación"),
];

static RE_CMD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\S+)\s*(.*?)\s*$").unwrap());
static RE_NAME_AGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\S+)\s+(\d+)$").unwrap());
static RE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\S+)$").unwrap());
static RE_ONE_OR_TWO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\S+)(?:\s+(\S+))?$").unwrap());

impl Command {
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let caps = RE_CMD
            .captures(input)
            .ok_or_else(|| CommandError::Unknown(input.trim().to_string()))?;
        let nombre = caps[1].to_lowercase();
        let args = caps.get(2).map_or("", |m| m.as_str());

        match nombre.as_str() {
            "add_user" => {
                let c = RE_NAME_AGE
                    .captures(args)
                    .ok_or(CommandError::Usage("add_user <usuario> <edad>"))?;
                let age = c[2]
                    .parse()
                    .map_err(|_| CommandError::Usage("add_user <usuario> <edad>"))?;
                Ok(Command::AddUser {
                    username: c[1].to_string(),
                    age,
                })
            }
            "remove_user" => Ok(Command::RemoveUser(
                single_name(args, "remove_user <usuario>")?,
            )),
            "set_user" => Ok(Command::SetUser(single_name(args, "set_user <usuario>")?)),
            "show_bpm_log" | "show_oxygen_log" => {
                let kind = if nombre == "show_bpm_log" {
                    ReadingKind::HeartRate
                } else {
                    ReadingKind::OxygenSaturation
                };
                if !args.is_empty() && !RE_NAME.is_match(args) {
                    return Err(CommandError::Usage("show_<bpm|oxygen>_log [all|<usuario>]"));
                }
                Ok(Command::ShowLog {
                    kind,
                    filter: UserFilter::parse(args),
                })
            }
            "log_bio" => no_args(args, Command::LogBio, "log_bio"),
            "output_to_csv" => {
                const USO: &str = "output_to_csv <bpm|oxygen|all> [all|<usuario>]";
                let c = RE_ONE_OR_TWO.captures(args).ok_or(CommandError::Usage(USO))?;
                let selection = ExportSelection::parse(&c[1]).ok_or(CommandError::Usage(USO))?;
                let filter = UserFilter::parse(c.get(2).map_or("", |m| m.as_str()));
                Ok(Command::OutputToCsv { selection, filter })
            }
            "set_comport" => {
                let c = RE_ONE_OR_TWO
                    .captures(args)
                    .ok_or(CommandError::Usage("set_comport <puerto> [baudios]"))?;
                Ok(Command::SetComport {
                    port: c[1].to_string(),
                    baud_rate: c.get(2).map(|m| m.as_str().to_string()),
                })
            }
            "delete_logs" => Ok(Command::DeleteLogs(UserFilter::parse(&single_name(
                args,
                "delete_logs <all|usuario>",
            )?))),
            "help" => no_args(args, Command::Help, "help"),
            "clear" => no_args(args, Command::Clear, "clear"),
            "exit" | "quit" => no_args(args, Command::Exit, "exit"),
            _ => Err(CommandError::Unknown(caps[1].to_string())),
        }
    }
}

fn single_name(args: &str, uso: &'static str) -> Result<String, CommandError> {
    RE_NAME
        .captures(args)
        .map(|c| c[1].to_string())
        .ok_or(CommandError::Usage(uso))
}

fn no_args(args: &str, cmd: Command, uso: &'static str) -> Result<Command, CommandError> {
    if args.is_empty() {
        Ok(cmd)
    } else {
        Err(CommandError::Usage(uso))
    }
}
