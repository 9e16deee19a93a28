use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::LineError;
use crate::reading::{Reading, ReadingKind};

static RE_VALOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?[0-9]+").unwrap());

/// Resultado de una línea que contenía al menos un tag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedLine {
    /// Frecuencia cardíaca primero, luego oxígeno.
    pub readings: Vec<Reading>,
    /// Tags encontrados cuyo valor no se pudo interpretar.
    pub field_errors: Vec<LineError>,
}

impl ParsedLine {
    pub fn is_clean(&self) -> bool {
        self.field_errors.is_empty()
    }
}

/// Convierte una línea ya recortada en cero, una o dos lecturas.
///
/// Si aparecen ambos tags, la línea se corta en el índice mayor: cada
/// segmento empieza con su propio tag y llega hasta el otro (o el final).
/// Así el orden físico de los tags no afecta al resultado.
pub fn parse_line(line: &str) -> Result<ParsedLine, LineError> {
    let (bpm_seg, oxy_seg) = split_segments(line)?;

    let mut parsed = ParsedLine::default();
    for (kind, segment) in [
        (ReadingKind::HeartRate, bpm_seg),
        (ReadingKind::OxygenSaturation, oxy_seg),
    ] {
        let Some(segment) = segment else { continue };
        match parse_segment(kind, segment) {
            Ok(reading) => parsed.readings.push(reading),
            Err(e) => parsed.field_errors.push(e),
        }
    }
    Ok(parsed)
}

fn split_segments(line: &str) -> Result<(Option<&str>, Option<&str>), LineError> {
    let bpm = line.find(ReadingKind::HeartRate.tag());
    let oxy = line.find(ReadingKind::OxygenSaturation.tag());

    match (bpm, oxy) {
        (None, None) => Err(LineError::Format),
        (Some(b), None) => Ok((Some(&line[b..]), None)),
        (None, Some(o)) => Ok((None, Some(&line[o..]))),
        (Some(b), Some(o)) => {
            let corte = b.max(o);
            if b < o {
                Ok((Some(&line[b..corte]), Some(&line[corte..])))
            } else {
                Ok((Some(&line[corte..]), Some(&line[o..corte])))
            }
        }
    }
}

fn parse_segment(kind: ReadingKind, segment: &str) -> Result<Reading, LineError> {
    let error = || LineError::FieldParse {
        kind,
        segment: segment.trim().to_string(),
    };

    let resto = segment.strip_prefix(kind.tag()).ok_or_else(error)?;
    let digitos = RE_VALOR.find(resto).ok_or_else(error)?;
    let valor = digitos.as_str().parse::<i32>().map_err(|_| error())?;
    Ok(Reading::new(kind, valor))
}
