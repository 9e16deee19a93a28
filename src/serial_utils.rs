use serde::{self, Deserialize, Deserializer};
use serialport::{DataBits, Parity, StopBits};

pub fn deserialize_data_bits<'de, D>(deserializer: D) -> Result<DataBits, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.as_str() {
        "5" => Ok(DataBits::Five),
        "6" => Ok(DataBits::Six),
        "7" => Ok(DataBits::Seven),
        "8" => Ok(DataBits::Eight),
        _ => Err(serde::de::Error::custom("data_bits inválido")),
    }
}

pub fn deserialize_parity<'de, D>(deserializer: D) -> Result<Parity, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(serde::de::Error::custom("parity inválido")),
    }
}

pub fn deserialize_stop_bits<'de, D>(deserializer: D) -> Result<StopBits, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.as_str() {
        "1" => Ok(StopBits::One),
        "2" => Ok(StopBits::Two),
        _ => Err(serde::de::Error::custom("stop_bits inválido")),
    }
}

/// Inverso de los deserializadores, para guardar la configuración.
pub fn data_bits_str(bits: DataBits) -> &'static str {
    match bits {
        DataBits::Five => "5",
        DataBits::Six => "6",
        DataBits::Seven => "7",
        DataBits::Eight => "8",
    }
}

pub fn parity_str(parity: Parity) -> &'static str {
    match parity {
        Parity::None => "none",
        Parity::Odd => "odd",
        Parity::Even => "even",
    }
}

pub fn stop_bits_str(bits: StopBits) -> &'static str {
    match bits {
        StopBits::One => "1",
        StopBits::Two => "2",
    }
}

/// Convierte datos binarios en una representación legible para logs.
pub fn sanitize_log_data(data: &[u8]) -> String {
    data.iter()
        .filter_map(|&byte| {
            // DEL se ignora por completo
            if byte == 0x7F {
                None
            } else if byte.is_ascii_graphic() || byte == b' ' {
                Some((byte as char).to_string())
            } else if byte == b'\r' {
                Some("\\r".to_string())
            } else if byte == b'\n' {
                Some("\\n".to_string())
            } else {
                Some(format!("\\x{:02X}", byte))
            }
        })
        .collect()
}
