use std::io::{self, Write};

use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

/// Human-readable byte count, 1024-based.
pub fn byte_format(num: u64) -> String {
    let mut value = num as f64;
    for unit in ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi"] {
        if value.abs() < 1024.0 {
            return format!("{value:3.1}{unit}B");
        }
        value /= 1024.0;
    }
    format!("{value:.1}YiB")
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_format_units() {
        assert_eq!(byte_format(0), "0.0B");
        assert_eq!(byte_format(100), "100.0B");
        assert_eq!(byte_format(1024), "1.0KiB");
        assert_eq!(byte_format(10 * 1024 * 1024), "10.0MiB");
        assert_eq!(byte_format(3 * 1024 * 1024 * 1024), "3.0GiB");
    }
}
