use crate::error::{Error, Result};

/// Parses a clock-style duration ("64", "1:04", "0:1:04") into seconds.
/// Accepts one to three colon-separated non-negative fields.
pub fn parse_duration_seconds(s: &str) -> Result<u32> {
    let fields: Vec<&str> = s.split(':').collect();
    if fields.len() > 3 {
        return Err(Error::InvalidDuration);
    }
    let mut secs: u64 = 0;
    let mut magnitude: u64 = 1;
    for field in fields.iter().rev() {
        let n: u32 = field.parse().map_err(|_| Error::InvalidDuration)?;
        secs += n as u64 * magnitude;
        magnitude *= 60;
    }
    secs.try_into().map_err(|_| Error::InvalidDuration)
}

/// Formats seconds as "mm:ss", or "hh:mm:ss" once at least an hour long.
pub fn format_duration_seconds(total: u32) -> String {
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}
