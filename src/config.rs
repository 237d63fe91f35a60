use std::time::Duration;

use anyhow::{Result, bail};

pub const DEFAULT_DATA_FILE: &str = "data/data.json";
pub const DEFAULT_HELM_BINARY: &str = "helm";

/// Parse a duration string of the form `<value><unit>` (e.g. `60s`, `5m`, `8h`, `7d`, `2w`)
///
/// Malformed strings fail fast - they are configuration errors, caught before
/// any scan starts. The string format lives only at this boundary; everything
/// downstream works with typed durations
pub fn parse_duration(duration: &str) -> Result<Duration> {
  let Some(unit) = duration.chars().last() else {
    bail!("The provided duration is empty, expected e.g. 60s, 5m, 8h, 7d, 2w")
  };

  let value = &duration[..duration.len() - unit.len_utf8()];
  if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
    bail!("The provided duration: \"{duration}\" does not match format (e.g. 60s, 5m, 8h, 7d, 2w)");
  }
  let value: u64 = value.parse()?;

  let multiplier = match unit {
    's' => 1,
    'm' => 60,
    'h' => 60 * 60,
    'd' => 60 * 60 * 24,
    'w' => 60 * 60 * 24 * 7,
    _ => bail!("Unknown duration unit \"{unit}\" for time \"{duration}\""),
  };

  Ok(Duration::from_secs(value * multiplier))
}
