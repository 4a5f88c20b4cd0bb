use chrono::{DateTime, Utc};
use std::ffi::OsStr;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Ticks (100 ns) between 1601-01-01 and 1970-01-01.
pub const FILETIME_UNIX_EPOCH_TICKS: u64 = 116_444_736_000_000_000;

const TICKS_PER_MICRO: u64 = 10;

/// Converts a file-time tick count into a UTC datetime.
/// Returns None for ticks before the Unix epoch or beyond chrono's range.
pub fn filetime_to_datetime(ticks: u64) -> Option<DateTime<Utc>> {
  let micros = ticks.checked_sub(FILETIME_UNIX_EPOCH_TICKS)? / TICKS_PER_MICRO;
  DateTime::from_timestamp_micros(i64::try_from(micros).ok()?)
}

/// Converts a UTC datetime into file-time ticks.
pub fn datetime_to_filetime(dt: DateTime<Utc>) -> Option<u64> {
  let micros = u64::try_from(dt.timestamp_micros()).ok()?;
  micros.checked_mul(TICKS_PER_MICRO)?.checked_add(FILETIME_UNIX_EPOCH_TICKS)
}

/// On-disk representation of a wall-clock instant (microseconds since Unix epoch).
pub fn datetime_to_micros(dt: DateTime<Utc>) -> i64 {
  dt.timestamp_micros()
}

pub fn micros_to_datetime(micros: i64) -> Option<DateTime<Utc>> {
  DateTime::from_timestamp_micros(micros)
}

/// Signed nanoseconds relative to the Unix epoch. Lossless for any
/// `SystemTime` a file system reports.
pub fn system_time_to_nanos(t: SystemTime) -> i128 {
  match t.duration_since(UNIX_EPOCH) {
    Ok(d) => d.as_nanos() as i128,
    Err(e) => -(e.duration().as_nanos() as i128),
  }
}

pub fn nanos_to_system_time(nanos: i128) -> SystemTime {
  let magnitude = nanos.unsigned_abs();
  let d = Duration::new((magnitude / 1_000_000_000) as u64, (magnitude % 1_000_000_000) as u32);
  if nanos >= 0 { UNIX_EPOCH + d } else { UNIX_EPOCH - d }
}

/// True when `path` carries `extension` (case-insensitive, no leading dot).
pub fn has_extension(path: &Path, extension: &str) -> bool {
  path
    .extension()
    .and_then(OsStr::to_str)
    .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_filetime_conversion() {
    let dt = Utc.with_ymd_and_hms(2015, 10, 23, 18, 39, 41).unwrap();
    let ticks = datetime_to_filetime(dt).unwrap();
    assert_eq!(ticks, 130_900_991_810_000_000);
    assert_eq!(filetime_to_datetime(ticks), Some(dt));

    // Before 1970 is not representable as a wall-clock record time here.
    assert_eq!(filetime_to_datetime(1), None);
  }

  #[test]
  fn test_system_time_nanos() {
    let after = UNIX_EPOCH + Duration::new(1_445_626_381, 123_456_789);
    assert_eq!(nanos_to_system_time(system_time_to_nanos(after)), after);

    let before = UNIX_EPOCH - Duration::new(5, 500);
    assert_eq!(system_time_to_nanos(before), -5_000_000_500);
    assert_eq!(nanos_to_system_time(system_time_to_nanos(before)), before);
  }

  #[test]
  fn test_extension_match() {
    assert!(has_extension(Path::new("a/b/WSP1445626381.aaLog"), "aaLog"));
    assert!(has_extension(Path::new("x.AALOG"), "aaLog"));
    assert!(!has_extension(Path::new("x.aaLog.tmp"), "aaLog"));
    assert!(!has_extension(Path::new("aaLog"), "aaLog"));
  }
}
