use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let level = match lowered.as_str() {
            "error" | "fatal" => Self::Error,
            "warn" | "warning" => Self::Warn,
            "info" => Self::Info,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => return None,
        };
        Some(level)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Error,
            2 => Self::Warn,
            4 => Self::Debug,
            5 => Self::Trace,
            _ => Self::Info,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text,
    Json,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LogOptions {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
        }
    }
}

/// A log line retained by the capture ring.
#[derive(Clone, Debug)]
pub struct LogRecord {
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub msg: String,
}

impl LogRecord {
    pub fn to_json(&self) -> Value {
        json!({
            "ts": self.ts_ms,
            "level": self.level.as_str(),
            "target": self.target,
            "msg": self.msg,
        })
    }
}

struct CaptureRing {
    capacity: usize,
    records: VecDeque<LogRecord>,
}

static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static JSON_OUTPUT: AtomicBool = AtomicBool::new(false);
static TIMESTAMPS: AtomicBool = AtomicBool::new(true);
static STDERR: AtomicBool = AtomicBool::new(true);
static CAPTURE: OnceLock<Mutex<CaptureRing>> = OnceLock::new();

pub fn init(options: LogOptions) {
    MAX_LEVEL.store(options.level as u8, Ordering::Relaxed);
    JSON_OUTPUT.store(matches!(options.format, Format::Json), Ordering::Relaxed);
    TIMESTAMPS.store(options.timestamps, Ordering::Relaxed);
}

pub fn max_level() -> Level {
    Level::from_u8(MAX_LEVEL.load(Ordering::Relaxed))
}

pub fn enabled(level: Level) -> bool {
    level <= max_level()
}

pub fn set_stderr(enabled: bool) {
    STDERR.store(enabled, Ordering::Relaxed);
}

/// Retains the last `capacity` records in memory. A zero capacity turns capture off.
pub fn set_capture(capacity: usize) {
    let ring = CAPTURE.get_or_init(|| {
        Mutex::new(CaptureRing {
            capacity: 0,
            records: VecDeque::new(),
        })
    });
    let mut guard = match ring.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.capacity = capacity;
    while guard.records.len() > capacity {
        guard.records.pop_front();
    }
}

pub fn captured() -> Vec<LogRecord> {
    let Some(ring) = CAPTURE.get() else {
        return Vec::new();
    };
    match ring.lock() {
        Ok(guard) => guard.records.iter().cloned().collect(),
        Err(_) => Vec::new(),
    }
}

pub fn clear_captured() {
    if let Some(ring) = CAPTURE.get() {
        if let Ok(mut guard) = ring.lock() {
            guard.records.clear();
        }
    }
}

pub fn log(level: Level, target: &'static str, args: fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ts_ms = u64::try_from(now.as_millis()).unwrap_or(u64::MAX);
    let msg = args.to_string();

    if STDERR.load(Ordering::Relaxed) {
        let mut out = io::stderr().lock();
        if JSON_OUTPUT.load(Ordering::Relaxed) {
            let line = json!({
                "ts": ts_ms,
                "level": level.as_str(),
                "target": target,
                "msg": msg,
            });
            let _ = writeln!(out, "{line}");
        } else {
            if TIMESTAMPS.load(Ordering::Relaxed) {
                let _ = write!(out, "{} ", Rfc3339(now));
            }
            let _ = writeln!(out, "[{:>5}] {target}: {msg}", level.as_str());
        }
    }

    let Some(ring) = CAPTURE.get() else {
        return;
    };
    let Ok(mut guard) = ring.lock() else {
        return;
    };
    if guard.capacity == 0 {
        return;
    }
    guard.records.push_back(LogRecord {
        ts_ms,
        level,
        target,
        msg,
    });
    while guard.records.len() > guard.capacity {
        guard.records.pop_front();
    }
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled($level) {
            $crate::log($level, module_path!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::log_at!($crate::Level::Error, $($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::log_at!($crate::Level::Warn, $($arg)*) };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::log_at!($crate::Level::Info, $($arg)*) };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::log_at!($crate::Level::Debug, $($arg)*) };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { $crate::log_at!($crate::Level::Trace, $($arg)*) };
}

struct Rfc3339(Duration);

impl fmt::Display for Rfc3339 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        let (year, month, day) = civil_from_days((secs / 86_400) as i64);
        let rem = secs % 86_400;
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
            rem / 3600,
            (rem % 3600) / 60,
            rem % 60,
            self.0.subsec_millis()
        )
    }
}

// Howard Hinnant's days-to-civil conversion.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = i64::from(yoe) + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_with_aliases() {
        assert_eq!(Level::parse("INFO"), Some(Level::Info));
        assert_eq!(Level::parse(" warning "), Some(Level::Warn));
        assert_eq!(Level::parse("fatal"), Some(Level::Error));
        assert_eq!(Level::parse("verbose"), None);
        assert!(Level::Error < Level::Trace);
    }

    #[test]
    fn formats_parse() {
        assert_eq!(Format::parse("Json"), Some(Format::Json));
        assert_eq!(Format::parse("plain"), Some(Format::Text));
        assert_eq!(Format::parse("xml"), None);
    }

    #[test]
    fn civil_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19_723), (2024, 1, 1));
        assert_eq!(civil_from_days(-1), (1969, 12, 31));
    }

    #[test]
    fn capture_ring_keeps_latest() {
        set_stderr(false);
        set_capture(2);
        clear_captured();
        log(Level::Error, "test", format_args!("one"));
        log(Level::Error, "test", format_args!("two"));
        log(Level::Error, "test", format_args!("three"));
        let records = captured();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].msg, "three");
        assert_eq!(records[1].to_json()["level"], "error");
    }
}
