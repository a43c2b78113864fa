//! Process-wide logging for the emulator core.
//!
//! Every component logs through [`log`], tagged with a [`LogCategory`] and a
//! [`LogLevel`]. Levels are configured once (normally by the frontend from its
//! command line) on the global [`LogConfig`]:
//!
//! - a global level that applies to every category, and
//! - an optional per-category override that wins over the global level.
//!
//! # Cost
//!
//! The message is built by a closure that only runs when the category/level pair
//! is enabled and the category has not exceeded its rate limit, so disabled
//! logging costs two atomic loads. File output goes through a background writer
//! thread so a slow disk never stalls emulation.
//!
//! ```rust
//! use sm83_core::logging::{log, LogCategory, LogLevel};
//!
//! log(LogCategory::Cartridge, LogLevel::Trace, || {
//!     format!("MBC1: ROM bank -> {:02X}", 0x05)
//! });
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

/// Default per-category message budget per second
pub const DEFAULT_RATE_LIMIT: usize = 60;

/// Verbosity, ordered `Off < Error < Warn < Info < Debug < Trace`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    /// Case-insensitive names, a few aliases, or the numeric value
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" | "0" => Ok(LogLevel::Off),
            "error" | "err" | "1" => Ok(LogLevel::Error),
            "warn" | "warning" | "2" => Ok(LogLevel::Warn),
            "info" | "3" => Ok(LogLevel::Info),
            "debug" | "4" => Ok(LogLevel::Debug),
            "trace" | "5" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Emulator component a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Instruction execution, illegal opcodes, speed switches
    Cpu,
    /// Memory bus routing, unusable memory, unknown I/O registers
    Bus,
    /// Bank switching, RTC, battery RAM persistence
    Cartridge,
    /// Divider/TIMA
    Timer,
    /// Interrupt requests and dispatch
    Interrupts,
    /// Behavior that is deliberately not emulated
    Stubs,
}

impl LogCategory {
    pub const ALL: [LogCategory; 6] = [
        LogCategory::Cpu,
        LogCategory::Bus,
        LogCategory::Cartridge,
        LogCategory::Timer,
        LogCategory::Interrupts,
        LogCategory::Stubs,
    ];

    const COUNT: usize = Self::ALL.len();

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogCategory::Cpu => "cpu",
            LogCategory::Bus => "bus",
            LogCategory::Cartridge => "cartridge",
            LogCategory::Timer => "timer",
            LogCategory::Interrupts => "interrupts",
            LogCategory::Stubs => "stubs",
        };
        f.write_str(name)
    }
}

impl FromStr for LogCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(LogCategory::Cpu),
            "bus" | "mmu" => Ok(LogCategory::Bus),
            "cartridge" | "cart" | "mbc" => Ok(LogCategory::Cartridge),
            "timer" => Ok(LogCategory::Timer),
            "interrupts" | "irq" => Ok(LogCategory::Interrupts),
            "stubs" => Ok(LogCategory::Stubs),
            other => Err(format!("unknown log category '{}'", other)),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding a logging lock must not silence every later message
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sliding one-second window for a single category
#[derive(Default)]
struct Window {
    stamps: VecDeque<Instant>,
    dropped: usize,
    last_drop_report: Option<Instant>,
}

/// Per-category sliding-window rate limiter
struct RateLimiter {
    max_per_second: AtomicUsize,
    span: Duration,
    windows: Mutex<[Window; LogCategory::COUNT]>,
}

impl RateLimiter {
    fn new(max_per_second: usize) -> Self {
        Self {
            max_per_second: AtomicUsize::new(max_per_second),
            span: Duration::from_secs(1),
            windows: Mutex::new(Default::default()),
        }
    }

    /// Returns whether this message may be emitted, plus a count of suppressed
    /// messages that should be reported now (at most once per second).
    fn admit(&self, category: LogCategory) -> (bool, Option<usize>) {
        let now = Instant::now();
        let max = self.max_per_second.load(Ordering::Relaxed);
        let mut windows = lock(&self.windows);
        let w = &mut windows[category.index()];

        while w
            .stamps
            .front()
            .is_some_and(|&t| now.duration_since(t) > self.span)
        {
            w.stamps.pop_front();
        }

        if w.stamps.len() < max {
            w.stamps.push_back(now);
            if w.dropped > 0 {
                let n = std::mem::take(&mut w.dropped);
                w.last_drop_report = Some(now);
                return (true, Some(n));
            }
            return (true, None);
        }

        w.dropped += 1;
        let due = w
            .last_drop_report
            .map_or(true, |last| now.duration_since(last) >= self.span);
        if due {
            w.last_drop_report = Some(now);
            (false, Some(std::mem::take(&mut w.dropped)))
        } else {
            (false, None)
        }
    }
}

/// Global logging configuration
pub struct LogConfig {
    global_level: AtomicU8,
    category_levels: [AtomicU8; LogCategory::COUNT],
    file_sink: Mutex<Option<Sender<String>>>,
    limiter: RateLimiter,
}

impl LogConfig {
    fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            category_levels: Default::default(),
            file_sink: Mutex::new(None),
            limiter: RateLimiter::new(DEFAULT_RATE_LIMIT),
        }
    }

    /// The process-wide instance
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    /// Override the level for one category (`Off` falls back to the global level)
    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.category_levels[category.index()].store(level as u8, Ordering::Relaxed);
    }

    pub fn level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.category_levels[category.index()].load(Ordering::Relaxed))
    }

    /// A category override wins; otherwise the global level decides
    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        if level == LogLevel::Off {
            return false;
        }
        match self.level(category) {
            LogLevel::Off => level <= self.global_level(),
            cat => level <= cat,
        }
    }

    /// Turn every level back off
    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for category in LogCategory::ALL {
            self.set_level(category, LogLevel::Off);
        }
    }

    pub fn set_rate_limit(&self, max_per_second: usize) {
        self.limiter
            .max_per_second
            .store(max_per_second, Ordering::Relaxed);
    }

    pub fn rate_limit(&self) -> usize {
        self.limiter.max_per_second.load(Ordering::Relaxed)
    }

    /// Append log output to `path` instead of stderr.
    ///
    /// Lines are handed to a background writer thread. Replacing the file drops
    /// the previous sender, which ends the previous writer thread.
    pub fn set_log_file(&self, path: PathBuf) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let (tx, rx) = channel::<String>();

        thread::Builder::new()
            .name("sm83-log-writer".to_string())
            .spawn(move || {
                for line in rx {
                    // Write failures are ignored; there is nowhere left to report them
                    let _ = writeln!(file, "{}", line);
                    let _ = file.flush();
                }
            })?;

        *lock(&self.file_sink) = Some(tx);
        Ok(())
    }

    /// Stop writing to the log file and go back to stderr
    pub fn clear_log_file(&self) {
        *lock(&self.file_sink) = None;
    }

    fn emit(&self, line: String) {
        let sink = lock(&self.file_sink);
        match sink.as_ref() {
            Some(tx) => {
                if let Err(err) = tx.send(line) {
                    eprintln!("{}", err.0);
                }
            }
            None => eprintln!("{}", line),
        }
    }
}

/// Log a lazily-built message.
///
/// `message_fn` only runs when `category`/`level` is enabled and the category's
/// rate limit has room. Suppressed messages are summarized in a single warning
/// line once the category is allowed to speak again.
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    let config = LogConfig::global();
    if !config.should_log(category, level) {
        return;
    }

    let (allowed, dropped) = config.limiter.admit(category);
    if let Some(n) = dropped.filter(|&n| n > 0) {
        config.emit(format!(
            "[{}] rate limit exceeded, {} message(s) dropped",
            category, n
        ));
    }
    if allowed {
        config.emit(message_fn());
    }
}
