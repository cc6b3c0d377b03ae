//! Console logger for user environments
//!
//! Backs the `log` facade with the host console. Formatting happens in a
//! fixed stack buffer so that logging from the fault handler never allocates.

use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

/// Line buffer size; longer lines are truncated
pub const LINE_MAX: usize = 512;

/// Sink for formatted log lines (the host's console output call)
pub trait Console: Send + Sync {
    fn write_bytes(&self, bytes: &[u8]);
}

/// `log::Log` backend writing `[LEVEL] target: message` lines to a console
pub struct ConsoleLogger<C> {
    console: C,
    level: LevelFilter,
}

impl<C: Console> ConsoleLogger<C> {
    pub const fn new(console: C, level: LevelFilter) -> Self {
        Self { console, level }
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }
}

impl<C: Console> log::Log for ConsoleLogger<C> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level_str = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        use core::fmt::Write;
        let mut buf = [0u8; LINE_MAX];
        let pos = {
            // Last byte kept for the newline
            let mut writer = BufferWriter { buffer: &mut buf[..LINE_MAX - 1], pos: 0 };
            let _ = write!(&mut writer, "[{}] {}: {}", level_str, record.target(), record.args());
            writer.pos
        };
        buf[pos] = b'\n';
        self.console.write_bytes(&buf[..pos + 1]);
    }

    fn flush(&self) {}
}

/// Buffer writer for formatting without alloc. Output past the end of the
/// buffer is dropped, never splitting a UTF-8 character.
pub struct BufferWriter<'a> {
    pub buffer: &'a mut [u8],
    pub pos: usize,
}

impl<'a> core::fmt::Write for BufferWriter<'a> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buffer.len() - self.pos;
        let mut to_write = bytes.len().min(remaining);
        while !s.is_char_boundary(to_write) {
            to_write -= 1;
        }

        if to_write > 0 {
            self.buffer[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
            self.pos += to_write;
        }

        Ok(())
    }
}

/// Install `logger` as the global logger. Only the first call succeeds.
pub fn init<C: Console + 'static>(logger: &'static ConsoleLogger<C>) -> Result<(), SetLoggerError> {
    log::set_logger(logger).map(|()| log::set_max_level(logger.level()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Log;
    use spin::Mutex;
    use std::vec::Vec;

    struct Capture(Mutex<Vec<u8>>);

    impl Console for Capture {
        fn write_bytes(&self, bytes: &[u8]) {
            self.0.lock().extend_from_slice(bytes);
        }
    }

    #[test]
    fn test_line_format() {
        let logger = ConsoleLogger::new(Capture(Mutex::new(Vec::new())), LevelFilter::Debug);
        logger.log(
            &Record::builder()
                .level(Level::Warn)
                .target("exo_fork::fork")
                .args(format_args!("child {}", 7))
                .build(),
        );
        let out = logger.console().0.lock().clone();
        assert_eq!(out, b"[WARN ] exo_fork::fork: child 7\n".to_vec());
    }

    #[test]
    fn test_level_filter() {
        let logger = ConsoleLogger::new(Capture(Mutex::new(Vec::new())), LevelFilter::Info);
        logger.log(&Record::builder().level(Level::Trace).args(format_args!("noise")).build());
        assert!(logger.console().0.lock().is_empty());
    }

    #[test]
    fn test_long_record_keeps_newline() {
        let logger = ConsoleLogger::new(Capture(Mutex::new(Vec::new())), LevelFilter::Debug);
        let long = "x".repeat(2 * LINE_MAX);
        logger.log(
            &Record::builder()
                .level(Level::Error)
                .target("t")
                .args(format_args!("{}", long))
                .build(),
        );
        let out = logger.console().0.lock().clone();
        assert_eq!(out.len(), LINE_MAX);
        assert_eq!(out.last(), Some(&b'\n'));
        assert_eq!(out.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn test_truncation_keeps_whole_chars() {
        let mut buf = [0u8; 4];
        let mut writer = BufferWriter { buffer: &mut buf, pos: 0 };
        use core::fmt::Write;
        let _ = writer.write_str("ab\u{e9}\u{e9}");
        assert_eq!(writer.pos, 4);
        assert_eq!(&buf, "ab\u{e9}".as_bytes());

        let mut buf = [0u8; 3];
        let mut writer = BufferWriter { buffer: &mut buf, pos: 0 };
        let _ = writer.write_str("a\u{20ac}");
        assert_eq!(writer.pos, 1);
    }

    #[test]
    fn test_long_line_truncated() {
        let mut buf = [0u8; 8];
        let mut writer = BufferWriter { buffer: &mut buf, pos: 0 };
        use core::fmt::Write;
        let _ = writer.write_str("0123456789");
        assert_eq!(writer.pos, 8);
        assert_eq!(&buf, b"01234567");
    }
}
