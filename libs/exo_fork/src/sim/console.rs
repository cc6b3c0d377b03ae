//! Console that keeps every line written to it

use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use crate::logger::Console;

pub struct SimConsole {
    lines: Mutex<Vec<String>>,
}

impl SimConsole {
    pub const fn new() -> Self {
        SimConsole {
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Any line containing `needle`?
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }
}

impl Default for SimConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for SimConsole {
    fn write_bytes(&self, bytes: &[u8]) {
        let line = String::from_utf8_lossy(bytes);
        self.lines.lock().push(String::from(line.trim_end()));
    }
}
