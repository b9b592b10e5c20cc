//! Unique file names for scenario runs

use std::sync::atomic::{AtomicU64, Ordering};

/// Prefix of every generated name
pub const NAME_PREFIX: &str = "testfile_";

/// Process-wide name sequence shared by all scenarios
pub static NAMES: NameGenerator = NameGenerator::new();

/// Issues `testfile_1`, `testfile_2`, ... and never repeats within a process
#[derive(Debug)]
pub struct NameGenerator {
    counter: AtomicU64,
}

impl NameGenerator {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_name(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}{}", NAME_PREFIX, n)
    }
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Next name from the process-wide sequence
pub fn next_name() -> String {
    NAMES.next_name()
}
