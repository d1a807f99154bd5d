// SPDX-License-Identifier: GPL-3.0-only

//! Pattern display host interface

use super::TestPattern;
use tracing::debug;

/// Shows test patterns full-screen
///
/// Implemented by whatever owns the window. Calls are never interleaved:
/// `enter_fullscreen`, then `show` once per step, then `leave_fullscreen`
/// (also on abort).
pub trait PatternDisplay: Send {
    fn enter_fullscreen(&mut self);

    /// Display `pattern`, step `index` of `total`
    fn show(&mut self, pattern: &TestPattern, index: usize, total: usize);

    fn leave_fullscreen(&mut self);
}

/// Prints the pattern the operator should put on the panel
#[derive(Debug, Default)]
pub struct ConsoleDisplay {
    quiet: bool,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log only, no terminal output
    pub fn quiet() -> Self {
        Self { quiet: true }
    }
}

impl PatternDisplay for ConsoleDisplay {
    fn enter_fullscreen(&mut self) {
        debug!("Entering fullscreen");
    }

    fn show(&mut self, pattern: &TestPattern, index: usize, total: usize) {
        debug!(pattern = %pattern.name, index, total, "Showing pattern");
        if !self.quiet {
            println!("[{}/{}] {} ({})", index + 1, total, pattern.name, pattern.asset);
        }
    }

    fn leave_fullscreen(&mut self) {
        debug!("Leaving fullscreen");
    }
}

/// Records calls, for tests
#[derive(Debug, Default, Clone)]
pub struct RecordingDisplay {
    pub shown: Vec<String>,
    pub fullscreen: bool,
    pub fullscreen_entries: usize,
}

impl PatternDisplay for RecordingDisplay {
    fn enter_fullscreen(&mut self) {
        self.fullscreen = true;
        self.fullscreen_entries += 1;
    }

    fn show(&mut self, pattern: &TestPattern, _index: usize, _total: usize) {
        self.shown.push(pattern.name.clone());
    }

    fn leave_fullscreen(&mut self) {
        self.fullscreen = false;
    }
}
