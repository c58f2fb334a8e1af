/// Destination for operator-facing progress lines.
pub trait ProgressSink {
    fn line(&mut self, message: &str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutProgress;

impl ProgressSink for StdoutProgress {
    fn line(&mut self, message: &str) {
        println!("{message}");
    }
}

/// Keeps every line in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedProgress {
    pub lines: Vec<String>,
}

impl RecordedProgress {
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }
}

impl ProgressSink for RecordedProgress {
    fn line(&mut self, message: &str) {
        self.lines.push(message.to_string());
    }
}
