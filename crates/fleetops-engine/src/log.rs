//! Per-resource console output
//!
//! Lines are prefixed with the resource name and coloured by the resource's
//! index so that interleaved output of parallel operations stays readable.

use colored::{Color, Colorize};

const PALETTE: [Color; 6] = [
    Color::Cyan,
    Color::Green,
    Color::Yellow,
    Color::Magenta,
    Color::Blue,
    Color::Red,
];

#[derive(Debug, Clone)]
pub struct ResourceLog {
    name: String,
    index: Option<i64>,
    width: usize,
}

impl ResourceLog {
    pub fn new(name: impl Into<String>, index: Option<i64>) -> Self {
        let name = name.into();
        let width = name.len();
        Self { name, index, width }
    }

    /// Pad prefixes to `width` so parallel output lines up
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width.max(self.name.len());
        self
    }

    fn color(&self) -> Color {
        match self.index {
            Some(index) => PALETTE[index.rem_euclid(PALETTE.len() as i64) as usize],
            None => Color::White,
        }
    }

    pub fn prefix(&self) -> String {
        format!("{:<width$}> ", self.name, width = self.width)
    }

    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!(resource = %self.name, "{}", message);
        eprintln!("{}{}", self.prefix().color(self.color()), message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::warn!(resource = %self.name, "{}", message);
        eprintln!(
            "{}{} {}",
            self.prefix().color(self.color()),
            "warning:".yellow().bold(),
            message
        );
    }

    pub fn success(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!(resource = %self.name, "{}", message);
        eprintln!("{}{}", self.prefix().color(self.color()), message.green());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::error!(resource = %self.name, "{}", message);
        eprintln!("{}{}", self.prefix().color(self.color()), message.red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_is_stable_per_index() {
        let a = ResourceLog::new("web", Some(1));
        let b = ResourceLog::new("db", Some(1 + PALETTE.len() as i64));
        assert_eq!(a.color(), b.color());
        assert_ne!(a.color(), ResourceLog::new("key", Some(2)).color());
    }

    #[test]
    fn test_prefix_padding() {
        let log = ResourceLog::new("db", None).with_width(5);
        assert_eq!(log.prefix(), "db   > ");
    }
}
