//! Terminal output for diskmanager commands
//!
//! Everything the commands print goes through [`Output`] so `--quiet` is
//! honoured in one place. Log records go through tracing instead.

use console::style;

/// Output handler for consistent CLI formatting
pub struct Output {
    quiet: bool,
}

impl Output {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", style("✔").green(), message);
        }
    }

    /// Print an error message, even in quiet mode
    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✖").red(), message);
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", style("ℹ").blue(), message);
        }
    }

    /// Print a key-value pair with consistent styling
    pub fn key_value(&self, key: &str, value: &str, highlight: bool) {
        if !self.quiet {
            let styled_value = if highlight {
                style(value).green().bold()
            } else {
                style(value).white()
            };
            println!("  {:<20} {}", style(key).dim(), styled_value);
        }
    }

    pub fn list_item(&self, item: &str) {
        if !self.quiet {
            println!("    {} {}", style("•").cyan(), item);
        }
    }

    /// Print machine-readable output; never suppressed
    pub fn raw(&self, text: &str) {
        println!("{text}");
    }
}
