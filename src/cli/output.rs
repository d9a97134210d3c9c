//! Colored output helpers for CLI
//!
//! Provides consistent, colored terminal output for the OpenRAG CLI.

use owo_colors::OwoColorize;

const COLUMN_WIDTH: usize = 18;

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    /// Create a new output helper with colors enabled
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Create a new output helper with colors disabled
    pub fn no_color() -> Self {
        Self { colored: false }
    }

    /// Print the OpenRAG banner
    pub fn banner(&self) {
        if self.colored {
            println!(
                "\n   {}{} {}\n",
                "Open".bright_cyan().bold(),
                "RAG".blue().bold(),
                format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
            );
        } else {
            println!("\n   OpenRAG v{}\n", env!("CARGO_PKG_VERSION"));
        }
    }

    /// Print a success message with a checkmark
    pub fn success(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "✓".green().bold(), message.green());
        } else {
            println!("  [OK] {}", message);
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "•".blue(), message);
        } else {
            println!("  [INFO] {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            println!("  [WARN] {}", message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    /// Print a step message (for multi-step operations)
    pub fn step(&self, step_num: u32, total: u32, message: &str) {
        if self.colored {
            println!(
                "  {} {}",
                format!("[{}/{}]", step_num, total).dimmed(),
                message.bright_white()
            );
        } else {
            println!("  [{}/{}] {}", step_num, total, message);
        }
    }

    /// Print a file creation message
    pub fn created(&self, file_type: &str, path: &str) {
        if self.colored {
            println!(
                "  {} {} {}",
                "✓".green().bold(),
                file_type.dimmed(),
                path.bright_white()
            );
        } else {
            println!("  [CREATED] {} {}", file_type, path);
        }
    }

    /// Print a file skipped message
    pub fn skipped(&self, path: &str, reason: &str) {
        if self.colored {
            println!(
                "  {} {} {}",
                "○".yellow(),
                path.dimmed(),
                format!("({})", reason).yellow()
            );
        } else {
            println!("  [SKIPPED] {} ({})", path, reason);
        }
    }

    /// Print a directory creation message
    pub fn created_dir(&self, path: &str) {
        self.created("directory", path);
    }

    /// Print a header for a section
    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.bright_white().bold().underline());
        } else {
            println!("\n  === {} ===", title);
        }
    }

    /// Print a subheader
    pub fn subheader(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.cyan().bold());
        } else {
            println!("\n  --- {} ---", title);
        }
    }

    /// Print a key-value pair
    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("    {}: {}", key.dimmed(), value.bright_white());
        } else {
            println!("    {}: {}", key, value);
        }
    }

    /// Print a retrieved passage with its source
    pub fn passage(&self, number: usize, source: &str, text: &str) {
        if self.colored {
            println!(
                "\n    {} {}",
                format!("[{}]", number).bright_cyan().bold(),
                source.dimmed()
            );
        } else {
            println!("\n    [{}] {}", number, source);
        }
        for line in text.lines() {
            println!("      {}", line);
        }
    }

    /// Print a hint/tip message
    pub fn hint(&self, message: &str) {
        if self.colored {
            println!("\n  {}", message.dimmed().italic());
        } else {
            println!("\n  [TIP] {}", message);
        }
    }

    /// Print a command suggestion
    pub fn command(&self, cmd: &str) {
        if self.colored {
            println!("     {}", format!("$ {}", cmd).bright_cyan());
        } else {
            println!("     $ {}", cmd);
        }
    }

    /// Print completion message
    pub fn complete(&self, message: &str) {
        if self.colored {
            println!("\n  {}", message.bright_green().bold());
        } else {
            println!("\n  [DONE] {}", message);
        }
    }

    /// Print a table header row
    pub fn table_header(&self, columns: &[&str]) {
        let header = format_row(columns);
        let rule_len = columns.len() * (COLUMN_WIDTH + 1);
        if self.colored {
            println!("    {}", header.bright_white().bold());
            println!("    {}", "─".repeat(rule_len).dimmed());
        } else {
            println!("    {}", header);
            println!("    {}", "-".repeat(rule_len));
        }
    }

    /// Print a table row
    pub fn table_row(&self, values: &[&str]) {
        println!("    {}", format_row(values));
    }

    /// Print newline
    pub fn newline(&self) {
        println!();
    }
}

fn format_row(values: &[&str]) -> String {
    values
        .iter()
        .map(|v| format!("{:<width$}", v, width = COLUMN_WIDTH))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_new() {
        let output = Output::new();
        assert!(output.colored);
    }

    #[test]
    fn test_output_no_color() {
        let output = Output::no_color();
        assert!(!output.colored);
    }

    #[test]
    fn test_format_row_pads_columns() {
        let row = format_row(&["report", "42"]);
        assert!(row.starts_with("report "));
        assert_eq!(row.len(), COLUMN_WIDTH * 2 + 1);
        assert_eq!(format_row(&[]), "");
    }

    #[test]
    fn test_output_methods_no_panic() {
        let output = Output::no_color();

        output.banner();
        output.success("test success");
        output.info("test info");
        output.warning("test warning");
        output.error("test error");
        output.step(1, 4, "step message");
        output.created("file", "path/to/file");
        output.skipped("path", "reason");
        output.created_dir("some/dir");
        output.header("Test Header");
        output.subheader("Test Subheader");
        output.kv("key", "value");
        output.passage(1, "report (page 2)", "line one\nline two");
        output.hint("hint message");
        output.command("some command");
        output.complete("complete message");
        output.table_header(&["File", "Chunks"]);
        output.table_row(&["report", "12"]);
        output.newline();
    }

    #[test]
    fn test_output_methods_colored_no_panic() {
        let output = Output::new();

        output.banner();
        output.success("test success");
        output.warning("test warning");
        output.error("test error");
        output.passage(2, "report (page 1)", "text");
        output.table_header(&["File"]);
    }
}
