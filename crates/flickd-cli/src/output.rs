//! Output formatting for flickd (table, json, csv)

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg);
        }
    }

    /// Print a warning message
    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Print a single item in the configured format
    pub fn print_one<T: Tabled + Serialize>(&self, data: &T) {
        match self.format {
            OutputFormat::Table => {
                let table = Table::new([data]).to_string();
                println!("{}", table);
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputFormat::Csv => print_csv(data),
        }
    }
}

/// Print one item as a CSV header line and a value line
fn print_csv<T: Serialize>(data: &T) {
    if let Ok(serde_json::Value::Object(row)) = serde_json::to_value(data) {
        let headers: Vec<&str> = row.keys().map(|s| s.as_str()).collect();
        println!("{}", headers.join(","));
        let values: Vec<String> = row
            .values()
            .map(|v| match v {
                serde_json::Value::String(s) => escape_csv(s),
                other => escape_csv(&other.to_string()),
            })
            .collect();
        println!("{}", values.join(","));
    }
}

/// Escape a value for CSV output
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// =============================================================================
// Display types for various commands
// =============================================================================

/// Token display for login and authorize
#[derive(Debug, Tabled, Serialize)]
pub struct TokenRow {
    #[tabled(rename = "Token")]
    pub token: String,
    #[tabled(rename = "Obtained")]
    pub obtained_at: String,
}

impl From<&flickd_client::Token> for TokenRow {
    fn from(token: &flickd_client::Token) -> Self {
        Self {
            token: token.value().to_string(),
            obtained_at: token.obtained_at().to_rfc3339(),
        }
    }
}

/// Verification display
#[derive(Debug, Tabled, Serialize)]
pub struct VerifyRow {
    #[tabled(rename = "Status")]
    pub status: String,
}

/// Upload result display
#[derive(Debug, Tabled, Serialize)]
pub struct UploadRow {
    #[tabled(rename = "Media ID")]
    pub media_id: String,
    #[tabled(rename = "File")]
    pub file: String,
    #[tabled(rename = "Bytes")]
    pub bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
