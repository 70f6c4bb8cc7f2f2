//! Output formatting for CLI results
//!
//! Three formats are supported:
//! - Table: human-readable tables (default)
//! - JSON: structured JSON for scripting
//! - Quiet: no output, exit codes only

use std::str::FromStr;

use comfy_table::{presets::UTF8_FULL, Table};
use formguard_core::monitor::SecurityStats;
use formguard_core::{ConsentState, SubmitResult};
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// JSON envelope shared by every command
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// ISO 8601 timestamp
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success_with_command(data: T, command: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: Some(command.to_string()),
        }
    }
}

impl JsonResponse<()> {
    pub fn error(message: &str) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: None,
        }
    }
}

/// Result of `formguard sanitize`
#[derive(Debug, Clone, Serialize)]
pub struct SanitizeOutput {
    pub input_chars: usize,
    pub output: String,
    pub injection_pattern: bool,
}

/// One row of `formguard validate`
#[derive(Debug, Clone, Serialize)]
pub struct ValidationRow {
    pub field: String,
    pub value: String,
    pub valid: bool,
}

/// Result of `formguard fingerprint`
#[derive(Debug, Clone, Serialize)]
pub struct FingerprintOutput {
    pub rate_limit: String,
    pub monitoring: String,
    pub environment: bool,
}

/// One attempt of `formguard submit`
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRow {
    pub attempt: u32,
    #[serde(flatten)]
    pub result: SubmitResult,
}

#[derive(Serialize)]
struct SubmitOutput<'a> {
    attempts: &'a [AttemptRow],
    stats: &'a SecurityStats,
}

#[derive(Serialize)]
struct ConsentOutput {
    state: ConsentState,
    banner_visible: bool,
}

#[derive(Serialize)]
struct ValueOutput<'a> {
    value: &'a str,
}

/// Formats output for the selected mode
pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_quiet(&self) -> bool {
        self.format == OutputFormat::Quiet
    }

    pub fn format_sanitized(&self, out: &SanitizeOutput) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut text = out.output.clone();
                if out.injection_pattern {
                    text.push_str("\n(input matched an injection pattern)");
                }
                text
            }
            OutputFormat::Json => self.to_json_response(out, "sanitize"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_validation(&self, rows: &[ValidationRow]) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Field", "Value", "Valid"]);
                for row in rows {
                    let value = truncate_display(&row.value, 40);
                    table.add_row(vec![
                        row.field.as_str(),
                        value.as_str(),
                        if row.valid { "yes" } else { "no" },
                    ]);
                }
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(&rows, "validate"),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Single value, e.g. a token.
    pub fn format_value(&self, value: &str, command: &str) -> String {
        match self.format {
            OutputFormat::Table => value.to_string(),
            OutputFormat::Json => self.to_json_response(&ValueOutput { value }, command),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_fingerprint(&self, out: &FingerprintOutput) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Profile", "Fingerprint"]);
                table.add_row(vec!["rate limit", out.rate_limit.as_str()]);
                table.add_row(vec!["monitoring", out.monitoring.as_str()]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(out, "fingerprint"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_submissions(&self, attempts: &[AttemptRow], stats: &SecurityStats) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut results = Table::new();
                results.load_preset(UTF8_FULL);
                results.set_header(vec!["Attempt", "Success", "Error"]);
                for row in attempts {
                    results.add_row(vec![
                        row.attempt.to_string(),
                        row.result.success.to_string(),
                        row.result.error.clone().unwrap_or_else(|| "-".into()),
                    ]);
                }
                format!("{results}\n{}", self.stats_table(stats))
            }
            OutputFormat::Json => {
                self.to_json_response(&SubmitOutput { attempts, stats }, "submit")
            }
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_consent(&self, state: ConsentState) -> String {
        match self.format {
            OutputFormat::Table => format!("Analytics consent: {state}"),
            OutputFormat::Json => self.to_json_response(
                &ConsentOutput {
                    state,
                    banner_visible: state == ConsentState::Undecided,
                },
                "consent",
            ),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Progress message (verbose table mode only)
    pub fn progress(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            eprintln!("... {message}");
        }
    }

    pub fn success(&self, message: &str) {
        if self.format == OutputFormat::Table {
            println!("✓ {message}");
        }
    }

    pub fn error(&self, message: &str) {
        match self.format {
            OutputFormat::Table => eprintln!("✗ {message}"),
            OutputFormat::Json => println!("{}", to_pretty_json(&JsonResponse::error(message))),
            OutputFormat::Quiet => {}
        }
    }

    fn stats_table(&self, stats: &SecurityStats) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Event type", "Count"]);
        for (event_type, count) in &stats.event_types {
            table.add_row(vec![event_type.to_string(), count.to_string()]);
        }
        table.add_row(vec!["total".to_string(), stats.total_events.to_string()]);
        table.to_string()
    }

    fn to_json_response<T: Serialize>(&self, value: &T, command: &str) -> String {
        to_pretty_json(&JsonResponse::success_with_command(value, command))
    }
}

fn to_pretty_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"success\":false,\"error\":\"serialization error: {e}\"}}"))
}

fn truncate_display(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use formguard_core::SubmitRejection;

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(OutputFormat::from_str("table").unwrap(), OutputFormat::Table);
        assert_eq!(OutputFormat::from_str("JSON").unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::from_str("quiet").unwrap(), OutputFormat::Quiet);
        assert!(OutputFormat::from_str("yaml").is_err());
    }

    #[test]
    fn test_output_format_display() {
        assert_eq!(OutputFormat::Table.to_string(), "table");
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }

    #[test]
    fn test_json_submissions() {
        let formatter = OutputFormatter::new(OutputFormat::Json, false);
        let attempts = vec![
            AttemptRow {
                attempt: 1,
                result: SubmitResult::ok(),
            },
            AttemptRow {
                attempt: 2,
                result: SubmitResult::rejected(SubmitRejection::RateLimited),
            },
        ];
        let stats = SecurityStats {
            total_events: 0,
            event_types: Default::default(),
            recent_events: Vec::new(),
        };

        let json: serde_json::Value =
            serde_json::from_str(&formatter.format_submissions(&attempts, &stats)).unwrap();
        assert_eq!(json["command"], "submit");
        assert_eq!(json["data"]["attempts"][0]["success"], true);
        assert_eq!(
            json["data"]["attempts"][1]["error"],
            "Too many requests. Please try again later."
        );
        assert_eq!(json["data"]["stats"]["totalEvents"], 0);
    }

    #[test]
    fn test_table_validation() {
        let formatter = OutputFormatter::new(OutputFormat::Table, false);
        let out = formatter.format_validation(&[ValidationRow {
            field: "email".into(),
            value: "user@example.com".into(),
            valid: true,
        }]);
        assert!(out.contains("email"));
        assert!(out.contains("yes"));
    }

    #[test]
    fn test_quiet_prints_nothing() {
        let formatter = OutputFormatter::new(OutputFormat::Quiet, true);
        assert!(formatter.is_quiet());
        assert!(formatter.format_value("abc", "token").is_empty());
        assert!(formatter.format_consent(ConsentState::Accepted).is_empty());
    }

    #[test]
    fn test_truncate_display() {
        assert_eq!(truncate_display("short", 10), "short");
        assert_eq!(truncate_display("abcdefghij", 5).chars().count(), 5);
    }
}
