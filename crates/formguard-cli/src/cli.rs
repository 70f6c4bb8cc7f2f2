//! CLI command definitions and argument parsing

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use formguard_core::analytics::TracingAnalyticsSink;
use formguard_core::consent::FileConsentStore;
use formguard_core::fingerprint::StaticSignals;
use formguard_core::monitor::JsonLinesReporter;
use formguard_core::sanitize::{contains_injection_pattern, sanitize_message};
use formguard_core::submit::StubSubmissionSink;
use formguard_core::{
    sanitize, spawn_cleanup, validate_email, validate_message, validate_name, Analytics,
    AnalyticsEvent, Consent, CsrfToken, FingerprintGenerator, FormData,
    FormGuardConfig, RateLimiter, SecureSubmitter, SecurityMonitor, SignalSnapshot,
    SubmitRejection,
};
use tracing::{debug, info};

use crate::output::{
    AttemptRow, FingerprintOutput, OutputFormat, OutputFormatter, SanitizeOutput, ValidationRow,
};
use crate::ExitCode;

/// FormGuard - contact form protection toolkit
#[derive(Parser, Debug)]
#[command(name = "formguard")]
#[command(version, about = "FormGuard - contact form protection toolkit")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: table, json, quiet
    #[arg(long, default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true, env = "FORMGUARD_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Execute the command with a resolved configuration
    pub async fn execute_with_config(self, config: FormGuardConfig) -> anyhow::Result<ExitCode> {
        let formatter = OutputFormatter::new(self.output, self.verbose);
        match self.command {
            Commands::Sanitize(args) => args.execute(&formatter),
            Commands::Validate(args) => args.execute(&formatter),
            Commands::Token => {
                let token = CsrfToken::generate()?;
                println!("{}", formatter.format_value(token.as_str(), "token"));
                Ok(ExitCode::Success)
            }
            Commands::Fingerprint(args) => args.execute(&formatter),
            Commands::Submit(args) => args.execute(&formatter, &config).await,
            Commands::Consent(args) => args.execute(&formatter, &config),
            Commands::Config(args) => args.execute(&formatter, &config, self.config),
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sanitize a value the way form fields are sanitized
    Sanitize(SanitizeArgs),
    /// Validate contact form values
    Validate(ValidateArgs),
    /// Generate a CSRF token
    Token,
    /// Compute client fingerprints from environment signals
    Fingerprint(FingerprintArgs),
    /// Run rate-limited submissions against a stub endpoint
    Submit(SubmitArgs),
    /// Show or record the analytics consent choice
    Consent(ConsentArgs),
    /// Manage the config file
    Config(ConfigArgs),
}

/// Arguments for the sanitize command
#[derive(Parser, Debug)]
pub struct SanitizeArgs {
    /// Text to sanitize
    pub text: String,

    /// Apply the longer message limit
    #[arg(long)]
    pub message: bool,
}

impl SanitizeArgs {
    pub fn execute(self, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let output = if self.message {
            sanitize_message(&self.text)
        } else {
            sanitize(&self.text)
        };
        let out = SanitizeOutput {
            input_chars: self.text.chars().count(),
            output,
            injection_pattern: contains_injection_pattern(&self.text),
        };
        println!("{}", formatter.format_sanitized(&out));
        Ok(ExitCode::Success)
    }
}

/// Arguments for the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    #[arg(long)]
    pub email: Option<String>,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub message: Option<String>,
}

impl ValidateArgs {
    pub fn execute(self, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let checks: [(&str, Option<String>, fn(&str) -> bool); 3] = [
            ("email", self.email, validate_email),
            ("name", self.name, validate_name),
            ("message", self.message, validate_message),
        ];
        let rows: Vec<ValidationRow> = checks
            .into_iter()
            .filter_map(|(field, value, check)| {
                value.map(|value| ValidationRow {
                    field: field.to_string(),
                    valid: check(&value),
                    value,
                })
            })
            .collect();

        if rows.is_empty() {
            formatter.error("Nothing to validate: pass --email, --name or --message");
            return Ok(ExitCode::InvalidInput);
        }

        println!("{}", formatter.format_validation(&rows));
        if rows.iter().all(|row| row.valid) {
            Ok(ExitCode::Success)
        } else {
            Ok(ExitCode::InvalidInput)
        }
    }
}

/// Arguments for the fingerprint command
#[derive(Parser, Debug)]
pub struct FingerprintArgs {
    /// User agent string; omit to fingerprint a host without a client environment
    #[arg(long)]
    pub user_agent: Option<String>,

    #[arg(long, default_value = "en-US")]
    pub language: String,

    /// Screen size as WIDTHxHEIGHT
    #[arg(long, default_value = "1920x1080", value_parser = parse_screen)]
    pub screen: (u32, u32),

    /// Minutes behind UTC (UTC+1 is -60)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub tz_offset: i32,

    /// Canvas digest reported by the client
    #[arg(long, default_value = "")]
    pub canvas: String,
}

impl FingerprintArgs {
    pub fn execute(self, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let environment = self.user_agent.is_some();
        let generator = self.generator();
        let out = FingerprintOutput {
            rate_limit: generator.client_fingerprint(),
            monitoring: generator.monitoring_fingerprint(),
            environment,
        };
        println!("{}", formatter.format_fingerprint(&out));
        Ok(ExitCode::Success)
    }

    fn generator(&self) -> FingerprintGenerator {
        match &self.user_agent {
            Some(user_agent) => {
                let (screen_width, screen_height) = self.screen;
                FingerprintGenerator::new(Arc::new(StaticSignals(SignalSnapshot {
                    user_agent: user_agent.clone(),
                    language: self.language.clone(),
                    screen_width,
                    screen_height,
                    timezone_offset_minutes: self.tz_offset,
                    canvas_digest: self.canvas.clone(),
                })))
            }
            None => FingerprintGenerator::without_environment(),
        }
    }
}

/// Arguments for the submit command
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Form field as KEY=VALUE (repeatable)
    #[arg(long = "field", value_parser = parse_field, required = true)]
    pub fields: Vec<(String, String)>,

    /// Endpoint recorded with each delivery
    #[arg(long, default_value = "/api/contact")]
    pub endpoint: String,

    /// Submit the same form this many times in a row
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub repeat: u32,
}

impl SubmitArgs {
    pub async fn execute(
        self,
        formatter: &OutputFormatter,
        config: &FormGuardConfig,
    ) -> anyhow::Result<ExitCode> {
        let fingerprints = FingerprintGenerator::without_environment();
        let mut monitor = SecurityMonitor::new(config.to_monitor_config())
            .with_fingerprint(fingerprints.monitoring_fingerprint());
        if let Some(path) = config.report_path() {
            formatter.progress(&format!("Reporting events to {}", path.display()));
            monitor = monitor.with_reporter(Arc::new(JsonLinesReporter::new(path)));
        }
        let monitor = Arc::new(monitor);
        let cleanup = spawn_cleanup(monitor.clone(), config.cleanup_interval());

        let limiter = Arc::new(
            RateLimiter::new(config.to_rate_limit_config()).with_monitor(monitor.clone()),
        );
        let token = CsrfToken::generate()?;
        let sink = Arc::new(StubSubmissionSink::expecting(token.clone()));
        let submitter =
            SecureSubmitter::new(limiter, fingerprints, sink).with_monitor(monitor.clone());

        let analytics = open_consent(config)
            .map(|consent| Analytics::new(Arc::new(consent), TracingAnalyticsSink));

        let form: FormData = self.fields.into_iter().collect();
        let mut attempts = Vec::with_capacity(self.repeat as usize);
        for attempt in 1..=self.repeat {
            formatter.progress(&format!("Submitting attempt {attempt}"));
            let result = submitter.submit(&form, &self.endpoint, Some(&token)).await;
            if result.success {
                if let Some(analytics) = &analytics {
                    analytics.record(&AnalyticsEvent::FormSubmission {
                        form: self.endpoint.clone(),
                    });
                }
            }
            attempts.push(AttemptRow { attempt, result });
        }
        cleanup.abort();

        let stats = monitor.stats();
        info!(
            attempts = attempts.len(),
            events = stats.total_events,
            "Submission run finished"
        );
        println!("{}", formatter.format_submissions(&attempts, &stats));

        let code = match attempts.last().and_then(|row| row.result.rejection) {
            None => ExitCode::Success,
            Some(SubmitRejection::RateLimited) => ExitCode::RateLimited,
            Some(SubmitRejection::Internal) => ExitCode::GeneralError,
            Some(_) => ExitCode::InvalidInput,
        };
        Ok(code)
    }
}

/// Arguments for the consent command
#[derive(Parser, Debug)]
pub struct ConsentArgs {
    #[command(subcommand)]
    pub action: ConsentAction,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum ConsentAction {
    /// Show the stored choice
    Show,
    /// Allow analytics
    Accept,
    /// Refuse analytics
    Decline,
}

impl ConsentArgs {
    pub fn execute(
        self,
        formatter: &OutputFormatter,
        config: &FormGuardConfig,
    ) -> anyhow::Result<ExitCode> {
        let consent = open_consent(config)
            .context("No consent location: set consent.path in the config file")?;
        match self.action {
            ConsentAction::Show => {}
            ConsentAction::Accept => consent.accept()?,
            ConsentAction::Decline => consent.decline()?,
        }
        println!("{}", formatter.format_consent(consent.state()));
        Ok(ExitCode::Success)
    }
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum ConfigAction {
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

impl ConfigArgs {
    pub fn execute(
        self,
        formatter: &OutputFormatter,
        config: &FormGuardConfig,
        path: Option<PathBuf>,
    ) -> anyhow::Result<ExitCode> {
        match self.action {
            ConfigAction::Init { force } => {
                let path = path
                    .or_else(FormGuardConfig::default_path)
                    .context("No config directory available; pass --config")?;
                if path.exists() && !force {
                    formatter.error(&format!(
                        "{} already exists (use --force to overwrite)",
                        path.display()
                    ));
                    return Ok(ExitCode::InvalidInput);
                }
                FormGuardConfig::default().save(&path)?;
                formatter.success(&format!("Wrote {}", path.display()));
                Ok(ExitCode::Success)
            }
            ConfigAction::Show => {
                match formatter.format() {
                    OutputFormat::Table => print!("{}", config.to_toml()?),
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
                    OutputFormat::Quiet => {}
                }
                Ok(ExitCode::Success)
            }
        }
    }
}

fn open_consent(config: &FormGuardConfig) -> Option<Consent> {
    let store = match config.consent_path() {
        Some(path) => FileConsentStore::new(path),
        None => FileConsentStore::at_default_location()?,
    };
    debug!(path = %store.path().display(), "Opening consent store");
    Some(Consent::load(Box::new(store)))
}

/// Parse `WIDTHxHEIGHT`.
fn parse_screen(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let width = width
        .trim()
        .parse()
        .map_err(|e| format!("invalid width '{width}': {e}"))?;
    let height = height
        .trim()
        .parse()
        .map_err(|e| format!("invalid height '{height}': {e}"))?;
    Ok((width, height))
}

/// Parse `KEY=VALUE`. The value may itself contain `=`.
fn parse_field(value: &str) -> Result<(String, String), String> {
    let (key, field_value) = value
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{value}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("field name must not be empty".to_string());
    }
    Ok((key.to_string(), field_value.to_string()))
}
