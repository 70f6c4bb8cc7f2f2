//! FormGuard CLI
//!
//! Command-line host for the formguard core library:
//! - Sanitize and validate field values
//! - Generate CSRF tokens and environment fingerprints
//! - Run rate-limited submissions against a stub endpoint
//! - Manage analytics consent and the config file

pub mod cli;
pub mod output;

pub use cli::Cli;
pub use output::{OutputFormat, OutputFormatter};

/// Exit codes for CLI operations
///
/// - 0: Success
/// - 1: General error
/// - 5: Invalid input (a value failed validation or bad arguments)
/// - 8: Rate limited (a submission was throttled)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    InvalidInput = 5,
    RateLimited = 8,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::InvalidInput => "INVALID_INPUT",
            ExitCode::RateLimited => "RATE_LIMITED",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ExitCode::Success => "Operation completed successfully",
            ExitCode::GeneralError => "An unspecified error occurred",
            ExitCode::InvalidInput => "Invalid arguments or data provided",
            ExitCode::RateLimited => "Too many requests in the current window",
        }
    }
}
