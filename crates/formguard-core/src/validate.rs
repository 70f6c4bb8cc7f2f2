//! Format checks for contact-form fields.
//!
//! Every validator sanitizes its input first, so markup never counts toward
//! a field being valid.

use lazy_static::lazy_static;
use regex::Regex;

use crate::sanitize::{clean, sanitize, MAX_MESSAGE_LEN};

/// Longest accepted email address.
pub const MAX_EMAIL_LEN: usize = 254;

/// Shortest accepted message, in characters. The upper bound is the
/// sanitizer's message limit.
pub const MIN_MESSAGE_LEN: usize = 10;

lazy_static! {
    static ref EMAIL: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();

    /// Latin, Latin-1 Supplement, Latin Extended-A and Arabic letters plus spaces.
    static ref NAME: Regex =
        Regex::new(r"^[a-zA-Z\s\x{00C0}-\x{017F}\x{0600}-\x{06FF}]{2,50}$").unwrap();
}

/// `local@domain.tld` shape, no whitespace, at most 254 characters.
pub fn validate_email(input: &str) -> bool {
    let email = sanitize(input);
    EMAIL.is_match(&email) && email.chars().count() <= MAX_EMAIL_LEN
}

/// 2 to 50 letters (Latin or Arabic script) and spaces.
pub fn validate_name(input: &str) -> bool {
    let name = sanitize(input);
    NAME.is_match(&name)
}

/// Between 10 and 2000 characters after sanitization.
pub fn validate_message(input: &str) -> bool {
    let message = clean(input);
    (MIN_MESSAGE_LEN..=MAX_MESSAGE_LEN).contains(&message.chars().count())
}
