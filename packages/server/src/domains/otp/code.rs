use std::time::Duration;

use rand::Rng;

pub const CODE_MIN: u32 = 100_000;
pub const CODE_MAX: u32 = 999_999;

pub const DEFAULT_MESSAGE_TEMPLATE: &str = "🔐 Your verification code: {code}\n\nThis code is valid for {minutes} minutes.\nDo not share this code with anyone.";

/// Six-digit code drawn uniformly from [100000, 999999]
pub fn generate_code() -> String {
    rand::thread_rng().gen_range(CODE_MIN..=CODE_MAX).to_string()
}

/// Fill `{code}` and `{minutes}` in a message template
pub fn render_message(template: &str, code: &str, ttl: Duration) -> String {
    let minutes = ttl.as_secs().div_ceil(60);
    template
        .replace("{code}", code)
        .replace("{minutes}", &minutes.to_string())
}

/// Normalize a phone number for the transport.
///
/// Keeps digits only. Numbers not already carrying `country_code` lose one
/// leading trunk `0` and get the code prefixed. Returns `None` when there
/// are no digits at all.
pub fn normalize_address(raw: &str, country_code: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    if digits.starts_with(country_code) {
        return Some(digits);
    }

    let local = digits.strip_prefix('0').unwrap_or(&digits);
    Some(format!("{}{}", country_code, local))
}
