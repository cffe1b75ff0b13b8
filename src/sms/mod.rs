//! SMS gateway abstraction and recipient normalization.

pub mod http;

pub use http::{HttpSmsGateway, SmsGatewayConfig};

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::GatewayError;

/// French mobile number in national form: 0, then 6 or 7, then eight digits.
static FRENCH_MOBILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^0[67][0-9]{8}$").expect("French mobile pattern is valid")
});

/// A session-based SMS gateway.
///
/// Sends happen between `login` and `logout`.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn login(&self) -> Result<(), GatewayError>;

    /// Send one SMS. `recipient` is in international form (`+33...`).
    async fn send_message(
        &self,
        recipient: &str,
        body: &str,
        options: &HashMap<String, String>,
    ) -> Result<(), GatewayError>;

    async fn logout(&self) -> Result<(), GatewayError>;
}

/// Normalize a raw recipient to international form.
///
/// Non-digits are stripped; the remaining digits must form a French mobile
/// number (`06XXXXXXXX` or `07XXXXXXXX`). Returns `None` otherwise.
pub fn normalize_recipient(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if !FRENCH_MOBILE.is_match(&digits) {
        return None;
    }
    Some(format!("+33{}", &digits[1..]))
}
