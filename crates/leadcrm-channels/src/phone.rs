//! Phone number normalization for the WhatsApp transports.

use leadcrm_core::error::DeliveryError;

/// Shortest digit string a transport will accept, country code included.
pub const MIN_PHONE_DIGITS: usize = 10;

/// Strip everything but digits and prefix `country_code` when it is not
/// already there.
///
/// `"(11) 91234-5678"` with `"55"` becomes `"5511912345678"`.
pub fn normalize_phone(raw: &str, country_code: &str) -> Result<String, DeliveryError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(DeliveryError::InvalidRecipient(format!(
            "'{raw}' contains no digits"
        )));
    }

    let full = if digits.starts_with(country_code) {
        digits
    } else {
        format!("{country_code}{digits}")
    };

    if full.len() < MIN_PHONE_DIGITS {
        return Err(DeliveryError::InvalidRecipient(format!(
            "'{raw}' is too short to be a phone number"
        )));
    }
    Ok(full)
}
