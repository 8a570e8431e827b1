use thiserror::Error;

/// Money is held as integer minor units to avoid floating-point drift.
/// For USD, 1 unit = 100 cents, so $50.00 = 5000 cents.
pub type Cents = i64;

/// Format cents as a decimal string.
/// Example: 5000 -> "50.00", -1234 -> "-12.34"
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("amount must not carry a sign")]
    Signed,

    #[error("amount has more than two decimal places")]
    TooPrecise,

    #[error("amount is not a decimal number")]
    InvalidFormat,

    #[error("amount is too large")]
    Overflow,
}

/// Parse an unsigned decimal string into cents.
/// Example: "50.00" -> 5000, "12.5" -> 1250, "100" -> 10000, ".05" -> 5
///
/// Sub-cent precision is rejected rather than truncated.
pub fn parse_amount(input: &str) -> Result<Cents, AmountError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AmountError::Empty);
    }
    if input.starts_with(['-', '+']) {
        return Err(AmountError::Signed);
    }

    let (units_str, fraction_str) = match input.split_once('.') {
        Some((units, fraction)) => (units, fraction),
        None => (input, ""),
    };

    if units_str.is_empty() && fraction_str.is_empty() {
        return Err(AmountError::InvalidFormat);
    }
    if !units_str.bytes().all(|b| b.is_ascii_digit())
        || !fraction_str.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(AmountError::InvalidFormat);
    }
    if fraction_str.len() > 2 {
        return Err(AmountError::TooPrecise);
    }

    let units: Cents = if units_str.is_empty() {
        0
    } else {
        units_str.parse().map_err(|_| AmountError::Overflow)?
    };
    let fraction: Cents = match fraction_str.len() {
        0 => 0,
        1 => fraction_str.parse::<Cents>().map_err(|_| AmountError::InvalidFormat)? * 10,
        _ => fraction_str.parse().map_err(|_| AmountError::InvalidFormat)?,
    };

    units
        .checked_mul(100)
        .and_then(|c| c.checked_add(fraction))
        .ok_or(AmountError::Overflow)
}
