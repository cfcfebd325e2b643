// Human readable duration parsing for `client_secret_expiry`
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// Longest client secret lifetime Apple accepts (6 months)
pub const MAX_CLIENT_SECRET_LIFETIME: Duration = Duration::from_secs(15_777_000);

static DURATION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(\d+)\s*([a-z]*)\s*$").unwrap());

/// Parse strings such as `"6 months"`, `"5 minutes"`, `"1d"` or `"3600"`
///
/// A bare number is read as seconds. Months count as 30 days, except that
/// six months maps exactly onto Apple's documented maximum.
///
/// # Errors
///
/// Returns an error if the number or unit is not recognised
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let captures = DURATION_PATTERN
        .captures(input)
        .ok_or_else(|| format!("Invalid duration '{input}'"))?;

    let amount: u64 = captures[1]
        .parse()
        .map_err(|_| format!("Invalid duration amount in '{input}'"))?;

    let unit_seconds: u64 = match captures[2].to_ascii_lowercase().as_str() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600,
        "d" | "day" | "days" => 86_400,
        "w" | "week" | "weeks" => 604_800,
        "mo" | "month" | "months" => {
            if amount == 6 {
                return Ok(MAX_CLIENT_SECRET_LIFETIME);
            }
            2_592_000
        }
        unit => return Err(format!("Unknown duration unit '{unit}' in '{input}'")),
    };

    amount
        .checked_mul(unit_seconds)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Duration '{input}' is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration("300").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("5 minutes").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("2 Days").unwrap(), Duration::from_secs(172_800));
        assert_eq!(parse_duration("1 week").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_duration("1 month").unwrap(), Duration::from_secs(2_592_000));
    }

    #[test]
    fn test_six_months_is_apple_maximum() {
        assert_eq!(parse_duration("6 months").unwrap(), MAX_CLIENT_SECRET_LIFETIME);
    }

    #[test]
    fn test_invalid_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("5 fortnights").is_err());
        assert!(parse_duration("-5 minutes").is_err());
    }
}
