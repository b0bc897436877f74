use std::time::Duration;

use super::Result;

/// Parse a compound duration string such as `90s`, `5m` or `1h30m15s`.
///
/// A bare number is taken as seconds.
pub fn parse(raw: &str) -> Result<Duration> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("duration must not be empty");
    }
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in trimmed.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            bail!("invalid duration '{}'", raw);
        }
        let n: u64 = digits.parse()?;
        digits.clear();
        let unit: u64 = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            _ => bail!("invalid duration unit '{}' in '{}'", c, raw),
        };
        total = crate::math::mul_exact_u64(n, unit)
            .and_then(|part| crate::math::add_exact_u64(total, part))?;
    }
    if !digits.is_empty() {
        bail!("trailing number without unit in '{}'", raw);
    }
    Ok(Duration::from_secs(total))
}

/// Render a duration in the compound form accepted by `parse`.
pub fn format(d: Duration) -> String {
    let mut secs = d.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit, label) in &[(86_400, "d"), (3600, "h"), (60, "m"), (1, "s")] {
        let count = secs / unit;
        if count > 0 {
            out.push_str(&format!("{}{}", count, label));
            secs -= count * unit;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units_and_compounds() {
        assert_eq!(parse("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse("1h30m15s").unwrap(), Duration::from_secs(5415));
        assert_eq!(parse("120").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("").is_err());
        assert!(parse("h1").is_err());
        assert!(parse("5x").is_err());
        assert!(parse("5m3").is_err());
    }

    #[test]
    fn formats_back() {
        assert_eq!(format(Duration::from_secs(5415)), "1h30m15s");
        assert_eq!(format(Duration::from_secs(0)), "0s");
        assert_eq!(format(Duration::from_secs(60)), "1m");
    }
}
