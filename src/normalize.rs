use crate::models::CostValue;

/// Normalize a possibly missing wire cost. Never fails: anything unparseable is `0.0`.
pub fn normalize_number(value: Option<&CostValue>) -> f64 {
    match value {
        None => 0.0,
        Some(CostValue::Number(n)) if n.is_finite() => *n,
        Some(CostValue::Number(_)) => 0.0,
        Some(CostValue::Text(s)) => normalize_text(s),
    }
}

pub fn normalize_text(raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return 0.0;
    }

    let signed = if trimmed.len() >= 2 && trimmed.starts_with('(') && trimmed.ends_with(')') {
        format!("-{}", &trimmed[1..trimmed.len() - 1])
    } else {
        trimmed.to_string()
    };

    let cleaned: String = signed
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();
    let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);

    parse_float_prefix(cleaned)
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}

/// Parses the longest leading decimal literal, ignoring trailing garbage ("12.5USD" -> 12.5).
fn parse_float_prefix(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'-') | Some(b'+')) {
        end += 1;
    }

    let int_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut digits = end - int_start;

    if bytes.get(end) == Some(&b'.') {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while bytes.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        end = frac_end;
    }

    if digits == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e') | Some(b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'-') | Some(b'+')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().ok()
}

pub fn format_currency(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    let negative = rounded < 0.0;
    let fixed = format!("{:.2}", rounded.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if negative {
        format!("-${grouped}.{cents}")
    } else {
        format!("${grouped}.{cents}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> f64 {
        normalize_number(Some(&CostValue::Text(s.to_string())))
    }

    #[test]
    fn normalizes_currency_formatted_strings() {
        assert_eq!(text("$1,234.50"), 1234.50);
        assert_eq!(text(" 42 "), 42.0);
        assert_eq!(text("+7.25"), 7.25);
        assert_eq!(text("$ 1 000"), 1000.0);
    }

    #[test]
    fn parenthesis_means_negative() {
        assert_eq!(text("(100)"), -100.0);
        assert_eq!(text("($1,234.50)"), -1234.50);
    }

    #[test]
    fn empty_nan_and_missing_are_zero() {
        assert_eq!(text("NaN"), 0.0);
        assert_eq!(text("nan"), 0.0);
        assert_eq!(text(""), 0.0);
        assert_eq!(text("   "), 0.0);
        assert_eq!(normalize_number(None), 0.0);
        assert_eq!(normalize_number(Some(&CostValue::Number(f64::NAN))), 0.0);
    }

    #[test]
    fn garbage_never_panics() {
        assert_eq!(text("abc"), 0.0);
        assert_eq!(text("--5"), 0.0);
        assert_eq!(text("()"), 0.0);
        assert_eq!(text("."), 0.0);
        assert_eq!(text("12.5USD"), 12.5);
        assert_eq!(text("1e3"), 1000.0);
        assert_eq!(text("2e"), 2.0);
    }

    #[test]
    fn numbers_pass_through() {
        assert_eq!(normalize_number(Some(&CostValue::Number(-3.5))), -3.5);
    }

    #[test]
    fn formats_us_currency() {
        assert_eq!(format_currency(0.0), "$0.00");
        assert_eq!(format_currency(1234.5), "$1,234.50");
        assert_eq!(format_currency(1_000_000.0), "$1,000,000.00");
        assert_eq!(format_currency(-25.0), "-$25.00");
        assert_eq!(format_currency(999.999), "$1,000.00");
    }
}
