//! Number formatting for outbound notifications.

/// Scales a raw token amount to a human amount.
///
/// The decimal scale is inferred from the number of digits in the raw value
/// instead of the mint decimals: more than 10 digits is read as 9 decimals,
/// exactly 10 as 8, anything shorter as 6.
pub fn scale_token_amount(raw: u64) -> f64 {
    let divisor = match raw.to_string().len() {
        digits if digits > 10 => 1e9,
        10 => 1e8,
        _ => 1e6,
    };
    raw as f64 / divisor
}

/// Formats a raw token amount with two fraction digits and grouped thousands.
pub fn format_token_amount(raw: u64) -> String {
    group_thousands(&format!("{:.2}", round_cents(scale_token_amount(raw))))
}

/// Formats a value compactly: `2.50M`, `1.50K`, `42.00`.
pub fn format_price(value: f64) -> String {
    if value >= 1_000_000.0 {
        format!("{:.2}M", round_cents(value / 1_000_000.0))
    } else if value >= 1_000.0 {
        format!("{:.2}K", round_cents(value / 1_000.0))
    } else {
        format!("{:.2}", round_cents(value))
    }
}

/// Rounds to two fraction digits, ties away from zero. `{:.2}` alone rounds
/// exact ties such as `1.125` to even.
fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Formats a token price with 8 fraction digits, collapsing a leading run of
/// zeros into a count: `0.00001234` becomes `0.{4}1234`.
pub fn format_token_price(price: f64) -> String {
    let fixed = format!("{price:.8}");
    let Some(fraction) = fixed.strip_prefix("0.") else {
        return fixed;
    };

    let mut zeros = fraction.bytes().take_while(|&b| b == b'0').count();
    if zeros == 0 {
        return fixed;
    }
    // at least one digit has to follow the collapsed run
    if zeros == fraction.len() {
        zeros -= 1;
    }

    format!("0.{{{zeros}}}{}", &fraction[zeros..])
}

fn group_thousands(number: &str) -> String {
    let (sign, unsigned) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(number.len() + integer.len() / 3);
    grouped.push_str(sign);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if let Some(fraction) = fraction {
        grouped.push('.');
        grouped.push_str(fraction);
    }
    grouped
}
