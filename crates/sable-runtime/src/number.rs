//! JS-compatible number formatting and parsing.
//!
//! `Number::toString` (ECMA-262 §6.1.6.1.20): decimal notation for
//! magnitudes in `[1e-6, 1e21)`, exponential outside, shortest round-trip
//! digits throughout. `ryu` supplies the shortest digits; the layout rules
//! are applied here.

/// Convert a number to its JS string form
pub fn to_js_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    // Fast path: small integers
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }

    let mut buf = ryu::Buffer::new();
    let shortest = buf.format(n);
    layout_digits(shortest)
}

/// Re-layout ryu's shortest representation per the JS rules.
///
/// With `s` = the significant digits (no zeros at either end), `k` =
/// digit count and `n` such that the value is `s * 10^(n-k)`:
///   - `k <= n <= 21`   → digits followed by `n-k` zeros
///   - `0 < n <= 21`    → digits with a point after position `n`
///   - `-6 < n <= 0`    → `0.` then `-n` zeros then digits
///   - otherwise        → exponential `d.ddd e± (n-1)`
fn layout_digits(shortest: &str) -> String {
    let negative = shortest.starts_with('-');
    let body = if negative { &shortest[1..] } else { shortest };

    let (mantissa, exp10) = match body.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (body, 0),
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };

    let mut digits: String = format!("{int_part}{frac_part}");
    let mut pow = exp10 - frac_part.len() as i32;

    // Strip leading zeros (do not shift the exponent) and trailing zeros
    // (each shifts the exponent up by one).
    let leading = digits.len() - digits.trim_start_matches('0').len();
    digits.drain(..leading);
    while digits.ends_with('0') {
        digits.pop();
        pow += 1;
    }
    if digits.is_empty() {
        return "0".to_string();
    }

    let k = digits.len() as i32;
    let n = k + pow;
    let sign = if negative { "-" } else { "" };

    if k <= n && n <= 21 {
        let zeros = "0".repeat((n - k) as usize);
        format!("{sign}{digits}{zeros}")
    } else if 0 < n && n <= 21 {
        let (head, tail) = digits.split_at(n as usize);
        format!("{sign}{head}.{tail}")
    } else if -6 < n && n <= 0 {
        let zeros = "0".repeat((-n) as usize);
        format!("{sign}0.{zeros}{digits}")
    } else {
        let exp = n - 1;
        let exp_sign = if exp >= 0 { "+" } else { "-" };
        let exp_abs = exp.abs();
        if k == 1 {
            format!("{sign}{digits}e{exp_sign}{exp_abs}")
        } else {
            let (head, tail) = digits.split_at(1);
            format!("{sign}{head}.{tail}e{exp_sign}{exp_abs}")
        }
    }
}

/// `ToNumber` on string input: trimmed, empty → 0, hex/octal/binary
/// prefixes, `Infinity` literals, else decimal parse.
pub fn parse_js_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    if let Some(rest) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return i64::from_str_radix(rest, 16).map_or(f64::NAN, |v| v as f64);
    }
    if let Some(rest) = t.strip_prefix("0o").or_else(|| t.strip_prefix("0O")) {
        return i64::from_str_radix(rest, 8).map_or(f64::NAN, |v| v as f64);
    }
    if let Some(rest) = t.strip_prefix("0b").or_else(|| t.strip_prefix("0B")) {
        return i64::from_str_radix(rest, 2).map_or(f64::NAN, |v| v as f64);
    }
    match t {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => t.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// `parseInt(string, radix)` semantics: leading sign, prefix skipping for
/// radix 16, longest valid digit run.
pub fn parse_int(s: &str, radix: u32) -> f64 {
    let mut t = s.trim_start();
    let mut sign = 1.0;
    if let Some(rest) = t.strip_prefix('-') {
        sign = -1.0;
        t = rest;
    } else if let Some(rest) = t.strip_prefix('+') {
        t = rest;
    }

    let mut radix = radix;
    if radix == 16 || radix == 0 {
        if let Some(rest) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
            t = rest;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }

    let digits: &str = {
        let end = t
            .char_indices()
            .find(|(_, c)| !c.is_digit(radix))
            .map_or(t.len(), |(i, _)| i);
        &t[..end]
    };
    if digits.is_empty() {
        return f64::NAN;
    }

    let mut value = 0.0f64;
    for c in digits.chars() {
        value = value * radix as f64 + c.to_digit(radix).unwrap_or(0) as f64;
    }
    sign * value
}

/// `parseFloat` semantics: longest valid decimal prefix
pub fn parse_float(s: &str) -> f64 {
    let t = s.trim_start();
    if t.starts_with("Infinity") || t.starts_with("+Infinity") {
        return f64::INFINITY;
    }
    if t.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }

    let bytes = t.as_bytes();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_e = false;
    let mut seen_digit = false;
    while end < bytes.len() {
        let c = bytes[end] as char;
        match c {
            '0'..='9' => seen_digit = true,
            '+' | '-' if end == 0 => {}
            '.' if !seen_dot && !seen_e => seen_dot = true,
            'e' | 'E' if seen_digit && !seen_e => {
                seen_e = true;
                // allow a sign right after the exponent marker
                if end + 1 < bytes.len() && (bytes[end + 1] == b'+' || bytes[end + 1] == b'-') {
                    end += 1;
                }
            }
            _ => break,
        }
        end += 1;
    }

    // Back off a trailing exponent marker with no digits
    let mut candidate = &t[..end];
    while candidate.ends_with(['e', 'E', '+', '-', '.']) {
        candidate = &candidate[..candidate.len() - 1];
        if candidate.ends_with(['e', 'E']) {
            candidate = &candidate[..candidate.len() - 1];
        } else {
            break;
        }
    }
    candidate.parse::<f64>().unwrap_or(f64::NAN)
}

/// `ToInt32` (ECMA-262 §7.1.6): modular wrap into i32
pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let n = n.trunc();
    let modulus = 4_294_967_296.0; // 2^32
    let mut r = n % modulus;
    if r < 0.0 {
        r += modulus;
    }
    if r >= 2_147_483_648.0 {
        (r - modulus) as i32
    } else {
        r as i32
    }
}

/// `ToUint32`
pub fn to_uint32(n: f64) -> u32 {
    to_int32(n) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_print_without_point() {
        assert_eq!(to_js_string(0.0), "0");
        assert_eq!(to_js_string(-0.0), "0");
        assert_eq!(to_js_string(42.0), "42");
        assert_eq!(to_js_string(-7.0), "-7");
        assert_eq!(to_js_string(9007199254740991.0), "9007199254740991");
    }

    #[test]
    fn fractions() {
        assert_eq!(to_js_string(3.25), "3.25");
        assert_eq!(to_js_string(0.1), "0.1");
        assert_eq!(to_js_string(-0.5), "-0.5");
        assert_eq!(to_js_string(0.000001), "0.000001");
    }

    #[test]
    fn exponent_thresholds() {
        assert_eq!(to_js_string(1e21), "1e+21");
        assert_eq!(to_js_string(1e-7), "1e-7");
        assert_eq!(to_js_string(1.5e300), "1.5e+300");
        assert_eq!(to_js_string(1e20), "100000000000000000000");
    }

    #[test]
    fn special_values() {
        assert_eq!(to_js_string(f64::NAN), "NaN");
        assert_eq!(to_js_string(f64::INFINITY), "Infinity");
        assert_eq!(to_js_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn parse_numbers() {
        assert_eq!(parse_js_number("  42 "), 42.0);
        assert_eq!(parse_js_number(""), 0.0);
        assert_eq!(parse_js_number("0x10"), 16.0);
        assert!(parse_js_number("12abc").is_nan());
    }

    #[test]
    fn parse_int_radixes() {
        assert_eq!(parse_int("42", 10), 42.0);
        assert_eq!(parse_int("  -17px", 10), -17.0);
        assert_eq!(parse_int("0xff", 0), 255.0);
        assert_eq!(parse_int("ff", 16), 255.0);
        assert!(parse_int("zz", 10).is_nan());
    }

    #[test]
    fn parse_float_prefix() {
        assert_eq!(parse_float("3.25abc"), 3.25);
        assert_eq!(parse_float("1e3"), 1000.0);
        assert!(parse_float("abc").is_nan());
    }

    #[test]
    fn int32_wrapping() {
        assert_eq!(to_int32(4294967296.0), 0);
        assert_eq!(to_int32(2147483648.0), -2147483648);
        assert_eq!(to_int32(-1.5), -1);
        assert_eq!(to_uint32(-1.0), 4294967295);
    }
}
