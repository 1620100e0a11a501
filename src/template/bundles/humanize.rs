//! Number formatting filters for people rather than machines.
//!
//! Values that cannot be read as numbers are returned unchanged.

use minijinja::Value;
use minijinja::value::ValueKind;

use crate::template::bundle::Bundle;

const LARGE_NUMBERS: &[(u32, &str)] = &[
    (6, "million"),
    (9, "billion"),
    (12, "trillion"),
    (15, "quadrillion"),
    (18, "quintillion"),
    (21, "sextillion"),
    (24, "septillion"),
    (27, "octillion"),
    (30, "nonillion"),
    (33, "decillion"),
    (100, "googol"),
];

const SMALL_NUMBERS: [&str; 9] = [
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
];

/// Integer reading of `value`; floats are truncated, numeric strings must be integral.
fn as_integer(value: &Value) -> Option<i128> {
    match value.kind() {
        ValueKind::Number => {
            let text = value.to_string();
            text.parse::<i128>().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|number| number.is_finite())
                    .map(|number| number.trunc() as i128)
            })
        }
        ValueKind::String => value.as_str()?.trim().parse::<i128>().ok(),
        _ => None,
    }
}

/// `4500` becomes `4,500`, `45000.5` becomes `45,000.5`.
pub fn intcomma(value: Value) -> Value {
    let text = match value.kind() {
        ValueKind::Number => value.to_string(),
        ValueKind::String => match value.as_str() {
            Some(text) => text.to_string(),
            None => return value,
        },
        _ => return value,
    };

    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let digits_end = unsigned
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(unsigned.len());
    if digits_end == 0 {
        return value;
    }

    let (digits, tail) = unsigned.split_at(digits_end);
    let mut grouped = String::with_capacity(text.len() + digits.len() / 3);
    grouped.push_str(sign);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped.push_str(tail);
    Value::from(grouped)
}

/// `1200000` becomes `1.2 million`. Values below one million are unchanged.
pub fn intword(value: Value) -> Value {
    let Some(number) = as_integer(&value) else {
        return value;
    };
    if number < 1_000_000 {
        return value;
    }

    let number = number as f64;
    let mut chosen = None;
    for &(exponent, name) in LARGE_NUMBERS {
        let large = 10f64.powi(exponent as i32);
        if number >= large {
            chosen = Some((large, name));
        }
    }
    match chosen {
        Some((large, name)) => Value::from(format!("{:.1} {name}", number / large)),
        None => value,
    }
}

/// `1` becomes `1st`, `12` becomes `12th`, `23` becomes `23rd`.
pub fn ordinal(value: Value) -> Value {
    let Some(number) = as_integer(&value) else {
        return value;
    };
    if number < 0 {
        return Value::from(number.to_string());
    }
    let suffix = if (11..=13).contains(&(number % 100)) {
        "th"
    } else {
        match number % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    };
    Value::from(format!("{number}{suffix}"))
}

/// `1` to `9` become words, anything else is left alone.
pub fn apnumber(value: Value) -> Value {
    match as_integer(&value) {
        Some(number @ 1..=9) => Value::from(SMALL_NUMBERS[(number - 1) as usize]),
        Some(_) | None => value,
    }
}

pub(super) fn bundle() -> Bundle {
    let mut bundle = Bundle::new();
    bundle
        .filter("intcomma", intcomma)
        .filter("intword", intword)
        .filter("ordinal", ordinal)
        .filter("apnumber", apnumber);
    bundle
}
