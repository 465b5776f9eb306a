// file: src/detection/patterns.rs
// description: compiled regex patterns for sensitive data matching
// reference: https://docs.rs/regex

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    pub static ref EMAIL: Regex = Regex::new(
        r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"
    ).expect("EMAIL regex is valid");

    // North American style numbers, optionally with +1 and a parenthesized area code
    pub static ref PHONE: Regex = Regex::new(
        r"(?:\+1[-.\s]?)?(?:\(\d{3}\)\s?|\b\d{3}[-.\s])\d{3}[-.\s]\d{4}\b"
    ).expect("PHONE regex is valid");

    pub static ref SSN: Regex = Regex::new(
        r"\b\d{3}-\d{2}-\d{4}\b"
    ).expect("SSN regex is valid");

    // 13 to 19 digits, optionally grouped by spaces or dashes
    pub static ref PAYMENT_CARD: Regex = Regex::new(
        r"\b\d(?:[ -]?\d){12,18}\b"
    ).expect("PAYMENT_CARD regex is valid");
}

/// Area 000, 666 and 900-999, group 00 and serial 0000 are never issued.
pub fn is_plausible_ssn(candidate: &str) -> bool {
    let parts: Vec<&str> = candidate.split('-').collect();
    let [area, group, serial] = parts.as_slice() else {
        return false;
    };

    let area_ok = *area != "000" && *area != "666" && !area.starts_with('9');
    area_ok && *group != "00" && *serial != "0000"
}

pub fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();

    sum % 10 == 0
}
