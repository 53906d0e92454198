//! ECR journal line protocol.
//!
//! The register prints its journal to the serial port as loosely structured
//! text. There is no framing beyond line breaks, so every line is cleaned by
//! [`normalize_line`] and then assigned a [`LineKind`] by an ordered table of
//! line-shape rules. Transaction lines carry `KEY£VALUE` pairs whose key is
//! matched against a second ordered table of tender keywords before falling
//! back to a PLU lookup.

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use std::sync::LazyLock;

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Currency marker separating a transaction key from its amount.
pub const CURRENCY_MARKER: char = '£';

/// Bytes the link delivers in place of the pound sign: code page 437,
/// Latin-1, and the `?` substituted by terminals that cannot render it.
const CURRENCY_BYTES: &[u8] = &[0x9C, 0xA3, b'?'];

/// Control bytes and high-bit residue injected by the serial link.
fn is_noise(byte: u8) -> bool {
    match byte {
        b'\t' => false,
        0x00..=0x1F | 0x7F => true,
        0x80..=0xFF => true,
        _ => false,
    }
}

/// Clean one raw journal line (terminators already removed).
///
/// Drops NUL and other link-noise bytes, remaps corrupted currency bytes to
/// [`CURRENCY_MARKER`], and trims surrounding whitespace. Never fails.
pub fn normalize_line(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    for &byte in raw {
        if CURRENCY_BYTES.contains(&byte) {
            out.push(CURRENCY_MARKER);
        } else if !is_noise(byte) {
            out.push(byte as char);
        }
    }
    out.trim().to_string()
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Which handler owns a normalized line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Receipt header: `dd/mm/yyyy HH:MM ...`
    Header,
    /// X/Z report banner. Reports are observed but not tallied.
    Report,
    /// `CANCEL` or `REPRINT`: voids the sale since the last header.
    Cancel,
    /// `PAID OUT` (refund / petty cash). Not tracked.
    Refund,
    /// Drawer opened without a sale.
    NoSale,
    /// `key=value` diagnostic block. Not tracked.
    Diagnostic,
    /// Matched no rule; may still be a transaction line.
    Unclassified,
}

struct Rule {
    kind: LineKind,
    matches: fn(&str) -> bool,
}

static DATE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}/\d{2}/\d{4}").expect("date prefix pattern"));

fn is_header(line: &str) -> bool {
    DATE_PREFIX.is_match(line)
}

fn is_report(line: &str) -> bool {
    line.contains("REPORT")
}

fn is_cancel(line: &str) -> bool {
    line.starts_with("CANCEL") || line.contains("REPRINT")
}

fn is_refund(line: &str) -> bool {
    line.starts_with("PAID OUT")
}

fn is_no_sale(line: &str) -> bool {
    line.contains("NOSALE")
}

fn is_diagnostic(line: &str) -> bool {
    line.contains('=')
}

/// Canonical rule order. Patterns overlap (a report banner carries a date,
/// a cancel slip may contain `=`), so the first match wins.
const RULES: &[Rule] = &[
    Rule { kind: LineKind::Header, matches: is_header },
    Rule { kind: LineKind::Report, matches: is_report },
    Rule { kind: LineKind::Cancel, matches: is_cancel },
    Rule { kind: LineKind::Refund, matches: is_refund },
    Rule { kind: LineKind::NoSale, matches: is_no_sale },
    Rule { kind: LineKind::Diagnostic, matches: is_diagnostic },
];

/// Classify a normalized line. Side-effect free.
pub fn classify(line: &str) -> LineKind {
    RULES
        .iter()
        .find(|rule| (rule.matches)(line))
        .map(|rule| rule.kind)
        .unwrap_or(LineKind::Unclassified)
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

static CLOCK_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9])([0-9]{1,2}):([0-9]{2})(?:[^0-9]|$)").expect("clock time pattern")
});

/// Trading date of a header line (`dd/mm/yyyy` prefix), if it parses.
pub fn header_date(line: &str) -> Option<NaiveDate> {
    let prefix = DATE_PREFIX.find(line)?;
    NaiveDate::parse_from_str(prefix.as_str(), "%d/%m/%Y").ok()
}

/// First valid `H:MM` / `HH:MM` time on the line, if any.
pub fn extract_time(line: &str) -> Option<NaiveTime> {
    CLOCK_TIME.captures_iter(line).find_map(|caps| {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        NaiveTime::from_hms_opt(hour, minute, 0)
    })
}

/// Split a transaction line at the first currency marker into `(key, value)`.
pub fn split_transaction(line: &str) -> Option<(&str, &str)> {
    line.split_once(CURRENCY_MARKER)
}

/// Parse a journal amount into pence.
///
/// Accepts an optional sign, thousands separators, and up to two decimals.
/// Anything after the first whitespace (tax codes, quantity markers) is
/// ignored.
pub fn parse_amount(raw: &str) -> Option<i64> {
    let token = raw.split_whitespace().next()?;
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };
    let digits = digits.replace(',', "");
    let (whole, frac) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits.as_str(), ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if frac.len() > 2 {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    let pence = whole.checked_mul(100)?.checked_add(frac)?;
    Some(if negative { -pence } else { pence })
}

/// Format pence as a decimal amount (e.g. 1250 → "12.50", -5 → "-0.05").
pub fn format_amount(pence: i64) -> String {
    let sign = if pence < 0 { "-" } else { "" };
    let abs = pence.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Title-case a PLU key the way the registry stores lookup keys:
/// trimmed, first letter of each alphabetic run upper-cased, rest lower-cased.
pub fn title_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_word = false;
    for ch in raw.trim().chars() {
        if ch.is_alphabetic() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tender keys
// ---------------------------------------------------------------------------

/// Transaction keys with a fixed meaning. Anything else is a PLU code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tender {
    /// Sale total; marks a completed customer.
    Total,
    Cash,
    /// Change handed back, deducted from cash.
    Change,
    /// Card or cheque payment.
    Card,
}

/// Ordered like [`RULES`]: first prefix match wins.
const TENDER_RULES: &[(&str, Tender)] = &[
    ("TOTAL", Tender::Total),
    ("CASH", Tender::Cash),
    ("CHANGE", Tender::Change),
    ("CHEQUE", Tender::Card),
    ("CARD", Tender::Card),
];

/// Match a transaction key against the tender table. The keyword must stand
/// alone or be followed by whitespace (`CARD VISA`), so `Cashew` is not cash.
pub fn match_tender(key: &str) -> Option<Tender> {
    let key = key.trim().to_uppercase();
    TENDER_RULES
        .iter()
        .find(|(word, _)| {
            key.strip_prefix(word)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
        })
        .map(|(_, tender)| *tender)
}

/// True when the key is exactly a tender keyword, with nothing after it.
pub fn is_bare_tender(key: &str) -> bool {
    let key = key.trim();
    TENDER_RULES
        .iter()
        .any(|(word, _)| key.eq_ignore_ascii_case(word))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_nul_and_control_bytes() {
        let raw = b"\x00\x1bCOFFEE\x0e\x7f";
        assert_eq!(normalize_line(raw), "COFFEE");
    }

    #[test]
    fn test_normalize_maps_currency_artifacts() {
        assert_eq!(normalize_line(b"TOTAL\x9c2.50"), "TOTAL£2.50");
        assert_eq!(normalize_line(b"TOTAL\xa32.50"), "TOTAL£2.50");
        assert_eq!(normalize_line(b"TOTAL?2.50"), "TOTAL£2.50");
        // UTF-8 pound sign: lead byte dropped, trail byte remapped
        assert_eq!(normalize_line("TOTAL£2.50".as_bytes()), "TOTAL£2.50");
    }

    #[test]
    fn test_normalize_trims_and_keeps_tabs_inside() {
        assert_eq!(normalize_line(b"  CASH\t\xa31.00  "), "CASH\t£1.00");
    }

    #[test]
    fn test_classify_canonical_kinds() {
        assert_eq!(classify("01/01/2024 09:00"), LineKind::Header);
        assert_eq!(classify("1/01/2024 09:00 #0012"), LineKind::Header);
        assert_eq!(classify("X REPORT"), LineKind::Report);
        assert_eq!(classify("CANCEL"), LineKind::Cancel);
        assert_eq!(classify("** REPRINT **"), LineKind::Cancel);
        assert_eq!(classify("PAID OUT £5.00"), LineKind::Refund);
        assert_eq!(classify("NOSALE"), LineKind::NoSale);
        assert_eq!(classify("GT=1234"), LineKind::Diagnostic);
        assert_eq!(classify("COFFEE£2.50"), LineKind::Unclassified);
    }

    #[test]
    fn test_classify_first_match_wins() {
        // Date prefix beats REPORT
        assert_eq!(classify("01/01/2024 21:00 Z REPORT"), LineKind::Header);
        // REPORT beats REPRINT and '='
        assert_eq!(classify("REPORT REPRINT A=1"), LineKind::Report);
        // CANCEL beats '='
        assert_eq!(classify("CANCEL ITEM=3"), LineKind::Cancel);
        // PAID OUT beats NOSALE
        assert_eq!(classify("PAID OUT NOSALE"), LineKind::Refund);
    }

    #[test]
    fn test_classify_cancel_must_lead() {
        assert_eq!(classify("NOT CANCEL"), LineKind::Unclassified);
        assert_eq!(classify("REFUND PAID OUT"), LineKind::Unclassified);
    }

    #[test]
    fn test_classify_date_must_lead() {
        assert_eq!(classify("Printed 01/01/2024"), LineKind::Unclassified);
        assert_eq!(classify("01/1/2024 09:00"), LineKind::Unclassified);
    }

    #[test]
    fn test_extract_time() {
        assert_eq!(
            extract_time("01/01/2024 09:05"),
            NaiveTime::from_hms_opt(9, 5, 0)
        );
        assert_eq!(
            extract_time("1/01/2024 7:30 CLERK 2"),
            NaiveTime::from_hms_opt(7, 30, 0)
        );
        assert_eq!(extract_time("01/01/2024"), None);
        // Invalid candidate skipped, later valid one used
        assert_eq!(
            extract_time("99:99 then 10:15"),
            NaiveTime::from_hms_opt(10, 15, 0)
        );
        // Part of a longer digit run is not a time
        assert_eq!(extract_time("REF 123:456"), None);
    }

    #[test]
    fn test_split_transaction() {
        assert_eq!(split_transaction("COFFEE£2.50"), Some(("COFFEE", "2.50")));
        assert_eq!(split_transaction("COFFEE 2.50"), None);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("2.50"), Some(250));
        assert_eq!(parse_amount(" 2.5 "), Some(250));
        assert_eq!(parse_amount("3"), Some(300));
        assert_eq!(parse_amount(".99"), Some(99));
        assert_eq!(parse_amount("-1.25"), Some(-125));
        assert_eq!(parse_amount("1,234.00"), Some(123_400));
        assert_eq!(parse_amount("4.00 A"), Some(400));
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount("1.234"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("-"), None);
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(1250), "12.50");
        assert_eq!(format_amount(0), "0.00");
        assert_eq!(format_amount(99), "0.99");
        assert_eq!(format_amount(-5), "-0.05");
        assert_eq!(format_amount(-150), "-1.50");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case(" coffee "), "Coffee");
        assert_eq!(title_case("COFFEE"), "Coffee");
        assert_eq!(title_case("hot CHOCOLATE"), "Hot Chocolate");
        assert_eq!(title_case("tea-cake"), "Tea-Cake");
    }

    #[test]
    fn test_match_tender_order() {
        assert_eq!(match_tender("TOTAL"), Some(Tender::Total));
        assert_eq!(match_tender(" total "), Some(Tender::Total));
        assert_eq!(match_tender("CASH"), Some(Tender::Cash));
        assert_eq!(match_tender("CHANGE"), Some(Tender::Change));
        assert_eq!(match_tender("CHEQUE"), Some(Tender::Card));
        assert_eq!(match_tender("CARD VISA"), Some(Tender::Card));
        assert_eq!(match_tender("COFFEE"), None);
    }

    #[test]
    fn test_match_tender_needs_whole_keyword() {
        assert_eq!(match_tender("Cashew"), None);
        assert_eq!(match_tender("CARDAMOM"), None);
        assert_eq!(match_tender("TOTALS"), None);
        assert_eq!(match_tender("Changes"), None);
        assert_eq!(match_tender("CASH\tTEND"), Some(Tender::Cash));
        assert!(is_bare_tender(" total "));
        assert!(!is_bare_tender("Total Care"));
    }

    #[test]
    fn test_header_date() {
        assert_eq!(
            header_date("01/02/2024 09:00"),
            NaiveDate::from_ymd_opt(2024, 2, 1)
        );
        assert_eq!(
            header_date("1/02/2024 9:00"),
            NaiveDate::from_ymd_opt(2024, 2, 1)
        );
        assert_eq!(header_date("31/02/2024 09:00"), None);
        assert_eq!(header_date("COFFEE£2.50"), None);
    }
}
