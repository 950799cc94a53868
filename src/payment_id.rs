use std::sync::OnceLock;

use regex::Regex;

use crate::models::SENTINEL_ID;

// Digit runs below this look like filler codes rather than invoice numbers.
const MIN_INVOICE_NUMBER: u64 = 2400;
// Clears the minimum but is a filler code, never an id.
const EXCLUDED_NUMBER: u64 = 8000;
const TRUNCATE_CHARS: usize = 8;

/// Which step of the inference chain produced an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdRule {
    Contract,
    Reference,
    Labelled,
    BareNumber,
    Truncated,
    Sentinel,
}

impl IdRule {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Contract => "contract",
            Self::Reference => "reference",
            Self::Labelled => "labelled",
            Self::BareNumber => "bare_number",
            Self::Truncated => "truncated",
            Self::Sentinel => "sentinel",
        }
    }
}

fn contract_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:c[-_]?)?\d{6,}").expect("contract pattern"))
}

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b[a-z]{2,5}[-_]?\d{4,}").expect("reference pattern"))
}

fn labelled_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:сч[её]т|№|#|\bid)\s*[:№#]?\s*(\d+)").expect("labelled pattern")
    })
}

fn digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4,}").expect("digits pattern"))
}

/// True when a digit run reads like an invoice number: at least 2400 and not 8000.
pub fn is_invoice_number(digits: &str) -> bool {
    let significant = digits.trim_start_matches('0');
    if significant.len() > 18 {
        return true;
    }
    significant
        .parse::<u64>()
        .map(|v| v >= MIN_INVOICE_NUMBER && v != EXCLUDED_NUMBER)
        .unwrap_or(false)
}

fn strip_punctuation(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect()
}

/// Run the inference chain over a cell's text; the first rule that fires wins.
pub fn classify(text: &str) -> (String, IdRule) {
    if let Some(m) = contract_re().find(text) {
        return (m.as_str().to_string(), IdRule::Contract);
    }
    if let Some(m) = reference_re().find(text) {
        return (m.as_str().to_string(), IdRule::Reference);
    }
    for caps in labelled_re().captures_iter(text) {
        let digits = &caps[1];
        if is_invoice_number(digits) {
            return (digits.to_string(), IdRule::Labelled);
        }
    }
    for m in digits_re().find_iter(text) {
        if is_invoice_number(m.as_str()) {
            return (m.as_str().to_string(), IdRule::BareNumber);
        }
    }
    let truncated: String = strip_punctuation(text).chars().take(TRUNCATE_CHARS).collect();
    let truncated = truncated.trim();
    if !truncated.is_empty() && truncated != text {
        return (truncated.to_string(), IdRule::Truncated);
    }
    (SENTINEL_ID.to_string(), IdRule::Sentinel)
}

pub fn infer_transaction_id(text: &str) -> String {
    let (id, rule) = classify(text);
    log::debug!("Transaction id {id:?} from {text:?} via {}", rule.key());
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labelled_invoice_number() {
        assert_eq!(classify("Счёт №2497 оплата"), ("2497".to_string(), IdRule::Labelled));
        assert_eq!(infer_transaction_id("оплата по счету 3001"), "3001");
        assert_eq!(infer_transaction_id("ID: 2500"), "2500");
        assert_eq!(infer_transaction_id("invoice #4410 paid"), "4410");
    }

    #[test]
    fn test_labelled_skips_small_and_excluded_numbers() {
        // first labelled number is too small, second qualifies
        assert_eq!(infer_transaction_id("№12 / счет 2600"), "2600");
        assert_eq!(classify("счёт 8000").1, IdRule::Truncated);
    }

    #[test]
    fn test_never_returns_excluded_number() {
        let (id, rule) = classify("оплата 8000 руб");
        assert_ne!(id, "8000");
        assert_eq!(rule, IdRule::Truncated);
        assert_eq!(id, "оплата 8");
    }

    #[test]
    fn test_contract_pattern_wins() {
        assert_eq!(classify("C_516913"), ("C_516913".to_string(), IdRule::Contract));
        assert_eq!(infer_transaction_id("по договору c-123456 от 01.02"), "c-123456");
        assert_eq!(infer_transaction_id("платеж 7654321"), "7654321");
    }

    #[test]
    fn test_contract_glued_to_trailing_text() {
        assert_eq!(classify("C_516913_2"), ("C_516913".to_string(), IdRule::Contract));
        assert_eq!(classify("C516913руб"), ("C516913".to_string(), IdRule::Contract));
        assert_eq!(infer_transaction_id("договор 1234567/2025"), "1234567");
    }

    #[test]
    fn test_reference_pattern() {
        assert_eq!(classify("REF123456"), ("REF123456".to_string(), IdRule::Reference));
        assert_eq!(infer_transaction_id("see INV-2024 for details"), "INV-2024");
        assert_eq!(classify("REF123456руб").1, IdRule::Reference);
    }

    #[test]
    fn test_bare_number() {
        assert_eq!(classify("оплата 2401 руб"), ("2401".to_string(), IdRule::BareNumber));
        assert_eq!(infer_transaction_id("1999 2399 9000"), "9000");
    }

    #[test]
    fn test_truncation_and_sentinel() {
        assert_eq!(infer_transaction_id("AB-CD"), "ABCD");
        // stripping changes nothing, so there is nothing to offer
        assert_eq!(classify("abc").1, IdRule::Sentinel);
        assert_eq!(infer_transaction_id(""), SENTINEL_ID);
        assert_eq!(infer_transaction_id("--"), SENTINEL_ID);
        assert_eq!(infer_transaction_id("100"), SENTINEL_ID);
    }

    #[test]
    fn test_is_invoice_number_thresholds() {
        assert!(!is_invoice_number("2399"));
        assert!(is_invoice_number("2400"));
        assert!(!is_invoice_number("8000"));
        assert!(!is_invoice_number("08000"));
        assert!(is_invoice_number("8001"));
        assert!(is_invoice_number("99999999999999999999999"));
        assert!(!is_invoice_number("0000"));
    }
}
