use crate::models::{Cell, PaymentCandidate};

const STRIPPED_FROM_AMOUNT: &[char] = &[',', '$', '€', '₽'];

/// Parse an amount cell after dropping thousands separators and currency symbols.
pub fn parse_amount(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Null => None,
        Cell::Int(i) => Some(*i as f64),
        Cell::Float(f) => Some(*f),
        Cell::Text(s) => {
            let cleaned: String = s.chars().filter(|c| !STRIPPED_FROM_AMOUNT.contains(c)).collect();
            cleaned.trim().parse::<f64>().ok()
        }
    }
}

/// A candidate is forwarded only with a present, numeric amount and an id.
/// The sentinel id counts as present.
pub fn is_valid(candidate: &PaymentCandidate) -> bool {
    if candidate.amount.is_blank() || candidate.transaction_id.is_empty() {
        return false;
    }
    if parse_amount(&candidate.amount).is_none() {
        log::debug!("Invalid amount format: {}", candidate.amount);
        return false;
    }
    true
}
