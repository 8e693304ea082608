use serde::{Deserialize, Serialize};

use rideledger_core::{DomainError, DomainResult};

/// Per-tenant invoice number: `INV-` plus a zero-padded sequence.
///
/// The sequence is monotonic per tenant but not gapless: numbering is
/// read-max-then-increment, and a rolled-back generation releases its number
/// without back-filling. The padding is six digits; larger sequences simply
/// widen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InvoiceNumber {
    sequence: u64,
}

impl InvoiceNumber {
    pub const PREFIX: &'static str = "INV-";

    /// The first number issued for a tenant: `INV-000001`.
    pub fn first() -> Self {
        Self { sequence: 1 }
    }

    pub fn from_sequence(sequence: u64) -> DomainResult<Self> {
        if sequence == 0 {
            return Err(DomainError::invalid_id(
                "invoice number sequence starts at 1",
            ));
        }
        Ok(Self { sequence })
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        let digits = s
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| DomainError::invalid_id(format!("invoice number '{s}': bad prefix")))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::invalid_id(format!(
                "invoice number '{s}': suffix must be digits"
            )));
        }
        let sequence: u64 = digits
            .parse()
            .map_err(|e| DomainError::invalid_id(format!("invoice number '{s}': {e}")))?;
        Self::from_sequence(sequence)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The next number in the tenant's sequence.
    pub fn next(&self) -> Self {
        Self {
            sequence: self.sequence + 1,
        }
    }
}

impl core::fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}{:06}", Self::PREFIX, self.sequence)
    }
}

impl TryFrom<String> for InvoiceNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InvoiceNumber> for String {
    fn from(value: InvoiceNumber) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_zero_padded() {
        assert_eq!(InvoiceNumber::first().to_string(), "INV-000001");
        assert_eq!(
            InvoiceNumber::from_sequence(42).unwrap().to_string(),
            "INV-000042"
        );
    }

    #[test]
    fn widens_past_six_digits() {
        let n = InvoiceNumber::from_sequence(999_999).unwrap().next();
        assert_eq!(n.to_string(), "INV-1000000");
        assert_eq!(InvoiceNumber::parse("INV-1000000").unwrap(), n);
    }

    #[test]
    fn parse_round_trips() {
        let n = InvoiceNumber::parse("INV-000317").unwrap();
        assert_eq!(n.sequence(), 317);
        assert_eq!(n.next().sequence(), 318);
        assert_eq!(InvoiceNumber::parse(&n.to_string()).unwrap(), n);
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert!(InvoiceNumber::parse("INV000001").is_err());
        assert!(InvoiceNumber::parse("INV-").is_err());
        assert!(InvoiceNumber::parse("INV-12a456").is_err());
        assert!(InvoiceNumber::parse("INV-000000").is_err());
    }
}
