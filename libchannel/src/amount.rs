use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::iter::Sum;

/// An amount of some asset held in a channel, expressed in the asset's base units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount {
    amount: u64,
}

impl Amount {
    pub const ZERO: Amount = Amount { amount: 0 };

    /// Creates a new `Amount` from a value in base units.
    pub fn from_units(amount: u64) -> Self {
        Amount { amount }
    }

    pub fn to_units(&self) -> u64 {
        self.amount
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.amount.checked_add(rhs.amount).map(Amount::from_units)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.amount.checked_sub(rhs.amount).map(Amount::from_units)
    }

    /// Parses a decimal string of base units, e.g. `"1500"`.
    /// Returns `None` if the string is not a valid unsigned integer.
    pub fn from_units_str(s: &str) -> Option<Self> {
        s.trim().parse::<u64>().ok().map(Amount::from_units)
    }

    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.amount.to_le_bytes()
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Amount::from_units(value)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.amount)
    }
}

/// Summing saturates rather than wraps. Callers that care about overflow use `checked_add`.
impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| Amount::from_units(acc.amount.saturating_add(a.amount)))
    }
}

#[cfg(test)]
mod test {
    use crate::amount::Amount;

    #[test]
    fn checked_arithmetic() {
        let a = Amount::from_units(10);
        let b = Amount::from_units(4);
        assert_eq!(a.checked_add(b), Some(Amount::from_units(14)));
        assert_eq!(a.checked_sub(b), Some(Amount::from_units(6)));
        assert_eq!(b.checked_sub(a), None);
        assert_eq!(Amount::from_units(u64::MAX).checked_add(b), None);
    }

    #[test]
    fn from_strings() {
        assert_eq!(Amount::from_units_str("1500"), Some(Amount::from_units(1500)));
        assert_eq!(Amount::from_units_str(" 7 "), Some(Amount::from_units(7)));
        assert!(Amount::from_units_str("1.5").is_none());
        assert!(Amount::from_units_str("-3").is_none());
        assert!(Amount::from_units_str("zero").is_none());
    }

    #[test]
    fn sum_of_amounts() {
        let total: Amount = [1u64, 2, 3].into_iter().map(Amount::from_units).sum();
        assert_eq!(total, Amount::from_units(6));
    }
}
