use crate::amount::Amount;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::{Index, IndexMut};

/// Which side of the channel a participant sits on. `Alice` is participant 0 and always the party that proposed
/// the channel setup; `Bob` is participant 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelRole {
    Alice,
    Bob,
}

impl ChannelRole {
    pub fn index(&self) -> usize {
        match self {
            ChannelRole::Alice => 0,
            ChannelRole::Bob => 1,
        }
    }

    pub fn counterparty(&self) -> ChannelRole {
        match self {
            ChannelRole::Alice => ChannelRole::Bob,
            ChannelRole::Bob => ChannelRole::Alice,
        }
    }

    pub fn from_index(index: usize) -> Option<ChannelRole> {
        match index {
            0 => Some(ChannelRole::Alice),
            1 => Some(ChannelRole::Bob),
            _ => None,
        }
    }
}

impl Display for ChannelRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelRole::Alice => write!(f, "Alice"),
            ChannelRole::Bob => write!(f, "Bob"),
        }
    }
}

//------------------------------------           Balance          ------------------------------------------------//

/// An ordered pair of amounts. For channel balances the order is `[participant0, participant1]`; for transfer
/// balances it is `[initiator, responder]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub amounts: [Amount; 2],
}

impl Balance {
    pub fn new(first: Amount, second: Amount) -> Self {
        Balance { amounts: [first, second] }
    }

    pub fn zero() -> Self {
        Balance::default()
    }

    pub fn total(&self) -> Option<Amount> {
        self.amounts[0].checked_add(self.amounts[1])
    }

    /// Returns a copy of this balance with `amount` added to `side`, or `None` on overflow.
    pub fn credit(&self, side: ChannelRole, amount: Amount) -> Option<Self> {
        let mut result = *self;
        result[side] = self[side].checked_add(amount)?;
        Some(result)
    }

    /// Returns a copy of this balance with `amount` removed from `side`, or `None` if that side cannot cover it.
    pub fn debit(&self, side: ChannelRole, amount: Amount) -> Option<Self> {
        let mut result = *self;
        result[side] = self[side].checked_sub(amount)?;
        Some(result)
    }
}

impl Index<ChannelRole> for Balance {
    type Output = Amount;

    fn index(&self, role: ChannelRole) -> &Self::Output {
        &self.amounts[role.index()]
    }
}

impl IndexMut<ChannelRole> for Balance {
    fn index_mut(&mut self, role: ChannelRole) -> &mut Self::Output {
        &mut self.amounts[role.index()]
    }
}

impl Display for Balance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.amounts[0], self.amounts[1])
    }
}
