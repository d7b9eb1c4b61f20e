use crate::types::address::Address;
use serde::{Deserialize, Serialize};

/// Balance and transaction counter for one address.
///
/// Created lazily the first time an address is referenced and never removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub balance: u64,
    /// Count of successful outgoing transfers.
    pub nonce: u64,
}

impl Account {
    pub fn new(address: Address, balance: u64) -> Self {
        Self {
            address,
            balance,
            nonce: 0,
        }
    }

    /// Whether `amount` can be debited without going negative.
    pub fn can_afford(&self, amount: u64) -> bool {
        self.balance >= amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_starts_at_nonce_zero() {
        let account = Account::new(Address::new("a"), 100);
        assert_eq!(account.balance, 100);
        assert_eq!(account.nonce, 0);
    }

    #[test]
    fn can_afford_is_inclusive() {
        let account = Account::new(Address::new("a"), 10);
        assert!(account.can_afford(10));
        assert!(!account.can_afford(11));
    }
}
