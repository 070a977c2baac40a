//! Stable-token transfer port.
//!
//! The ledger pulls tokens in on deposits and pushes them out on withdrawals
//! through this port, and audits its internal accounting against the vault's
//! token balance. The in-memory implementation backs tests and the demo
//! runner; a chain-backed implementation submits ERC-20 transfers instead.

use crossvault_core::fixed::Money;
use crossvault_core::keys::UserKey;
use std::collections::HashMap;
use thiserror::Error;

/// Token transfer failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("insufficient token balance for {holder}: {available} available")]
    InsufficientFunds { holder: UserKey, available: Money },

    #[error("token transfer overflow")]
    Overflow,
}

/// ERC-20-shaped transfer surface, from the vault's point of view.
pub trait StableToken: Send + Sync {
    /// `transferFrom(from, vault, amount)`.
    fn transfer_in(&mut self, from: UserKey, amount: Money) -> Result<(), TokenError>;

    /// `transfer(to, amount)` out of the vault.
    fn transfer_out(&mut self, to: UserKey, amount: Money) -> Result<(), TokenError>;

    /// Tokens currently held by the vault.
    fn vault_balance(&self) -> Money;
}

/// In-memory token with external holder balances.
#[derive(Debug, Default)]
pub struct InMemoryToken {
    holders: HashMap<UserKey, Money>,
    vault: Money,
}

impl InMemoryToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints tokens to an external holder (test/demo setup).
    pub fn mint(&mut self, holder: UserKey, amount: Money) {
        let balance = self.holders.entry(holder).or_insert(Money::ZERO);
        *balance = Money::from_units(balance.units().saturating_add(amount.units()));
    }

    #[must_use]
    pub fn holder_balance(&self, holder: UserKey) -> Money {
        self.holders.get(&holder).copied().unwrap_or(Money::ZERO)
    }
}

impl StableToken for InMemoryToken {
    fn transfer_in(&mut self, from: UserKey, amount: Money) -> Result<(), TokenError> {
        let balance = self.holders.get(&from).copied().unwrap_or(Money::ZERO);
        let remaining = balance
            .checked_sub(amount)
            .map_err(|_| TokenError::InsufficientFunds {
                holder: from,
                available: balance,
            })?;
        let vault = self
            .vault
            .checked_add(amount)
            .map_err(|_| TokenError::Overflow)?;
        self.holders.insert(from, remaining);
        self.vault = vault;
        Ok(())
    }

    fn transfer_out(&mut self, to: UserKey, amount: Money) -> Result<(), TokenError> {
        let vault = self
            .vault
            .checked_sub(amount)
            .map_err(|_| TokenError::InsufficientFunds {
                holder: to,
                available: self.vault,
            })?;
        let balance = self.holders.get(&to).copied().unwrap_or(Money::ZERO);
        let credited = balance.checked_add(amount).map_err(|_| TokenError::Overflow)?;
        self.vault = vault;
        self.holders.insert(to, credited);
        Ok(())
    }

    fn vault_balance(&self) -> Money {
        self.vault
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_in_and_out_round_trip() {
        let user = UserKey::from_tag(1);
        let mut token = InMemoryToken::new();
        token.mint(user, Money::from_units(1_000));

        token.transfer_in(user, Money::from_units(600)).unwrap();
        assert_eq!(token.vault_balance(), Money::from_units(600));
        assert_eq!(token.holder_balance(user), Money::from_units(400));

        token.transfer_out(user, Money::from_units(100)).unwrap();
        assert_eq!(token.vault_balance(), Money::from_units(500));
        assert_eq!(token.holder_balance(user), Money::from_units(500));
    }

    #[test]
    fn test_transfer_in_insufficient_funds() {
        let user = UserKey::from_tag(2);
        let mut token = InMemoryToken::new();
        token.mint(user, Money::from_units(10));
        let err = token.transfer_in(user, Money::from_units(11)).unwrap_err();
        assert!(matches!(err, TokenError::InsufficientFunds { .. }));
        // Nothing moved.
        assert_eq!(token.holder_balance(user), Money::from_units(10));
        assert_eq!(token.vault_balance(), Money::ZERO);
    }

    #[test]
    fn test_transfer_out_exceeding_vault_fails() {
        let user = UserKey::from_tag(3);
        let mut token = InMemoryToken::new();
        let err = token.transfer_out(user, Money::from_units(1)).unwrap_err();
        assert!(matches!(err, TokenError::InsufficientFunds { .. }));
    }
}
