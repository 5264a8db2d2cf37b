//! Token Ledger Collaborator
//!
//! The distribution never owns balances. It asks a [`TokenLedger`] to move
//! tokens out of the distribution's holdings and treats anything other than
//! `Ok(true)` as a failed transfer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use alloy_primitives::U256;

use crate::core::address::Address;

/// Token transfer errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Holder balance below the requested amount.
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Holder balance.
        available: U256,
        /// Requested transfer amount.
        requested: U256,
    },

    /// Account is frozen.
    #[error("account {0} is frozen")]
    Frozen(Address),

    /// Transfer to the zero address.
    #[error("transfer to the zero address")]
    ZeroRecipient,

    /// Ledger-specific rejection.
    #[error("transfer rejected: {0}")]
    Rejected(String),
}

/// Fungible balance ledger used to pay out claims.
///
/// `transfer` may call back into the distributor before returning.
pub trait TokenLedger: Send + Sync {
    /// Move `amount` from the distribution's holdings to `to`.
    ///
    /// Ledgers that report failure by return value yield `Ok(false)`.
    fn transfer(&self, to: &Address, amount: U256) -> Result<bool, TokenError>;
}

impl<T: TokenLedger + ?Sized> TokenLedger for std::sync::Arc<T> {
    fn transfer(&self, to: &Address, amount: U256) -> Result<bool, TokenError> {
        (**self).transfer(to, amount)
    }
}

#[derive(Debug, Default)]
struct Balances {
    accounts: BTreeMap<Address, U256>,
    frozen: BTreeSet<Address>,
}

/// In-process token ledger.
///
/// `holder` is the account the distribution pays from.
#[derive(Debug)]
pub struct InMemoryToken {
    holder: Address,
    state: Mutex<Balances>,
}

impl InMemoryToken {
    /// Create a ledger paying out from `holder`.
    pub fn new(holder: Address) -> Self {
        Self {
            holder,
            state: Mutex::new(Balances::default()),
        }
    }

    /// Paying account.
    pub fn holder(&self) -> Address {
        self.holder
    }

    /// Credit `amount` to `to`.
    pub fn mint(&self, to: Address, amount: U256) {
        let mut state = self.lock();
        let balance = state.accounts.entry(to).or_insert(U256::ZERO);
        *balance = balance.saturating_add(amount);
    }

    /// Balance of `account`.
    pub fn balance_of(&self, account: &Address) -> U256 {
        self.lock().accounts.get(account).copied().unwrap_or(U256::ZERO)
    }

    /// Block transfers to and from `account`.
    pub fn freeze(&self, account: Address) {
        self.lock().frozen.insert(account);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Balances> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TokenLedger for InMemoryToken {
    fn transfer(&self, to: &Address, amount: U256) -> Result<bool, TokenError> {
        if to.is_zero() {
            return Err(TokenError::ZeroRecipient);
        }

        let mut state = self.lock();
        for account in [&self.holder, to] {
            if state.frozen.contains(account) {
                return Err(TokenError::Frozen(*account));
            }
        }

        let available = state.accounts.get(&self.holder).copied().unwrap_or(U256::ZERO);
        let remaining = available
            .checked_sub(amount)
            .ok_or(TokenError::InsufficientBalance { available, requested: amount })?;
        state.accounts.insert(self.holder, remaining);

        let balance = state.accounts.entry(*to).or_insert(U256::ZERO);
        *balance = balance.saturating_add(amount);
        Ok(true)
    }
}
