//! Accounts and the keyrings that hold them.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// Hardware wallets the engine recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareVendor {
    Ledger,
    Trezor,
    OneKey,
    Keystone,
    GridPlus,
    ImKey,
}

/// How an account signs, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "vendor")]
pub enum KeyringKind {
    PrivateKey,
    Mnemonic,
    Hardware(HardwareVendor),
    WalletConnect,
    WatchOnly,
    /// Safe-style multisig contract account.
    Safe,
}

impl KeyringKind {
    pub fn can_sign(&self) -> bool {
        !matches!(self, KeyringKind::WatchOnly)
    }

    pub fn is_multisig(&self) -> bool {
        matches!(self, KeyringKind::Safe)
    }

    /// Rank used when several local accounts share a Safe owner address.
    /// Lower wins; Safe accounts never act as owners here.
    pub fn owner_preference(&self) -> Option<u8> {
        match self {
            KeyringKind::PrivateKey => Some(0),
            KeyringKind::Mnemonic => Some(1),
            KeyringKind::Hardware(_) => Some(2),
            KeyringKind::WalletConnect => Some(3),
            KeyringKind::WatchOnly => Some(4),
            KeyringKind::Safe => None,
        }
    }
}

/// A locally known account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub keyring: KeyringKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Account {
    pub fn new(address: Address, keyring: KeyringKind) -> Self {
        Self {
            address,
            keyring,
            alias: None,
        }
    }

    pub fn is_multisig(&self) -> bool {
        self.keyring.is_multisig()
    }
}
