use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::platform;

/// Current wallet file version
const WALLET_VERSION: &str = "1.0";

/// Persisted wallet representation
#[derive(Debug, Clone, Deserialize, Serialize)]
struct WalletFile {
    version: String,
    balance: u32,
}

/// Authoritative virtual-currency balance with atomic debit/credit.
///
/// All mutations are serialized behind a single lock and written through to
/// disk before the in-memory balance is updated, so a failed write never
/// leaves memory ahead of the persisted value. Concurrent callers (the
/// unlock path here, reward crediting elsewhere) cannot interleave.
pub struct WalletLedger {
    balance: Mutex<u32>,
    path: PathBuf,
    loaded_from_disk: bool,
}

impl WalletLedger {
    /// Open the ledger at the given path, loading the persisted balance if
    /// one exists and starting at zero otherwise.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (balance, loaded_from_disk) = match load_wallet_file(&path)? {
            Some(file) => (file.balance, true),
            None => (0, false),
        };

        Ok(Self {
            balance: Mutex::new(balance),
            path,
            loaded_from_disk,
        })
    }

    /// Default wallet location under the platform data directory.
    pub fn default_path() -> Result<PathBuf> {
        Ok(platform::paths::default_data_dir()?.join("wallet.json"))
    }

    /// Current balance.
    pub async fn balance(&self) -> u32 {
        *self.balance.lock().await
    }

    /// Credit coins to the wallet. Returns the new balance.
    pub async fn credit(&self, amount: u32) -> Result<u32> {
        let mut balance = self.balance.lock().await;
        let new_balance = balance.saturating_add(amount);

        persist_balance(&self.path, new_balance)?;
        *balance = new_balance;

        debug!("Credited {} coins, balance is now {}", amount, new_balance);
        Ok(new_balance)
    }

    /// Debit coins from the wallet. Fails with `InsufficientFunds` when the
    /// balance is below the requested amount; the balance is unchanged on
    /// any failure.
    pub async fn debit(&self, amount: u32) -> Result<u32> {
        let mut balance = self.balance.lock().await;

        if *balance < amount {
            return Err(EngineError::InsufficientFunds {
                balance: *balance,
                required: amount,
            });
        }

        let new_balance = *balance - amount;
        persist_balance(&self.path, new_balance)?;
        *balance = new_balance;

        debug!("Debited {} coins, balance is now {}", amount, new_balance);
        Ok(new_balance)
    }

    /// Seed the balance from a configuration snapshot. Only applies when no
    /// wallet file was present at open; once persisted the ledger is
    /// authoritative and only credit/debit mutate it.
    pub async fn seed_if_new(&self, coins: u32) -> Result<bool> {
        if self.loaded_from_disk {
            return Ok(false);
        }

        let mut balance = self.balance.lock().await;
        if self.path.exists() {
            // Another seeding already happened
            return Ok(false);
        }

        persist_balance(&self.path, coins)?;
        *balance = coins;

        info!("Seeded wallet with {} coins", coins);
        Ok(true)
    }
}

fn load_wallet_file(path: &Path) -> Result<Option<WalletFile>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)?;
    let file: WalletFile = serde_json::from_str(&content)?;

    if file.version != WALLET_VERSION {
        tracing::warn!(
            "Wallet file version mismatch (expected {}, got {}). Starting from zero.",
            WALLET_VERSION,
            file.version
        );
        return Ok(None);
    }

    Ok(Some(file))
}

fn persist_balance(path: &Path, balance: u32) -> Result<()> {
    let file = WalletFile {
        version: WALLET_VERSION.to_string(),
        balance,
    };
    let content =
        serde_json::to_string_pretty(&file).map_err(|e| EngineError::persistence("wallet", e))?;

    platform::common::atomic_write(path, content.as_bytes())
        .map_err(|e| EngineError::persistence("wallet", e))
}
