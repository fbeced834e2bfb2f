//! Wallet balance, top-ups and tasker earnings

use crate::backend::Backend;
use crate::error::{Error, Result, ValidationError};
use crate::models::{Booking, BookingStatus, NewTransaction, Transaction, Wallet};
use std::sync::Arc;
use tracing::{debug, info};

/// Transactions shown per wallet
pub const TRANSACTION_LIMIT: u32 = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct WalletOverview {
    /// `None` for accounts created before wallets were provisioned
    pub wallet: Option<Wallet>,
    pub transactions: Vec<Transaction>,
}

impl WalletOverview {
    pub fn balance(&self) -> f64 {
        self.wallet.as_ref().map_or(0.0, |w| w.balance)
    }
}

/// Earnings from completed bookings, each at its budget
#[derive(Debug, Clone, PartialEq)]
pub struct Earnings {
    pub completed: Vec<Booking>,
    pub total: f64,
}

impl Earnings {
    pub fn from_bookings(bookings: Vec<Booking>) -> Self {
        let completed: Vec<Booking> = bookings
            .into_iter()
            .filter(|b| b.status == BookingStatus::Completed)
            .collect();
        let total = completed.iter().filter_map(|b| b.budget).sum();
        Self { completed, total }
    }
}

#[derive(Clone)]
pub struct Wallets {
    backend: Arc<dyn Backend>,
}

impl Wallets {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn overview(&self, user_id: &str) -> Result<WalletOverview> {
        let Some(wallet) = self.backend.fetch_wallet(user_id).await? else {
            debug!(user_id, "no wallet");
            return Ok(WalletOverview {
                wallet: None,
                transactions: Vec::new(),
            });
        };
        let transactions = self
            .backend
            .list_transactions(user_id, TRANSACTION_LIMIT)
            .await?;
        Ok(WalletOverview {
            wallet: Some(wallet),
            transactions,
        })
    }

    /// Record a top-up and raise the balance by `amount`
    pub async fn top_up(&self, user_id: &str, amount: f64) -> Result<Wallet> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ValidationError::InvalidAmount.into());
        }
        let wallet = self
            .backend
            .fetch_wallet(user_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("wallet for {}", user_id)))?;

        self.backend
            .insert_transaction(&NewTransaction {
                user_id: user_id.to_string(),
                amount,
                kind: "top_up".to_string(),
                description: "Wallet top-up".to_string(),
            })
            .await?;

        let balance = wallet.balance + amount;
        self.backend.set_balance(user_id, balance).await?;
        info!(user_id, amount, balance, "wallet topped up");
        Ok(Wallet { balance, ..wallet })
    }

    pub async fn earnings(&self, tasker_id: &str) -> Result<Earnings> {
        let bookings = self.backend.tasker_bookings(tasker_id).await?;
        Ok(Earnings::from_bookings(bookings))
    }
}
