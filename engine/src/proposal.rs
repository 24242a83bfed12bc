//! Transaction proposals: input selection and fee computation.
//!
//! A [`Proposal`] is the reviewable plan for a transaction. It names every
//! input it will consume, the payment, the change, and the fee, but holds
//! no authorization. Turning it into a PCZT is a separate step.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use webz_primitives::types::{GRACE_ACTIONS, MARGINAL_FEE};
use webz_primitives::{
    AccountId, Address, BlockHeight, Hash, OutPoint, Pool, WalletError, WalletResult, Zatoshis,
};

use crate::wallet::WalletDb;

pub use webz_primitives::types::MAX_MONEY;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Address exactly as the caller supplied it.
    pub address: String,
    pub pool: Pool,
    pub recipient: Hash,
    pub amount: Zatoshis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldedInput {
    pub pool: Pool,
    pub nullifier: Hash,
    pub value: Zatoshis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransparentUtxoInput {
    pub outpoint: OutPoint,
    pub value: Zatoshis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub account: AccountId,
    pub target_height: BlockHeight,
    /// `None` for shielding proposals, which only move funds between the
    /// account's own pools.
    pub payment: Option<Payment>,
    pub shielded_inputs: Vec<ShieldedInput>,
    pub transparent_inputs: Vec<TransparentUtxoInput>,
    pub fee: Zatoshis,
    /// Value returned to the account's Orchard receiver.
    pub change: Zatoshis,
}

impl Proposal {
    pub fn total_input(&self) -> Zatoshis {
        self.shielded_inputs.iter().map(|i| i.value).sum::<u64>()
            + self.transparent_inputs.iter().map(|i| i.value).sum::<u64>()
    }

    pub fn is_shielding(&self) -> bool {
        self.payment.is_none()
    }
}

/// Per-pool input and output counts used for fee computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionCounts {
    pub sapling_spends: usize,
    pub sapling_outputs: usize,
    pub orchard_spends: usize,
    pub orchard_outputs: usize,
    pub transparent_inputs: usize,
    pub transparent_outputs: usize,
}

impl ActionCounts {
    pub fn add_spend(&mut self, pool: Pool) {
        match pool {
            Pool::Transparent => self.transparent_inputs += 1,
            Pool::Sapling => self.sapling_spends += 1,
            Pool::Orchard => self.orchard_spends += 1,
        }
    }

    pub fn add_output(&mut self, pool: Pool) {
        match pool {
            Pool::Transparent => self.transparent_outputs += 1,
            Pool::Sapling => self.sapling_outputs += 1,
            Pool::Orchard => self.orchard_outputs += 1,
        }
    }

    pub fn logical_actions(&self) -> usize {
        self.sapling_spends.max(self.sapling_outputs)
            + self.orchard_spends.max(self.orchard_outputs)
            + self.transparent_inputs.max(self.transparent_outputs)
    }

    /// Conventional fee: a marginal fee per logical action, with a floor
    /// of [`GRACE_ACTIONS`] actions.
    pub fn fee(&self) -> Zatoshis {
        MARGINAL_FEE * self.logical_actions().max(GRACE_ACTIONS) as u64
    }
}

/// Plan a payment of `amount` to `to` from `account`'s shielded funds.
///
/// Notes are selected oldest first until they cover the amount plus the fee
/// implied by the selection. Change always returns to the Orchard pool.
pub fn propose_transfer(
    db: &WalletDb,
    account: AccountId,
    to: &str,
    amount: Zatoshis,
    min_confirmations: NonZeroU32,
) -> WalletResult<Proposal> {
    let account = db.account(account)?.id;
    if amount == 0 {
        return Err(WalletError::invalid_argument("transfer amount must be non-zero"));
    }
    if amount > MAX_MONEY {
        return Err(WalletError::invalid_argument(format!(
            "transfer amount {amount} exceeds the maximum of {MAX_MONEY}"
        )));
    }
    let address = Address::decode(db.network(), to)?;
    let tip = synced_tip(db)?;

    let mut counts = ActionCounts::default();
    counts.add_output(address.payment_pool());
    counts.add_output(Pool::Orchard);

    let candidates = db.spendable_notes(account, min_confirmations);
    let available: Zatoshis = candidates.iter().map(|n| n.value).sum();

    let mut selected = Vec::new();
    let mut total: Zatoshis = 0;
    for note in candidates {
        if total >= amount + counts.fee() {
            break;
        }
        counts.add_spend(note.pool);
        total += note.value;
        selected.push(ShieldedInput {
            pool: note.pool,
            nullifier: note.nullifier,
            value: note.value,
        });
    }

    let fee = counts.fee();
    let required = amount + fee;
    if total < required {
        return Err(WalletError::insufficient_funds(available, required));
    }

    let proposal = Proposal {
        account,
        target_height: tip + 1,
        payment: Some(Payment {
            address: to.to_owned(),
            pool: address.payment_pool(),
            recipient: address.recipient(),
            amount,
        }),
        shielded_inputs: selected,
        transparent_inputs: Vec::new(),
        fee,
        change: total - required,
    };
    tracing::debug!(
        account,
        amount,
        fee,
        inputs = proposal.shielded_inputs.len(),
        "proposed transfer"
    );
    Ok(proposal)
}

/// Plan moving every confirmed transparent UTXO of `account` into its
/// Orchard receiver.
pub fn propose_shielding(
    db: &WalletDb,
    account: AccountId,
    min_confirmations: NonZeroU32,
) -> WalletResult<Proposal> {
    let account = db.account(account)?.id;
    let tip = synced_tip(db)?;

    let utxos = db.spendable_utxos(account, min_confirmations);
    if utxos.is_empty() {
        return Err(WalletError::new(
            webz_primitives::ErrorCode::InsufficientFunds,
            "no confirmed transparent funds to shield",
        ));
    }

    let mut counts = ActionCounts::default();
    counts.add_output(Pool::Orchard);
    let mut inputs = Vec::with_capacity(utxos.len());
    for utxo in utxos {
        counts.add_spend(Pool::Transparent);
        inputs.push(TransparentUtxoInput {
            outpoint: utxo.outpoint,
            value: utxo.value,
        });
    }

    let total: Zatoshis = inputs.iter().map(|i| i.value).sum();
    let fee = counts.fee();
    if total <= fee {
        return Err(WalletError::insufficient_funds(total, fee + 1));
    }

    Ok(Proposal {
        account,
        target_height: tip + 1,
        payment: None,
        shielded_inputs: Vec::new(),
        transparent_inputs: inputs,
        fee,
        change: total - fee,
    })
}

fn synced_tip(db: &WalletDb) -> WalletResult<BlockHeight> {
    db.chain_tip()
        .ok_or_else(|| WalletError::invalid_argument("chain tip unknown; sync the wallet first"))
}
