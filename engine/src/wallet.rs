//! Wallet database: accounts, received notes, transparent UTXOs, stored
//! transactions, and scan progress.
//!
//! `WalletDb` is plain data with synchronous methods. Callers that share it
//! across tasks wrap it in a lock; every method here leaves the database
//! consistent on both success and failure.

use std::collections::{BTreeMap, HashSet};
use std::num::NonZeroU32;

use serde::Serialize;

use webz_primitives::types::SUBTREE_SIZE;
use webz_primitives::{
    AccountId, BlockHeight, ErrorCode, Hash, Network, OutPoint, Pool, Transaction, TxId,
    WalletError, WalletResult, Zatoshis,
};

use crate::keys::{SeedFingerprint, SpendingKey, ViewingKey};
use crate::scan::{ScanKey, ScannedBlock};

/// Blocks subtracted from the chain tip when an account is created without
/// an explicit birthday.
pub const BIRTHDAY_LOOKBACK: BlockHeight = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountPurpose {
    /// Keys derived locally; the wallet can sign.
    Spending,
    /// Imported viewing key; signing happens elsewhere.
    ViewOnly,
}

impl AccountPurpose {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Spending => 0,
            Self::ViewOnly => 1,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Spending),
            1 => Some(Self::ViewOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub viewing_key: ViewingKey,
    pub purpose: AccountPurpose,
    pub seed_fingerprint: Option<SeedFingerprint>,
    pub hd_index: Option<u32>,
    pub birthday: BlockHeight,
}

/// How a note or UTXO left the spendable set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendState {
    /// Spent by a transaction this wallet built but has not seen mined.
    Pending(TxId),
    /// Spend observed on chain at this height.
    Mined(BlockHeight),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedNote {
    pub account: AccountId,
    pub pool: Pool,
    pub value: Zatoshis,
    pub commitment: Hash,
    pub nullifier: Hash,
    pub height: BlockHeight,
    pub spent: Option<SpendState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub account: AccountId,
    pub outpoint: OutPoint,
    pub value: Zatoshis,
    pub height: BlockHeight,
    pub spent: Option<SpendState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTransaction {
    pub txid: TxId,
    pub raw: Vec<u8>,
    pub target_height: BlockHeight,
    pub mined_height: Option<BlockHeight>,
}

/// Last block the wallet has fully scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPosition {
    pub height: BlockHeight,
    pub hash: Hash,
}

/// Spendable balance of one account, split by pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccountBalance {
    pub sapling_balance: Zatoshis,
    pub orchard_balance: Zatoshis,
    pub unshielded_balance: Zatoshis,
}

impl AccountBalance {
    pub fn total(&self) -> Zatoshis {
        self.sapling_balance + self.orchard_balance + self.unshielded_balance
    }
}

/// Point-in-time view of sync progress and balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletSummary {
    /// Sorted by account id.
    pub account_balances: Vec<(AccountId, AccountBalance)>,
    pub chain_tip_height: BlockHeight,
    pub fully_scanned_height: BlockHeight,
    pub next_sapling_subtree_index: u64,
    pub next_orchard_subtree_index: u64,
}

fn is_confirmed(height: BlockHeight, tip: BlockHeight, min_confirmations: NonZeroU32) -> bool {
    height <= tip && tip - height + 1 >= min_confirmations.get()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletDb {
    pub(crate) network: Network,
    pub(crate) accounts: BTreeMap<AccountId, Account>,
    pub(crate) next_account_id: AccountId,
    pub(crate) notes: Vec<ReceivedNote>,
    pub(crate) utxos: Vec<Utxo>,
    pub(crate) transactions: BTreeMap<TxId, StoredTransaction>,
    pub(crate) chain_tip: Option<BlockHeight>,
    pub(crate) scanned: Option<ScanPosition>,
    pub(crate) rescan_from: Option<BlockHeight>,
    pub(crate) sapling_tree_size: u64,
    pub(crate) orchard_tree_size: u64,
}

impl WalletDb {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            accounts: BTreeMap::new(),
            next_account_id: 0,
            notes: Vec::new(),
            utxos: Vec::new(),
            transactions: BTreeMap::new(),
            chain_tip: None,
            scanned: None,
            rescan_from: None,
            sapling_tree_size: 0,
            orchard_tree_size: 0,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn chain_tip(&self) -> Option<BlockHeight> {
        self.chain_tip
    }

    pub fn scanned(&self) -> Option<ScanPosition> {
        self.scanned
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn account(&self, id: AccountId) -> WalletResult<&Account> {
        self.accounts
            .get(&id)
            .ok_or_else(|| WalletError::account_not_found(id))
    }

    pub fn notes(&self) -> &[ReceivedNote] {
        &self.notes
    }

    pub fn utxos(&self) -> &[Utxo] {
        &self.utxos
    }

    // ── Accounts ──

    /// Derive an account from `seed` at `hd_index` and add it.
    pub fn create_account(
        &mut self,
        name: &str,
        seed: &[u8],
        hd_index: u32,
        birthday: BlockHeight,
    ) -> WalletResult<(AccountId, SpendingKey)> {
        let usk = SpendingKey::from_seed(self.network, seed, hd_index)?;
        let id = self.import_account(
            name,
            usk.to_viewing_key(),
            AccountPurpose::Spending,
            Some(usk.seed_fingerprint()),
            Some(hd_index),
            birthday,
        )?;
        Ok((id, usk))
    }

    /// Add an account from its viewing key.
    pub fn import_account(
        &mut self,
        name: &str,
        viewing_key: ViewingKey,
        purpose: AccountPurpose,
        seed_fingerprint: Option<SeedFingerprint>,
        hd_index: Option<u32>,
        birthday: BlockHeight,
    ) -> WalletResult<AccountId> {
        if let Some(existing) = self.accounts.values().find(|a| a.viewing_key == viewing_key) {
            return Err(WalletError::new(
                ErrorCode::AccountExists,
                format!("an account with this viewing key already exists (account {})", existing.id),
            ));
        }

        let id = self.next_account_id;
        self.next_account_id += 1;
        self.accounts.insert(
            id,
            Account {
                id,
                name: name.to_owned(),
                viewing_key,
                purpose,
                seed_fingerprint,
                hd_index,
                birthday,
            },
        );

        if let Some(pos) = self.scanned {
            if birthday <= pos.height {
                let from = self.rescan_from.map_or(birthday, |r| r.min(birthday));
                self.rescan_from = Some(from.max(1));
            }
        }

        tracing::info!(account = id, birthday, ?purpose, "account added");
        Ok(id)
    }

    // ── Scanning ──

    /// First height the next sync must fetch, or `None` with no accounts.
    pub fn scan_start(&self) -> Option<BlockHeight> {
        let min_birthday = self.accounts.values().map(|a| a.birthday).min()?;
        let next = match self.scanned {
            Some(pos) => pos.height + 1,
            None => min_birthday.max(1),
        };
        Some(match self.rescan_from {
            Some(from) => from.min(next),
            None => next,
        })
    }

    pub fn scan_keys(&self) -> Vec<ScanKey> {
        self.accounts
            .values()
            .map(|a| ScanKey::new(a.id, &a.viewing_key))
            .collect()
    }

    pub fn set_chain_tip(&mut self, tip: BlockHeight) {
        if self.chain_tip.map_or(true, |t| tip >= t) {
            self.chain_tip = Some(tip);
        }
    }

    /// Apply a batch of scanned blocks as a single step.
    ///
    /// The batch is validated against the current scan position before
    /// anything is written, so a chain mismatch leaves the database as it
    /// was.
    pub fn apply_scanned(&mut self, mut blocks: Vec<ScannedBlock>) -> WalletResult<()> {
        blocks.sort_by_key(|b| b.height);

        let mut cursor = self.scanned;
        for block in &blocks {
            if let Some(pos) = cursor {
                if block.height > pos.height + 1 {
                    return Err(WalletError::new(
                        ErrorCode::ChainMismatch,
                        format!("gap in scanned blocks: expected {}, got {}", pos.height + 1, block.height),
                    ));
                }
                if block.height == pos.height + 1 && block.prev_hash != pos.hash {
                    return Err(WalletError::new(
                        ErrorCode::ChainMismatch,
                        format!("block {} does not extend the scanned chain", block.height),
                    ));
                }
            }
            if cursor.map_or(true, |p| block.height > p.height) {
                cursor = Some(ScanPosition {
                    height: block.height,
                    hash: block.hash,
                });
            }
        }

        let mut known_notes: HashSet<(AccountId, Hash)> =
            self.notes.iter().map(|n| (n.account, n.commitment)).collect();
        let mut known_utxos: HashSet<(AccountId, OutPoint)> =
            self.utxos.iter().map(|u| (u.account, u.outpoint)).collect();

        let mut received = 0usize;
        for block in blocks {
            for note in block.notes {
                if known_notes.insert((note.account, note.commitment)) {
                    self.notes.push(note);
                    received += 1;
                }
            }
            for utxo in block.utxos {
                if known_utxos.insert((utxo.account, utxo.outpoint)) {
                    self.utxos.push(utxo);
                    received += 1;
                }
            }

            let nullifiers: HashSet<Hash> = block.nullifiers.into_iter().collect();
            for note in self.notes.iter_mut().filter(|n| nullifiers.contains(&n.nullifier)) {
                note.spent = Some(SpendState::Mined(block.height));
            }
            let spends: HashSet<OutPoint> = block.transparent_spends.into_iter().collect();
            for utxo in self.utxos.iter_mut().filter(|u| spends.contains(&u.outpoint)) {
                utxo.spent = Some(SpendState::Mined(block.height));
            }
            for txid in &block.txids {
                if let Some(tx) = self.transactions.get_mut(txid) {
                    tx.mined_height = Some(block.height);
                }
            }

            let extends = self.scanned.map_or(true, |p| block.height > p.height);
            if extends {
                self.sapling_tree_size += block.sapling_outputs;
                self.orchard_tree_size += block.orchard_outputs;
                self.scanned = Some(ScanPosition {
                    height: block.height,
                    hash: block.hash,
                });
            } else if let Some(from) = self.rescan_from {
                self.rescan_from = Some(from.max(block.height + 1));
            }
        }

        if let (Some(from), Some(pos)) = (self.rescan_from, self.scanned) {
            if from > pos.height {
                self.rescan_from = None;
            }
        }

        tracing::debug!(
            scanned = ?self.scanned.map(|p| p.height),
            received,
            "applied scanned blocks"
        );
        Ok(())
    }

    /// Height through which every account's notes are known.
    pub fn fully_scanned_height(&self) -> BlockHeight {
        let scanned = self.scanned.map(|p| p.height);
        match (scanned, self.rescan_from) {
            (Some(h), Some(from)) => h.min(from.saturating_sub(1)),
            (Some(h), None) => h,
            (None, _) => self
                .accounts
                .values()
                .map(|a| a.birthday.saturating_sub(1))
                .min()
                .unwrap_or(0),
        }
    }

    // ── Balances ──

    /// Unspent notes of `account` with at least `min_confirmations`, in
    /// selection order (oldest first, ties broken by commitment).
    pub fn spendable_notes(
        &self,
        account: AccountId,
        min_confirmations: NonZeroU32,
    ) -> Vec<&ReceivedNote> {
        let Some(tip) = self.chain_tip else {
            return Vec::new();
        };
        let mut notes: Vec<&ReceivedNote> = self
            .notes
            .iter()
            .filter(|n| n.account == account && n.spent.is_none())
            .filter(|n| is_confirmed(n.height, tip, min_confirmations))
            .collect();
        notes.sort_by(|a, b| (a.height, a.commitment).cmp(&(b.height, b.commitment)));
        notes
    }

    pub fn spendable_utxos(&self, account: AccountId, min_confirmations: NonZeroU32) -> Vec<&Utxo> {
        let Some(tip) = self.chain_tip else {
            return Vec::new();
        };
        let mut utxos: Vec<&Utxo> = self
            .utxos
            .iter()
            .filter(|u| u.account == account && u.spent.is_none())
            .filter(|u| is_confirmed(u.height, tip, min_confirmations))
            .collect();
        utxos.sort_by(|a, b| (a.height, a.outpoint).cmp(&(b.height, b.outpoint)));
        utxos
    }

    pub fn balance(&self, account: AccountId, min_confirmations: NonZeroU32) -> AccountBalance {
        let mut balance = AccountBalance::default();
        for note in self.spendable_notes(account, min_confirmations) {
            match note.pool {
                Pool::Sapling => balance.sapling_balance += note.value,
                Pool::Orchard => balance.orchard_balance += note.value,
                Pool::Transparent => {}
            }
        }
        balance.unshielded_balance = self
            .spendable_utxos(account, min_confirmations)
            .iter()
            .map(|u| u.value)
            .sum();
        balance
    }

    /// `None` until a chain tip has been observed.
    pub fn summary(&self, min_confirmations: NonZeroU32) -> Option<WalletSummary> {
        let tip = self.chain_tip?;
        Some(WalletSummary {
            account_balances: self
                .accounts
                .keys()
                .map(|&id| (id, self.balance(id, min_confirmations)))
                .collect(),
            chain_tip_height: tip,
            fully_scanned_height: self.fully_scanned_height(),
            next_sapling_subtree_index: self.sapling_tree_size / SUBTREE_SIZE,
            next_orchard_subtree_index: self.orchard_tree_size / SUBTREE_SIZE,
        })
    }

    // ── Transactions ──

    /// Store an authorized transaction and lock the notes and UTXOs it
    /// spends. Returns its txid.
    pub fn record_transaction(&mut self, tx: &Transaction, target_height: BlockHeight) -> TxId {
        let txid = tx.txid();
        let nullifiers: HashSet<Hash> = tx.nullifiers.iter().map(|(_, nf)| *nf).collect();
        for note in self.notes.iter_mut().filter(|n| nullifiers.contains(&n.nullifier)) {
            note.spent.get_or_insert(SpendState::Pending(txid));
        }
        for utxo in self
            .utxos
            .iter_mut()
            .filter(|u| tx.transparent_inputs.contains(&u.outpoint))
        {
            utxo.spent.get_or_insert(SpendState::Pending(txid));
        }
        self.transactions.entry(txid).or_insert_with(|| StoredTransaction {
            txid,
            raw: tx.to_bytes(),
            target_height,
            mined_height: None,
        });
        txid
    }

    pub fn transaction(&self, txid: &TxId) -> WalletResult<&StoredTransaction> {
        self.transactions.get(txid).ok_or_else(|| {
            WalletError::new(
                ErrorCode::TransactionNotFound,
                format!("transaction {} not found in wallet", hex_id(txid)),
            )
        })
    }

    pub fn transactions(&self) -> impl Iterator<Item = &StoredTransaction> {
        self.transactions.values()
    }
}

fn hex_id(txid: &TxId) -> String {
    webz_primitives::types::hash_to_hex(txid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::scan_block;
    use webz_primitives::{CompactBlock, CompactTx, Output, ZERO_HASH};

    const SEED: [u8; 32] = [3u8; 32];

    fn one() -> NonZeroU32 {
        NonZeroU32::new(1).unwrap()
    }

    fn db_with_account(birthday: BlockHeight) -> (WalletDb, ViewingKey) {
        let mut db = WalletDb::new(Network::Test);
        let (id, usk) = db.create_account("main", &SEED, 0, birthday).unwrap();
        assert_eq!(id, 0);
        (db, usk.to_viewing_key())
    }

    fn pay(ufvk: &ViewingKey, pool: Pool, value: u64, tag: u8) -> CompactTx {
        CompactTx {
            txid: [tag; 32],
            nullifiers: vec![],
            transparent_spends: vec![],
            outputs: vec![Output {
                pool,
                recipient: ufvk.receiver(),
                value,
                commitment: [tag; 32],
            }],
        }
    }

    fn chain(start: BlockHeight, txs: Vec<Vec<CompactTx>>) -> Vec<CompactBlock> {
        let mut prev = ZERO_HASH;
        let mut out = Vec::new();
        for (i, txs) in txs.into_iter().enumerate() {
            let b = CompactBlock::new(start + i as u32, prev, txs);
            prev = b.hash;
            out.push(b);
        }
        out
    }

    fn sync(db: &mut WalletDb, blocks: &[CompactBlock]) -> WalletResult<()> {
        let keys = db.scan_keys();
        let scanned = blocks.iter().map(|b| scan_block(b, &keys)).collect();
        db.apply_scanned(scanned)?;
        if let Some(last) = blocks.last() {
            db.set_chain_tip(last.height);
        }
        Ok(())
    }

    #[test]
    fn test_summary_none_before_tip() {
        let (db, _) = db_with_account(1);
        assert!(db.summary(one()).is_none());
    }

    #[test]
    fn test_duplicate_account_rejected() {
        let (mut db, _) = db_with_account(1);
        let err = db.create_account("again", &SEED, 0, 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::AccountExists);
        assert_eq!(db.create_account("second", &SEED, 1, 1).unwrap().0, 1);
    }

    #[test]
    fn test_scan_and_balance_by_pool() {
        let (mut db, ufvk) = db_with_account(10);
        assert_eq!(db.scan_start(), Some(10));
        let blocks = chain(
            10,
            vec![
                vec![pay(&ufvk, Pool::Sapling, 1_000, 1)],
                vec![pay(&ufvk, Pool::Orchard, 2_000, 2)],
                vec![],
            ],
        );
        sync(&mut db, &blocks).unwrap();

        let summary = db.summary(one()).unwrap();
        assert_eq!(summary.chain_tip_height, 12);
        assert_eq!(summary.fully_scanned_height, 12);
        let (id, bal) = summary.account_balances[0];
        assert_eq!(id, 0);
        assert_eq!(bal.sapling_balance, 1_000);
        assert_eq!(bal.orchard_balance, 2_000);
        assert_eq!(bal.total(), 3_000);
        assert_eq!(db.scan_start(), Some(13));
    }

    #[test]
    fn test_min_confirmations_excludes_recent_notes() {
        let (mut db, ufvk) = db_with_account(1);
        let blocks = chain(1, vec![vec![pay(&ufvk, Pool::Orchard, 500, 1)], vec![], vec![]]);
        sync(&mut db, &blocks).unwrap();
        let three = NonZeroU32::new(3).unwrap();
        let four = NonZeroU32::new(4).unwrap();
        assert_eq!(db.balance(0, three).orchard_balance, 500);
        assert_eq!(db.balance(0, four).orchard_balance, 0);
    }

    #[test]
    fn test_nullifier_marks_note_spent() {
        let (mut db, ufvk) = db_with_account(1);
        let first = chain(1, vec![vec![pay(&ufvk, Pool::Orchard, 500, 1)]]);
        sync(&mut db, &first).unwrap();
        let nf = db.notes()[0].nullifier;

        let spend = CompactTx {
            txid: [9; 32],
            nullifiers: vec![nf],
            transparent_spends: vec![],
            outputs: vec![],
        };
        let next = CompactBlock::new(2, first[0].hash, vec![spend]);
        sync(&mut db, &[next]).unwrap();
        assert_eq!(db.notes()[0].spent, Some(SpendState::Mined(2)));
        assert_eq!(db.balance(0, one()).total(), 0);
    }

    #[test]
    fn test_chain_mismatch_leaves_state_untouched() {
        let (mut db, ufvk) = db_with_account(1);
        sync(&mut db, &chain(1, vec![vec![]])).unwrap();
        let before = db.clone();

        let orphan = CompactBlock::new(2, [0xee; 32], vec![pay(&ufvk, Pool::Orchard, 1, 1)]);
        let keys = db.scan_keys();
        let err = db.apply_scanned(vec![scan_block(&orphan, &keys)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::ChainMismatch);
        assert_eq!(db, before);
    }

    #[test]
    fn test_gap_rejected() {
        let (mut db, _) = db_with_account(1);
        sync(&mut db, &chain(1, vec![vec![]])).unwrap();
        let keys = db.scan_keys();
        let far = CompactBlock::new(5, ZERO_HASH, vec![]);
        assert!(db.apply_scanned(vec![scan_block(&far, &keys)]).is_err());
    }

    #[test]
    fn test_late_account_triggers_rescan() {
        let (mut db, _) = db_with_account(1);
        let other = SpendingKey::from_seed(Network::Test, &SEED, 1).unwrap().to_viewing_key();
        let blocks = chain(1, vec![vec![pay(&other, Pool::Sapling, 700, 1)], vec![]]);
        sync(&mut db, &blocks).unwrap();
        assert_eq!(db.scan_start(), Some(3));

        db.import_account("late", other, AccountPurpose::ViewOnly, None, None, 1).unwrap();
        assert_eq!(db.scan_start(), Some(1));
        assert_eq!(db.fully_scanned_height(), 0);

        sync(&mut db, &blocks).unwrap();
        assert_eq!(db.scan_start(), Some(3));
        assert_eq!(db.balance(1, one()).sapling_balance, 700);
        // Rescanning does not duplicate notes or recount the tree.
        sync(&mut db, &[]).unwrap();
        assert_eq!(db.notes().len(), 1);
        assert_eq!(db.sapling_tree_size, 1);
    }

    #[test]
    fn test_transparent_utxos_count_as_unshielded() {
        let (mut db, ufvk) = db_with_account(1);
        let tx = CompactTx {
            txid: [4; 32],
            nullifiers: vec![],
            transparent_spends: vec![],
            outputs: vec![Output {
                pool: Pool::Transparent,
                recipient: webz_primitives::address::pad_pubkey_hash(&ufvk.transparent_pubkey_hash()),
                value: 900,
                commitment: [0; 32],
            }],
        };
        sync(&mut db, &chain(1, vec![vec![tx]])).unwrap();
        assert_eq!(db.balance(0, one()).unshielded_balance, 900);
        assert_eq!(db.spendable_utxos(0, one())[0].outpoint.index, 0);
    }

    #[test]
    fn test_record_transaction_locks_inputs() {
        let (mut db, ufvk) = db_with_account(1);
        sync(&mut db, &chain(1, vec![vec![pay(&ufvk, Pool::Orchard, 500, 1)]])).unwrap();
        let nf = db.notes()[0].nullifier;
        let tx = Transaction {
            expiry_height: 50,
            fee: 10_000,
            nullifiers: vec![(Pool::Orchard, nf)],
            transparent_inputs: vec![],
            outputs: vec![],
            auth_digest: [0; 32],
        };
        let txid = db.record_transaction(&tx, 2);
        assert_eq!(db.notes()[0].spent, Some(SpendState::Pending(txid)));
        assert_eq!(db.transaction(&txid).unwrap().raw, tx.to_bytes());
        assert_eq!(
            db.transaction(&[0; 32]).unwrap_err().code,
            ErrorCode::TransactionNotFound
        );
    }

    #[test]
    fn test_subtree_index() {
        let (mut db, _) = db_with_account(1);
        db.orchard_tree_size = SUBTREE_SIZE * 2 + 5;
        db.set_chain_tip(10);
        assert_eq!(db.summary(one()).unwrap().next_orchard_subtree_index, 2);
        assert_eq!(db.summary(one()).unwrap().next_sapling_subtree_index, 0);
    }

    #[test]
    fn test_unknown_account() {
        let db = WalletDb::new(Network::Main);
        assert_eq!(db.account(4).unwrap_err().code, ErrorCode::AccountNotFound);
        assert_eq!(db.scan_start(), None);
    }
}
