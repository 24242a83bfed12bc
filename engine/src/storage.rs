//! Persisted wallet database format.
//!
//! Layout: `"WEBZDB" || version:u8 || body`, body fields in declaration
//! order using the primitives codec. Decoding rejects unknown versions and
//! trailing bytes.

use std::collections::BTreeMap;

use webz_primitives::codec::{
    write_bool, write_hash, write_optional_hash, write_optional_u32, write_outpoint, write_string,
    write_u32, write_u64, write_u8, write_var_bytes, Reader,
};
use webz_primitives::types::DB_FORMAT_VERSION;
use webz_primitives::{WalletError, WalletResult};

use crate::keys::{SeedFingerprint, ViewingKey};
use crate::wallet::{
    Account, AccountPurpose, ReceivedNote, ScanPosition, SpendState, StoredTransaction, Utxo,
    WalletDb,
};

/// Leading bytes of a serialized wallet database.
pub const DB_MAGIC: &[u8; 6] = b"WEBZDB";

fn write_spend_state(buf: &mut Vec<u8>, state: &Option<SpendState>) {
    match state {
        None => write_u8(buf, 0),
        Some(SpendState::Pending(txid)) => {
            write_u8(buf, 1);
            write_hash(buf, txid);
        }
        Some(SpendState::Mined(height)) => {
            write_u8(buf, 2);
            write_u32(buf, *height);
        }
    }
}

fn read_spend_state(r: &mut Reader<'_>) -> WalletResult<Option<SpendState>> {
    match r.read_u8()? {
        0 => Ok(None),
        1 => Ok(Some(SpendState::Pending(r.read_hash()?))),
        2 => Ok(Some(SpendState::Mined(r.read_u32()?))),
        tag => Err(WalletError::encoding(format!("invalid spend state tag {tag}"))),
    }
}

impl WalletDb {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1024);
        buf.extend_from_slice(DB_MAGIC);
        write_u8(&mut buf, DB_FORMAT_VERSION);
        write_u8(&mut buf, self.network.as_u8());
        write_u32(&mut buf, self.next_account_id);

        write_u32(&mut buf, self.accounts.len() as u32);
        for account in self.accounts.values() {
            write_u32(&mut buf, account.id);
            write_string(&mut buf, &account.name);
            write_hash(&mut buf, &account.viewing_key.ak);
            write_hash(&mut buf, &account.viewing_key.nk);
            write_u8(&mut buf, account.purpose.as_u8());
            write_optional_hash(&mut buf, &account.seed_fingerprint.map(|fp| fp.to_bytes()));
            write_optional_u32(&mut buf, account.hd_index);
            write_u32(&mut buf, account.birthday);
        }

        write_u32(&mut buf, self.notes.len() as u32);
        for note in &self.notes {
            write_u32(&mut buf, note.account);
            write_u8(&mut buf, note.pool.as_u8());
            write_u64(&mut buf, note.value);
            write_hash(&mut buf, &note.commitment);
            write_hash(&mut buf, &note.nullifier);
            write_u32(&mut buf, note.height);
            write_spend_state(&mut buf, &note.spent);
        }

        write_u32(&mut buf, self.utxos.len() as u32);
        for utxo in &self.utxos {
            write_u32(&mut buf, utxo.account);
            write_outpoint(&mut buf, &utxo.outpoint);
            write_u64(&mut buf, utxo.value);
            write_u32(&mut buf, utxo.height);
            write_spend_state(&mut buf, &utxo.spent);
        }

        write_u32(&mut buf, self.transactions.len() as u32);
        for tx in self.transactions.values() {
            write_hash(&mut buf, &tx.txid);
            write_var_bytes(&mut buf, &tx.raw);
            write_u32(&mut buf, tx.target_height);
            write_optional_u32(&mut buf, tx.mined_height);
        }

        write_optional_u32(&mut buf, self.chain_tip);
        write_bool(&mut buf, self.scanned.is_some());
        if let Some(pos) = self.scanned {
            write_u32(&mut buf, pos.height);
            write_hash(&mut buf, &pos.hash);
        }
        write_optional_u32(&mut buf, self.rescan_from);
        write_u64(&mut buf, self.sapling_tree_size);
        write_u64(&mut buf, self.orchard_tree_size);
        buf
    }

    /// Restore a database written by [`WalletDb::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> WalletResult<Self> {
        let mut r = Reader::new(data);
        if r.read_bytes(DB_MAGIC.len())? != DB_MAGIC {
            return Err(WalletError::encoding("not a wallet database: bad magic"));
        }
        let version = r.read_u8()?;
        if version != DB_FORMAT_VERSION {
            return Err(WalletError::encoding(format!(
                "unsupported wallet database version {version}"
            )));
        }
        let network = r.read_network()?;
        let next_account_id = r.read_u32()?;

        let account_count = r.read_count(32)?;
        let mut accounts = BTreeMap::new();
        for _ in 0..account_count {
            let id = r.read_u32()?;
            let name = r.read_string()?;
            let viewing_key = ViewingKey {
                ak: r.read_hash()?,
                nk: r.read_hash()?,
            };
            let purpose_tag = r.read_u8()?;
            let purpose = AccountPurpose::from_u8(purpose_tag).ok_or_else(|| {
                WalletError::encoding(format!("invalid account purpose {purpose_tag}"))
            })?;
            let seed_fingerprint = match r.read_optional_hash()? {
                Some(bytes) => Some(SeedFingerprint::from_bytes(&bytes)?),
                None => None,
            };
            let hd_index = r.read_optional_u32()?;
            let birthday = r.read_u32()?;
            if id >= next_account_id {
                return Err(WalletError::encoding(format!(
                    "account id {id} is not below the next id {next_account_id}"
                )));
            }
            accounts.insert(
                id,
                Account {
                    id,
                    name,
                    viewing_key,
                    purpose,
                    seed_fingerprint,
                    hd_index,
                    birthday,
                },
            );
        }

        let note_count = r.read_count(80)?;
        let mut notes = Vec::with_capacity(note_count);
        for _ in 0..note_count {
            notes.push(ReceivedNote {
                account: r.read_u32()?,
                pool: r.read_pool()?,
                value: r.read_u64()?,
                commitment: r.read_hash()?,
                nullifier: r.read_hash()?,
                height: r.read_u32()?,
                spent: read_spend_state(&mut r)?,
            });
        }

        let utxo_count = r.read_count(52)?;
        let mut utxos = Vec::with_capacity(utxo_count);
        for _ in 0..utxo_count {
            utxos.push(Utxo {
                account: r.read_u32()?,
                outpoint: r.read_outpoint()?,
                value: r.read_u64()?,
                height: r.read_u32()?,
                spent: read_spend_state(&mut r)?,
            });
        }

        let tx_count = r.read_count(40)?;
        let mut transactions = BTreeMap::new();
        for _ in 0..tx_count {
            let txid = r.read_hash()?;
            let raw = r.read_var_bytes()?;
            let target_height = r.read_u32()?;
            let mined_height = r.read_optional_u32()?;
            transactions.insert(
                txid,
                StoredTransaction {
                    txid,
                    raw,
                    target_height,
                    mined_height,
                },
            );
        }

        let chain_tip = r.read_optional_u32()?;
        let scanned = if r.read_bool()? {
            Some(ScanPosition {
                height: r.read_u32()?,
                hash: r.read_hash()?,
            })
        } else {
            None
        };
        let rescan_from = r.read_optional_u32()?;
        let sapling_tree_size = r.read_u64()?;
        let orchard_tree_size = r.read_u64()?;
        r.finish()?;

        Ok(Self {
            network,
            accounts,
            next_account_id,
            notes,
            utxos,
            transactions,
            chain_tip,
            scanned,
            rescan_from,
            sapling_tree_size,
            orchard_tree_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webz_primitives::{ErrorCode, Network, OutPoint, Pool};

    fn populated() -> WalletDb {
        let mut db = WalletDb::new(Network::Test);
        let (_, usk) = db.create_account("spender", &[4u8; 32], 0, 10).unwrap();
        db.import_account(
            "watcher",
            crate::keys::SpendingKey::from_seed(Network::Test, &[4u8; 32], 1)
                .unwrap()
                .to_viewing_key(),
            AccountPurpose::ViewOnly,
            None,
            None,
            12,
        )
        .unwrap();
        db.notes.push(ReceivedNote {
            account: 0,
            pool: Pool::Sapling,
            value: 5,
            commitment: [1; 32],
            nullifier: usk.to_viewing_key().nullifier(&[1; 32]),
            height: 11,
            spent: Some(SpendState::Pending([2; 32])),
        });
        db.utxos.push(Utxo {
            account: 1,
            outpoint: OutPoint { txid: [3; 32], index: 4 },
            value: 6,
            height: 12,
            spent: Some(SpendState::Mined(13)),
        });
        db.transactions.insert(
            [2; 32],
            StoredTransaction {
                txid: [2; 32],
                raw: vec![1, 2, 3],
                target_height: 14,
                mined_height: None,
            },
        );
        db.set_chain_tip(20);
        db.scanned = Some(ScanPosition { height: 19, hash: [8; 32] });
        db.rescan_from = Some(12);
        db.orchard_tree_size = 70_000;
        db
    }

    #[test]
    fn test_restore_reproduces_state() {
        let db = populated();
        let restored = WalletDb::from_bytes(&db.to_bytes()).unwrap();
        assert_eq!(restored, db);
    }

    #[test]
    fn test_empty_db_restores() {
        let db = WalletDb::new(Network::Main);
        assert_eq!(WalletDb::from_bytes(&db.to_bytes()).unwrap(), db);
    }

    #[test]
    fn test_bad_magic_and_version() {
        let mut bytes = populated().to_bytes();
        bytes[0] = b'X';
        assert!(WalletDb::from_bytes(&bytes).unwrap_err().message.contains("magic"));

        let mut bytes = populated().to_bytes();
        bytes[DB_MAGIC.len()] = 99;
        let err = WalletDb::from_bytes(&bytes).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidEncoding);
        assert!(err.message.contains("99"));
    }

    #[test]
    fn test_truncated_db_rejected() {
        let bytes = populated().to_bytes();
        assert!(WalletDb::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(WalletDb::from_bytes(&[]).is_err());
    }
}
