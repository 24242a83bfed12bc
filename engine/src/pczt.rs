//! PCZT lifecycle: create → sign → prove → (combine) → extract.
//!
//! Every stage after creation only adds authorization. The effects, and so
//! [`Pczt::sighash`], are fixed at creation; signatures bind to the
//! sighash and proofs bind to the sighash plus the position they cover.
//!
//! Proving is split into [`proof_jobs`] and [`apply_proofs`] so the caller
//! decides where the expensive part runs (sequentially, or fanned out over
//! a worker pool).

use webz_primitives::crypto::{self, derive_key, keyed_hash};
use webz_primitives::types::DEFAULT_EXPIRY_DELTA;
use webz_primitives::{
    ErrorCode, Hash, Output, Pczt, PcztOutput, Pool, Proof, ShieldedSpend, Signature,
    Transaction, TransparentInput, WalletError, WalletResult,
};

use crate::keys::{ProofGenerationKey, SeedFingerprint, SpendingKey};
use crate::proposal::Proposal;
use crate::wallet::WalletDb;

const COMMITMENT_CONTEXT: &str = "webz 2024 note commitment";
const OUTPUT_PROOF_CONTEXT: &str = "webz 2024 sapling output proof";
const ORCHARD_PROOF_CONTEXT: &str = "webz 2024 orchard bundle proof";

/// Hash iterations per proof. Stands in for circuit work.
pub const PROOF_WORK_ROUNDS: usize = 2_048;

// ── Creation ──

/// Build an unauthorized PCZT realizing `proposal`.
pub fn create_pczt(db: &WalletDb, proposal: &Proposal) -> WalletResult<Pczt> {
    let account = db.account(proposal.account)?;
    let ufvk = account.viewing_key;

    let mut spends = Vec::with_capacity(proposal.shielded_inputs.len());
    for input in &proposal.shielded_inputs {
        let note = db
            .notes()
            .iter()
            .find(|n| n.account == account.id && n.nullifier == input.nullifier)
            .ok_or_else(|| WalletError::invalid_argument("proposal references an unknown note"))?;
        if note.spent.is_some() {
            return Err(WalletError::invalid_argument(
                "proposal spends a note that is no longer spendable",
            ));
        }
        spends.push(ShieldedSpend {
            pool: note.pool,
            nullifier: note.nullifier,
            value: note.value,
            ak: ufvk.ak,
            nk: ufvk.nk,
            spend_auth_sig: None,
            proof: None,
        });
    }

    let mut transparent_inputs = Vec::with_capacity(proposal.transparent_inputs.len());
    for input in &proposal.transparent_inputs {
        let utxo = db
            .utxos()
            .iter()
            .find(|u| u.account == account.id && u.outpoint == input.outpoint)
            .ok_or_else(|| WalletError::invalid_argument("proposal references an unknown UTXO"))?;
        if utxo.spent.is_some() {
            return Err(WalletError::invalid_argument(
                "proposal spends a UTXO that is no longer spendable",
            ));
        }
        transparent_inputs.push(TransparentInput {
            outpoint: utxo.outpoint,
            value: utxo.value,
            pubkey: ufvk.ak,
            signature: None,
        });
    }

    let input_digest = {
        let mut buf = Vec::new();
        for s in &spends {
            buf.extend_from_slice(&s.nullifier);
        }
        for i in &transparent_inputs {
            buf.extend_from_slice(&i.outpoint.txid);
            buf.extend_from_slice(&i.outpoint.index.to_le_bytes());
        }
        crypto::hash_blake3(&buf)
    };

    let mut outputs = Vec::with_capacity(2);
    if let Some(payment) = &proposal.payment {
        outputs.push(PcztOutput {
            pool: payment.pool,
            recipient: payment.recipient,
            value: payment.amount,
            commitment: [0; 32],
            is_change: false,
            proof: None,
        });
    }
    if proposal.change > 0 {
        outputs.push(PcztOutput {
            pool: Pool::Orchard,
            recipient: ufvk.receiver(),
            value: proposal.change,
            commitment: [0; 32],
            is_change: true,
            proof: None,
        });
    }
    for (index, output) in outputs.iter_mut().enumerate() {
        output.commitment = note_commitment(&input_digest, index, output);
    }

    let pczt = Pczt {
        network: db.network(),
        target_height: proposal.target_height,
        expiry_height: proposal.target_height + DEFAULT_EXPIRY_DELTA,
        fee: proposal.fee,
        spends,
        transparent_inputs,
        outputs,
        orchard_proof: None,
    };
    if !pczt.is_balanced()? {
        return Err(WalletError::new(
            ErrorCode::Internal,
            "proposal does not balance: inputs != outputs + fee",
        ));
    }
    Ok(pczt)
}

fn note_commitment(input_digest: &Hash, index: usize, output: &PcztOutput) -> Hash {
    let mut material = Vec::with_capacity(32 + 8 + 1 + 32 + 8);
    material.extend_from_slice(input_digest);
    material.extend_from_slice(&(index as u64).to_le_bytes());
    material.push(output.pool.as_u8());
    material.extend_from_slice(&output.recipient);
    material.extend_from_slice(&output.value.to_le_bytes());
    derive_key(COMMITMENT_CONTEXT, &material)
}

// ── Signing ──

/// Add spend authorization signatures for every input `usk` controls.
///
/// `seed_fingerprint` must identify the seed `usk` was derived from. Fails
/// if the key authorizes none of the inputs.
pub fn sign_pczt(
    mut pczt: Pczt,
    usk: &SpendingKey,
    seed_fingerprint: &SeedFingerprint,
) -> WalletResult<Pczt> {
    if usk.network() != pczt.network {
        return Err(WalletError::new(
            ErrorCode::InvalidKey,
            format!(
                "spending key is for {} but the PCZT is for {}",
                usk.network(),
                pczt.network
            ),
        ));
    }
    if usk.seed_fingerprint() != *seed_fingerprint {
        return Err(WalletError::new(
            ErrorCode::InvalidKey,
            "seed fingerprint does not match the spending key",
        ));
    }

    let sighash = pczt.sighash();
    let ak = usk.ak();
    let mut signed = 0usize;
    for spend in pczt.spends.iter_mut().filter(|s| s.ak == ak) {
        spend.spend_auth_sig = Some(usk.sign(&sighash));
        signed += 1;
    }
    for input in pczt.transparent_inputs.iter_mut().filter(|i| i.pubkey == ak) {
        input.signature = Some(usk.sign(&sighash));
        signed += 1;
    }
    if signed == 0 {
        return Err(WalletError::new(
            ErrorCode::InvalidKey,
            "spending key does not authorize any input of this PCZT",
        ));
    }
    tracing::debug!(signed, "signed PCZT inputs");
    Ok(pczt)
}

// ── Proving ──

/// One independent unit of proving work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofJob {
    SaplingSpend { index: usize, nk: Hash, sighash: Hash },
    SaplingOutput { index: usize, sighash: Hash },
    OrchardBundle { sighash: Hash },
}

impl ProofJob {
    /// Run the proof computation. Pure and thread-safe.
    pub fn prove(&self) -> Proof {
        let mut acc = match self {
            Self::SaplingSpend { index, nk, sighash } => {
                keyed_hash(nk, &statement(sighash, *index))
            }
            Self::SaplingOutput { index, sighash } => {
                derive_key(OUTPUT_PROOF_CONTEXT, &statement(sighash, *index))
            }
            Self::OrchardBundle { sighash } => derive_key(ORCHARD_PROOF_CONTEXT, sighash),
        };
        for _ in 0..PROOF_WORK_ROUNDS {
            acc = crypto::hash_blake3(&acc);
        }
        acc
    }
}

fn statement(sighash: &Hash, index: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(40);
    out.extend_from_slice(sighash);
    out.extend_from_slice(&(index as u64).to_le_bytes());
    out
}

/// List the proofs `pczt` still lacks.
///
/// Sapling spends require a proof generation key whose `nk` matches the
/// spend. Orchard needs no key. Proofs already present are skipped.
pub fn proof_jobs(pczt: &Pczt, pgk: Option<&ProofGenerationKey>) -> WalletResult<Vec<ProofJob>> {
    let sighash = pczt.sighash();
    let mut jobs = Vec::new();

    for (index, spend) in pczt.spends.iter().enumerate() {
        if spend.pool != Pool::Sapling || spend.proof.is_some() {
            continue;
        }
        let pgk = pgk.ok_or_else(|| {
            WalletError::new(
                ErrorCode::MissingProvingKey,
                "a proof generation key is required to prove Sapling spends",
            )
        })?;
        if pgk.nk() != spend.nk {
            return Err(WalletError::new(
                ErrorCode::InvalidKey,
                format!("proof generation key does not match Sapling spend {index}"),
            ));
        }
        jobs.push(ProofJob::SaplingSpend {
            index,
            nk: spend.nk,
            sighash,
        });
    }

    for (index, output) in pczt.outputs.iter().enumerate() {
        if output.pool == Pool::Sapling && output.proof.is_none() {
            jobs.push(ProofJob::SaplingOutput { index, sighash });
        }
    }

    if pczt.has_orchard() && pczt.orchard_proof.is_none() {
        jobs.push(ProofJob::OrchardBundle { sighash });
    }
    Ok(jobs)
}

/// Attach `proofs` (one per job, same order) to `pczt`.
pub fn apply_proofs(mut pczt: Pczt, jobs: &[ProofJob], proofs: Vec<Proof>) -> WalletResult<Pczt> {
    if jobs.len() != proofs.len() {
        return Err(WalletError::new(
            ErrorCode::Internal,
            format!("{} proofs for {} jobs", proofs.len(), jobs.len()),
        ));
    }
    for (job, proof) in jobs.iter().zip(proofs) {
        match job {
            ProofJob::SaplingSpend { index, .. } => pczt.spends[*index].proof = Some(proof),
            ProofJob::SaplingOutput { index, .. } => pczt.outputs[*index].proof = Some(proof),
            ProofJob::OrchardBundle { .. } => pczt.orchard_proof = Some(proof),
        }
    }
    Ok(pczt)
}

/// Prove `pczt`, running the jobs through `run`.
pub fn prove_pczt<F>(pczt: Pczt, pgk: Option<&ProofGenerationKey>, run: F) -> WalletResult<Pczt>
where
    F: FnOnce(&[ProofJob]) -> Vec<Proof>,
{
    let jobs = proof_jobs(&pczt, pgk)?;
    let proofs = run(&jobs);
    apply_proofs(pczt, &jobs, proofs)
}

// ── Combining ──

fn merge<T: PartialEq + Copy>(into: &mut Option<T>, from: Option<T>, what: &str) -> WalletResult<()> {
    match (*into, from) {
        (_, None) => Ok(()),
        (None, Some(v)) => {
            *into = Some(v);
            Ok(())
        }
        (Some(a), Some(b)) if a == b => Ok(()),
        (Some(_), Some(_)) => Err(WalletError::new(
            ErrorCode::MismatchedPczt,
            format!("conflicting {what}"),
        )),
    }
}

/// Merge partial authorizations of the same draft.
///
/// All inputs must share one sighash. Authorization present in any input
/// is carried into the result; two different values for the same slot are
/// an error.
pub fn combine_pczts(pczts: Vec<Pczt>) -> WalletResult<Pczt> {
    let mut iter = pczts.into_iter();
    let mut combined = iter
        .next()
        .ok_or_else(|| WalletError::invalid_argument("cannot combine an empty list of PCZTs"))?;
    let sighash = combined.sighash();

    for other in iter {
        if other.sighash() != sighash {
            return Err(WalletError::new(
                ErrorCode::MismatchedPczt,
                "PCZTs describe different transactions",
            ));
        }
        for (i, (dst, src)) in combined.spends.iter_mut().zip(other.spends).enumerate() {
            merge(&mut dst.spend_auth_sig, src.spend_auth_sig, &format!("signature for spend {i}"))?;
            merge(&mut dst.proof, src.proof, &format!("proof for spend {i}"))?;
        }
        for (i, (dst, src)) in combined
            .transparent_inputs
            .iter_mut()
            .zip(other.transparent_inputs)
            .enumerate()
        {
            merge(&mut dst.signature, src.signature, &format!("signature for transparent input {i}"))?;
        }
        for (i, (dst, src)) in combined.outputs.iter_mut().zip(other.outputs).enumerate() {
            merge(&mut dst.proof, src.proof, &format!("proof for output {i}"))?;
        }
        merge(&mut combined.orchard_proof, other.orchard_proof, "Orchard bundle proof")?;
    }
    Ok(combined)
}

// ── Extraction ──

fn check_signature(sig: Option<Signature>, sighash: &Hash, key: &[u8; 32], what: &str) -> WalletResult<()> {
    let sig = sig.ok_or_else(|| {
        WalletError::new(ErrorCode::MissingSignature, format!("{what} is not signed"))
    })?;
    if !crypto::verify_ed25519(sighash, &sig.0, key) {
        return Err(WalletError::new(
            ErrorCode::MissingSignature,
            format!("{what} has an invalid signature"),
        ));
    }
    Ok(())
}

fn check_proof(actual: Option<Proof>, job: ProofJob, what: &str) -> WalletResult<()> {
    let proof = actual.ok_or_else(|| {
        WalletError::new(ErrorCode::MissingProof, format!("{what} is not proven"))
    })?;
    if proof != job.prove() {
        return Err(WalletError::new(
            ErrorCode::MissingProof,
            format!("{what} has an invalid proof"),
        ));
    }
    Ok(())
}

/// Verify that `pczt` is fully authorized and extract the final
/// transaction.
pub fn extract_transaction(pczt: &Pczt) -> WalletResult<Transaction> {
    if !pczt.is_balanced()? {
        return Err(WalletError::invalid_argument("PCZT does not balance"));
    }
    let sighash = pczt.sighash();

    for (index, spend) in pczt.spends.iter().enumerate() {
        let what = format!("spend {index}");
        check_signature(spend.spend_auth_sig, &sighash, &spend.ak, &what)?;
        if spend.pool == Pool::Sapling {
            let job = ProofJob::SaplingSpend { index, nk: spend.nk, sighash };
            check_proof(spend.proof, job, &what)?;
        }
    }
    for (index, input) in pczt.transparent_inputs.iter().enumerate() {
        let what = format!("transparent input {index}");
        check_signature(input.signature, &sighash, &input.pubkey, &what)?;
    }
    for (index, output) in pczt.outputs.iter().enumerate() {
        if output.pool == Pool::Sapling {
            let job = ProofJob::SaplingOutput { index, sighash };
            check_proof(output.proof, job, &format!("output {index}"))?;
        }
    }
    if pczt.has_orchard() {
        check_proof(pczt.orchard_proof, ProofJob::OrchardBundle { sighash }, "Orchard bundle")?;
    }

    Ok(Transaction {
        expiry_height: pczt.expiry_height,
        fee: pczt.fee,
        nullifiers: pczt.spends.iter().map(|s| (s.pool, s.nullifier)).collect(),
        transparent_inputs: pczt.transparent_inputs.iter().map(|i| i.outpoint).collect(),
        outputs: pczt
            .outputs
            .iter()
            .map(|o| Output {
                pool: o.pool,
                recipient: o.recipient,
                value: o.value,
                commitment: o.commitment,
            })
            .collect(),
        auth_digest: crypto::hash_blake3(&pczt.to_bytes()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::{propose_shielding, propose_transfer};
    use crate::scan::scan_block;
    use std::num::NonZeroU32;
    use webz_primitives::address::pad_pubkey_hash;
    use webz_primitives::{Address, CompactBlock, CompactTx, Network, ZERO_HASH};

    const SEED: [u8; 32] = [9u8; 32];

    fn one() -> NonZeroU32 {
        NonZeroU32::new(1).unwrap()
    }

    fn setup(outputs: &[(Pool, u64)]) -> (WalletDb, SpendingKey) {
        let mut db = WalletDb::new(Network::Test);
        let (_, usk) = db.create_account("a", &SEED, 0, 1).unwrap();
        let ufvk = usk.to_viewing_key();
        let tx = CompactTx {
            txid: [1; 32],
            nullifiers: vec![],
            transparent_spends: vec![],
            outputs: outputs
                .iter()
                .enumerate()
                .map(|(i, (pool, value))| Output {
                    pool: *pool,
                    recipient: match pool {
                        Pool::Transparent => pad_pubkey_hash(&ufvk.transparent_pubkey_hash()),
                        _ => ufvk.receiver(),
                    },
                    value: *value,
                    commitment: [i as u8 + 10; 32],
                })
                .collect(),
        };
        let block = CompactBlock::new(1, ZERO_HASH, vec![tx]);
        let keys = db.scan_keys();
        db.apply_scanned(vec![scan_block(&block, &keys)]).unwrap();
        db.set_chain_tip(5);
        (db, usk)
    }

    fn to() -> String {
        Address::Unified { receiver: [0x42; 32] }.encode(Network::Test)
    }

    fn draft(db: &WalletDb, amount: u64) -> Pczt {
        let proposal = propose_transfer(db, 0, &to(), amount, one()).unwrap();
        create_pczt(db, &proposal).unwrap()
    }

    fn sequential(jobs: &[ProofJob]) -> Vec<Proof> {
        jobs.iter().map(ProofJob::prove).collect()
    }

    #[test]
    fn test_create_balances_and_sets_expiry() {
        let (db, _) = setup(&[(Pool::Orchard, 100_000)]);
        let pczt = draft(&db, 40_000);
        assert!(pczt.is_balanced().unwrap());
        assert_eq!(pczt.target_height, 6);
        assert_eq!(pczt.expiry_height, 6 + DEFAULT_EXPIRY_DELTA);
        assert_eq!(pczt.outputs.len(), 2);
        assert!(pczt.outputs[1].is_change);
        assert!(!pczt.is_signed());
    }

    #[test]
    fn test_create_is_deterministic() {
        let (db, _) = setup(&[(Pool::Orchard, 100_000)]);
        assert_eq!(draft(&db, 40_000).sighash(), draft(&db, 40_000).sighash());
    }

    #[test]
    fn test_sign_and_prove_preserve_sighash() {
        let (db, usk) = setup(&[(Pool::Sapling, 100_000)]);
        let pczt = draft(&db, 40_000);
        let origin = pczt.sighash();

        let signed = sign_pczt(pczt, &usk, &usk.seed_fingerprint()).unwrap();
        assert_eq!(signed.sighash(), origin);
        assert!(signed.is_signed());

        let pgk = usk.proof_generation_key();
        let proven = prove_pczt(signed, Some(&pgk), sequential).unwrap();
        assert_eq!(proven.sighash(), origin);
        assert!(proven.is_proven());

        let tx = extract_transaction(&proven).unwrap();
        assert_eq!(tx.nullifiers.len(), 1);
        assert_eq!(tx.fee, proven.fee);
    }

    #[test]
    fn test_sign_rejects_wrong_seed_fingerprint() {
        let (db, usk) = setup(&[(Pool::Orchard, 100_000)]);
        let other = SeedFingerprint::from_seed(&[1u8; 32]).unwrap();
        let err = sign_pczt(draft(&db, 1_000), &usk, &other).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidKey);
    }

    #[test]
    fn test_sign_rejects_unrelated_key() {
        let (db, _) = setup(&[(Pool::Orchard, 100_000)]);
        let stranger = SpendingKey::from_seed(Network::Test, &SEED, 7).unwrap();
        let err = sign_pczt(draft(&db, 1_000), &stranger, &stranger.seed_fingerprint()).unwrap_err();
        assert!(err.message.contains("does not authorize"));
    }

    #[test]
    fn test_sapling_requires_proving_key() {
        let (db, _) = setup(&[(Pool::Sapling, 100_000)]);
        let err = prove_pczt(draft(&db, 1_000), None, sequential).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingProvingKey);
    }

    #[test]
    fn test_sapling_rejects_foreign_proving_key() {
        let (db, _) = setup(&[(Pool::Sapling, 100_000)]);
        let foreign = SpendingKey::from_seed(Network::Test, &SEED, 3)
            .unwrap()
            .proof_generation_key();
        let err = prove_pczt(draft(&db, 1_000), Some(&foreign), sequential).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidKey);
    }

    #[test]
    fn test_orchard_only_proves_without_key() {
        let (db, _) = setup(&[(Pool::Orchard, 100_000)]);
        let pczt = draft(&db, 1_000);
        let jobs = proof_jobs(&pczt, None).unwrap();
        assert_eq!(jobs, vec![ProofJob::OrchardBundle { sighash: pczt.sighash() }]);
        assert!(prove_pczt(pczt, None, sequential).unwrap().is_proven());
    }

    #[test]
    fn test_proving_twice_is_idempotent() {
        let (db, _) = setup(&[(Pool::Orchard, 100_000)]);
        let once = prove_pczt(draft(&db, 1_000), None, sequential).unwrap();
        assert!(proof_jobs(&once, None).unwrap().is_empty());
        let twice = prove_pczt(once.clone(), None, sequential).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_combine_split_authorization() {
        let (db, usk) = setup(&[(Pool::Sapling, 100_000)]);
        let pczt = draft(&db, 40_000);
        let pgk = usk.proof_generation_key();

        let signed = sign_pczt(pczt.clone(), &usk, &usk.seed_fingerprint()).unwrap();
        let proven = prove_pczt(pczt.clone(), Some(&pgk), sequential).unwrap();
        let combined = combine_pczts(vec![signed.clone(), proven]).unwrap();

        let one_pass = prove_pczt(signed, Some(&pgk), sequential).unwrap();
        assert_eq!(combined, one_pass);
        assert_eq!(
            extract_transaction(&combined).unwrap(),
            extract_transaction(&one_pass).unwrap()
        );
    }

    #[test]
    fn test_combine_rejects_different_drafts() {
        let (db, _) = setup(&[(Pool::Orchard, 100_000)]);
        let err = combine_pczts(vec![draft(&db, 1_000), draft(&db, 2_000)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::MismatchedPczt);
    }

    #[test]
    fn test_combine_rejects_conflicts_and_empty() {
        let (db, _) = setup(&[(Pool::Orchard, 100_000)]);
        let mut a = draft(&db, 1_000);
        let mut b = a.clone();
        a.orchard_proof = Some([1; 32]);
        b.orchard_proof = Some([2; 32]);
        assert_eq!(combine_pczts(vec![a, b]).unwrap_err().code, ErrorCode::MismatchedPczt);
        assert_eq!(combine_pczts(vec![]).unwrap_err().code, ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_extract_requires_signatures_and_proofs() {
        let (db, usk) = setup(&[(Pool::Orchard, 100_000)]);
        let pczt = draft(&db, 1_000);

        let unsigned = prove_pczt(pczt.clone(), None, sequential).unwrap();
        assert_eq!(extract_transaction(&unsigned).unwrap_err().code, ErrorCode::MissingSignature);

        let unproven = sign_pczt(pczt, &usk, &usk.seed_fingerprint()).unwrap();
        assert_eq!(extract_transaction(&unproven).unwrap_err().code, ErrorCode::MissingProof);
    }

    #[test]
    fn test_extract_rejects_forged_authorization() {
        let (db, usk) = setup(&[(Pool::Orchard, 100_000)]);
        let signed = sign_pczt(draft(&db, 1_000), &usk, &usk.seed_fingerprint()).unwrap();
        let proven = prove_pczt(signed, None, sequential).unwrap();
        extract_transaction(&proven).unwrap();

        let mut bad_proof = proven.clone();
        bad_proof.orchard_proof = Some([0xab; 32]);
        assert!(extract_transaction(&bad_proof).unwrap_err().message.contains("invalid proof"));

        let mut bad_sig = proven;
        bad_sig.spends[0].spend_auth_sig = Some(Signature([7; 64]));
        assert!(extract_transaction(&bad_sig).unwrap_err().message.contains("invalid signature"));
    }

    #[test]
    fn test_shielding_lifecycle() {
        let (db, usk) = setup(&[(Pool::Transparent, 50_000)]);
        let proposal = propose_shielding(&db, 0, one()).unwrap();
        let pczt = create_pczt(&db, &proposal).unwrap();
        assert_eq!(pczt.transparent_inputs.len(), 1);
        let signed = sign_pczt(pczt, &usk, &usk.seed_fingerprint()).unwrap();
        let proven = prove_pczt(signed, None, sequential).unwrap();
        let tx = extract_transaction(&proven).unwrap();
        assert_eq!(tx.transparent_inputs.len(), 1);
        assert_eq!(tx.outputs[0].pool, Pool::Orchard);
        assert_eq!(tx.outputs[0].value, 40_000);
    }
}
