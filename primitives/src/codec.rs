//! Deterministic binary encoding for PCZTs, transactions, and wallet
//! storage.
//!
//! Encoding format:
//! - Fixed-size fields (Hash, u64, u32, u8, bool) are written directly
//! - All integers are little-endian
//! - Variable-length fields (Vec<u8>, String) are length-prefixed (u32 LE)
//! - Repeated fields are count-prefixed (u32 LE) then concatenated
//! - Optional values: 1-byte flag (0=None, 1=Some) followed by the value

use crate::block::{Output, Transaction};
use crate::error::{WalletError, WalletResult};
use crate::pczt::{Pczt, PcztOutput, ShieldedSpend, Signature, TransparentInput};
use crate::types::{Hash, Network, OutPoint, Pool, PCZT_FORMAT_VERSION};

/// Leading bytes of a serialized PCZT.
pub const PCZT_MAGIC: &[u8; 4] = b"PCZT";

/// A cursor for reading bytes during decoding.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Fail unless every byte has been consumed.
    pub fn finish(&self) -> WalletResult<()> {
        if self.remaining() != 0 {
            return Err(WalletError::encoding(format!(
                "{} trailing bytes",
                self.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, n: usize) -> WalletResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(WalletError::encoding("unexpected end of data"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> WalletResult<u8> {
        let bytes = self.read_bytes(1)?;
        Ok(bytes[0])
    }

    pub fn read_u32(&mut self) -> WalletResult<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> WalletResult<u64> {
        let bytes = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_bool(&mut self) -> WalletResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(WalletError::encoding("invalid bool value")),
        }
    }

    pub fn read_hash(&mut self) -> WalletResult<Hash> {
        let bytes = self.read_bytes(32)?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(bytes);
        Ok(hash)
    }

    pub fn read_signature(&mut self) -> WalletResult<Signature> {
        let bytes = self.read_bytes(64)?;
        let mut sig = [0u8; 64];
        sig.copy_from_slice(bytes);
        Ok(Signature(sig))
    }

    /// Read a presence flag; `true` means a value follows.
    pub fn read_flag(&mut self) -> WalletResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(WalletError::encoding("invalid optional flag")),
        }
    }

    pub fn read_optional_hash(&mut self) -> WalletResult<Option<Hash>> {
        Ok(if self.read_flag()? {
            Some(self.read_hash()?)
        } else {
            None
        })
    }

    pub fn read_optional_u32(&mut self) -> WalletResult<Option<u32>> {
        Ok(if self.read_flag()? {
            Some(self.read_u32()?)
        } else {
            None
        })
    }

    pub fn read_var_bytes(&mut self) -> WalletResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }

    pub fn read_string(&mut self) -> WalletResult<String> {
        let bytes = self.read_var_bytes()?;
        String::from_utf8(bytes).map_err(|_| WalletError::encoding("invalid UTF-8"))
    }

    pub fn read_pool(&mut self) -> WalletResult<Pool> {
        let v = self.read_u8()?;
        Pool::from_u8(v).ok_or_else(|| WalletError::encoding(format!("invalid pool: {v}")))
    }

    pub fn read_network(&mut self) -> WalletResult<Network> {
        let v = self.read_u8()?;
        Network::from_u8(v).ok_or_else(|| WalletError::encoding(format!("invalid network: {v}")))
    }

    pub fn read_outpoint(&mut self) -> WalletResult<OutPoint> {
        Ok(OutPoint {
            txid: self.read_hash()?,
            index: self.read_u32()?,
        })
    }

    /// Read a u32 element count, rejecting counts that could not possibly
    /// fit in the remaining input.
    pub fn read_count(&mut self, min_element_size: usize) -> WalletResult<usize> {
        let count = self.read_u32()? as usize;
        if count.saturating_mul(min_element_size.max(1)) > self.remaining() {
            return Err(WalletError::encoding(format!(
                "element count {count} exceeds remaining input"
            )));
        }
        Ok(count)
    }
}

// ── Encoding helpers ──

pub fn write_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn write_bool(buf: &mut Vec<u8>, v: bool) {
    buf.push(u8::from(v));
}

pub fn write_hash(buf: &mut Vec<u8>, h: &Hash) {
    buf.extend_from_slice(h);
}

pub fn write_optional_hash(buf: &mut Vec<u8>, h: &Option<Hash>) {
    match h {
        None => buf.push(0),
        Some(hash) => {
            buf.push(1);
            buf.extend_from_slice(hash);
        }
    }
}

pub fn write_optional_u32(buf: &mut Vec<u8>, v: Option<u32>) {
    match v {
        None => buf.push(0),
        Some(v) => {
            buf.push(1);
            write_u32(buf, v);
        }
    }
}

pub fn write_optional_signature(buf: &mut Vec<u8>, sig: &Option<Signature>) {
    match sig {
        None => buf.push(0),
        Some(sig) => {
            buf.push(1);
            buf.extend_from_slice(&sig.0);
        }
    }
}

pub fn write_var_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    write_u32(buf, data.len() as u32);
    buf.extend_from_slice(data);
}

pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_var_bytes(buf, s.as_bytes());
}

pub fn write_outpoint(buf: &mut Vec<u8>, outpoint: &OutPoint) {
    write_hash(buf, &outpoint.txid);
    write_u32(buf, outpoint.index);
}

fn read_optional_signature(r: &mut Reader<'_>) -> WalletResult<Option<Signature>> {
    Ok(if r.read_flag()? {
        Some(r.read_signature()?)
    } else {
        None
    })
}

// ── PCZT encoding ──

/// Encode the effects of a PCZT, skipping every authorization field.
pub fn encode_pczt_effects(pczt: &Pczt) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    write_u8(&mut buf, pczt.network.as_u8());
    write_u32(&mut buf, pczt.target_height);
    write_u32(&mut buf, pczt.expiry_height);
    write_u64(&mut buf, pczt.fee);

    write_u32(&mut buf, pczt.spends.len() as u32);
    for spend in &pczt.spends {
        write_u8(&mut buf, spend.pool.as_u8());
        write_hash(&mut buf, &spend.nullifier);
        write_u64(&mut buf, spend.value);
        write_hash(&mut buf, &spend.ak);
        write_hash(&mut buf, &spend.nk);
    }

    write_u32(&mut buf, pczt.transparent_inputs.len() as u32);
    for input in &pczt.transparent_inputs {
        write_outpoint(&mut buf, &input.outpoint);
        write_u64(&mut buf, input.value);
        write_hash(&mut buf, &input.pubkey);
    }

    write_u32(&mut buf, pczt.outputs.len() as u32);
    for output in &pczt.outputs {
        write_u8(&mut buf, output.pool.as_u8());
        write_hash(&mut buf, &output.recipient);
        write_u64(&mut buf, output.value);
        write_hash(&mut buf, &output.commitment);
        write_bool(&mut buf, output.is_change);
    }
    buf
}

/// Encode a PCZT including whatever authorization it carries.
pub fn encode_pczt(pczt: &Pczt) -> Vec<u8> {
    let mut buf = Vec::with_capacity(512);
    buf.extend_from_slice(PCZT_MAGIC);
    write_u8(&mut buf, PCZT_FORMAT_VERSION);
    write_u8(&mut buf, pczt.network.as_u8());
    write_u32(&mut buf, pczt.target_height);
    write_u32(&mut buf, pczt.expiry_height);
    write_u64(&mut buf, pczt.fee);

    write_u32(&mut buf, pczt.spends.len() as u32);
    for spend in &pczt.spends {
        write_u8(&mut buf, spend.pool.as_u8());
        write_hash(&mut buf, &spend.nullifier);
        write_u64(&mut buf, spend.value);
        write_hash(&mut buf, &spend.ak);
        write_hash(&mut buf, &spend.nk);
        write_optional_signature(&mut buf, &spend.spend_auth_sig);
        write_optional_hash(&mut buf, &spend.proof);
    }

    write_u32(&mut buf, pczt.transparent_inputs.len() as u32);
    for input in &pczt.transparent_inputs {
        write_outpoint(&mut buf, &input.outpoint);
        write_u64(&mut buf, input.value);
        write_hash(&mut buf, &input.pubkey);
        write_optional_signature(&mut buf, &input.signature);
    }

    write_u32(&mut buf, pczt.outputs.len() as u32);
    for output in &pczt.outputs {
        write_u8(&mut buf, output.pool.as_u8());
        write_hash(&mut buf, &output.recipient);
        write_u64(&mut buf, output.value);
        write_hash(&mut buf, &output.commitment);
        write_bool(&mut buf, output.is_change);
        write_optional_hash(&mut buf, &output.proof);
    }

    write_optional_hash(&mut buf, &pczt.orchard_proof);
    buf
}

/// Decode a PCZT produced by [`encode_pczt`].
pub fn decode_pczt(data: &[u8]) -> WalletResult<Pczt> {
    let mut r = Reader::new(data);
    if r.read_bytes(4)? != PCZT_MAGIC {
        return Err(WalletError::encoding("not a PCZT: bad magic"));
    }
    let version = r.read_u8()?;
    if version != PCZT_FORMAT_VERSION {
        return Err(WalletError::encoding(format!(
            "unsupported PCZT version {version}"
        )));
    }
    let network = r.read_network()?;
    let target_height = r.read_u32()?;
    let expiry_height = r.read_u32()?;
    let fee = r.read_u64()?;

    let spend_count = r.read_count(32)?;
    let mut spends = Vec::with_capacity(spend_count);
    for _ in 0..spend_count {
        spends.push(ShieldedSpend {
            pool: r.read_pool()?,
            nullifier: r.read_hash()?,
            value: r.read_u64()?,
            ak: r.read_hash()?,
            nk: r.read_hash()?,
            spend_auth_sig: read_optional_signature(&mut r)?,
            proof: r.read_optional_hash()?,
        });
    }

    let input_count = r.read_count(32)?;
    let mut transparent_inputs = Vec::with_capacity(input_count);
    for _ in 0..input_count {
        transparent_inputs.push(TransparentInput {
            outpoint: r.read_outpoint()?,
            value: r.read_u64()?,
            pubkey: r.read_hash()?,
            signature: read_optional_signature(&mut r)?,
        });
    }

    let output_count = r.read_count(32)?;
    let mut outputs = Vec::with_capacity(output_count);
    for _ in 0..output_count {
        outputs.push(PcztOutput {
            pool: r.read_pool()?,
            recipient: r.read_hash()?,
            value: r.read_u64()?,
            commitment: r.read_hash()?,
            is_change: r.read_bool()?,
            proof: r.read_optional_hash()?,
        });
    }

    let orchard_proof = r.read_optional_hash()?;
    r.finish()?;

    let pczt = Pczt {
        network,
        target_height,
        expiry_height,
        fee,
        spends,
        transparent_inputs,
        outputs,
        orchard_proof,
    };
    pczt.check_amounts()?;
    Ok(pczt)
}

// ── Transaction encoding ──

fn write_output(buf: &mut Vec<u8>, output: &Output) {
    write_u8(buf, output.pool.as_u8());
    write_hash(buf, &output.recipient);
    write_u64(buf, output.value);
    write_hash(buf, &output.commitment);
}

fn read_output(r: &mut Reader<'_>) -> WalletResult<Output> {
    Ok(Output {
        pool: r.read_pool()?,
        recipient: r.read_hash()?,
        value: r.read_u64()?,
        commitment: r.read_hash()?,
    })
}

/// Encode a transaction to its raw broadcast form.
pub fn encode_transaction(tx: &Transaction) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    write_u32(&mut buf, tx.expiry_height);
    write_u64(&mut buf, tx.fee);

    write_u32(&mut buf, tx.nullifiers.len() as u32);
    for (pool, nf) in &tx.nullifiers {
        write_u8(&mut buf, pool.as_u8());
        write_hash(&mut buf, nf);
    }

    write_u32(&mut buf, tx.transparent_inputs.len() as u32);
    for outpoint in &tx.transparent_inputs {
        write_outpoint(&mut buf, outpoint);
    }

    write_u32(&mut buf, tx.outputs.len() as u32);
    for output in &tx.outputs {
        write_output(&mut buf, output);
    }

    write_hash(&mut buf, &tx.auth_digest);
    buf
}

/// Decode a raw transaction.
pub fn decode_transaction(data: &[u8]) -> WalletResult<Transaction> {
    let mut r = Reader::new(data);
    let expiry_height = r.read_u32()?;
    let fee = r.read_u64()?;

    let nf_count = r.read_count(33)?;
    let mut nullifiers = Vec::with_capacity(nf_count);
    for _ in 0..nf_count {
        nullifiers.push((r.read_pool()?, r.read_hash()?));
    }

    let input_count = r.read_count(36)?;
    let mut transparent_inputs = Vec::with_capacity(input_count);
    for _ in 0..input_count {
        transparent_inputs.push(r.read_outpoint()?);
    }

    let output_count = r.read_count(73)?;
    let mut outputs = Vec::with_capacity(output_count);
    for _ in 0..output_count {
        outputs.push(read_output(&mut r)?);
    }

    let auth_digest = r.read_hash()?;
    r.finish()?;

    Ok(Transaction {
        expiry_height,
        fee,
        nullifiers,
        transparent_inputs,
        outputs,
        auth_digest,
    })
}
