//! EIP-155 Legacy Transactions
//!
//! Sweeps are plain token transfers, so the pre-London transaction format is
//! enough and is accepted by both Ethereum and BSC.

use rlp::RlpStream;

use crate::keys::{keccak256, SigningKey};

/// Unsigned legacy transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

/// Signed, RLP-encoded transaction ready for `eth_sendRawTransaction`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedLegacyTransaction {
    pub raw: Vec<u8>,
    pub hash: [u8; 32],
}

impl LegacyTransaction {
    fn append_body(&self, stream: &mut RlpStream) {
        stream.append(&trim_be(&self.nonce.to_be_bytes()));
        stream.append(&trim_be(&self.gas_price.to_be_bytes()));
        stream.append(&trim_be(&self.gas_limit.to_be_bytes()));
        stream.append(&self.to.to_vec());
        stream.append(&trim_be(&self.value.to_be_bytes()));
        stream.append(&self.data);
    }

    /// Hash signed over: `rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0])`
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&trim_be(&self.chain_id.to_be_bytes()));
        stream.append(&Vec::<u8>::new());
        stream.append(&Vec::<u8>::new());
        keccak256(&stream.out())
    }

    pub fn sign(&self, key: &SigningKey) -> SignedLegacyTransaction {
        let (signature, recovery_id) = key.sign_recoverable(&self.signing_hash());
        let v = recovery_id as u64 + self.chain_id * 2 + 35;

        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&trim_be(&v.to_be_bytes()));
        stream.append(&trim_be(&signature[..32]));
        stream.append(&trim_be(&signature[32..]));

        let raw = stream.out().to_vec();
        let hash = keccak256(&raw);
        SignedLegacyTransaction { raw, hash }
    }
}

/// Minimal big-endian encoding (RLP integers carry no leading zeros)
fn trim_be(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}
