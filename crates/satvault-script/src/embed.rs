//! Deposit embed message
//!
//! A deposit transaction tells the ledger who owns it and which timelock it
//! uses through a zero-value OP_RETURN output. The payload is the ASCII magic
//! `satvault` followed by a borsh-encoded, versioned [`DepositEmbedMsg`]:
//!
//! ```text
//! "satvault" | tag (u8) | deposit_vout (u64 LE) | user_pubkey (33) | sequence_height (u16 LE)
//! ```
//!
//! The codec checks framing only. Whether the values make sense is decided by
//! deposit admission.

use bitcoin::script::{Instruction, PushBytesBuf};
use bitcoin::{Amount, PublicKey, ScriptBuf, TxOut};
use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

/// Magic prefix of every embed payload
pub const EMBED_MAGIC: &[u8] = b"satvault";

/// Errors from embed message framing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbedError {
    #[error("Embed output is not OP_RETURN")]
    NotOpReturn,

    #[error("Embed output should have 0 value")]
    NonZeroValue,

    #[error("Invalid magic header")]
    InvalidMagicHeader,

    #[error("Invalid embed message: {0}")]
    InvalidFormat(String),

    #[error("Invalid pubkey in embed message")]
    InvalidPubkey,

    #[error("Embed message does not fit in a single push")]
    TooLarge,
}

/// Versioned deposit metadata
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum DepositEmbedMsg {
    V1 {
        /// Index of the P2WSH deposit output in the same transaction
        deposit_vout: u64,
        /// Compressed SEC1 public key of the depositor
        user_pubkey: [u8; 33],
        /// Relative timelock (blocks) of the solo withdrawal path
        sequence_height: u16,
    },
}

impl DepositEmbedMsg {
    /// Build a V1 message for a compressed public key.
    pub fn v1(deposit_vout: u64, user_pubkey: &PublicKey, sequence_height: u16) -> Self {
        DepositEmbedMsg::V1 {
            deposit_vout,
            user_pubkey: user_pubkey.inner.serialize(),
            sequence_height,
        }
    }

    /// Magic prefix followed by the borsh encoding.
    pub fn encode(&self) -> Result<Vec<u8>, EmbedError> {
        let body = borsh::to_vec(self).map_err(|e| EmbedError::InvalidFormat(e.to_string()))?;
        let mut bytes = Vec::with_capacity(EMBED_MAGIC.len() + body.len());
        bytes.extend_from_slice(EMBED_MAGIC);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Hex form of [`Self::encode`], as handed to wallets.
    pub fn encode_hex(&self) -> Result<String, EmbedError> {
        self.encode().map(hex::encode)
    }

    /// Decode a payload. The whole slice must be consumed.
    pub fn decode(bytes: &[u8]) -> Result<Self, EmbedError> {
        let body = bytes
            .strip_prefix(EMBED_MAGIC)
            .ok_or(EmbedError::InvalidMagicHeader)?;
        borsh::from_slice(body).map_err(|e| EmbedError::InvalidFormat(e.to_string()))
    }

    /// Decode the payload carried by an OP_RETURN output.
    pub fn from_output(output: &TxOut) -> Result<Self, EmbedError> {
        let payload = extract_embed_payload(output)?;
        Self::decode(&payload)
    }

    /// OP_RETURN script carrying this message.
    pub fn to_script(&self) -> Result<ScriptBuf, EmbedError> {
        let push = PushBytesBuf::try_from(self.encode()?).map_err(|_| EmbedError::TooLarge)?;
        Ok(ScriptBuf::new_op_return(push))
    }

    pub fn deposit_vout(&self) -> u64 {
        match self {
            DepositEmbedMsg::V1 { deposit_vout, .. } => *deposit_vout,
        }
    }

    pub fn sequence_height(&self) -> u16 {
        match self {
            DepositEmbedMsg::V1 {
                sequence_height, ..
            } => *sequence_height,
        }
    }

    /// The depositor key. Fails if the 33 bytes are not a valid point.
    pub fn user_pubkey(&self) -> Result<PublicKey, EmbedError> {
        match self {
            DepositEmbedMsg::V1 { user_pubkey, .. } => {
                PublicKey::from_slice(user_pubkey).map_err(|_| EmbedError::InvalidPubkey)
            }
        }
    }
}

/// Pull the single data push out of a zero-value OP_RETURN output.
pub fn extract_embed_payload(output: &TxOut) -> Result<Vec<u8>, EmbedError> {
    if !output.script_pubkey.is_op_return() {
        return Err(EmbedError::NotOpReturn);
    }
    if output.value != Amount::ZERO {
        return Err(EmbedError::NonZeroValue);
    }

    let mut instructions = output.script_pubkey.instructions();
    // OP_RETURN itself
    instructions.next();
    let payload = match instructions.next() {
        Some(Ok(Instruction::PushBytes(bytes))) => bytes.as_bytes().to_vec(),
        _ => return Err(EmbedError::InvalidFormat("missing data push".to_string())),
    };
    if instructions.next().is_some() {
        return Err(EmbedError::InvalidFormat(
            "unexpected data after payload".to_string(),
        ));
    }
    Ok(payload)
}
