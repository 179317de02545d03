// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain-native address parsing.
//!
//! Every configured and on-chain address is normalized to a [`ChainAddress`]
//! (the raw address bytes). An [`AddressDecoder`] knows how one chain family
//! writes those bytes as text:
//!
//! | Family | Text form | Bytes |
//! |--------|-----------|-------|
//! | EVM | `0x` hex | 20 |
//! | IoTeX | bech32 `io1…` | 20 |
//! | Solana | base58 public key | 32 |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, Bytes};
use bech32::{FromBase32, ToBase32, Variant};
use serde::{Deserialize, Serialize};

use crate::error::{WitnessError, WitnessResult};

/// Human readable part of IoTeX addresses.
const IOTEX_HRP: &str = "io";

/// Source or destination chain family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Iotex,
    Solana,
}

impl ChainFamily {
    /// Map a configured chain name to its family.
    ///
    /// Heco, BSC, Polygon and Polis are operated exactly like Ethereum.
    pub fn from_chain_name(name: &str) -> WitnessResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "heco" | "bsc" | "matic" | "polis" => Ok(Self::Evm),
            "iotex" => Ok(Self::Iotex),
            "solana" => Ok(Self::Solana),
            other => Err(WitnessError::Config(format!("unknown chain name {other}"))),
        }
    }

    /// Destination family; anything other than IoTeX or Solana is treated as EVM.
    pub fn destination(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "iotex" => Self::Iotex,
            "solana" => Self::Solana,
            _ => Self::Evm,
        }
    }

    /// Length in bytes of an account address on this family.
    pub fn address_len(self) -> usize {
        match self {
            Self::Evm | Self::Iotex => 20,
            Self::Solana => 32,
        }
    }
}

/// Raw address bytes, independent of any text encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainAddress(Bytes);

impl ChainAddress {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Bytes::from(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Interpret as a 20-byte EVM address.
    pub fn to_evm(&self) -> WitnessResult<Address> {
        if self.len() != 20 {
            return Err(WitnessError::Decode(format!(
                "expected a 20-byte address, got {} bytes",
                self.len()
            )));
        }
        Ok(Address::from_slice(self.as_bytes()))
    }

    /// Interpret as a 32-byte Solana public key.
    pub fn to_pubkey(&self) -> WitnessResult<[u8; 32]> {
        self.as_bytes().try_into().map_err(|_| {
            WitnessError::Decode(format!(
                "expected a 32-byte public key, got {} bytes",
                self.len()
            ))
        })
    }
}

impl From<Address> for ChainAddress {
    fn from(addr: Address) -> Self {
        Self::new(addr.as_slice().to_vec())
    }
}

impl From<[u8; 32]> for ChainAddress {
    fn from(key: [u8; 32]) -> Self {
        Self::new(key.to_vec())
    }
}

impl fmt::Display for ChainAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chain-specific address parsing.
pub trait AddressDecoder: Send + Sync {
    fn family(&self) -> ChainFamily;

    /// Parse the chain's textual address form.
    fn decode_string(&self, text: &str) -> WitnessResult<ChainAddress>;

    /// Render an address the way the chain writes it.
    fn encode(&self, address: &ChainAddress) -> String;
}

/// Build the decoder for a chain family.
pub fn decoder_for(family: ChainFamily) -> Arc<dyn AddressDecoder> {
    match family {
        ChainFamily::Evm => Arc::new(EvmAddressDecoder),
        ChainFamily::Iotex => Arc::new(IotexAddressDecoder),
        ChainFamily::Solana => Arc::new(SolanaAddressDecoder),
    }
}

/// `0x`-prefixed hex, 20 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvmAddressDecoder;

impl AddressDecoder for EvmAddressDecoder {
    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }

    fn decode_string(&self, text: &str) -> WitnessResult<ChainAddress> {
        let addr = Address::from_str(text.trim())
            .map_err(|e| WitnessError::Decode(format!("invalid EVM address {text}: {e}")))?;
        Ok(addr.into())
    }

    fn encode(&self, address: &ChainAddress) -> String {
        match address.to_evm() {
            Ok(addr) => addr.to_checksum(None),
            Err(_) => address.to_string(),
        }
    }
}

/// Bech32 with the `io` prefix over a 20-byte payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct IotexAddressDecoder;

impl AddressDecoder for IotexAddressDecoder {
    fn family(&self) -> ChainFamily {
        ChainFamily::Iotex
    }

    fn decode_string(&self, text: &str) -> WitnessResult<ChainAddress> {
        let (hrp, data, _variant) = bech32::decode(text.trim())
            .map_err(|e| WitnessError::Decode(format!("invalid IoTeX address {text}: {e}")))?;
        if hrp != IOTEX_HRP {
            return Err(WitnessError::Decode(format!(
                "invalid IoTeX address {text}: unexpected prefix {hrp}"
            )));
        }
        let bytes = Vec::<u8>::from_base32(&data)
            .map_err(|e| WitnessError::Decode(format!("invalid IoTeX address {text}: {e}")))?;
        if bytes.len() != 20 {
            return Err(WitnessError::Decode(format!(
                "invalid IoTeX address {text}: payload is {} bytes",
                bytes.len()
            )));
        }
        Ok(ChainAddress::new(bytes))
    }

    fn encode(&self, address: &ChainAddress) -> String {
        bech32::encode(IOTEX_HRP, address.as_bytes().to_base32(), Variant::Bech32)
            .unwrap_or_else(|_| address.to_string())
    }
}

/// Base58 public key, 32 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolanaAddressDecoder;

impl AddressDecoder for SolanaAddressDecoder {
    fn family(&self) -> ChainFamily {
        ChainFamily::Solana
    }

    fn decode_string(&self, text: &str) -> WitnessResult<ChainAddress> {
        let bytes = bs58::decode(text.trim())
            .into_vec()
            .map_err(|e| WitnessError::Decode(format!("invalid Solana address {text}: {e}")))?;
        if bytes.len() != 32 {
            return Err(WitnessError::Decode(format!(
                "invalid Solana address {text}: key is {} bytes",
                bytes.len()
            )));
        }
        Ok(ChainAddress::new(bytes))
    }

    fn encode(&self, address: &ChainAddress) -> String {
        bs58::encode(address.as_bytes()).into_string()
    }
}
