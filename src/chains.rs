//! Chain registry: canonical names, aliases, protocol names and latency constants
//!
//! Different chains settle at different speeds, which drives both the quote's time range
//! and its confirmation estimate:
//! - Ethereum: probabilistic finality (~15 min before the bridge relays)
//! - Optimistic and ZK rollups: a few minutes of L2 confirmations
//! - Avalanche, BNB, Fantom: near-instant finality

use crate::config::Settings;
use ethers::types::Address;
use lazy_static::lazy_static;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

/// Static description of a supported chain
#[derive(Debug, Clone, Serialize)]
pub struct ChainInfo {
    pub chain_id: u64,
    /// Lowercase canonical name, also the config key
    pub name: String,
    /// Name the bridging protocol uses for this chain
    pub protocol_name: String,
    pub aliases: Vec<String>,
    pub native_symbol: String,
    /// Minutes before the protocol relays a message originating here
    pub base_latency_minutes: u64,
    #[serde(skip)]
    pub tokens: HashMap<String, Address>,
}

impl ChainInfo {
    pub fn is_native(&self, symbol: &str) -> bool {
        self.native_symbol.eq_ignore_ascii_case(symbol)
    }

    pub fn token_address(&self, symbol: &str) -> Option<Address> {
        self.tokens.get(&symbol.to_ascii_uppercase()).copied()
    }

    pub fn recommended_confirmations(&self) -> u64 {
        recommended_confirmations(self.chain_id)
    }
}

// (chain id, name, protocol name, aliases, native symbol, base latency minutes, tokens)
type ChainRow = (
    u64,
    &'static str,
    &'static str,
    &'static [&'static str],
    &'static str,
    u64,
    &'static [(&'static str, &'static str)],
);

const BUILTIN_CHAINS: &[ChainRow] = &[
    (
        1,
        "ethereum",
        "Ethereum",
        &["ethereum", "eth mainnet", "ethereum mainnet", "mainnet", "l1"],
        "ETH",
        16,
        &[
            ("USDC", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            ("USDT", "0xdAC17F958D2ee523a2206206994597C13D831ec7"),
            ("WETH", "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
        ],
    ),
    (
        42161,
        "arbitrum",
        "arbitrum",
        &["arbitrum", "arbitrum one", "arb"],
        "ETH",
        3,
        &[
            ("USDC", "0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
            ("USDT", "0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9"),
        ],
    ),
    (
        10,
        "optimism",
        "optimism",
        &["optimism", "op mainnet", "op"],
        "ETH",
        3,
        &[("USDC", "0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85")],
    ),
    (
        8453,
        "base",
        "base",
        &["base"],
        "ETH",
        3,
        &[("USDC", "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913")],
    ),
    (
        137,
        "polygon",
        "Polygon",
        &["polygon", "matic", "polygon pos"],
        "POL",
        5,
        &[("USDC", "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359")],
    ),
    (
        43114,
        "avalanche",
        "Avalanche",
        &["avalanche", "avax", "avalanche c-chain"],
        "AVAX",
        1,
        &[("USDC", "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E")],
    ),
    (
        56,
        "bnb",
        "binance",
        &["bnb chain", "bnb smart chain", "binance", "bsc"],
        "BNB",
        1,
        &[("USDC", "0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d")],
    ),
    (
        250,
        "fantom",
        "Fantom",
        &["fantom", "ftm"],
        "FTM",
        1,
        &[],
    ),
    (
        59144,
        "linea",
        "linea",
        &["linea"],
        "ETH",
        5,
        &[("USDC", "0x176211869cA2b568f2A7D4EE941E073a821EE1ff")],
    ),
    (
        534352,
        "scroll",
        "scroll",
        &["scroll"],
        "ETH",
        5,
        &[],
    ),
    (
        5000,
        "mantle",
        "mantle",
        &["mantle"],
        "MNT",
        3,
        &[],
    ),
];

lazy_static! {
    static ref BUILTIN: ChainRegistry = ChainRegistry::from_rows(BUILTIN_CHAINS);
}

/// Lookup table of protocol-supported chains
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: Vec<ChainInfo>,
}

impl ChainRegistry {
    fn from_rows(rows: &[ChainRow]) -> Self {
        let chains = rows
            .iter()
            .map(|(chain_id, name, protocol, aliases, native, latency, tokens)| ChainInfo {
                chain_id: *chain_id,
                name: name.to_string(),
                protocol_name: protocol.to_string(),
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
                native_symbol: native.to_string(),
                base_latency_minutes: *latency,
                tokens: tokens
                    .iter()
                    .filter_map(|(symbol, addr)| {
                        Address::from_str(addr)
                            .ok()
                            .map(|a| (symbol.to_string(), a))
                    })
                    .collect(),
            })
            .collect();
        Self { chains }
    }

    /// The built-in registry
    pub fn builtin() -> &'static ChainRegistry {
        &BUILTIN
    }

    /// Built-in registry with token overrides from configuration merged in
    pub fn from_settings(settings: &Settings) -> Self {
        let mut registry = BUILTIN.clone();
        for (name, chain_config) in &settings.chains {
            let Some(chain) = registry.chains.iter_mut().find(|c| &c.name == name) else {
                warn!("Configured chain {} is not in the registry - ignoring", name);
                continue;
            };
            for (symbol, addr) in &chain_config.tokens {
                match Address::from_str(addr) {
                    Ok(address) => {
                        chain.tokens.insert(symbol.to_ascii_uppercase(), address);
                    }
                    Err(e) => warn!("Invalid token address {} for {}: {}", addr, name, e),
                }
            }
        }
        registry
    }

    pub fn by_id(&self, chain_id: u64) -> Option<&ChainInfo> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// Resolve a canonical name, protocol name or alias (case-insensitive)
    pub fn by_name(&self, name: &str) -> Option<&ChainInfo> {
        let needle = name.trim().to_ascii_lowercase();
        self.chains.iter().find(|c| {
            c.name == needle
                || c.protocol_name.eq_ignore_ascii_case(&needle)
                || c.aliases.iter().any(|a| *a == needle)
        })
    }

    pub fn chains(&self) -> &[ChainInfo] {
        &self.chains
    }

    /// All (alias, chain id) pairs, longest alias first so multi-word names win
    pub fn aliases(&self) -> Vec<(String, u64)> {
        let mut aliases: Vec<(String, u64)> = self
            .chains
            .iter()
            .flat_map(|c| c.aliases.iter().map(move |a| (a.clone(), c.chain_id)))
            .collect();
        aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        aliases
    }
}

/// Get recommended confirmation blocks for a chain
pub fn recommended_confirmations(chain_id: u64) -> u64 {
    match chain_id {
        // Ethereum mainnet
        1 => 32,
        // Ethereum testnets
        11155111 | 5 => 12,
        // Polygon mainnet
        137 => 128,
        // Polygon testnets
        80001 | 80002 => 32,
        // Arbitrum
        42161 | 421614 => 64,
        // Optimism
        10 | 11155420 => 64,
        // Base
        8453 | 84532 => 64,
        // Avalanche (instant finality)
        43114 | 43113 => 1,
        // BNB, Fantom
        56 | 250 => 15,
        // Default conservative
        _ => 64,
    }
}
