//! Lexical intent parser
//!
//! The parser never fails: anything it cannot recognize is left empty and the intent
//! defaults to a same-chain swap.

use super::{OperationKind, Recipient, TransferIntent};
use crate::chains::ChainRegistry;

use ethers::types::Address;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::str::FromStr;

lazy_static! {
    static ref DEFAULT_PARSER: IntentParser = IntentParser::new(ChainRegistry::builtin());
    static ref AMOUNT_TOKEN: Regex =
        Regex::new(r"(?i)(?:^|[\s$])(\d+(?:\.\d+)?|\.\d+)\s*([a-z][a-z0-9]{1,9})\b").unwrap();
    static ref BRIDGE_KIND: Regex = Regex::new(r"(?i)\b(bridge|move|transfer\s+to)\b").unwrap();
    static ref SEND_KIND: Regex = Regex::new(r"(?i)\b(send|transfer)\b").unwrap();
    static ref BALANCE_KIND: Regex = Regex::new(r"(?i)\b(balance|check)\b").unwrap();
    static ref BRIDGE_KEYWORD: Regex =
        Regex::new(r"(?i)\b(bridge|bridging|cross[- ]?chain)\b").unwrap();
    static ref DEST_TOKEN: Regex =
        Regex::new(r"(?i)\b(?:for|to|into)\s+([a-z][a-z0-9]{1,9})\b").unwrap();
    static ref HEX_ADDRESS: Regex = Regex::new(r"\b0x[0-9a-fA-F]{40}\b").unwrap();
    static ref NAME_SERVICE: Regex =
        Regex::new(r"(?i)\b([a-z0-9][a-z0-9-]*(?:\.[a-z0-9-]+)*\.(?:eth|arb|base|bnb|crypto))\b")
            .unwrap();
}

const STOP_WORDS: &[&str] = &[
    "to", "from", "on", "for", "of", "in", "into", "at", "via", "and", "the", "my", "me", "with",
    "worth", "chain", "network", "over", "onto",
];

/// Chain mention found in a command
#[derive(Debug, Clone, Copy)]
struct Mention {
    start: usize,
    chain_id: u64,
}

/// Intent parser bound to a chain alias table
pub struct IntentParser {
    alias_pattern: Regex,
    alias_ids: HashMap<String, u64>,
    from_to: Regex,
    on_chain: Regex,
}

impl IntentParser {
    pub fn new(registry: &ChainRegistry) -> Self {
        let aliases = registry.aliases();
        let alternation = aliases
            .iter()
            .map(|(alias, _)| regex::escape(alias).replace(' ', r"\s+"))
            .collect::<Vec<_>>()
            .join("|");
        let alias_ids = aliases.into_iter().collect();

        let alias_pattern = Regex::new(&format!(r"(?i)\b({})\b", alternation)).unwrap();
        let from_to = Regex::new(&format!(
            r"(?i)\bfrom\s+({a})\b.*?\b(?:to|into|->|onto)\s+({a})\b",
            a = alternation
        ))
        .unwrap();
        let on_chain = Regex::new(&format!(r"(?i)\bon\s+({})\b", alternation)).unwrap();

        Self {
            alias_pattern,
            alias_ids,
            from_to,
            on_chain,
        }
    }

    /// Parse a command into a transfer intent
    pub fn parse(&self, command: &str, current_chain_id: Option<u64>) -> TransferIntent {
        let mut intent = TransferIntent::empty(command);

        // 1. amount / token pair
        let mut token_spans = Vec::new();
        for cap in AMOUNT_TOKEN.captures_iter(command) {
            let (Some(amount), Some(token)) = (cap.get(1), cap.get(2)) else {
                continue;
            };
            if is_stop_word(token.as_str()) {
                continue;
            }
            token_spans.push((token.start(), token.end()));
            if intent.amount.is_none() {
                intent.amount = Some(normalize_amount(amount.as_str()));
                intent.source_token = Some(token.as_str().to_ascii_uppercase());
            }
        }

        // 2. chain mentions, skipping words consumed as tokens
        let mentions = self.chain_mentions(command, &token_spans);
        let mut distinct: Vec<u64> = Vec::new();
        for mention in &mentions {
            if !distinct.contains(&mention.chain_id) {
                distinct.push(mention.chain_id);
            }
        }

        // 3. operation kind by keyword precedence
        intent.kind = if BRIDGE_KIND.is_match(command) {
            OperationKind::Bridge
        } else if SEND_KIND.is_match(command) {
            OperationKind::Send
        } else if BALANCE_KIND.is_match(command) {
            OperationKind::Balance
        } else {
            OperationKind::Swap
        };

        // 4. cross-chain detection
        let single_differs = distinct.len() == 1
            && current_chain_id.map_or(false, |current| current != distinct[0]);
        intent.is_cross_chain =
            BRIDGE_KEYWORD.is_match(command) || distinct.len() >= 2 || single_differs;

        // 5. source / destination chains
        let (source, mut destination) =
            self.extract_chains(command, &mentions, &distinct, current_chain_id);
        // A bridging keyword alone does not name a destination
        if intent.is_cross_chain && source.is_some() && source == destination {
            destination = None;
        }
        intent.source_chain_id = source;
        intent.destination_chain_id = destination;

        // 6. destination token
        intent.destination_token = self.destination_token(command, &token_spans);
        if intent.destination_token.is_none()
            && matches!(intent.kind, OperationKind::Bridge | OperationKind::Send)
        {
            intent.destination_token = intent.source_token.clone();
        }

        // 7. recipient
        intent.recipient = extract_recipient(command);

        intent
    }

    fn chain_mentions(&self, command: &str, token_spans: &[(usize, usize)]) -> Vec<Mention> {
        self.alias_pattern
            .find_iter(command)
            .filter(|m| {
                !token_spans
                    .iter()
                    .any(|(start, end)| m.start() < *end && *start < m.end())
            })
            .filter_map(|m| {
                self.resolve_alias(m.as_str()).map(|chain_id| Mention {
                    start: m.start(),
                    chain_id,
                })
            })
            .collect()
    }

    fn resolve_alias(&self, text: &str) -> Option<u64> {
        let normalized = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        self.alias_ids.get(&normalized).copied()
    }

    fn extract_chains(
        &self,
        command: &str,
        mentions: &[Mention],
        distinct: &[u64],
        current: Option<u64>,
    ) -> (Option<u64>, Option<u64>) {
        if let Some(cap) = self.from_to.captures(command) {
            let from = cap.get(1).and_then(|m| self.resolve_alias(m.as_str()));
            let to = cap.get(2).and_then(|m| self.resolve_alias(m.as_str()));
            if from.is_some() && to.is_some() {
                return (from, to);
            }
        }

        if let Some(cap) = self.on_chain.captures(command) {
            if let Some(on) = cap.get(1).and_then(|m| self.resolve_alias(m.as_str())) {
                // "on X" next to another chain: the funds sit on X
                return match distinct.iter().find(|id| **id != on) {
                    Some(other) => (Some(on), Some(*other)),
                    None => (current.or(Some(on)), Some(on)),
                };
            }
        }

        match distinct {
            [] => (current, current),
            [only] => {
                let introduced_by_from = mentions
                    .iter()
                    .find(|m| m.chain_id == *only)
                    .map_or(false, |m| preceded_by(command, m.start, "from"));
                if introduced_by_from {
                    (Some(*only), current.or(Some(*only)))
                } else {
                    (current.or(Some(*only)), Some(*only))
                }
            }
            // three or more chains: first two in encounter order
            [first, second, ..] => (Some(*first), Some(*second)),
        }
    }

    fn destination_token(&self, command: &str, token_spans: &[(usize, usize)]) -> Option<String> {
        DEST_TOKEN
            .captures_iter(command)
            .filter_map(|cap| cap.get(1))
            .filter(|m| {
                let word = m.as_str();
                let rest = &command[m.start()..];
                !is_stop_word(word)
                    && self.resolve_alias(word).is_none()
                    // multi-word chain names such as "bnb chain"
                    && self.alias_pattern.find(rest).map_or(true, |c| c.start() != 0)
                    // first label of a name-service name
                    && !command[m.end()..].starts_with('.')
                    && !token_spans.iter().any(|(s, _)| *s == m.start())
            })
            .map(|m| m.as_str().to_ascii_uppercase())
            .next()
    }
}

/// Parse with the built-in chain registry
pub fn parse(command: &str, current_chain_id: Option<u64>) -> TransferIntent {
    DEFAULT_PARSER.parse(command, current_chain_id)
}

fn is_stop_word(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    STOP_WORDS.contains(&lower.as_str())
}

fn normalize_amount(raw: &str) -> String {
    if raw.starts_with('.') {
        format!("0{}", raw)
    } else {
        raw.to_string()
    }
}

fn preceded_by(command: &str, start: usize, word: &str) -> bool {
    command[..start]
        .split_whitespace()
        .last()
        .map_or(false, |w| w.eq_ignore_ascii_case(word))
}

fn extract_recipient(command: &str) -> Option<Recipient> {
    if let Some(m) = HEX_ADDRESS.find(command) {
        if let Ok(address) = Address::from_str(m.as_str()) {
            return Some(Recipient::Address(address));
        }
    }
    NAME_SERVICE
        .captures(command)
        .and_then(|cap| cap.get(1))
        .map(|m| Recipient::Name(m.as_str().to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETHEREUM: u64 = 1;
    const ARBITRUM: u64 = 42161;
    const OPTIMISM: u64 = 10;
    const BASE: u64 = 8453;
    const POLYGON: u64 = 137;

    #[test]
    fn test_bridge_from_to() {
        let intent = parse("bridge 100 USDC from Ethereum to Arbitrum", None);
        assert_eq!(intent.kind, OperationKind::Bridge);
        assert_eq!(intent.source_chain_id, Some(ETHEREUM));
        assert_eq!(intent.destination_chain_id, Some(ARBITRUM));
        assert_eq!(intent.source_token.as_deref(), Some("USDC"));
        assert_eq!(intent.destination_token.as_deref(), Some("USDC"));
        assert_eq!(intent.amount.as_deref(), Some("100"));
        assert!(intent.is_cross_chain);
        assert!(intent.recipient.is_none());
    }

    #[test]
    fn test_parse_is_deterministic() {
        let cmd = "move 0.5 eth from base to op and send to vitalik.eth";
        assert_eq!(parse(cmd, Some(BASE)), parse(cmd, Some(BASE)));
    }

    #[test]
    fn test_two_chains_without_keyword_is_cross_chain() {
        let intent = parse("swap 10 USDC on polygon for USDC arbitrum", Some(POLYGON));
        assert!(intent.is_cross_chain);
        assert_eq!(intent.source_chain_id, Some(POLYGON));
        assert_eq!(intent.destination_chain_id, Some(ARBITRUM));

        let intent = parse("10 usdc polygon arbitrum", None);
        assert!(intent.is_cross_chain);
        assert_eq!(intent.source_chain_id, Some(POLYGON));
        assert_eq!(intent.destination_chain_id, Some(ARBITRUM));
    }

    #[test]
    fn test_on_chain_with_second_chain_is_source() {
        let cases = [
            ("send 5 USDC on base to optimism", BASE, OPTIMISM),
            ("bridge 10 USDC on polygon to arbitrum", POLYGON, ARBITRUM),
            ("swap 10 USDC on polygon for USDC arbitrum", POLYGON, ARBITRUM),
            ("send to optimism 5 USDC on base", BASE, OPTIMISM),
        ];

        for (command, source, destination) in cases {
            for current in [Some(source), Some(destination), None] {
                let intent = parse(command, current);
                assert!(intent.is_cross_chain, "{} with {:?}", command, current);
                assert_eq!(intent.source_chain_id, Some(source), "{} with {:?}", command, current);
                assert_eq!(
                    intent.destination_chain_id,
                    Some(destination),
                    "{} with {:?}",
                    command,
                    current
                );
            }
        }
    }

    #[test]
    fn test_cross_chain_never_has_same_source_and_destination() {
        let commands = [
            "bridge 10 USDC on base",
            "bridge 10 USDC",
            "bridge 1 ETH cross-chain to base",
            "move 3 USDC from optimism to arbitrum",
            "send 5 USDC on base to optimism",
            "swap 1 ETH for USDC on arbitrum",
            "10 usdc polygon arbitrum",
        ];

        for command in commands {
            for current in [None, Some(ETHEREUM), Some(BASE), Some(ARBITRUM)] {
                let intent = parse(command, current);
                if intent.is_cross_chain && intent.source_chain_id.is_some() {
                    assert_ne!(
                        intent.source_chain_id, intent.destination_chain_id,
                        "{} with {:?}",
                        command, current
                    );
                }
            }
        }
    }

    #[test]
    fn test_bridge_keyword_alone_leaves_destination_open() {
        let intent = parse("bridge 10 USDC on base", Some(BASE));
        assert!(intent.is_cross_chain);
        assert_eq!(intent.source_chain_id, Some(BASE));
        assert_eq!(intent.destination_chain_id, None);
    }

    #[test]
    fn test_single_chain_differs_from_current() {
        let intent = parse("send 25 USDT to arbitrum", Some(ETHEREUM));
        assert!(intent.is_cross_chain);
        assert_eq!(intent.source_chain_id, Some(ETHEREUM));
        assert_eq!(intent.destination_chain_id, Some(ARBITRUM));

        let intent = parse("swap 1 ETH for USDC on arbitrum", Some(ARBITRUM));
        assert!(!intent.is_cross_chain);
        assert_eq!(intent.source_chain_id, Some(ARBITRUM));
        assert_eq!(intent.destination_chain_id, Some(ARBITRUM));
        assert_eq!(intent.destination_token.as_deref(), Some("USDC"));
    }

    #[test]
    fn test_single_from_mention_is_source() {
        let intent = parse("bring 3 USDC back from optimism", Some(ETHEREUM));
        assert_eq!(intent.source_chain_id, Some(OPTIMISM));
        assert_eq!(intent.destination_chain_id, Some(ETHEREUM));
    }

    #[test]
    fn test_operation_kind_precedence() {
        assert_eq!(parse("transfer to arbitrum 5 USDC", None).kind, OperationKind::Bridge);
        assert_eq!(
            parse("transfer 5 USDC to 0x1111111111111111111111111111111111111111", None).kind,
            OperationKind::Send
        );
        assert_eq!(parse("check my balance", None).kind, OperationKind::Balance);
        assert_eq!(parse("swap 1 ETH for DAI", None).kind, OperationKind::Swap);
    }

    #[test]
    fn test_unrecognized_command_defaults_to_empty_swap() {
        let intent = parse("hello there", None);
        assert_eq!(intent, TransferIntent::empty("hello there"));
    }

    #[test]
    fn test_token_is_not_a_chain_mention() {
        // AVAX and MATIC are both tokens and chain aliases
        let intent = parse("bridge 2 AVAX from avalanche to polygon", None);
        assert_eq!(intent.source_token.as_deref(), Some("AVAX"));
        assert_eq!(intent.source_chain_id, Some(43114));
        assert_eq!(intent.destination_chain_id, Some(POLYGON));
    }

    #[test]
    fn test_three_chains_uses_first_two() {
        let intent = parse("10 USDC base optimism polygon", None);
        assert_eq!(intent.source_chain_id, Some(BASE));
        assert_eq!(intent.destination_chain_id, Some(OPTIMISM));
    }

    #[test]
    fn test_destination_token_rejects_chain_names() {
        let intent = parse("swap 100 USDC to arbitrum", Some(ETHEREUM));
        assert_eq!(intent.destination_token, None);

        let intent = parse("swap 100 USDC into WETH", Some(ETHEREUM));
        assert_eq!(intent.destination_token.as_deref(), Some("WETH"));
    }

    #[test]
    fn test_recipient_extraction() {
        let intent = parse(
            "send 1 ETH to 0x52908400098527886E0F7030069857D2E4169EE7 on base",
            Some(BASE),
        );
        assert!(matches!(intent.recipient, Some(Recipient::Address(_))));
        assert!(!intent.is_cross_chain);

        let intent = parse("bridge 50 USDC to base for alice.base.eth", Some(ETHEREUM));
        assert_eq!(intent.recipient, Some(Recipient::Name("alice.base.eth".into())));
        assert_eq!(intent.destination_token.as_deref(), Some("USDC"));
    }

    #[test]
    fn test_leading_decimal_amount() {
        let intent = parse("bridge .25 ETH from arb to base", None);
        assert_eq!(intent.amount.as_deref(), Some("0.25"));
        assert_eq!(intent.source_chain_id, Some(ARBITRUM));
    }
}
