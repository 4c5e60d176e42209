//! Tesseract Bridge - cross-chain transfer orchestration engine
//!
//! Turns natural-language commands into transfer intents, quotes and caches bridge routes,
//! funds cross-chain transfers through a bridging protocol and tracks the resulting messages
//! until they settle, with a recovery sub-flow for stalled destination legs. Same-chain
//! flows run as ordered multi-step transaction sequences.

pub mod api;
pub mod chain;
pub mod chains;
pub mod classify;
pub mod config;
pub mod error;
pub mod executor;
pub mod intent;
pub mod metrics;
pub mod monitor;
pub mod progress;
pub mod protocol;
pub mod quote;
pub mod retry;
pub mod router;
pub mod sequencer;
pub mod signer;
pub mod store;

pub use error::{EngineError, EngineResult};
pub use router::{IntentEngine, IntentOutcome};
