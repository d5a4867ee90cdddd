// src/lib.rs

pub mod blockchain;
pub mod cli;
pub mod core;
pub mod network;
pub mod service;
pub mod storage;
pub mod tools;

pub use crate::blockchain::bridge::{BridgeIntent, BridgeStatus, PendingBridge, TransactionRecord};
pub use crate::core::errors::BridgeError;
pub use crate::service::{BridgeOrchestrator, SubmitOutcome};
