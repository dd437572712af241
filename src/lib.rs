//! Verify a BTC 15m signal log against realized Binance outcomes.
//!
//! Signals are bucketed into epoch-aligned windows, each active window gets a
//! majority vote, and votes are scored against the window's kline.

pub mod binance_klines;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod output;
pub mod processor;
pub mod signals;
pub mod stats;
pub mod verifier;
