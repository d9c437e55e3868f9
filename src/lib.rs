#![allow(dead_code)]

pub mod config;
pub mod crypto_arb;
pub mod datafeed;
pub mod events;
pub mod execution;
pub mod feeds;
pub mod mirror;
pub mod models;
pub mod monitor;
pub mod signals;
