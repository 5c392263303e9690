pub mod access;
pub mod audit;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod keystore;
pub mod storage;
pub mod vault;
