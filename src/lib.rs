pub mod backend;
pub mod cli;
pub mod config;
pub mod engine;
pub mod models;
pub mod storage;
