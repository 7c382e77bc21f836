pub mod collector;
pub mod config;
pub mod deck;
pub mod executors;
pub mod ram;
pub mod sweep;
