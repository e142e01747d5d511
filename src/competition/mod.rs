pub mod aggregator;
pub mod checksum;
pub mod client;
pub mod controller;
pub mod epoch;
pub mod persistence;
pub mod types;
