pub mod client;

pub use client::TiingoClient;
