pub mod error;
pub mod kraken;
pub mod messages;
pub mod nonce;
pub mod signature;
pub mod traits;
