pub mod builtin;

pub use builtin::{parse_master_key, SealedSecret, VaultCrypto};
