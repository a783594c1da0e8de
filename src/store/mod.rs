//! Usage: Credential persistence (key-value file, cipher probe, bundle store).

pub mod cipher;
pub mod credentials;
pub(crate) mod kv;
