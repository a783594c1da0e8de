//! Usage: OAuth authorization-code flow (coordinator, loopback callback, proxy exchange).

pub(crate) mod callback_server;
pub mod flow;
pub mod token_exchange;
