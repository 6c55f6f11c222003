//! TRON chain access: address codec and the TronGrid event client.

pub mod address;
pub mod client;

pub use address::{AddressError, TronAddress};
pub use client::{TronError, TronGridClient};
