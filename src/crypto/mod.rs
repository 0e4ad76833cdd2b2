// Payload crypto: the hybrid envelope protecting message content between the
// client and this gateway, and the vault of per-client RSA key pairs.

pub mod envelope;
pub mod vault;

pub use envelope::{decrypt, encrypt, WRAPPED_KEY_LEN};
pub use vault::KeyVault;
