/// Plaza Auth Library
///
/// The AuthGate is the only component that issues or verifies credentials.
/// Everything downstream works with the `Identity` it returns.
///
/// Passwords are stored as Argon2id PHC strings.
pub mod gate;
pub mod password;

pub use gate::{AuthError, AuthGate, Identity};
