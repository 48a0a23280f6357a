pub mod hashing;
mod phi_audit;

pub use hashing::*;
