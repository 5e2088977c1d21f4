//! # RedLilium Core
//!
//! Low-level utilities shared by the frame graph crates.

pub mod pool;
pub mod spin;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
