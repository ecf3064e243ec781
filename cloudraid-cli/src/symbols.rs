//! Cross-platform console symbols
//!
//! ASCII fallbacks on Windows consoles.

/// Checkmark symbol
#[cfg(windows)]
pub const CHECK: &str = "[OK]";
#[cfg(not(windows))]
pub const CHECK: &str = "\u{2713}";

/// Warning symbol
#[cfg(windows)]
pub const WARN: &str = "[!]";
#[cfg(not(windows))]
pub const WARN: &str = "!";

/// Marks the shard rebuilt from parity
#[cfg(windows)]
pub const REBUILT: &str = "[R]";
#[cfg(not(windows))]
pub const REBUILT: &str = "\u{21BB}";
