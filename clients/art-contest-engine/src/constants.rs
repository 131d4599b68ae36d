use std::time::Duration;

// ==================== CHAINS ====================

/// Local development node
pub const LOCALHOST_CHAIN_ID: u64 = 31_337;
/// Public test network
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

// ==================== AUTHORIZATION ====================

/// Domain tag bound into every signed decryption authorization request
pub const AUTHORIZATION_DOMAIN: &str = "art-contest:user-decrypt:v1";

/// Default lifetime of a signed decryption authorization (365 days)
pub const DEFAULT_AUTHORIZATION_VALIDITY_SECS: i64 = 365 * 24 * 60 * 60;

/// An authorization closer than this to its expiry is re-requested
pub const DEFAULT_AUTHORIZATION_SAFETY_MARGIN_SECS: i64 = 60;

// ==================== RELAY ====================

/// Computation definition name for user decryption (must match the relay)
pub const USER_DECRYPT_COMP: &str = "user_decrypt";

/// Argument indices are a single byte, so one request holds at most 256 handles
pub const MAX_HANDLES_PER_REQUEST: usize = u8::MAX as usize + 1;

pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(30);

// ==================== CONTEST ====================

pub const MAX_TITLE_LEN: usize = 100;

pub const DEFAULT_CATEGORIES: [&str; 6] = [
    "Painting",
    "Photography",
    "Digital Art",
    "Sculpture",
    "Installation",
    "Conceptual Art",
];
