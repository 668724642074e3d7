use rand::Rng;

/// Number of random bytes behind every handle (128 bits).
pub const HANDLE_BYTES: usize = 16;

/// Allocate a fresh handle: 32 lowercase hex chars over 128 random bits.
///
/// Panics only if the OS entropy source fails, which is not recoverable.
pub fn allocate() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; HANDLE_BYTES] = rng.gen();
    hex::encode(bytes)
}

/// Cheap shape check so obviously bogus paths never reach the store.
pub fn is_well_formed(handle: &str) -> bool {
    handle.len() == HANDLE_BYTES * 2 && handle.bytes().all(|b| b.is_ascii_hexdigit())
}
