//! Exit code constants for the mirrorlock CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config, lock not held)
//! - 2: Lock busy
//! - 3: Lock state corrupted
//! - 4: Store or filesystem failure

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, invalid configuration.
pub const USER_ERROR: i32 = 1;

/// The requested lock is held by someone else.
pub const LOCK_BUSY: i32 = 2;

/// Lock state is corrupted and needs operator repair.
pub const LOCK_CORRUPT: i32 = 3;

/// Key/value store or local filesystem failure.
pub const IO_FAILURE: i32 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [SUCCESS, USER_ERROR, LOCK_BUSY, LOCK_CORRUPT, IO_FAILURE];
        for (i, &a) in codes.iter().enumerate() {
            for (j, &b) in codes.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "Exit codes must be distinct");
                }
            }
        }
    }
}
