//! Utility functions for run identifiers and timestamps.

pub mod timestamps;

use uuid::Uuid;

pub use timestamps::{duration_ms, format_timestamp, iso_timestamp, now_utc, Timestamp};

/// Generates a new run identifier (UUID v4).
#[must_use]
pub fn generate_run_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_run_id_is_v4_and_unique() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert_eq!(a.get_version_num(), 4);
        assert_ne!(a, b);
    }
}
