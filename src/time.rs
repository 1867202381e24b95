use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the unix epoch. Times before the epoch map to 0.
pub fn unix_timestamp(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::unix_timestamp;

    #[test]
    fn before_epoch_is_zero() {
        assert_eq!(0, unix_timestamp(UNIX_EPOCH - Duration::from_secs(5)));
        assert_eq!(42, unix_timestamp(UNIX_EPOCH + Duration::from_secs(42)));
    }
}
