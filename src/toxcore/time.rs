//! Functions to work with wall-clock time.

use std::time::{SystemTime, UNIX_EPOCH};

/** Current unix time in seconds.

Friend timestamps (`last_seen_time`, friend-request retry times) are kept
in this form both in memory and in save files.
*/
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_time_test() {
        // somewhere after 2017-07-14 and before the heat death of the universe
        assert!(unix_time() > 1_500_000_000);
    }
}
