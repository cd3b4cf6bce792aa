//! Deterministic and randomized percentage rollout (§4.6).

use md5::{Digest, Md5};
use rand::Rng;

/// Deterministic bucket membership for `percentage_users`: the same
/// `(flag_name, user_id)` pair always lands in the same bucket, so a user's
/// membership is stable across calls and processes.
///
/// Hashes `"{flag_name}:{user_id}"` with MD5, takes the first 8 hex
/// characters as a `u32`, and checks `value % 100 < percentage`.
#[must_use]
pub fn in_percentage_of_users(flag_name: &str, user_id: &str, percentage: f64) -> bool {
    if percentage <= 0.0 {
        return false;
    }
    if percentage >= 100.0 {
        return true;
    }
    let digest = Md5::digest(format!("{flag_name}:{user_id}").as_bytes());
    let hex = format!("{digest:x}");
    let bucket = u32::from_str_radix(&hex[..8], 16).unwrap_or(0);
    f64::from(bucket % 100) < percentage
}

/// Non-deterministic per-request rollout for `percentage_requests`: each
/// call independently draws, so the same request re-evaluated twice can
/// land on different sides.
#[must_use]
pub fn in_percentage_of_requests(percentage: f64) -> bool {
    if percentage <= 0.0 {
        return false;
    }
    if percentage >= 100.0 {
        return true;
    }
    rand::rng().random_range(0.0..100.0) < percentage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_users_is_deterministic() {
        let a = in_percentage_of_users("my-flag", "user-123", 50.0);
        let b = in_percentage_of_users("my-flag", "user-123", 50.0);
        assert_eq!(a, b);
    }

    #[test]
    fn percentage_users_zero_never_matches() {
        assert!(!in_percentage_of_users("f", "any-user", 0.0));
    }

    #[test]
    fn percentage_users_hundred_always_matches() {
        assert!(in_percentage_of_users("f", "any-user", 100.0));
    }

    #[test]
    fn percentage_users_distributes_across_ids() {
        let hits = (0..1000)
            .filter(|i| in_percentage_of_users("rollout", &format!("user-{i}"), 30.0))
            .count();
        assert!((200..400).contains(&hits), "hits={hits}");
    }

    #[test]
    fn percentage_requests_bounds() {
        assert!(!in_percentage_of_requests(0.0));
        assert!(in_percentage_of_requests(100.0));
    }
}
