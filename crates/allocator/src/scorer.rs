//! Pure scoring function for score-based allocation
//!
//! A direct port of the weighting in `SmartTokenAllocator.calculate_score`:
//! success rate dominates (up to 60 points), recent use modestly boosts (up
//! to 20), and total usage acts as a mild anti-concentration term (up to 20).

use store::IdentityRecord;

/// Score an identity in `[0, 100]` given the current time and the
/// configured minimum success rate threshold.
pub fn score(identity: &IdentityRecord, now_millis: u64, min_success_rate: f64) -> f64 {
    let total = identity.total();
    let rate = identity.success_rate();

    let base = if total > 10 && rate < min_success_rate {
        rate * 30.0
    } else {
        rate * 60.0
    };

    let hours_since_use = match identity.last_used {
        Some(last_used) => now_millis.saturating_sub(last_used) as f64 / 3_600_000.0,
        None => 0.0,
    };
    let freshness = if hours_since_use < 1.0 {
        20.0
    } else if hours_since_use < 24.0 {
        15.0
    } else {
        (20.0 - hours_since_use / 24.0).max(5.0)
    };

    let load = (20.0 - total as f64 / 100.0).max(0.0);

    base + freshness + load
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::{Status, Visibility};

    fn identity(success: u64, fail: u64, last_used: Option<u64>) -> IdentityRecord {
        IdentityRecord {
            id: 1,
            owner_id: None,
            visibility: Visibility::Public,
            status: Status::Active,
            region: "us-east-1".into(),
            profile_arn: None,
            success_count: success,
            fail_count: fail,
            last_used,
            last_check_ok: None,
            last_check_error: None,
        }
    }

    #[test]
    fn untouched_identity_gets_full_base_and_freshness() {
        let id = identity(0, 0, None);
        let s = score(&id, 1_000_000, 0.5);
        // rate=1.0, total=0 -> base=60, freshness=20 (never used), load=20
        assert_eq!(s, 100.0);
    }

    #[test]
    fn low_rate_above_threshold_total_is_heavily_penalized() {
        // 4 successes / 16 failures, total 20 > 10, rate 0.2 < 0.5
        let id = identity(4, 16, None);
        let s = score(&id, 1_000_000, 0.5);
        // base = 0.2*30 = 6, freshness = 20, load = 20 - 20/100 = 19.8
        assert!((s - 45.8).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn low_rate_below_threshold_total_is_not_penalized() {
        // 5 successes / 5 failures, total 10, not > 10, so base uses *60
        let id = identity(5, 5, None);
        let s = score(&id, 1_000_000, 0.5);
        // base = 0.5*60 = 30, freshness = 20, load = 20 - 10/100 = 19.9
        assert!((s - 69.9).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn freshness_tiers() {
        let now = 200 * 3_600_000;
        let fresh = identity(0, 0, Some(now - 30 * 60 * 1000));
        let recent = identity(0, 0, Some(now - 10 * 3_600_000));
        let stale = identity(0, 0, Some(now - 100 * 3_600_000));

        let s_fresh = score(&fresh, now, 0.5);
        let s_recent = score(&recent, now, 0.5);
        let s_stale = score(&stale, now, 0.5);
        assert!(s_fresh > s_recent);
        assert!(s_recent > s_stale);
    }

    #[test]
    fn freshness_floor_is_five() {
        let id = identity(0, 0, Some(0));
        let s = score(&id, 10_000 * 3_600_000, 0.5);
        // hours_since_use is huge; freshness floors at 5: base(60) + 5 + load(20)
        assert_eq!(s, 85.0);
    }

    #[test]
    fn load_term_floors_at_zero_for_heavy_usage() {
        let id = identity(1000, 0, None);
        let s = score(&id, 1_000_000, 0.5);
        // load = max(0, 20 - 1000/100) = 0
        let base = 1.0 * 60.0;
        let freshness = 20.0;
        assert_eq!(s, base + freshness);
    }

    #[test]
    fn score_is_deterministic() {
        let id = identity(7, 3, Some(5_000));
        let s1 = score(&id, 1_000_000, 0.5);
        let s2 = score(&id, 1_000_000, 0.5);
        assert_eq!(s1, s2);
    }
}
