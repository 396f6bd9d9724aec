//! Pure rate-limiting logic over usage buckets.
//!
//! Both the live dispatcher and the wait simulator drive these functions,
//! so they take `now` explicitly and operate on a bucket passed by
//! reference. Nothing here touches a clock or a store.

use chrono::{Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::limits::{LimitSpec, LimitType};

pub const SECOND_MS: i64 = 1_000;
pub const MINUTE_MS: i64 = 60_000;
pub const DAY_MS: i64 = 86_400_000;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Epoch milliseconds of the first instant of the next UTC calendar month.
pub fn next_utc_month_start(now_ms: i64) -> i64 {
    let now = Utc
        .timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now);
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("first of a month is a valid UTC timestamp")
        .timestamp_millis()
}

/// Counter state for one `(queue, model)` key.
///
/// Serialized as-is into the remote record store, so every field defaults
/// when absent: arrays to empty, counts to zero, wall-clock anchors to zero
/// (repaired to `now` by [`UsageBucket::restore`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageBucket {
    /// Completion timestamps within the last second, ascending
    pub second_ts: Vec<i64>,

    /// Completion timestamps within the last minute, ascending
    pub minute_ts: Vec<i64>,

    /// Completion timestamps within the last day, ascending
    pub day_ts: Vec<i64>,

    /// Tokens consumed in the current calendar month
    pub month_token_count: u64,

    /// Epoch ms of the start of the next UTC month
    pub month_token_reset_at: i64,

    /// Requests in the current calendar month
    pub month_request_count: u64,

    /// Epoch ms of the start of the next UTC month
    pub month_request_reset_at: i64,

    /// Tokens consumed in the current fixed 1-minute window
    pub minute_token_count: u64,

    /// Start of the current fixed 1-minute token window
    pub minute_token_window_start: i64,
}

impl UsageBucket {
    /// A zeroed bucket anchored at `now`.
    pub fn new(now_ms: i64) -> Self {
        let month_reset = next_utc_month_start(now_ms);
        Self {
            month_token_reset_at: month_reset,
            month_request_reset_at: month_reset,
            minute_token_window_start: now_ms,
            ..Self::default()
        }
    }

    /// Repair wall-clock anchors missing from a stored record.
    pub fn restore(mut self, now_ms: i64) -> Self {
        if self.month_token_reset_at == 0 {
            self.month_token_reset_at = now_ms;
        }
        if self.month_request_reset_at == 0 {
            self.month_request_reset_at = now_ms;
        }
        if self.minute_token_window_start == 0 {
            self.minute_token_window_start = now_ms;
        }
        self
    }
}

/// Drop window entries and roll expired counters. Applied at the start of
/// every admission check and after every record.
fn maintain(now: i64, bucket: &mut UsageBucket) {
    prune(now, bucket);

    if now >= bucket.month_token_reset_at {
        bucket.month_token_count = 0;
        bucket.month_token_reset_at = next_utc_month_start(now);
    }
    if now >= bucket.month_request_reset_at {
        bucket.month_request_count = 0;
        bucket.month_request_reset_at = next_utc_month_start(now);
    }
    if now - bucket.minute_token_window_start >= MINUTE_MS {
        bucket.minute_token_count = 0;
        bucket.minute_token_window_start = now;
    }
}

fn prune(now: i64, bucket: &mut UsageBucket) {
    bucket.second_ts.retain(|t| now - t < SECOND_MS);
    bucket.minute_ts.retain(|t| now - t < MINUTE_MS);
    bucket.day_ts.retain(|t| now - t < DAY_MS);
}

/// How long until a request of `tokens_needed` tokens is admissible.
///
/// Returns 0 when every limit has slack. Ties are broken by the maximum
/// candidate wait. A token estimate of 0 never blocks a token-based limit.
pub fn wait_ms(
    now: i64,
    limits: &[LimitSpec],
    bucket: &mut UsageBucket,
    tokens_needed: u64,
) -> u64 {
    maintain(now, bucket);

    let mut wait: i64 = 0;

    for spec in limits {
        let candidate = match spec.limit_type {
            LimitType::RequestsPerSecond => {
                sliding_wait(now, &bucket.second_ts, spec.limit, SECOND_MS)
            }
            LimitType::RequestsPerMinute => {
                sliding_wait(now, &bucket.minute_ts, spec.limit, MINUTE_MS)
            }
            LimitType::RequestsPerDay => sliding_wait(now, &bucket.day_ts, spec.limit, DAY_MS),
            LimitType::TokensPerMonth => {
                if tokens_needed > 0 && bucket.month_token_count + tokens_needed > spec.limit {
                    bucket.month_token_reset_at - now
                } else {
                    0
                }
            }
            LimitType::RequestsPerMonth => {
                if bucket.month_request_count + 1 > spec.limit {
                    bucket.month_request_reset_at - now
                } else {
                    0
                }
            }
            LimitType::TokensPerMinute => {
                let stale = now - bucket.minute_token_window_start >= MINUTE_MS;
                if tokens_needed > 0
                    && !stale
                    && bucket.minute_token_count + tokens_needed > spec.limit
                {
                    bucket.minute_token_window_start + MINUTE_MS - now
                } else {
                    0
                }
            }
        };
        wait = wait.max(candidate);
    }

    wait.max(0) as u64
}

fn sliding_wait(now: i64, timestamps: &[i64], limit: u64, window_ms: i64) -> i64 {
    if (timestamps.len() as u64) < limit {
        return 0;
    }
    match timestamps.first() {
        Some(oldest) => window_ms - (now - oldest),
        None => 0,
    }
}

/// Record the consumption of a just-completed request.
pub fn record(now: i64, tokens: u64, bucket: &mut UsageBucket) {
    bucket.second_ts.push(now);
    bucket.minute_ts.push(now);
    bucket.day_ts.push(now);

    if tokens > 0 {
        bucket.month_token_count += tokens;
    }
    bucket.month_request_count += 1;

    if now - bucket.minute_token_window_start >= MINUTE_MS {
        bucket.minute_token_count = 0;
        bucket.minute_token_window_start = now;
    }
    if tokens > 0 {
        bucket.minute_token_count += tokens;
    }

    prune(now, bucket);
}

/// Point-in-time view of one bucket with maintenance applied.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSnapshot {
    pub requests_last_second: usize,
    pub requests_last_minute: usize,
    pub requests_last_day: usize,
    pub minute_tokens: MinuteTokenSnapshot,
    pub month: MonthSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinuteTokenSnapshot {
    pub count: u64,
    pub window_start_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthSnapshot {
    pub tokens: MonthCounterSnapshot,
    pub requests: MonthCounterSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthCounterSnapshot {
    pub count: u64,
    pub reset_at_ms: i64,
    pub reset_in_ms: i64,
}

/// Build a fresh view of a bucket without mutating it.
pub fn snapshot(now: i64, bucket: &UsageBucket) -> BucketSnapshot {
    let mut view = bucket.clone();
    maintain(now, &mut view);

    BucketSnapshot {
        requests_last_second: view.second_ts.len(),
        requests_last_minute: view.minute_ts.len(),
        requests_last_day: view.day_ts.len(),
        minute_tokens: MinuteTokenSnapshot {
            count: view.minute_token_count,
            window_start_ms: view.minute_token_window_start,
        },
        month: MonthSnapshot {
            tokens: MonthCounterSnapshot {
                count: view.month_token_count,
                reset_at_ms: view.month_token_reset_at,
                reset_in_ms: (view.month_token_reset_at - now).max(0),
            },
            requests: MonthCounterSnapshot {
                count: view.month_request_count,
                reset_at_ms: view.month_request_reset_at,
                reset_in_ms: (view.month_request_reset_at - now).max(0),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::LimitSpec;

    fn specs(entries: &[(LimitType, u64)]) -> Vec<LimitSpec> {
        entries.iter().map(|&(t, l)| LimitSpec::new(t, l)).collect()
    }

    #[test]
    fn test_new_bucket_is_admissible() {
        let now = now_ms();
        let mut bucket = UsageBucket::new(now);
        let limits = specs(&[
            (LimitType::RequestsPerSecond, 1),
            (LimitType::TokensPerMonth, 100),
        ]);
        assert_eq!(wait_ms(now, &limits, &mut bucket, 10), 0);
    }

    #[test]
    fn test_rps_wait_counts_down() {
        let now = 1_000_000;
        let mut bucket = UsageBucket::new(now);
        record(now, 0, &mut bucket);

        let limits = specs(&[(LimitType::RequestsPerSecond, 1)]);
        assert_eq!(wait_ms(now + 100, &limits, &mut bucket, 0), 900);
        assert_eq!(wait_ms(now + 999, &limits, &mut bucket, 0), 1);
        // Entry expired out of the window
        assert_eq!(wait_ms(now + 1_000, &limits, &mut bucket, 0), 0);
    }

    #[test]
    fn test_sliding_windows_use_oldest_entry() {
        let now = 1_000_000;
        let mut bucket = UsageBucket::new(now);
        record(now, 0, &mut bucket);
        record(now + 200, 0, &mut bucket);

        let limits = specs(&[(LimitType::RequestsPerMinute, 2)]);
        // Full at 2: the oldest entry gates the wait
        assert_eq!(wait_ms(now + 300, &limits, &mut bucket, 0), MINUTE_MS as u64 - 300);
    }

    #[test]
    fn test_max_wins_across_limits() {
        let now = 1_000_000;
        let mut bucket = UsageBucket::new(now);
        record(now, 0, &mut bucket);

        let limits = specs(&[
            (LimitType::RequestsPerSecond, 1),
            (LimitType::RequestsPerMinute, 1),
        ]);
        // Both trip; the minute window dominates
        assert_eq!(
            wait_ms(now + 100, &limits, &mut bucket, 0),
            MINUTE_MS as u64 - 100
        );
    }

    #[test]
    fn test_zero_tokens_never_block_token_limits() {
        let now = 1_000_000;
        let mut bucket = UsageBucket::new(now);
        bucket.month_token_count = 10_000;
        bucket.minute_token_count = 10_000;

        let limits = specs(&[
            (LimitType::TokensPerMonth, 100),
            (LimitType::TokensPerMinute, 100),
        ]);
        assert_eq!(wait_ms(now + 1, &limits, &mut bucket, 0), 0);
    }

    #[test]
    fn test_month_token_limit_waits_until_reset() {
        let now = 1_000_000;
        let mut bucket = UsageBucket::new(now);
        bucket.month_token_count = 90;
        bucket.month_token_reset_at = now + 5_000;

        let limits = specs(&[(LimitType::TokensPerMonth, 100)]);
        assert_eq!(wait_ms(now, &limits, &mut bucket, 20), 5_000);
        // Fits under the cap
        assert_eq!(wait_ms(now, &limits, &mut bucket, 10), 0);
    }

    #[test]
    fn test_month_request_limit() {
        let now = 1_000_000;
        let mut bucket = UsageBucket::new(now);
        bucket.month_request_count = 5;
        bucket.month_request_reset_at = now + 777;

        let limits = specs(&[(LimitType::RequestsPerMonth, 5)]);
        assert_eq!(wait_ms(now, &limits, &mut bucket, 0), 777);
    }

    #[test]
    fn test_monthly_counters_reset_on_boundary() {
        // Scenario S4: count at the cap, reset 1 ms away
        let now = 1_000_000;
        let mut bucket = UsageBucket::new(now);
        bucket.month_request_count = 5;
        bucket.month_request_reset_at = now + 1;

        let limits = specs(&[(LimitType::RequestsPerMonth, 5)]);
        assert!(wait_ms(now, &limits, &mut bucket, 0) <= 1);

        // Crossing the boundary zeroes the counter and moves the anchor
        // strictly past now
        assert_eq!(wait_ms(now + 1, &limits, &mut bucket, 0), 0);
        assert_eq!(bucket.month_request_count, 0);
        assert!(bucket.month_request_reset_at > now + 1);
    }

    #[test]
    fn test_minute_token_window_is_tumbling() {
        let now = 1_000_000;
        let mut bucket = UsageBucket::new(now);
        record(now, 80, &mut bucket);

        let limits = specs(&[(LimitType::TokensPerMinute, 100)]);
        // 30 tokens would exceed the live window: wait to its end
        assert_eq!(
            wait_ms(now + 100, &limits, &mut bucket, 30),
            (MINUTE_MS - 100) as u64
        );

        // Once the fixed window goes stale it resets wholesale rather than
        // sliding entry by entry
        assert_eq!(wait_ms(now + MINUTE_MS, &limits, &mut bucket, 30), 0);
        assert_eq!(bucket.minute_token_count, 0);
        assert_eq!(bucket.minute_token_window_start, now + MINUTE_MS);
    }

    #[test]
    fn test_record_appends_and_counts() {
        let now = 1_000_000;
        let mut bucket = UsageBucket::new(now);
        record(now, 42, &mut bucket);

        assert_eq!(bucket.second_ts, vec![now]);
        assert_eq!(bucket.minute_ts, vec![now]);
        assert_eq!(bucket.day_ts, vec![now]);
        assert_eq!(bucket.month_token_count, 42);
        assert_eq!(bucket.month_request_count, 1);
        assert_eq!(bucket.minute_token_count, 42);
    }

    #[test]
    fn test_pruning_is_monotone() {
        let now = 10_000_000;
        let mut bucket = UsageBucket::new(now);
        for offset in [0, 400, 800, 1_200] {
            record(now + offset, 0, &mut bucket);
        }

        let check = now + 1_300;
        wait_ms(check, &[], &mut bucket, 0);
        assert!(bucket.second_ts.iter().all(|t| check - t < SECOND_MS));
        assert!(bucket.minute_ts.iter().all(|t| check - t < MINUTE_MS));
        assert!(bucket.day_ts.iter().all(|t| check - t < DAY_MS));
        // Ascending order preserved
        assert!(bucket.minute_ts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_window_honesty_under_interleaving() {
        // Records only happen when wait_ms said 0; the window never
        // overflows its limit at record time.
        let limits = specs(&[(LimitType::RequestsPerSecond, 3)]);
        let mut bucket = UsageBucket::new(0);
        let mut now = 1_000_000;

        for _ in 0..50 {
            let wait = wait_ms(now, &limits, &mut bucket, 0);
            if wait == 0 {
                assert!(bucket.second_ts.len() < 3);
                record(now, 0, &mut bucket);
            } else {
                now += wait as i64;
                continue;
            }
            now += 100;
        }
    }

    #[test]
    fn test_next_utc_month_start_rolls_december() {
        let dec = Utc
            .with_ymd_and_hms(2025, 12, 15, 10, 30, 0)
            .single()
            .expect("valid timestamp");
        let next = next_utc_month_start(dec.timestamp_millis());
        let jan = Utc
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .single()
            .expect("valid timestamp");
        assert_eq!(next, jan.timestamp_millis());
    }

    #[test]
    fn test_next_utc_month_start_is_strictly_future() {
        let now = now_ms();
        assert!(next_utc_month_start(now) > now);
    }

    #[test]
    fn test_restore_defaults_missing_anchors() {
        let now = 1_000_000;
        let restored = UsageBucket::default().restore(now);
        assert_eq!(restored.month_token_reset_at, now);
        assert_eq!(restored.month_request_reset_at, now);
        assert_eq!(restored.minute_token_window_start, now);
    }

    #[test]
    fn test_bucket_tolerant_deserialization() {
        let bucket: UsageBucket = serde_json::from_str(r#"{"monthRequestCount": 10}"#)
            .expect("partial bucket parses");
        assert_eq!(bucket.month_request_count, 10);
        assert!(bucket.second_ts.is_empty());
        assert_eq!(bucket.month_token_count, 0);
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let now = 1_000_000;
        let mut bucket = UsageBucket::new(now);
        record(now, 10, &mut bucket);
        let before = bucket.clone();

        let view = snapshot(now + 2_000, &bucket);
        assert_eq!(bucket, before);
        // The view itself is maintained: the 1 s window has drained
        assert_eq!(view.requests_last_second, 0);
        assert_eq!(view.requests_last_minute, 1);
        assert_eq!(view.minute_tokens.count, 10);
    }
}
