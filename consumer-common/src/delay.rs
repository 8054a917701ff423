use std::time::Duration;

/// Fixed delay-level ladder. Level `n` (1-indexed) maps to
/// `DELAY_LEVELS[n - 1]`. Level 0 means "not in the retry ladder".
pub const DELAY_LEVELS: &[Duration] = &[
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(2 * 60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(10 * 60),
    Duration::from_secs(20 * 60),
    Duration::from_secs(30 * 60),
    Duration::from_secs(60 * 60),
    Duration::from_secs(2 * 60 * 60),
];

pub const MAX_DELAY_LEVEL: u8 = DELAY_LEVELS.len() as u8;

/// Default ceiling on retry attempts before a message is routed to the DLQ.
pub const MAX_RECONSUME_COUNT: u32 = 16;

/// Look up the replay delay for a 1-indexed delay level. Returns `None` for
/// level 0 or anything beyond `MAX_DELAY_LEVEL`.
pub fn duration_for_level(level: u8) -> Option<Duration> {
    if level == 0 {
        return None;
    }
    DELAY_LEVELS.get(usize::from(level) - 1).copied()
}

/// Pick the delay level to republish at next, given the message's current
/// retry count and an optional caller override (from
/// `HandlerContext::delay_override`). The override is only honored if it
/// names a valid level; otherwise we fall back to `retry_count + 1`, capped
/// at `MAX_DELAY_LEVEL`.
pub fn next_delay_level(retry_count: u32, override_level: Option<u8>) -> u8 {
    if let Some(level) = override_level {
        if level >= 1 && level <= MAX_DELAY_LEVEL {
            return level;
        }
    }
    let candidate = retry_count.saturating_add(1);
    candidate.min(u32::from(MAX_DELAY_LEVEL)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_zero_has_no_duration() {
        assert_eq!(duration_for_level(0), None);
    }

    #[test]
    fn level_one_is_one_second() {
        assert_eq!(duration_for_level(1), Some(Duration::from_secs(1)));
    }

    #[test]
    fn level_beyond_max_is_none() {
        assert_eq!(duration_for_level(MAX_DELAY_LEVEL + 1), None);
    }

    #[test]
    fn next_level_without_override_increments_from_retry_count() {
        assert_eq!(next_delay_level(0, None), 1);
        assert_eq!(next_delay_level(4, None), 5);
    }

    #[test]
    fn next_level_caps_at_max() {
        assert_eq!(next_delay_level(u32::from(MAX_DELAY_LEVEL) + 10, None), MAX_DELAY_LEVEL);
    }

    #[test]
    fn invalid_override_falls_back_to_retry_count() {
        assert_eq!(next_delay_level(0, Some(0)), 1);
        assert_eq!(next_delay_level(0, Some(MAX_DELAY_LEVEL + 1)), 1);
    }

    #[test]
    fn valid_override_wins() {
        assert_eq!(next_delay_level(0, Some(5)), 5);
    }
}
