use async_trait::async_trait;

use crate::message::Message;
use crate::status::ConsumeStatus;

/// Scoped to a single `TaskRequest` invocation on a single task; there is
/// never more than one handler holding a reference to it at a time, so no
/// synchronization is needed despite the context being mutated by user code
/// during the call and read back afterwards.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    batch_size: usize,
    first_offset: i64,
    /// Per-index ack override: `success_flags[i] == true` means offset `i`
    /// of the batch should be acked even if the overall status is
    /// `RETRY_LATER`. Defaults to all `true`, matching spec's "default all
    /// true at status time" -- a handler that does nothing still acks a
    /// `SUCCESS` batch in full, and must explicitly flip flags to false to
    /// hold specific offsets back.
    success_flags: Vec<bool>,
    /// Overrides the delay level the next retry publish uses, if set to a
    /// valid level.
    delay_override: Option<u8>,
}

impl HandlerContext {
    pub fn new(batch_size: usize, first_offset: i64) -> Self {
        Self {
            batch_size,
            first_offset,
            success_flags: vec![true; batch_size],
            delay_override: None,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn first_offset(&self) -> i64 {
        self.first_offset
    }

    pub fn success_flags(&self) -> &[bool] {
        &self.success_flags
    }

    /// Mark the message at batch index `idx` as successfully handled even
    /// though the overall batch status is `RETRY_LATER`, so its offset is
    /// acked rather than sent through the retry ladder.
    pub fn mark_success(&mut self, idx: usize) {
        if let Some(flag) = self.success_flags.get_mut(idx) {
            *flag = true;
        }
    }

    /// Mark the message at batch index `idx` as needing a retry, even
    /// though the overall batch status is `SUCCESS`. Has no effect unless
    /// combined with an overall `RETRY_LATER` status: a `SUCCESS` batch acks
    /// every offset regardless of per-index flags.
    pub fn mark_retry(&mut self, idx: usize) {
        if let Some(flag) = self.success_flags.get_mut(idx) {
            *flag = false;
        }
    }

    pub fn set_delay_override(&mut self, level: u8) {
        self.delay_override = Some(level);
    }

    pub fn delay_override(&self) -> Option<u8> {
        self.delay_override
    }
}

/// User-supplied batch handler. May return either status; an `Err` (the
/// handler panicking or timing out) is caught by the caller and treated as
/// `RETRY_LATER` for the whole batch, per spec.
#[async_trait]
pub trait ConsumeHandler: Send + Sync + 'static {
    async fn consume(&self, messages: &[Message], ctx: &mut HandlerContext) -> ConsumeStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_all_offsets_to_success() {
        let ctx = HandlerContext::new(5, 100);
        assert_eq!(ctx.success_flags(), &[true, true, true, true, true]);
    }

    #[test]
    fn mark_retry_then_mark_success_flips_back() {
        let mut ctx = HandlerContext::new(3, 0);
        ctx.mark_retry(1);
        assert_eq!(ctx.success_flags(), &[true, false, true]);
        ctx.mark_success(1);
        assert_eq!(ctx.success_flags(), &[true, true, true]);
    }

    #[test]
    fn out_of_range_index_is_ignored() {
        let mut ctx = HandlerContext::new(2, 0);
        ctx.mark_retry(10);
        assert_eq!(ctx.success_flags(), &[true, true]);
    }
}
