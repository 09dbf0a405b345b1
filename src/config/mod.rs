/// Insert behaviours when the overflow tier runs out of probe reach
#[derive(PartialEq)]
pub enum SpillPolicy {
    /// Surface exhaustion as an error
    ///
    /// The failing insert leaves the table untouched. Callers that see the
    /// error can rebuild into a larger table.
    Reject,
    /// Silently discard the insert
    ///
    /// This mode is useful for cache-like workloads such as memo tables,
    /// where losing an entry only costs recomputation.
    Drop,
}

impl Default for SpillPolicy {
    fn default() -> Self {
        SpillPolicy::Reject
    }
}

#[derive(Default)]
pub struct TableConfig {
    spill_policy: SpillPolicy,
}

impl TableConfig {
    pub fn new(spill_policy: SpillPolicy) -> Self {
        Self { spill_policy }
    }

    #[inline(always)]
    pub fn rejects_on_full(&self) -> bool {
        self.spill_policy == SpillPolicy::Reject
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_rejects() {
        let config = TableConfig::default();
        assert!(config.rejects_on_full());
        assert!(!TableConfig::new(SpillPolicy::Drop).rejects_on_full());
    }
}
