/// Per-flow traffic counters, as laid out in the kernel map value.
///
/// The kernel only ever increments a live flow's counters, so both fields
/// are monotonically non-decreasing between polls.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct FlowStats {
    pub packets: u64,
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FLOW_STATS_LEN;

    #[test]
    fn flow_stats_matches_wire_width() {
        assert_eq!(core::mem::size_of::<FlowStats>(), FLOW_STATS_LEN);
    }
}
