//! Folding per-iteration rows of a composite node into one view

use crate::entity::{NodeExecuteStatus, NodeExecution, TokenUsage};
use std::collections::BTreeMap;
use std::time::Duration;

/// Merge the iterations of one logical node
///
/// Identity comes from the lowest-indexed row. `indexed_executions` is dense
/// up to `max_index`, with `None` for iterations that never ran. Duration is
/// the longest iteration, tokens are summed, and status is Failed over
/// Running over Success.
pub fn merge_composite_inner_nodes(
    rows: BTreeMap<usize, NodeExecution>,
    max_index: usize,
) -> Option<NodeExecution> {
    let first = rows.values().next()?;
    let mut merged = NodeExecution {
        indexed_executions: Vec::new(),
        status: NodeExecuteStatus::Success,
        duration: Duration::ZERO,
        input: None,
        output: None,
        error_info: None,
        token_info: None,
        index: 0,
        updated_at: None,
        ..first.clone()
    };

    let last = rows.keys().next_back().copied().unwrap_or(0);
    let mut slots: Vec<Option<NodeExecution>> = vec![None; last.max(max_index) + 1];
    let mut tokens: Option<TokenUsage> = None;

    for (index, row) in rows {
        merged.duration = merged.duration.max(row.duration);
        if let Some(usage) = &row.token_info {
            tokens.get_or_insert_with(TokenUsage::default).add(usage);
        }
        match row.status {
            NodeExecuteStatus::Failed => merged.status = NodeExecuteStatus::Failed,
            NodeExecuteStatus::Running if merged.status != NodeExecuteStatus::Failed => {
                merged.status = NodeExecuteStatus::Running
            }
            _ => {}
        }
        slots[index] = Some(row);
    }

    merged.token_info = tokens;
    merged.indexed_executions = slots;
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::NodeType;

    fn iteration(index: usize, status: NodeExecuteStatus, millis: u64) -> NodeExecution {
        let mut row = NodeExecution::started(
            100 + index as i64,
            1,
            "7_inner",
            "Inner",
            NodeType::Llm,
        )
        .with_parent("7", index);
        row.status = status;
        row.duration = Duration::from_millis(millis);
        row
    }

    #[test]
    fn test_hole_in_the_middle() {
        let mut rows = BTreeMap::new();
        rows.insert(0, iteration(0, NodeExecuteStatus::Success, 30));
        rows.insert(2, iteration(2, NodeExecuteStatus::Success, 80));

        let merged = merge_composite_inner_nodes(rows, 2).unwrap();
        assert_eq!(merged.indexed_executions.len(), 3);
        assert!(merged.indexed_executions[0].is_some());
        assert!(merged.indexed_executions[1].is_none());
        assert_eq!(merged.indexed_executions[2].as_ref().unwrap().id, 102);
        assert_eq!(merged.status, NodeExecuteStatus::Success);
        assert_eq!(merged.duration, Duration::from_millis(80));
        assert_eq!(merged.id, 100);
        assert_eq!(merged.node_id, "7_inner");
        assert_eq!(merged.parent_node_id.as_deref(), Some("7"));
        assert!(merged.token_info.is_none());
    }

    #[test]
    fn test_failed_beats_running_beats_success() {
        let mut rows = BTreeMap::new();
        rows.insert(0, iteration(0, NodeExecuteStatus::Failed, 10));
        rows.insert(1, iteration(1, NodeExecuteStatus::Running, 10));
        rows.insert(2, iteration(2, NodeExecuteStatus::Success, 10));
        assert_eq!(
            merge_composite_inner_nodes(rows, 2).unwrap().status,
            NodeExecuteStatus::Failed
        );

        let mut rows = BTreeMap::new();
        rows.insert(0, iteration(0, NodeExecuteStatus::Success, 10));
        rows.insert(1, iteration(1, NodeExecuteStatus::Running, 10));
        assert_eq!(
            merge_composite_inner_nodes(rows, 1).unwrap().status,
            NodeExecuteStatus::Running
        );
    }

    #[test]
    fn test_duration_is_max_not_sum_and_tokens_sum() {
        let mut a = iteration(0, NodeExecuteStatus::Success, 100);
        a.token_info = Some(TokenUsage::new(10, 1));
        let b = iteration(1, NodeExecuteStatus::Success, 40);
        let mut c = iteration(2, NodeExecuteStatus::Success, 70);
        c.token_info = Some(TokenUsage::new(5, 2));

        let rows = BTreeMap::from([(0, a), (1, b), (2, c)]);
        let merged = merge_composite_inner_nodes(rows, 2).unwrap();
        assert_eq!(merged.duration, Duration::from_millis(100));
        assert_eq!(merged.token_info, Some(TokenUsage::new(15, 3)));
    }

    #[test]
    fn test_empty_group() {
        assert!(merge_composite_inner_nodes(BTreeMap::new(), 0).is_none());
    }
}
