//! Rebuilds the segment forest from a flat, id/parent-tagged segment list.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use apmx_core::model::segment::{Segment, SegmentId};

#[derive(Debug, Clone)]
pub struct SegmentTreeNode<'a> {
    segment: &'a Segment,
    children: Vec<SegmentTreeNode<'a>>,
}

impl<'a> SegmentTreeNode<'a> {
    pub fn segment(&self) -> &'a Segment {
        self.segment
    }

    /// Children in segment creation order.
    pub fn children(&self) -> &[SegmentTreeNode<'a>] {
        &self.children
    }

    pub fn duration(&self) -> Duration {
        self.segment.duration_or_zero()
    }

    /// Own duration minus the summed durations of direct children, floored at
    /// zero. Child intervals are not clamped to this node's interval.
    pub fn exclusive_duration(&self) -> Duration {
        let children: Duration = self.children.iter().map(SegmentTreeNode::duration).sum();
        self.duration().saturating_sub(children)
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(SegmentTreeNode::node_count).sum::<usize>()
    }
}

/// Builds the forest. Segments without a parent in the set are roots, as are
/// members of parent cycles, so every segment appears exactly once.
pub fn build_forest(segments: &[Segment]) -> Vec<SegmentTreeNode<'_>> {
    let ids: HashSet<SegmentId> = segments.iter().map(|s| s.id).collect();
    let mut children_of: HashMap<SegmentId, Vec<usize>> = HashMap::new();
    let mut roots = Vec::new();

    for (idx, segment) in segments.iter().enumerate() {
        match segment.parent_id {
            Some(parent) if parent != segment.id && ids.contains(&parent) => {
                children_of.entry(parent).or_default().push(idx);
            }
            _ => roots.push(idx),
        }
    }

    let mut visited = vec![false; segments.len()];
    let mut forest: Vec<SegmentTreeNode<'_>> = roots
        .into_iter()
        .map(|idx| build_node(segments, idx, &children_of, &mut visited))
        .collect();

    // Anything still unvisited sits on a parent cycle; cut it at its first member.
    for idx in 0..segments.len() {
        if !visited[idx] {
            forest.push(build_node(segments, idx, &children_of, &mut visited));
        }
    }
    forest
}

fn build_node<'a>(
    segments: &'a [Segment],
    idx: usize,
    children_of: &HashMap<SegmentId, Vec<usize>>,
    visited: &mut [bool],
) -> SegmentTreeNode<'a> {
    visited[idx] = true;
    let segment = &segments[idx];
    let mut children = Vec::new();
    if let Some(child_indices) = children_of.get(&segment.id) {
        for &child in child_indices {
            if !visited[child] {
                children.push(build_node(segments, child, children_of, visited));
            }
        }
    }
    SegmentTreeNode { segment, children }
}

/// Pre-order walk yielding each node with its parent.
pub fn walk<'t, 'a>(
    forest: &'t [SegmentTreeNode<'a>],
) -> impl Iterator<Item = (&'t SegmentTreeNode<'a>, Option<&'t SegmentTreeNode<'a>>)> {
    let mut stack: Vec<(&'t SegmentTreeNode<'a>, Option<&'t SegmentTreeNode<'a>>)> =
        forest.iter().rev().map(|n| (n, None)).collect();
    std::iter::from_fn(move || {
        let (node, parent) = stack.pop()?;
        stack.extend(node.children.iter().rev().map(|c| (c, Some(node))));
        Some((node, parent))
    })
}

pub fn node_count(forest: &[SegmentTreeNode<'_>]) -> usize {
    forest.iter().map(SegmentTreeNode::node_count).sum()
}

/// Sum of exclusive durations over every node.
pub fn total_time(forest: &[SegmentTreeNode<'_>]) -> Duration {
    walk(forest).map(|(n, _)| n.exclusive_duration()).sum()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use testkit::simple_segment;

    use super::*;

    #[test]
    fn empty_input_builds_empty_forest() {
        assert!(build_forest(&[]).is_empty());
    }

    #[test]
    fn unparented_segments_become_roots() {
        let segments = vec![
            simple_segment(0, None, 0, 5, "a"),
            simple_segment(1, Some(42), 0, 5, "b"),
        ];
        let forest = build_forest(&segments);
        assert_eq!(forest.len(), 2);
    }

    #[test]
    fn children_keep_creation_order() {
        let segments = vec![
            simple_segment(0, None, 0, 10, "root"),
            simple_segment(1, Some(0), 8, 1, "late"),
            simple_segment(2, Some(0), 1, 1, "early"),
        ];
        let forest = build_forest(&segments);
        let names: Vec<_> = forest[0]
            .children()
            .iter()
            .map(|c| c.segment().name())
            .collect();
        assert_eq!(names, vec!["late", "early"]);
    }

    #[test]
    fn children_listed_before_parent_still_attach() {
        let segments = vec![
            simple_segment(1, Some(0), 1, 1, "child"),
            simple_segment(0, None, 0, 5, "root"),
        ];
        let forest = build_forest(&segments);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].segment().name(), "root");
        assert_eq!(forest[0].children().len(), 1);
    }

    #[test]
    fn exclusive_subtracts_children_without_clamping() {
        let segments = vec![
            simple_segment(0, None, 0, 5, "root"),
            simple_segment(1, Some(0), 0, 1, "a"),
            simple_segment(2, Some(0), 3, 996, "b"),
        ];
        let forest = build_forest(&segments);
        assert_eq!(forest[0].exclusive_duration(), Duration::ZERO);

        let segments = vec![
            simple_segment(0, None, 0, 7, "root"),
            simple_segment(1, Some(0), 0, 3, "a"),
            simple_segment(2, Some(0), 3, 3, "b"),
        ];
        let forest = build_forest(&segments);
        assert_eq!(forest[0].exclusive_duration(), Duration::from_millis(1));
    }

    #[test]
    fn overlapping_children_are_summed() {
        let segments = vec![
            simple_segment(0, None, 0, 5, "root"),
            simple_segment(1, Some(0), 0, 3, "a"),
            simple_segment(2, Some(0), 0, 3, "b"),
        ];
        let forest = build_forest(&segments);
        assert_eq!(forest[0].exclusive_duration(), Duration::ZERO);
        assert_eq!(total_time(&forest), Duration::from_millis(6));
    }

    #[test]
    fn walk_is_preorder_with_parents() {
        let segments = vec![
            simple_segment(0, None, 0, 5, "root"),
            simple_segment(1, Some(0), 0, 1, "a"),
            simple_segment(2, Some(1), 0, 1, "a.1"),
            simple_segment(3, Some(0), 2, 1, "b"),
        ];
        let forest = build_forest(&segments);
        let order: Vec<_> = walk(&forest)
            .map(|(n, p)| (n.segment().id, p.map(|p| p.segment().id)))
            .collect();
        assert_eq!(
            order,
            vec![(0, None), (1, Some(0)), (2, Some(1)), (3, Some(0))]
        );
    }

    #[test]
    fn parent_cycles_do_not_lose_segments() {
        let segments = vec![
            simple_segment(0, Some(1), 0, 5, "a"),
            simple_segment(1, Some(0), 0, 5, "b"),
            simple_segment(2, Some(2), 0, 5, "self"),
        ];
        let forest = build_forest(&segments);
        assert_eq!(node_count(&forest), 3);
    }

    fn arbitrary_segments() -> impl Strategy<Value = Vec<Segment>> {
        prop::collection::vec((0u64..40, prop::option::of(0u64..40), 0u64..100), 0..40).prop_map(
            |raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(idx, (_, parent, dur))| {
                        simple_segment(idx as u64, parent, 0, dur, "s")
                    })
                    .collect()
            },
        )
    }

    proptest! {
        #[test]
        fn forest_contains_every_segment(segments in arbitrary_segments()) {
            let forest = build_forest(&segments);
            prop_assert_eq!(node_count(&forest), segments.len());
        }

        #[test]
        fn exclusive_never_exceeds_duration(segments in arbitrary_segments()) {
            let forest = build_forest(&segments);
            for (node, _) in walk(&forest) {
                prop_assert!(node.exclusive_duration() <= node.duration());
            }
        }

        #[test]
        fn exclusive_ignores_child_overhang(parent in 1u64..100, child_start in 0u64..200, child in 0u64..200) {
            let segments = vec![
                simple_segment(0, None, 0, parent, "root"),
                simple_segment(1, Some(0), child_start, child, "child"),
            ];
            let forest = build_forest(&segments);
            let expected = Duration::from_millis(parent.saturating_sub(child));
            prop_assert_eq!(forest[0].exclusive_duration(), expected);
        }
    }
}
