use std::cmp::Ordering;

// Track/detection pair for the greedy assignment priority queue.
// Max heap order: higher IoU first, then lower track id, then lower detection index.
#[derive(Debug, Clone, Copy)]
pub struct MatchCandidate {
    pub iou: f32,
    pub track_id: u64,
    pub detection_idx: usize,
}

impl PartialEq for MatchCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MatchCandidate {}

impl PartialOrd for MatchCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MatchCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.iou
            .total_cmp(&other.iou)
            .then_with(|| other.track_id.cmp(&self.track_id))
            .then_with(|| other.detection_idx.cmp(&self.detection_idx))
    }
}

#[cfg(test)]
mod tests {
    use super::MatchCandidate;
    use std::collections::BinaryHeap;

    fn candidate(iou: f32, track_id: u64, detection_idx: usize) -> MatchCandidate {
        MatchCandidate {
            iou,
            track_id,
            detection_idx,
        }
    }

    #[test]
    fn test_pop_order() {
        let mut priority_queue: BinaryHeap<MatchCandidate> = BinaryHeap::new();
        priority_queue.push(candidate(0.5, 3, 0));
        priority_queue.push(candidate(0.9, 7, 1));
        priority_queue.push(candidate(0.5, 2, 1));
        priority_queue.push(candidate(0.5, 2, 0));
        priority_queue.push(candidate(0.4, 1, 0));

        let order: Vec<(u64, usize)> = std::iter::from_fn(|| priority_queue.pop())
            .map(|c| (c.track_id, c.detection_idx))
            .collect();
        assert_eq!(order, vec![(7, 1), (2, 0), (2, 1), (3, 0), (1, 0)]);
    }
}
