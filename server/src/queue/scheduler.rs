//! Weighted queue selection.
//!
//! Smooth weighted round-robin: every pick adds each queue's weight to its
//! running credit, takes the queue with the most credit, and charges it the
//! total weight. Over any window of `total` picks each queue is chosen
//! exactly `weight` times, interleaved rather than in bursts, so a heavier
//! queue drains more often without starving the lighter ones.

#[derive(Debug, Clone)]
struct WeightedQueue {
    name: String,
    weight: i64,
    credit: i64,
}

/// Picks which queue to poll next.
#[derive(Debug, Clone)]
pub struct WeightedScheduler {
    queues: Vec<WeightedQueue>,
    total: i64,
}

impl WeightedScheduler {
    /// Queues with a zero weight are dropped.
    #[must_use]
    pub fn new(weights: &[(String, u32)]) -> Self {
        let queues: Vec<WeightedQueue> = weights
            .iter()
            .filter(|(_, weight)| *weight > 0)
            .map(|(name, weight)| WeightedQueue {
                name: name.clone(),
                weight: i64::from(*weight),
                credit: 0,
            })
            .collect();
        let total = queues.iter().map(|q| q.weight).sum();
        Self { queues, total }
    }

    /// Next queue by weight, or `None` when there are no queues.
    pub fn next(&mut self) -> Option<&str> {
        for queue in &mut self.queues {
            queue.credit += queue.weight;
        }
        let total = self.total;
        let picked = self
            .queues
            .iter_mut()
            .reduce(|best, q| if q.credit > best.credit { q } else { best })?;
        picked.credit -= total;
        Some(&picked.name)
    }

    /// Polling order for one round: the weighted pick first, then the
    /// remaining queues by descending weight as fallbacks.
    pub fn poll_order(&mut self) -> Vec<String> {
        let Some(first) = self.next().map(str::to_string) else {
            return Vec::new();
        };
        let mut rest: Vec<&WeightedQueue> =
            self.queues.iter().filter(|q| q.name != first).collect();
        rest.sort_by(|a, b| b.weight.cmp(&a.weight));

        let mut order = Vec::with_capacity(self.queues.len());
        order.push(first);
        order.extend(rest.into_iter().map(|q| q.name.clone()));
        order
    }
}
