//! Per-extractor batch bookkeeping
//!
//! [`BatchPlanner`] owns every [`ExtractorState`] and [`ContentBatch`]. Tasks
//! are referenced by id only; the payloads travel with the batch.

use std::collections::{HashMap, VecDeque};

use crate::types::{ExtractorInput, TaskId};

/// Downloaded payloads waiting to be extracted together
#[derive(Debug, Clone)]
pub struct ContentBatch {
    extractor: String,
    inputs: HashMap<TaskId, ExtractorInput>,
}

impl ContentBatch {
    /// Empty batch for `extractor`
    pub fn new(extractor: impl Into<String>) -> Self {
        Self {
            extractor: extractor.into(),
            inputs: HashMap::new(),
        }
    }

    /// Extractor this batch is for
    pub fn extractor(&self) -> &str {
        &self.extractor
    }

    /// Number of payloads
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Whether the batch holds no payloads
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Ids of the tasks in this batch
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.inputs.keys().cloned().collect()
    }

    /// Hand the payloads to an invoker
    pub fn into_parts(self) -> (String, HashMap<TaskId, ExtractorInput>) {
        (self.extractor, self.inputs)
    }
}

/// Scheduling state of one extractor
#[derive(Debug)]
pub struct ExtractorState {
    in_flight: usize,
    queue: VecDeque<ContentBatch>,
}

impl ExtractorState {
    fn new(extractor: &str) -> Self {
        Self {
            in_flight: 0,
            queue: VecDeque::from([ContentBatch::new(extractor)]),
        }
    }

    /// Batches launched and not yet completed
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Sizes of the queued batches, head first
    pub fn queued_sizes(&self) -> Vec<usize> {
        self.queue.iter().map(ContentBatch::len).collect()
    }
}

/// Accumulates downloads into bounded batches and decides what to launch
#[derive(Debug)]
pub struct BatchPlanner {
    batch_size: usize,
    extractors: HashMap<String, ExtractorState>,
}

impl BatchPlanner {
    /// Planner producing batches of at most `batch_size` tasks
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            extractors: HashMap::new(),
        }
    }

    /// Add a downloaded payload to the tail batch of its extractor
    ///
    /// A tail batch that reaches the size bound gets a fresh empty batch
    /// behind it. Returns true when that happened.
    pub fn add_download(&mut self, extractor: &str, task_id: TaskId, input: ExtractorInput) -> bool {
        let state = self
            .extractors
            .entry(extractor.to_string())
            .or_insert_with(|| ExtractorState::new(extractor));

        if state.queue.is_empty() {
            state.queue.push_back(ContentBatch::new(extractor));
        }
        let Some(tail) = state.queue.back_mut() else {
            return false;
        };

        tail.inputs.insert(task_id, input);
        if tail.len() >= self.batch_size {
            state.queue.push_back(ContentBatch::new(extractor));
            true
        } else {
            false
        }
    }

    /// Pop every batch that may be launched now
    ///
    /// An extractor is eligible when nothing is in flight for it and its
    /// head batch is non-empty. Each popped batch counts as in flight until
    /// [`complete_batch`](Self::complete_batch).
    pub fn take_dispatchable(&mut self) -> Vec<ContentBatch> {
        let mut ready = Vec::new();
        for (name, state) in self.extractors.iter_mut() {
            if state.in_flight > 0 {
                continue;
            }
            let head_ready = state.queue.front().is_some_and(|head| !head.is_empty());
            if !head_ready {
                continue;
            }
            if let Some(batch) = state.queue.pop_front() {
                if state.queue.is_empty() {
                    state.queue.push_back(ContentBatch::new(name.as_str()));
                }
                state.in_flight += 1;
                ready.push(batch);
            }
        }
        ready
    }

    /// Record that a launched batch finished, whatever its outcome
    pub fn complete_batch(&mut self, extractor: &str) {
        if let Some(state) = self.extractors.get_mut(extractor) {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }

    /// State of one extractor, if any download ever landed for it
    pub fn state(&self, extractor: &str) -> Option<&ExtractorState> {
        self.extractors.get(extractor)
    }

    /// Total in-flight batches across extractors
    pub fn total_in_flight(&self) -> usize {
        self.extractors.values().map(|s| s.in_flight).sum()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn input(n: u8) -> ExtractorInput {
        ExtractorInput {
            content_type: "image/png".into(),
            data: vec![n],
            params: serde_json::Value::Null,
        }
    }

    fn land(planner: &mut BatchPlanner, extractor: &str, ids: std::ops::Range<u8>) {
        for n in ids {
            planner.add_download(extractor, TaskId::new(format!("{extractor}-{n}")), input(n));
        }
    }

    #[test]
    fn full_batch_gets_empty_trailing_batch() {
        let mut planner = BatchPlanner::new(4);
        land(&mut planner, "img", 0..4);

        let state = planner.state("img").unwrap();
        assert_eq!(state.queued_sizes(), vec![4, 0]);
        assert_eq!(state.in_flight(), 0);
    }

    #[test]
    fn overflow_starts_next_batch() {
        let mut planner = BatchPlanner::new(3);
        land(&mut planner, "img", 0..7);
        assert_eq!(planner.state("img").unwrap().queued_sizes(), vec![3, 3, 1]);
    }

    #[test]
    fn add_reports_when_batch_fills() {
        let mut planner = BatchPlanner::new(2);
        assert!(!planner.add_download("img", TaskId::from("a"), input(0)));
        assert!(planner.add_download("img", TaskId::from("b"), input(1)));
    }

    #[test]
    fn partial_batch_is_dispatchable_when_idle() {
        let mut planner = BatchPlanner::new(10);
        land(&mut planner, "img", 0..3);

        let batches = planner.take_dispatchable();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[0].extractor(), "img");

        let state = planner.state("img").unwrap();
        assert_eq!(state.in_flight(), 1);
        assert_eq!(state.queued_sizes(), vec![0], "a fresh batch replaces the popped one");
    }

    #[test]
    fn one_batch_in_flight_per_extractor() {
        let mut planner = BatchPlanner::new(2);
        land(&mut planner, "img", 0..5);

        assert_eq!(planner.take_dispatchable().len(), 1);
        assert!(
            planner.take_dispatchable().is_empty(),
            "queued batches wait while one is in flight"
        );
        land(&mut planner, "img", 5..6);
        assert!(planner.take_dispatchable().is_empty());

        planner.complete_batch("img");
        let next = planner.take_dispatchable();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].len(), 2, "batches leave in FIFO order");
    }

    #[test]
    fn extractors_are_independent() {
        let mut planner = BatchPlanner::new(10);
        land(&mut planner, "img", 0..2);
        land(&mut planner, "txt", 0..1);

        let mut names: Vec<_> = planner
            .take_dispatchable()
            .iter()
            .map(|b| b.extractor().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["img", "txt"]);
        assert_eq!(planner.total_in_flight(), 2);
    }

    #[test]
    fn empty_head_is_not_dispatched() {
        let mut planner = BatchPlanner::new(2);
        land(&mut planner, "img", 0..2);
        planner.take_dispatchable();
        planner.complete_batch("img");

        assert!(planner.take_dispatchable().is_empty());
        assert_eq!(planner.state("img").unwrap().queued_sizes(), vec![0]);
    }

    #[test]
    fn complete_batch_never_underflows() {
        let mut planner = BatchPlanner::new(2);
        planner.complete_batch("unknown");
        land(&mut planner, "img", 0..1);
        planner.complete_batch("img");
        assert_eq!(planner.state("img").unwrap().in_flight(), 0);
    }
}
