//! In-memory delivery queue.
//!
//! FIFO for fresh jobs; failed jobs go back to the head so they are retried
//! before anything that arrived after them. Ordering is therefore relaxed
//! under retry, not strict FIFO.

use std::collections::VecDeque;

use crate::config::OverflowPolicy;
use crate::error::{RelayError, Result};

use super::RelayJob;

/// Result of a successful [`DeliveryQueue::enqueue`].
#[derive(Debug)]
pub enum Enqueued {
    /// Job appended, nothing lost
    Accepted,
    /// Job appended after evicting the oldest pending job
    Evicted(RelayJob),
    /// Queue full and the incoming job was discarded
    Discarded(RelayJob),
}

/// Ordered buffer of pending relay jobs.
#[derive(Debug)]
pub struct DeliveryQueue {
    jobs: VecDeque<RelayJob>,
    capacity: Option<usize>,
    overflow: OverflowPolicy,
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl DeliveryQueue {
    /// A queue with no capacity limit.
    pub fn unbounded() -> Self {
        Self {
            jobs: VecDeque::new(),
            capacity: None,
            overflow: OverflowPolicy::default(),
        }
    }

    /// A queue holding at most `capacity` jobs (minimum 1).
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            jobs: VecDeque::with_capacity(capacity.min(1024)),
            capacity: Some(capacity.max(1)),
            overflow,
        }
    }

    /// Append a job to the tail, applying the overflow policy when full.
    pub fn enqueue(&mut self, job: RelayJob) -> Result<Enqueued> {
        match self.capacity {
            Some(cap) if self.jobs.len() >= cap => match self.overflow {
                OverflowPolicy::DropOldest => {
                    let evicted = self.jobs.pop_front();
                    self.jobs.push_back(job);
                    Ok(evicted.map_or(Enqueued::Accepted, Enqueued::Evicted))
                }
                OverflowPolicy::DropNewest => Ok(Enqueued::Discarded(job)),
                OverflowPolicy::Reject => Err(RelayError::QueueFull(cap)),
            },
            _ => {
                self.jobs.push_back(job);
                Ok(Enqueued::Accepted)
            }
        }
    }

    /// Remove up to `n` jobs from the head, preserving order.
    pub fn dequeue_batch(&mut self, n: usize) -> Vec<RelayJob> {
        let take = n.min(self.jobs.len());
        self.jobs.drain(..take).collect()
    }

    /// Reinsert a job at the head.
    ///
    /// Ignores the capacity: the job was admitted once already, so the queue
    /// may exceed its capacity by at most one batch.
    pub fn requeue_front(&mut self, job: RelayJob) {
        self.jobs.push_front(job);
    }

    pub fn size(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Drop all pending jobs, returning how many were removed.
    pub fn clear(&mut self) -> usize {
        let n = self.jobs.len();
        self.jobs.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::JobPayload;

    fn text_of(job: &RelayJob) -> &str {
        match &job.payload {
            JobPayload::Text(t) => t,
            _ => "",
        }
    }

    fn texts(jobs: &[RelayJob]) -> Vec<&str> {
        jobs.iter().map(text_of).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut q = DeliveryQueue::unbounded();
        for t in ["a", "b", "c"] {
            q.enqueue(RelayJob::text(t)).unwrap();
        }
        let batch = q.dequeue_batch(10);
        assert_eq!(texts(&batch), vec!["a", "b", "c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_dequeue_batch_partial_and_empty() {
        let mut q = DeliveryQueue::unbounded();
        for t in ["a", "b", "c"] {
            q.enqueue(RelayJob::text(t)).unwrap();
        }
        assert_eq!(texts(&q.dequeue_batch(2)), vec!["a", "b"]);
        assert_eq!(q.size(), 1);
        assert_eq!(texts(&q.dequeue_batch(2)), vec!["c"]);
        assert!(q.dequeue_batch(2).is_empty());
    }

    #[test]
    fn test_requeue_front_jumps_ahead() {
        let mut q = DeliveryQueue::unbounded();
        q.enqueue(RelayJob::text("new")).unwrap();
        q.requeue_front(RelayJob::text("failed"));
        assert_eq!(texts(&q.dequeue_batch(2)), vec!["failed", "new"]);
    }

    #[test]
    fn test_clear_returns_count() {
        let mut q = DeliveryQueue::unbounded();
        q.enqueue(RelayJob::text("a")).unwrap();
        q.enqueue(RelayJob::text("b")).unwrap();
        assert_eq!(q.clear(), 2);
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn test_overflow_drop_oldest() {
        let mut q = DeliveryQueue::bounded(2, OverflowPolicy::DropOldest);
        q.enqueue(RelayJob::text("a")).unwrap();
        q.enqueue(RelayJob::text("b")).unwrap();
        match q.enqueue(RelayJob::text("c")).unwrap() {
            Enqueued::Evicted(job) => assert_eq!(text_of(&job), "a"),
            other => panic!("expected eviction, got {:?}", other),
        }
        assert_eq!(texts(&q.dequeue_batch(5)), vec!["b", "c"]);
    }

    #[test]
    fn test_overflow_drop_newest() {
        let mut q = DeliveryQueue::bounded(1, OverflowPolicy::DropNewest);
        q.enqueue(RelayJob::text("a")).unwrap();
        assert!(matches!(
            q.enqueue(RelayJob::text("b")).unwrap(),
            Enqueued::Discarded(_)
        ));
        assert_eq!(texts(&q.dequeue_batch(5)), vec!["a"]);
    }

    #[test]
    fn test_overflow_reject() {
        let mut q = DeliveryQueue::bounded(1, OverflowPolicy::Reject);
        q.enqueue(RelayJob::text("a")).unwrap();
        let err = q.enqueue(RelayJob::text("b")).unwrap_err();
        assert!(matches!(err, RelayError::QueueFull(1)));
        assert_eq!(q.size(), 1);
    }

    #[test]
    fn test_requeue_front_may_exceed_capacity() {
        let mut q = DeliveryQueue::bounded(1, OverflowPolicy::Reject);
        q.enqueue(RelayJob::text("a")).unwrap();
        q.requeue_front(RelayJob::text("retry"));
        assert_eq!(q.size(), 2);
    }
}
