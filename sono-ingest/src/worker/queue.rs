//! Priority queue of verification tasks

use std::sync::Arc;
use tokio::time::Instant;

/// One pending verification
#[derive(Debug, Clone)]
pub struct VerificationTask {
    /// Content digest
    pub key: String,
    pub file_name: String,
    pub file_size: usize,
    pub bytes: Arc<[u8]>,
    pub retry_count: u32,
    pub priority: u32,
    /// Backoff deadline; the task is not ready before this instant
    pub not_before: Option<Instant>,
}

impl VerificationTask {
    pub fn new(key: impl Into<String>, file_name: impl Into<String>, bytes: Arc<[u8]>, priority: u32) -> Self {
        Self {
            key: key.into(),
            file_name: file_name.into(),
            file_size: bytes.len(),
            bytes,
            retry_count: 0,
            priority,
            not_before: None,
        }
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.not_before.map(|t| t <= now).unwrap_or(true)
    }
}

/// Tasks ordered by priority, highest first; equal priorities stay FIFO
#[derive(Debug)]
pub(crate) struct TaskQueue {
    tasks: Vec<VerificationTask>,
    max_len: usize,
}

impl TaskQueue {
    pub(crate) fn new(max_len: usize) -> Self {
        Self {
            tasks: Vec::new(),
            max_len: max_len.max(1),
        }
    }

    /// Raise the priority of a queued task to at least `priority`
    ///
    /// Returns false if no task with `key` is queued.
    pub(crate) fn merge_priority(&mut self, key: &str, priority: u32) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| t.key == key) else {
            return false;
        };
        task.priority = task.priority.max(priority);
        self.sort();
        true
    }

    /// Append and re-sort; returns tasks dropped by the length cap
    pub(crate) fn push(&mut self, task: VerificationTask) -> Vec<VerificationTask> {
        self.tasks.push(task);
        self.sort();

        let mut dropped = Vec::new();
        while self.tasks.len() > self.max_len {
            if let Some(task) = self.tasks.pop() {
                dropped.push(task);
            }
        }
        dropped
    }

    fn sort(&mut self) {
        // Vec::sort_by is stable
        self.tasks.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Remove up to `limit` ready tasks in priority order
    pub(crate) fn take_ready(&mut self, now: Instant, limit: usize) -> Vec<VerificationTask> {
        let mut taken = Vec::new();
        let mut index = 0;
        while index < self.tasks.len() && taken.len() < limit {
            if self.tasks[index].is_ready(now) {
                taken.push(self.tasks.remove(index));
            } else {
                index += 1;
            }
        }
        taken
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn clear(&mut self) {
        self.tasks.clear();
    }

    #[cfg(test)]
    pub(crate) fn priority_of(&self, key: &str) -> Option<u32> {
        self.tasks.iter().find(|t| t.key == key).map(|t| t.priority)
    }

    #[cfg(test)]
    pub(crate) fn keys(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.key.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn task(key: &str, priority: u32) -> VerificationTask {
        VerificationTask::new(key, format!("{}.mp3", key), Arc::from(&[0u8][..]), priority)
    }

    #[test]
    fn test_sorted_by_priority_then_fifo() {
        let mut queue = TaskQueue::new(10);
        queue.push(task("a", 1));
        queue.push(task("b", 5));
        queue.push(task("c", 1));
        queue.push(task("d", 5));
        assert_eq!(queue.keys(), vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_merge_priority_keeps_max() {
        let mut queue = TaskQueue::new(10);
        queue.push(task("a", 1));
        queue.push(task("b", 3));

        assert!(queue.merge_priority("a", 7));
        assert_eq!(queue.priority_of("a"), Some(7));
        assert_eq!(queue.keys(), vec!["a", "b"]);

        assert!(queue.merge_priority("a", 2));
        assert_eq!(queue.priority_of("a"), Some(7));
        assert!(!queue.merge_priority("zzz", 1));
    }

    #[test]
    fn test_overflow_drops_lowest_priority() {
        let mut queue = TaskQueue::new(2);
        assert!(queue.push(task("a", 2)).is_empty());
        assert!(queue.push(task("b", 3)).is_empty());

        let dropped = queue.push(task("c", 1));
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].key, "c");

        let dropped = queue.push(task("d", 9));
        assert_eq!(dropped[0].key, "a");
        assert_eq!(queue.keys(), vec!["d", "b"]);
    }

    #[test]
    fn test_take_ready_skips_backoff() {
        let now = Instant::now();
        let mut queue = TaskQueue::new(10);
        let mut delayed = task("late", 9);
        delayed.not_before = Some(now + Duration::from_secs(5));
        queue.push(delayed);
        queue.push(task("a", 1));
        queue.push(task("b", 1));

        let ready = queue.take_ready(now, 3);
        assert_eq!(ready.iter().map(|t| t.key.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(queue.len(), 1);

        let ready = queue.take_ready(now + Duration::from_secs(5), 3);
        assert_eq!(ready[0].key, "late");
    }
}
