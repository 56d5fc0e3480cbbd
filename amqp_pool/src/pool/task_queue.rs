use std::collections::VecDeque;

/// Advisory capacity of [`TaskQueue::default`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// FIFO of tasks waiting for dispatch.
///
/// The capacity is advisory, nothing is ever rejected: the owner checks
/// [`is_over_capacity`](TaskQueue::is_over_capacity) and decides.
#[derive(Debug)]
pub struct TaskQueue<T> {
    tasks: VecDeque<T>,
    capacity: usize,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl<T> TaskQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: VecDeque::new(),
            capacity,
        }
    }

    /// Append to the tail.
    pub fn add(&mut self, task: T) -> &mut Self {
        self.tasks.push_back(task);
        self
    }

    /// Put a task back at the head.
    pub fn return_to_queue(&mut self, task: T) -> &mut Self {
        self.tasks.push_front(task);
        self
    }

    /// Peek the head.
    pub fn get(&self) -> Option<&T> {
        self.tasks.front()
    }

    /// Remove the head.
    pub fn done(&mut self) -> &mut Self {
        self.tasks.pop_front();
        self
    }

    /// Remove and return the head.
    pub fn pop(&mut self) -> Option<T> {
        self.tasks.pop_front()
    }

    pub fn clear(&mut self) -> &mut Self {
        self.tasks.clear();
        self
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_over_capacity(&self) -> bool {
        self.tasks.len() > self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::TaskQueue;

    #[test]
    fn test_fifo() {
        let mut queue = TaskQueue::default();
        assert!(queue.is_empty());
        assert_eq!(None, queue.get());

        queue.add(1).add(2).add(3);
        assert_eq!(Some(&1), queue.get());
        queue.done();
        assert_eq!(Some(&2), queue.get());
        assert_eq!(2, queue.len());

        queue.return_to_queue(9);
        assert_eq!(Some(9), queue.pop());
        assert_eq!(Some(2), queue.pop());
        assert_eq!(Some(3), queue.pop());
        assert_eq!(None, queue.pop());
        // removing from an empty queue is a no-op
        queue.done();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_capacity_is_advisory() {
        let mut queue = TaskQueue::new(2);
        queue.add("a").add("b").add("c");
        assert_eq!(3, queue.len());
        assert!(queue.is_over_capacity());
        queue.clear();
        assert!(queue.is_empty());
        assert!(!queue.is_over_capacity());
        assert_eq!(2, queue.capacity());
    }
}
