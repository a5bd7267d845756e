use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::PathBuf;

/// Directories waiting to be walked, smallest first.
#[derive(Default)]
pub(crate) struct DirectoryQueue {
    heap: BinaryHeap<Reverse<(u64, PathBuf)>>,
}

impl DirectoryQueue {
    pub fn push(&mut self, path: PathBuf, size: u64) {
        self.heap.push(Reverse((size, path)));
    }

    pub fn pop(&mut self) -> Option<PathBuf> {
        self.heap.pop().map(|Reverse((_, path))| path)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::DirectoryQueue;

    #[test]
    fn smallest_first() {
        let mut queue = DirectoryQueue::default();
        queue.push("big".into(), 4096);
        queue.push("small".into(), 12);
        queue.push("b-medium".into(), 512);
        queue.push("a-medium".into(), 512);

        assert_eq!(4, queue.len());
        let order: Vec<PathBuf> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(
            vec![
                PathBuf::from("small"),
                PathBuf::from("a-medium"),
                PathBuf::from("b-medium"),
                PathBuf::from("big")
            ],
            order
        );
    }
}
