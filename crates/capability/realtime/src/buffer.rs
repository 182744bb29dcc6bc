//! 定长采样环形缓冲。

use domain::Sample;
use std::collections::VecDeque;

/// 采样缓冲默认容量。
pub const DEFAULT_SAMPLE_CAPACITY: usize = 2000;

/// 定长环形缓冲：满时静默淘汰最旧的采样，保持到达顺序。
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    items: VecDeque<Sample>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: Sample) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(sample);
    }

    /// 返回最近的至多 `n` 个采样（按到达顺序）。
    pub fn recent(&self, n: usize) -> Vec<Sample> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_CAPACITY)
    }
}
