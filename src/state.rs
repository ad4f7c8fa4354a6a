use crate::ops::period::Periodicity;

/// Fixed-capacity circular buffer. Once full, each push evicts the oldest sample.
#[derive(Debug, Clone)]
pub struct RingBuffer<T = f64> {
    data: Vec<T>,
    cap: usize,
    len: usize,
    write: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            data: vec![T::default(); cap.max(1)],
            cap: cap.max(1),
            len: 0,
            write: 0,
        }
    }

    /// Pushes a value and returns the evicted one, if the buffer was full.
    #[inline]
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = (self.len == self.cap).then(|| self.data[self.write]);
        self.data[self.write] = value;
        self.write += 1;
        if self.write == self.cap {
            self.write = 0;
        }
        if self.len < self.cap {
            self.len += 1;
        }
        evicted
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.cap
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    #[inline]
    fn latest_idx(&self) -> usize {
        if self.write == 0 {
            self.cap - 1
        } else {
            self.write - 1
        }
    }

    /// `lag = 0` is the latest sample.
    #[inline]
    pub fn get_lag(&self, lag: usize) -> Option<T> {
        if lag >= self.len {
            return None;
        }
        let last = self.latest_idx();
        let idx = if last >= lag {
            last - lag
        } else {
            self.cap + last - lag
        };
        Some(self.data[idx])
    }

    /// Replaces the latest sample in place, returning the replaced value.
    #[inline]
    pub fn overwrite_latest(&mut self, value: T) -> Option<T> {
        if self.len == 0 {
            self.push(value);
            return None;
        }
        let idx = self.latest_idx();
        Some(std::mem::replace(&mut self.data[idx], value))
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.write = 0;
    }

    /// Samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).rev().filter_map(move |lag| self.get_lag(lag))
    }
}

/// Single-slot buffer; formulas size the real window in `initialize`.
impl<T: Copy + Default> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Tracks the period bucket of the last update for frequency-gated formulas.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeriodGate {
    period: Periodicity,
    last_bucket: Option<i64>,
}

impl PeriodGate {
    pub fn new(period: Periodicity) -> Self {
        Self {
            period,
            last_bucket: None,
        }
    }

    #[inline]
    pub fn period(&self) -> Periodicity {
        self.period
    }

    /// Returns true when `ts` opens a new bucket (the state should advance),
    /// false when it revises the current one.
    #[inline]
    pub fn advance(&mut self, ts: i64) -> bool {
        let bucket = self.period.bucket(ts);
        if self.last_bucket == Some(bucket) {
            return false;
        }
        self.last_bucket = Some(bucket);
        true
    }

    pub fn reset(&mut self) {
        self.last_bucket = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{PeriodGate, RingBuffer};
    use crate::ops::period::Periodicity;

    #[test]
    fn ring_buffer_evicts_oldest_and_reads_lags_across_the_wrap() {
        let mut closes: RingBuffer<i64> = RingBuffer::new(2);
        assert_eq!(closes.push(7), None);
        assert!(!closes.is_full());
        assert_eq!(closes.push(8), None);
        assert_eq!(closes.push(9), Some(7));
        assert_eq!(closes.push(11), Some(8));
        assert!(closes.is_full());
        assert_eq!((closes.get_lag(0), closes.get_lag(1)), (Some(11), Some(9)));
        assert_eq!(closes.get_lag(2), None);
        assert_eq!(closes.iter().collect::<Vec<_>>(), vec![9, 11]);
        assert_eq!(RingBuffer::<f64>::new(0).capacity(), 1);
    }

    #[test]
    fn default_ring_buffer_holds_a_single_sample() {
        let mut ring: RingBuffer = RingBuffer::default();
        assert_eq!(ring.capacity(), 1);
        assert!(ring.is_empty());
        assert_eq!(ring.push(3.0), None);
        assert_eq!(ring.push(4.0), Some(3.0));
        assert_eq!(ring.get_lag(0), Some(4.0));
    }

    #[test]
    fn ring_buffer_overwrite_latest_keeps_length() {
        let mut ring: RingBuffer<f64> = RingBuffer::new(2);
        assert_eq!(ring.overwrite_latest(1.0), None);
        assert_eq!(ring.len(), 1);
        ring.push(2.0);
        assert_eq!(ring.overwrite_latest(5.0), Some(2.0));
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![1.0, 5.0]);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.get_lag(0), None);
    }

    #[test]
    fn period_gate_advances_once_per_bucket() {
        let mut gate = PeriodGate::new(Periodicity::Tick);
        assert!(gate.advance(100));
        assert!(!gate.advance(100));
        assert!(gate.advance(101));

        let mut daily = PeriodGate::new(Periodicity::Day);
        assert!(daily.advance(1_704_153_600)); // 2024-01-02 00:00:00
        assert!(!daily.advance(1_704_153_600 + 3_600));
        assert!(daily.advance(1_704_240_000));
        daily.reset();
        assert!(daily.advance(1_704_240_000));
    }
}
