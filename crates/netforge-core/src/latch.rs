use std::sync::{Condvar, Mutex};

/// One-shot countdown latch.
///
/// The server engines use a pair of these to run their two-phase
/// shutdown drain: workers count the first latch down and then block on
/// the second until the main thread has queued the forced close events.
pub struct Latch {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self { count: Mutex::new(count), cond: Condvar::new() }
    }

    /// Decrements the counter, waking waiters when it reaches zero.
    pub fn count_down(&self) {
        let mut count = self.count.lock().unwrap();
        if *count > 0 {
            *count -= 1;
        }
        if *count == 0 {
            self.cond.notify_all();
        }
    }

    /// Blocks until the counter reaches zero.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.cond.wait(count).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn releases_waiters_at_zero() {
        let latch = Arc::new(Latch::new(3));
        let waiter = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || latch.wait())
        };
        for _ in 0..3 {
            latch.count_down();
        }
        waiter.join().unwrap();
    }

    #[test]
    fn zero_count_does_not_block() {
        Latch::new(0).wait();
    }
}
