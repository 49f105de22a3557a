use std::sync::{Arc, Condvar, Mutex};

/// Bounds the concurrently-open invocations against one provider endpoint.
///
/// `acquire` blocks when all permits are out; dropping the permit frees the
/// slot and wakes one waiter. Pools are owned by the session and discarded
/// with it.
#[derive(Debug)]
pub struct ConnPool {
    limit: u32,
    in_use: Mutex<u32>,
    freed: Condvar,
}

impl ConnPool {
    pub fn new(limit: u32) -> Arc<Self> {
        Arc::new(ConnPool {
            limit: limit.max(1),
            in_use: Mutex::new(0),
            freed: Condvar::new(),
        })
    }

    /// Blocks until a slot is free.
    pub fn acquire(self: &Arc<Self>) -> PoolPermit {
        let mut in_use = self.in_use.lock().unwrap();
        while *in_use >= self.limit {
            in_use = self.freed.wait(in_use).unwrap();
        }
        *in_use += 1;
        PoolPermit {
            pool: Arc::clone(self),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn in_use(&self) -> u32 {
        *self.in_use.lock().unwrap()
    }
}

/// One checked-out invocation slot.
#[derive(Debug)]
pub struct PoolPermit {
    pool: Arc<ConnPool>,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        let mut in_use = self.pool.in_use.lock().unwrap();
        *in_use -= 1;
        self.pool.freed.notify_one();
    }
}
