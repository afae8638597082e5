use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// A mutex that grants access in arrival order.
///
/// Each locker takes a ticket; the guard for ticket `n` is only handed out
/// once ticket `n - 1` has been released, so writers to one session are
/// served first-come first-served.
#[derive(Debug)]
pub struct FifoMutex<T> {
    tickets: Mutex<Tickets>,
    turn: Condvar,
    value: Mutex<T>,
}

#[derive(Debug, Default)]
struct Tickets {
    next: u64,
    serving: u64,
}

impl<T> FifoMutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            tickets: Mutex::new(Tickets::default()),
            turn: Condvar::new(),
            value: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> FifoGuard<'_, T> {
        let mut tickets = self.tickets.lock().unwrap_or_else(PoisonError::into_inner);
        let ticket = tickets.next;
        tickets.next += 1;
        while tickets.serving != ticket {
            tickets = self
                .turn
                .wait(tickets)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(tickets);

        // Only the ticket holder reaches this point, so this never contends.
        let guard = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        FifoGuard { owner: self, guard }
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct FifoGuard<'a, T> {
    owner: &'a FifoMutex<T>,
    guard: MutexGuard<'a, T>,
}

impl<T> std::ops::Deref for FifoGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for FifoGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for FifoGuard<'_, T> {
    fn drop(&mut self) {
        // The next ticket holder may wake before `guard` is dropped; it then
        // waits briefly on `value`, which nobody else can be contending for.
        let mut tickets = self
            .owner
            .tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tickets.serving += 1;
        drop(tickets);
        self.owner.turn.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_exclusive_access() {
        let lock = Arc::new(FifoMutex::new(0u64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..100 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 800);
    }

    #[test]
    fn test_waiters_are_served_in_arrival_order() {
        let lock = Arc::new(FifoMutex::new(Vec::new()));
        let first = lock.lock();

        let mut handles = Vec::new();
        for i in 0..4 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || lock.lock().push(i)));
            // Give each waiter time to take its ticket before the next one.
            thread::sleep(Duration::from_millis(30));
        }
        drop(first);
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), vec![0, 1, 2, 3]);
    }
}
