use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Minimum-interval gate shared by every in-flight inference call.
///
/// Each `acquire()` reserves the next free slot and sleeps until it, so
/// concurrent callers are spaced `interval` apart. Dropping the future
/// cancels the wait; the reserved slot is simply left unused.
pub struct RateGate {
    name: &'static str,
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }

        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };

        let now = Instant::now();
        if slot > now {
            debug!(
                gate = self.name,
                wait_ms = (slot - now).as_millis() as u64,
                "Rate gate waiting"
            );
            tokio::time::sleep_until(slot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn sequential_acquires_are_spaced() {
        let gate = RateGate::new("test", Duration::from_secs(1));
        let start = Instant::now();
        gate.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));
        gate.acquire().await;
        gate.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquires_get_distinct_slots() {
        let gate = Arc::new(RateGate::new("test", Duration::from_millis(500)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move {
                    gate.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut times = Vec::new();
        for h in handles {
            times.push(h.await.unwrap());
        }
        times.sort();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
        assert!(times[3] - start >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_gate_does_not_delay() {
        let gate = RateGate::new("test", Duration::from_secs(1));
        gate.acquire().await;
        tokio::time::advance(Duration::from_secs(5)).await;
        let start = Instant::now();
        gate.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn zero_interval_never_waits() {
        let gate = RateGate::new("test", Duration::ZERO);
        for _ in 0..100 {
            gate.acquire().await;
        }
    }
}
