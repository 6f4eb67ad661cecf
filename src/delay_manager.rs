use std::time::Duration;
use std::thread;
use rand::Rng;
use log::debug;

use crate::config::Settings;

/// Randomized politeness pause between ordinary item fetches.
pub fn politeness_delay(settings: &Settings) {
    let delay = random_between(settings.delay_min, settings.delay_max);
    if delay.is_zero() {
        return;
    }
    debug!("Waiting {} ms (politeness delay)...", delay.as_millis());
    thread::sleep(delay);
}

/// Linear backoff before retry attempt `attempt` (0-based).
pub fn backoff(settings: &Settings, attempt: u32) {
    let wait = settings.retry_backoff * (attempt + 1);
    if wait.is_zero() {
        return;
    }
    debug!("Backing off {} ms before attempt {}...", wait.as_millis(), attempt + 2);
    thread::sleep(wait);
}

pub fn random_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    let millis = rng.gen_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_between_stays_in_range() {
        let min = Duration::from_millis(500);
        let max = Duration::from_millis(1500);
        for _ in 0..200 {
            let d = random_between(min, max);
            assert!(d >= min && d <= max);
        }
    }

    #[test]
    fn test_inverted_range_uses_min() {
        let d = random_between(Duration::from_millis(10), Duration::from_millis(5));
        assert_eq!(d, Duration::from_millis(10));
    }
}
