use std::collections::hash_map::{Entry, HashMap};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Identity service pins stay valid for 30 minutes after creation.
const PIN_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Pins that have already been exchanged for a session.
///
/// An authorized pin keeps answering with its token until it expires
/// upstream, so each one is remembered here for that long and only the
/// first poll gets a session.
pub struct ConsumedPins {
    claimed: Mutex<HashMap<i64, Instant>>,
    lifetime: Duration,
}

impl Default for ConsumedPins {
    fn default() -> Self {
        Self::new(PIN_LIFETIME)
    }
}

impl ConsumedPins {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            claimed: Mutex::new(HashMap::new()),
            lifetime,
        }
    }

    /// Whether `pin_id` was already exchanged and has not expired since.
    pub async fn is_consumed(&self, pin_id: i64) -> bool {
        let claimed = self.claimed.lock().await;
        claimed
            .get(&pin_id)
            .is_some_and(|at| at.elapsed() < self.lifetime)
    }

    /// True the first time `pin_id` is claimed within its lifetime.
    pub async fn claim(&self, pin_id: i64) -> bool {
        self.claim_at(pin_id, Instant::now()).await
    }

    pub async fn claim_at(&self, pin_id: i64, now: Instant) -> bool {
        let mut claimed = self.claimed.lock().await;
        claimed.retain(|_, at| now.saturating_duration_since(*at) < self.lifetime);
        match claimed.entry(pin_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }
}
