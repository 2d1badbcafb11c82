use slotkeep_codec::Snapshot;

/// Why a producer refused a loaded snapshot.
pub type ApplyError = Box<dyn std::error::Error + Send + Sync>;

/// A system whose state the engine saves and restores.
///
/// The engine never looks past field names and value kinds; producers own
/// the meaning of their fields.
pub trait StateProducer: Send + Sync {
    /// Capture the current state. Must not mutate the producer.
    fn build_snapshot(&self) -> Snapshot;

    /// Replace the current state with a loaded snapshot.
    fn apply_snapshot(&self, snapshot: Snapshot) -> Result<(), ApplyError>;
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Stats {
        health: Mutex<i64>,
    }

    impl StateProducer for Stats {
        fn build_snapshot(&self) -> Snapshot {
            Snapshot::new().with("health", *self.health.lock().unwrap())
        }

        fn apply_snapshot(&self, snapshot: Snapshot) -> Result<(), ApplyError> {
            let health = snapshot.get_i64("health")?;
            if !(0..=100).contains(&health) {
                return Err(format!("health {health} out of range").into());
            }
            *self.health.lock().unwrap() = health;
            Ok(())
        }
    }

    #[test]
    fn producer_roundtrip_through_snapshot() {
        let a = Stats { health: Mutex::new(80) };
        let b = Stats { health: Mutex::new(0) };
        b.apply_snapshot(a.build_snapshot()).unwrap();
        assert_eq!(*b.health.lock().unwrap(), 80);
        assert!(b.apply_snapshot(Snapshot::new().with("health", 500i64)).is_err());
        assert!(b.apply_snapshot(Snapshot::new()).is_err());
    }
}
