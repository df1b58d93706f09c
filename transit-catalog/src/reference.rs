use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use transit_core::{BackendResult, BookingBackend, ReferenceKind, ReferenceOption};

/// Shared, read-only cache of the reference lists (pickup addresses, dropoff
/// addresses, payment methods). Lists are fetched on first use and then
/// served to every wizard session.
pub struct ReferenceCache {
    backend: Arc<dyn BookingBackend>,
    entries: RwLock<HashMap<ReferenceKind, Arc<Vec<ReferenceOption>>>>,
}

impl ReferenceCache {
    pub fn new(backend: Arc<dyn BookingBackend>) -> Self {
        Self {
            backend,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Options for `kind`, fetching them if they are not cached yet
    pub async fn options(&self, kind: ReferenceKind) -> BackendResult<Arc<Vec<ReferenceOption>>> {
        if let Some(cached) = self.entries.read().await.get(&kind) {
            return Ok(cached.clone());
        }

        let fetched = Arc::new(self.backend.list_reference_options(kind).await?);
        tracing::info!("Loaded {} {:?} reference options", fetched.len(), kind);

        // Two concurrent misses may both fetch; the lists are idempotent reads
        // so whichever lands last wins.
        let mut entries = self.entries.write().await;
        entries.insert(kind, fetched.clone());
        Ok(fetched)
    }

    /// Make sure every list is loaded and return a snapshot for one session
    pub async fn warm(&self) -> BackendResult<ReferenceSnapshot> {
        Ok(ReferenceSnapshot {
            pickups: self.options(ReferenceKind::PickupAddresses).await?,
            dropoffs: self.options(ReferenceKind::DropoffAddresses).await?,
            payment_methods: self.options(ReferenceKind::PaymentMethods).await?,
        })
    }
}

/// The reference lists one wizard session validates against
#[derive(Debug, Clone, Default)]
pub struct ReferenceSnapshot {
    pub pickups: Arc<Vec<ReferenceOption>>,
    pub dropoffs: Arc<Vec<ReferenceOption>>,
    pub payment_methods: Arc<Vec<ReferenceOption>>,
}

impl ReferenceSnapshot {
    /// Whether `id` is a known option of `kind`. An empty list means the
    /// backend publishes no restriction, so any id is accepted.
    pub fn accepts(&self, kind: ReferenceKind, id: &str) -> bool {
        let list = match kind {
            ReferenceKind::PickupAddresses => &self.pickups,
            ReferenceKind::DropoffAddresses => &self.dropoffs,
            ReferenceKind::PaymentMethods => &self.payment_methods,
        };
        list.is_empty() || list.iter().any(|option| option.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_core::mock::MockBookingBackend;

    fn backend() -> Arc<MockBookingBackend> {
        Arc::new(
            MockBookingBackend::new()
                .with_references(
                    ReferenceKind::PickupAddresses,
                    vec![ReferenceOption::new("12", "Terminal Rosario")],
                )
                .with_references(
                    ReferenceKind::PaymentMethods,
                    vec![
                        ReferenceOption::new("CASH", "Efectivo"),
                        ReferenceOption::new("TRANSFER", "Transferencia"),
                    ],
                ),
        )
    }

    #[tokio::test]
    async fn test_lists_are_fetched_once() {
        let backend = backend();
        let cache = ReferenceCache::new(backend.clone());

        cache.warm().await.unwrap();
        cache.warm().await.unwrap();
        let methods = cache.options(ReferenceKind::PaymentMethods).await.unwrap();

        assert_eq!(methods.len(), 2);
        assert_eq!(backend.reference_calls().await, 3);
    }

    #[tokio::test]
    async fn test_snapshot_accepts_known_ids() {
        let cache = ReferenceCache::new(backend());
        let snapshot = cache.warm().await.unwrap();

        assert!(snapshot.accepts(ReferenceKind::PickupAddresses, "12"));
        assert!(!snapshot.accepts(ReferenceKind::PickupAddresses, "99"));
        // no dropoff list published
        assert!(snapshot.accepts(ReferenceKind::DropoffAddresses, "99"));
        assert!(snapshot.accepts(ReferenceKind::PaymentMethods, "TRANSFER"));
        assert!(!snapshot.accepts(ReferenceKind::PaymentMethods, "CARD_TOKEN"));
    }
}
