use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use transit_core::{BackendError, BookingBackend, CoreError, Passenger, PassengerDraft};

/// Finds or creates the passenger a reservation is attached to
#[derive(Clone)]
pub struct PassengerResolver {
    backend: Arc<dyn BookingBackend>,
}

impl PassengerResolver {
    pub fn new(backend: Arc<dyn BookingBackend>) -> Self {
        Self { backend }
    }

    /// Search by name or document number. Blank queries return nothing
    /// without calling the backend.
    pub async fn search(&self, query: &str) -> Result<Vec<Passenger>, PassengerError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.backend.search_passengers(query).await?)
    }

    pub async fn create(&self, draft: PassengerDraft) -> Result<Passenger, PassengerError> {
        draft.validate()?;
        let id = self.backend.create_passenger(&draft).await?;
        tracing::info!("Created passenger {} ({})", id, draft.first_name);
        Ok(draft.into_passenger(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Results(Vec<Passenger>),
    /// A newer query arrived during the debounce window
    Superseded,
}

/// Debounced passenger search. Every query waits `delay`; if another query
/// arrives meanwhile the older one resolves to `Superseded` without touching
/// the backend. Queries already sent are left to finish.
pub struct PassengerSearch {
    resolver: PassengerResolver,
    delay: Duration,
    latest: AtomicU64,
}

impl PassengerSearch {
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

    pub fn new(resolver: PassengerResolver, delay: Duration) -> Self {
        Self {
            resolver,
            delay,
            latest: AtomicU64::new(0),
        }
    }

    pub async fn query(&self, text: &str) -> Result<SearchOutcome, PassengerError> {
        let seq = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;

        if self.latest.load(Ordering::SeqCst) != seq {
            return Ok(SearchOutcome::Superseded);
        }

        let results = self.resolver.search(text).await?;
        Ok(SearchOutcome::Results(results))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PassengerError {
    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
