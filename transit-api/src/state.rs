use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use transit_booking::{BookingWizard, CardCheckout, PassengerResolver, PassengerSearch, WizardSettings, WizardStep};
use transit_catalog::{ReferenceCache, TripOccurrenceSelector};
use transit_core::BookingBackend;
use transit_shared::BookingEvent;
use uuid::Uuid;

/// One open wizard plus its own debounced passenger search, so two desks
/// typing at once never supersede each other
pub struct WizardHandle {
    pub wizard: Mutex<BookingWizard>,
    pub search: PassengerSearch,
}

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn BookingBackend>,
    pub references: Arc<ReferenceCache>,
    pub selector: TripOccurrenceSelector,
    pub passengers: PassengerResolver,
    pub checkout: CardCheckout,
    pub settings: WizardSettings,
    pub search_delay: Duration,
    pub wizards: Arc<RwLock<HashMap<Uuid, Arc<WizardHandle>>>>,
    pub sse_tx: broadcast::Sender<BookingEvent>,
}

impl AppState {
    pub fn new(backend: Arc<dyn BookingBackend>, settings: WizardSettings, search_delay: Duration) -> Self {
        let (sse_tx, _) = broadcast::channel(100);
        Self {
            references: Arc::new(ReferenceCache::new(backend.clone())),
            selector: TripOccurrenceSelector::new(backend.clone()),
            passengers: PassengerResolver::new(backend.clone()),
            checkout: CardCheckout::new(backend.clone()),
            backend,
            settings,
            search_delay,
            wizards: Arc::new(RwLock::new(HashMap::new())),
            sse_tx,
        }
    }

    pub fn new_wizard(&self) -> WizardHandle {
        let wizard = BookingWizard::new(self.backend.clone(), self.references.clone(), self.settings.clone())
            .with_events(self.sse_tx.clone());
        WizardHandle {
            wizard: Mutex::new(wizard),
            search: PassengerSearch::new(self.passengers.clone(), self.search_delay),
        }
    }

    pub async fn wizard(&self, id: Uuid) -> Option<Arc<WizardHandle>> {
        self.wizards.read().await.get(&id).cloned()
    }

    /// Forget a wizard whose session has committed or been cancelled
    pub async fn release_if_closed(&self, id: Uuid, handle: &WizardHandle) {
        let closed = handle.wizard.lock().await.step().is_some_and(WizardStep::is_terminal);
        if closed && self.wizards.write().await.remove(&id).is_some() {
            tracing::debug!("Wizard {} closed and released", id);
        }
    }
}
