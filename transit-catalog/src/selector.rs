use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use transit_core::{BackendError, BackendResult, BookingBackend, TripOccurrence};
use uuid::Uuid;

/// Looks up trip occurrences by departure date
#[derive(Clone)]
pub struct TripOccurrenceSelector {
    backend: Arc<dyn BookingBackend>,
}

impl TripOccurrenceSelector {
    pub fn new(backend: Arc<dyn BookingBackend>) -> Self {
        Self { backend }
    }

    /// Occurrences departing on `date`, in the order the backend returns them
    /// (departure hour ascending). No re-sorting happens here.
    pub async fn occurrences(&self, date: NaiveDate) -> BackendResult<Vec<TripOccurrence>> {
        let occurrences = self.backend.list_trip_occurrences(date).await?;
        tracing::debug!("Found {} trip occurrences on {}", occurrences.len(), date);
        Ok(occurrences)
    }

    /// Find one occurrence on a known date
    pub async fn find(&self, date: NaiveDate, id: Uuid) -> BackendResult<Option<TripOccurrence>> {
        Ok(self
            .occurrences(date)
            .await?
            .into_iter()
            .find(|occurrence| occurrence.id == id))
    }
}

/// Lookup state of the return-trip candidate list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum Candidates {
    NotLoaded,
    Loading,
    Loaded(Vec<TripOccurrence>),
    /// Nothing departs on the chosen date; not an error
    Empty,
    Failed(String),
}

/// Identifies one candidate lookup. Results carrying an outdated ticket are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupTicket {
    pub date: NaiveDate,
    seq: u64,
}

/// Return-leg picker: a date (seeded with the outbound date), the candidates
/// departing that day, and the chosen occurrence.
#[derive(Debug, Clone)]
pub struct ReturnTripPicker {
    date: NaiveDate,
    seq: u64,
    candidates: Candidates,
    selected: Option<TripOccurrence>,
}

impl ReturnTripPicker {
    pub fn seeded(outbound_date: NaiveDate) -> Self {
        Self {
            date: outbound_date,
            seq: 0,
            candidates: Candidates::NotLoaded,
            selected: None,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn candidates(&self) -> &Candidates {
        &self.candidates
    }

    pub fn selected(&self) -> Option<&TripOccurrence> {
        self.selected.as_ref()
    }

    /// Start a lookup for the current date
    pub fn begin_lookup(&mut self) -> LookupTicket {
        self.seq += 1;
        self.candidates = Candidates::Loading;
        LookupTicket {
            date: self.date,
            seq: self.seq,
        }
    }

    /// Move to another date. Any previously chosen return trip is cleared,
    /// even when the new date equals the old one.
    pub fn change_date(&mut self, date: NaiveDate) -> LookupTicket {
        if let Some(previous) = self.selected.take() {
            tracing::debug!(
                "Return date changed to {}, clearing selected return trip {}",
                date,
                previous.id
            );
        }
        self.date = date;
        self.begin_lookup()
    }

    /// Apply a lookup result. Returns false when the ticket is stale.
    pub fn apply(&mut self, ticket: LookupTicket, result: Result<Vec<TripOccurrence>, BackendError>) -> bool {
        if ticket.seq != self.seq || ticket.date != self.date {
            tracing::debug!("Dropping stale return-trip lookup for {}", ticket.date);
            return false;
        }

        self.candidates = match result {
            Ok(list) if list.is_empty() => Candidates::Empty,
            Ok(list) => Candidates::Loaded(list),
            Err(e) => Candidates::Failed(e.to_string()),
        };
        true
    }

    /// Choose one of the loaded candidates
    pub fn select(&mut self, id: Uuid) -> Result<&TripOccurrence, SelectionError> {
        let list = match &self.candidates {
            Candidates::Loaded(list) => list,
            Candidates::Empty => {
                return Err(SelectionError::NotAvailable { id, date: self.date });
            }
            _ => return Err(SelectionError::NotLoaded { date: self.date }),
        };

        let occurrence = list
            .iter()
            .find(|o| o.id == id)
            .ok_or(SelectionError::NotAvailable { id, date: self.date })?;

        if occurrence.is_sold_out() {
            return Err(SelectionError::SoldOut {
                id,
                route: occurrence.route(),
            });
        }

        Ok(self.selected.insert(occurrence.clone()))
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("Trip {id} does not depart on {date}")]
    NotAvailable { id: Uuid, date: NaiveDate },

    #[error("Trips for {date} are not loaded yet")]
    NotLoaded { date: NaiveDate },

    #[error("Trip {route} ({id}) is sold out")]
    SoldOut { id: Uuid, route: String },
}
