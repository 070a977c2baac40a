//! Venue adapter registry.

use crossvault_core::events::VenueId;
use crossvault_venue::VenueAdapter;
use std::collections::HashMap;
use std::sync::Arc;

/// The set of venues the engine serves.
#[derive(Default)]
pub struct VenueRegistry {
    venues: HashMap<VenueId, Arc<dyn VenueAdapter>>,
}

impl VenueRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn VenueAdapter>) {
        self.venues.insert(adapter.venue_id().clone(), adapter);
    }

    #[must_use]
    pub fn get(&self, venue: &VenueId) -> Option<Arc<dyn VenueAdapter>> {
        self.venues.get(venue).cloned()
    }

    #[must_use]
    pub fn map(&self) -> HashMap<VenueId, Arc<dyn VenueAdapter>> {
        self.venues.clone()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<VenueId> {
        self.venues.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.venues.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossvault_venue::SimVenue;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = VenueRegistry::new();
        registry.register(Arc::new(SimVenue::new("kraken")));
        registry.register(Arc::new(SimVenue::new("bybit")));

        assert_eq!(registry.len(), 2);
        assert!(registry.get(&VenueId::new("kraken")).is_some());
        assert!(registry.get(&VenueId::new("unknown")).is_none());
    }
}
