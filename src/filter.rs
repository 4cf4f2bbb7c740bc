//! Whitelist filtering of advertisement events.
//!
//! Filtering happens after capture and before buffering. Criteria are
//! combined with OR semantics: an event passes if any configured whitelist
//! matches it. With no whitelists configured everything passes.

use crate::advertisement::AdvertisementEvent;
use crate::mac_address::MacAddress;
use std::collections::HashSet;
use uuid::Uuid;

/// The whitelists an event can be matched against.
///
/// `None` means the criterion is not configured and never matches. An empty
/// whitelist in the configuration file is treated the same way.
#[derive(Debug, Clone, Default)]
pub struct FilterCriteria {
    pub addresses: Option<HashSet<MacAddress>>,
    pub names: Option<HashSet<String>>,
    pub vendor_ids: Option<HashSet<u16>>,
    pub service_ids: Option<HashSet<Uuid>>,
}

impl FilterCriteria {
    /// Build criteria from configuration lists, mapping empty lists to
    /// absent criteria.
    pub fn from_whitelists(
        addresses: &[MacAddress],
        names: &[String],
        vendor_ids: &[u16],
        service_ids: &[Uuid],
    ) -> Self {
        Self {
            addresses: non_empty_set(addresses.iter().copied()),
            names: non_empty_set(names.iter().cloned()),
            vendor_ids: non_empty_set(vendor_ids.iter().copied()),
            service_ids: non_empty_set(service_ids.iter().copied()),
        }
    }

    fn is_unrestricted(&self) -> bool {
        self.addresses.is_none()
            && self.names.is_none()
            && self.vendor_ids.is_none()
            && self.service_ids.is_none()
    }
}

fn non_empty_set<T: std::hash::Hash + Eq>(items: impl Iterator<Item = T>) -> Option<HashSet<T>> {
    let set: HashSet<T> = items.collect();
    if set.is_empty() { None } else { Some(set) }
}

/// Decides which captured events proceed into the buffer.
#[derive(Debug, Clone, Default)]
pub struct AcceptanceFilter {
    criteria: FilterCriteria,
}

impl AcceptanceFilter {
    pub fn new(criteria: FilterCriteria) -> Self {
        Self { criteria }
    }

    /// Whether the event passes the configured whitelists.
    ///
    /// Pure predicate: no logging, no counters, no mutation.
    pub fn accept(&self, event: &AdvertisementEvent) -> bool {
        let criteria = &self.criteria;
        if criteria.is_unrestricted() {
            return true;
        }

        if let Some(addresses) = &criteria.addresses
            && addresses.contains(&event.source_address)
        {
            return true;
        }

        if let Some(names) = &criteria.names
            && let Some(name) = &event.source_name
            && names.contains(name)
        {
            return true;
        }

        if let Some(vendor_ids) = &criteria.vendor_ids
            && event.vendor_data.keys().any(|id| vendor_ids.contains(id))
        {
            return true;
        }

        if let Some(service_ids) = &criteria.service_ids
            && event.service_ids.iter().any(|id| service_ids.contains(id))
        {
            return true;
        }

        false
    }
}
