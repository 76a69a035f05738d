//! Offer acquisition client — leases and releases host offers.
//!
//! Wraps a [`HostManager`] with the per-call timeout, the host-count cap
//! and metrics. Every offer leased through [`OfferClient::acquire`] must
//! end up either in a committed placement or back in
//! [`OfferClient::release`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use offerpack_core::{Constraint, HostOffer};

use crate::authority::{HostManager, procedures};
use crate::error::{AuthorityError, AuthorityResult};
use crate::metrics::PlacementMetrics;

pub struct OfferClient {
    host_manager: Arc<dyn HostManager>,
    /// Upper bound on hosts requested per acquisition.
    host_limit: u32,
    timeout: Duration,
    metrics: Arc<PlacementMetrics>,
}

impl OfferClient {
    pub fn new(
        host_manager: Arc<dyn HostManager>,
        host_limit: u32,
        timeout: Duration,
        metrics: Arc<PlacementMetrics>,
    ) -> Self {
        Self {
            host_manager,
            host_limit,
            timeout,
            metrics,
        }
    }

    /// Lease offers for `constraint`, asking for no more hosts than there
    /// are `remaining_tasks`.
    ///
    /// An empty result is starvation, not an error.
    pub async fn acquire(
        &self,
        constraint: &Constraint,
        remaining_tasks: usize,
    ) -> AuthorityResult<Vec<HostOffer>> {
        let limit = (self.host_limit as usize).min(remaining_tasks) as u32;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let request = constraint.with_host_limit(limit);
        debug!(
            host_limit = limit,
            minimum = %request.resource_minimum,
            "calling AcquireHostOffers"
        );

        let result = tokio::time::timeout(self.timeout, self.host_manager.acquire_host_offers(&request))
            .await
            .unwrap_or_else(|_| Err(AuthorityError::timeout(procedures::ACQUIRE_HOST_OFFERS, self.timeout)));

        match result {
            Ok(offers) if offers.is_empty() => {
                self.metrics.offer_starved();
                warn!(host_limit = limit, "empty host offers received");
                Ok(offers)
            }
            Ok(offers) => {
                self.metrics.offer_got();
                debug!(offers = offers.len(), "AcquireHostOffers returned");
                Ok(offers)
            }
            Err(e) => {
                self.metrics.offer_get_failed();
                error!(error = %e, kind = %e.kind, host_limit = limit, "AcquireHostOffers failed");
                Err(e)
            }
        }
    }

    /// Return unused offers to the host manager.
    pub async fn release(&self, offers: &[HostOffer]) -> AuthorityResult<()> {
        if offers.is_empty() {
            return Ok(());
        }

        let result = tokio::time::timeout(self.timeout, self.host_manager.release_host_offers(offers))
            .await
            .unwrap_or_else(|_| Err(AuthorityError::timeout(procedures::RELEASE_HOST_OFFERS, self.timeout)));

        match result {
            Ok(()) => {
                self.metrics.offers_released(offers.len());
                debug!(offers = offers.len(), "returned unused host offers");
                Ok(())
            }
            Err(e) => {
                self.metrics.offer_release_failed();
                let ids: Vec<&str> = offers.iter().map(|o| o.id.0.as_str()).collect();
                error!(error = %e, kind = %e.kind, offers = ?ids, "ReleaseHostOffers failed");
                Err(e)
            }
        }
    }
}
