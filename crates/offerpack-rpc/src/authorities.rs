//! HTTP implementations of the engine's authority traits.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use offerpack_core::{Constraint, HostOffer, Placement, Task};
use offerpack_engine::{AuthorityResult, HostManager, ResourceManager, procedures};

use crate::client::{Endpoint, JsonClient};
use crate::error::RpcResult;
use crate::wire::{
    AcquireHostOffersRequest, AcquireHostOffersResponse, DequeueTasksRequest, DequeueTasksResponse,
    ReleaseHostOffersRequest, ReleaseHostOffersResponse, SetPlacementsRequest, SetPlacementsResponse,
};

/// Resource manager reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpResourceManager {
    client: JsonClient,
}

impl HttpResourceManager {
    pub fn new(url: &str, timeout: Duration) -> RpcResult<Self> {
        Ok(Self {
            client: JsonClient::new(Endpoint::parse(url)?, timeout),
        })
    }
}

#[async_trait]
impl ResourceManager for HttpResourceManager {
    async fn dequeue_tasks(&self, limit: u32, timeout: Duration) -> AuthorityResult<Vec<Task>> {
        let request = DequeueTasksRequest {
            limit,
            timeout_ms: timeout.as_millis() as u64,
        };
        let reply: DequeueTasksResponse = self
            .client
            .call(procedures::DEQUEUE_TASKS, &request)
            .await
            .map_err(|e| e.into_authority(procedures::DEQUEUE_TASKS))?;
        Ok(reply.tasks)
    }

    async fn set_placements(&self, placements: &[Placement]) -> AuthorityResult<()> {
        let request = SetPlacementsRequest {
            placements: placements.to_vec(),
        };
        let _: SetPlacementsResponse = self
            .client
            .call(procedures::SET_PLACEMENTS, &request)
            .await
            .map_err(|e| e.into_authority(procedures::SET_PLACEMENTS))?;
        Ok(())
    }
}

/// Host manager reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpHostManager {
    client: JsonClient,
}

impl HttpHostManager {
    pub fn new(url: &str, timeout: Duration) -> RpcResult<Self> {
        Ok(Self {
            client: JsonClient::new(Endpoint::parse(url)?, timeout),
        })
    }
}

#[async_trait]
impl HostManager for HttpHostManager {
    async fn acquire_host_offers(&self, constraint: &Constraint) -> AuthorityResult<Vec<HostOffer>> {
        let request = AcquireHostOffersRequest {
            constraint: constraint.clone(),
        };
        let reply: AcquireHostOffersResponse = self
            .client
            .call(procedures::ACQUIRE_HOST_OFFERS, &request)
            .await
            .map_err(|e| e.into_authority(procedures::ACQUIRE_HOST_OFFERS))?;
        debug!(offers = reply.host_offers.len(), "host manager replied");
        Ok(reply.host_offers)
    }

    async fn release_host_offers(&self, offers: &[HostOffer]) -> AuthorityResult<()> {
        let request = ReleaseHostOffersRequest {
            host_offers: offers.to_vec(),
        };
        let _: ReleaseHostOffersResponse = self
            .client
            .call(procedures::RELEASE_HOST_OFFERS, &request)
            .await
            .map_err(|e| e.into_authority(procedures::RELEASE_HOST_OFFERS))?;
        Ok(())
    }
}
