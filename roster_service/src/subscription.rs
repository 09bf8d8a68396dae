use crate::error::SubscriptionError;
use shared::track::event::{
    EventBatch, LocationUpdate, SubscribeAck, poll_url, subscribe_url, unsubscribe_url,
};
use tracing::{debug, info};
use uuid::Uuid;

const LONG_POLL_WAIT_SECONDS: u64 = 25;

/// Handle for one subscription on the location event channel.
///
/// Owned by the service main loop: `open` performs the handshake, `recv`
/// long-polls the next batch and advances the cursor, `close` tears the
/// subscription down on shutdown.
pub struct EventSubscription {
    client: reqwest::Client,
    base_url: String,
    subscription_id: Uuid,
    cursor: u64,
}

impl EventSubscription {
    pub async fn open(
        client: &reqwest::Client,
        base_url: &str,
    ) -> Result<Self, SubscriptionError> {
        let ack = client
            .post(subscribe_url(base_url))
            .send()
            .await?
            .error_for_status()?
            .json::<SubscribeAck>()
            .await?;

        info!(
            subscription_id = %ack.subscription_id,
            cursor = ack.cursor,
            "subscribed to location event channel"
        );

        Ok(Self {
            client: client.clone(),
            base_url: base_url.to_string(),
            subscription_id: ack.subscription_id,
            cursor: ack.cursor,
        })
    }

    /// Waits for the next batch of events; empty when the long poll expired
    /// without deliveries.
    pub async fn recv(&mut self) -> Result<Vec<LocationUpdate>, SubscriptionError> {
        let batch = self
            .client
            .get(poll_url(
                &self.base_url,
                self.subscription_id,
                self.cursor,
                LONG_POLL_WAIT_SECONDS,
            ))
            .send()
            .await?
            .error_for_status()?
            .json::<EventBatch>()
            .await?;

        self.cursor = batch.cursor;
        if !batch.events.is_empty() {
            debug!(
                count = batch.events.len(),
                cursor = self.cursor,
                "received location events"
            );
        }

        Ok(batch.events)
    }

    pub async fn close(self) -> Result<(), SubscriptionError> {
        self.client
            .delete(unsubscribe_url(&self.base_url, self.subscription_id))
            .send()
            .await?
            .error_for_status()?;

        info!(subscription_id = %self.subscription_id, "closed event subscription");
        Ok(())
    }
}
