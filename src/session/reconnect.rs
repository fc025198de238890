//! Reconnect controller
//!
//! Watches the `status` field of the session document and decides when the
//! session must be torn down and renegotiated from a fresh offer. A
//! `disconnected` status written by the viewer always restarts; a rejected
//! answer restarts too when the policy allows it, up to a bounded number of
//! consecutive faults. A restart that cannot publish its offer, e.g.
//! because the store refused the delete, is retried with a doubling delay.

use crate::config::ReconnectConfig;
use crate::error::StoreError;
use crate::peer::analyze_candidates;
use crate::session::events::{pump_status, Inbound, InboundTx};
use crate::session::state::Attempt;
use crate::signaling::{SessionStatus, SignalingChannel};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartCause {
    RemoteDisconnect,
    NegotiationFault,
}

#[derive(Debug)]
pub struct ReconnectController {
    policy: ReconnectConfig,
    negotiation_faults: u32,
    failed_restarts: u32,
    restarts: u64,
}

impl ReconnectController {
    pub fn new(policy: ReconnectConfig) -> Self {
        Self {
            policy,
            negotiation_faults: 0,
            failed_restarts: 0,
            restarts: 0,
        }
    }

    /// Subscribes to the document's status for the lifetime of one epoch.
    pub(crate) async fn watch(
        channel: &dyn SignalingChannel,
        doc_id: &str,
        epoch: u64,
        tx: InboundTx,
    ) -> Result<JoinHandle<()>, StoreError> {
        let snapshots = channel.subscribe_document(doc_id).await?;
        Ok(pump_status(snapshots, epoch, tx))
    }

    pub fn on_status(&self, status: SessionStatus) -> Option<RestartCause> {
        (status == SessionStatus::Disconnected).then_some(RestartCause::RemoteDisconnect)
    }

    pub fn on_negotiation_fault(&mut self) -> Option<RestartCause> {
        if !self.policy.restart_on_negotiation_fault {
            return None;
        }
        self.negotiation_faults += 1;
        if self.negotiation_faults > self.policy.max_negotiation_restarts {
            warn!(
                "Answer rejected {} times in a row, waiting for the viewer to disconnect",
                self.negotiation_faults
            );
            return None;
        }
        Some(RestartCause::NegotiationFault)
    }

    pub fn on_connected(&mut self) {
        self.negotiation_faults = 0;
    }

    /// Returns the running restart count.
    pub fn record_restart(&mut self) -> u64 {
        self.restarts += 1;
        self.restarts
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Delay before the next retry of a failed restart. Doubles per
    /// consecutive failure up to `max_retry_delay_ms`.
    pub fn next_retry_delay(&mut self) -> Duration {
        let shift = self.failed_restarts.min(16);
        self.failed_restarts = self.failed_restarts.saturating_add(1);
        let delay = self
            .policy
            .retry_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.policy.max_retry_delay_ms);
        Duration::from_millis(delay)
    }

    /// An offer made it to the store; the retry delay starts over.
    pub fn on_offer_published(&mut self) {
        self.failed_restarts = 0;
    }

    /// Posts `Inbound::Retry` for `epoch` onto the session queue after `delay`.
    pub(crate) fn schedule_retry(tx: InboundTx, epoch: u64, delay: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Inbound::Retry { epoch });
        })
    }

    /// Unsubscribes, deletes the session document, then closes media.
    /// A failed delete is only logged: the next epoch deletes before it
    /// publishes anyway.
    pub(crate) async fn teardown(
        &self,
        channel: &dyn SignalingChannel,
        doc_id: &str,
        mut attempt: Attempt,
    ) {
        attempt.cancel_subscriptions();

        match channel.delete(doc_id).await {
            Ok(()) => debug!("Old call {doc_id} deleted"),
            Err(e) => warn!("Failed to delete call {doc_id}: {e}"),
        }

        analyze_candidates(&attempt.published);
        attempt.close().await;
    }
}
