use crate::peer::ice::PendingCandidates;
use crate::peer::types::IceCandidate;
use crate::peer::MediaSession;
use tokio::task::JoinHandle;

/// Handshake phase of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Not negotiating. A failed first attempt lands here; a failed restart
    /// stays in `Restarting` until a retry publishes.
    Idle,
    CreatingOffer,
    OfferPublished,
    AwaitingAnswer,
    Connected,
    Restarting,
    Closed,
}

impl SessionPhase {
    /// True while an epoch is live or being set up.
    pub fn is_active(self) -> bool {
        !matches!(self, SessionPhase::Idle | SessionPhase::Closed)
    }
}

/// Everything that lives for exactly one epoch. Dropping it aborts the
/// subscription pumps; [`Attempt::close`] also closes the media session.
pub(crate) struct Attempt {
    pub epoch: u64,
    pub media: Box<dyn MediaSession>,
    /// Set at most once per epoch; gates remote candidate delivery.
    pub remote_description_set: bool,
    pub pending: PendingCandidates,
    /// Local candidates published during this epoch
    pub published: Vec<IceCandidate>,
    pumps: Vec<JoinHandle<()>>,
}

impl Attempt {
    pub fn new(epoch: u64, media: Box<dyn MediaSession>) -> Self {
        Self {
            epoch,
            media,
            remote_description_set: false,
            pending: PendingCandidates::default(),
            published: Vec::new(),
            pumps: Vec::new(),
        }
    }

    pub fn track(&mut self, pump: JoinHandle<()>) {
        self.pumps.push(pump);
    }

    pub fn cancel_subscriptions(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }

    pub async fn close(mut self) {
        self.cancel_subscriptions();
        self.pending.clear();
        self.media.close().await;
    }
}

impl Drop for Attempt {
    fn drop(&mut self) {
        self.cancel_subscriptions();
    }
}
