use crate::peer::types::{ConnectionState, IceCandidate, SessionDescription};
use crate::peer::{MediaEvent, MediaEvents};
use crate::signaling::document::{parse_answer, parse_candidate, parse_status};
use crate::signaling::{AddedEntry, DocumentSnapshot, SessionStatus, Subscription};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Everything that can move the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    AnswerReceived(SessionDescription),
    RemoteCandidateReceived(IceCandidate),
    StatusChanged(SessionStatus),
    LocalCandidateGenerated(IceCandidate),
    ConnectionStateChanged(ConnectionState),
}

/// Message on the per-session queue. Events carry the epoch of the
/// subscription that produced them.
#[derive(Debug)]
pub(crate) enum Inbound {
    Event { epoch: u64, event: SessionEvent },
    /// A restart in `epoch` could not publish its offer; try again.
    Retry { epoch: u64 },
    Stop(oneshot::Sender<()>),
}

pub(crate) type InboundTx = mpsc::UnboundedSender<Inbound>;

fn forward(tx: &InboundTx, epoch: u64, event: SessionEvent) -> bool {
    tx.send(Inbound::Event { epoch, event }).is_ok()
}

pub(crate) fn pump_answers(
    mut snapshots: Subscription<DocumentSnapshot>,
    epoch: u64,
    tx: InboundTx,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(snapshot) = snapshots.recv().await {
            let Some(answer) = snapshot.fields.as_ref().and_then(parse_answer) else {
                continue;
            };
            if !forward(&tx, epoch, SessionEvent::AnswerReceived(answer)) {
                break;
            }
        }
    })
}

pub(crate) fn pump_status(
    mut snapshots: Subscription<DocumentSnapshot>,
    epoch: u64,
    tx: InboundTx,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(snapshot) = snapshots.recv().await {
            let Some(status) = snapshot.fields.as_ref().and_then(parse_status) else {
                continue;
            };
            if !forward(&tx, epoch, SessionEvent::StatusChanged(status)) {
                break;
            }
        }
    })
}

pub(crate) fn pump_remote_candidates(
    mut entries: Subscription<AddedEntry>,
    epoch: u64,
    tx: InboundTx,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(entry) = entries.recv().await {
            let Some(candidate) = parse_candidate(&entry.fields) else {
                debug!("Skipping malformed remote candidate {}", entry.entry_id);
                continue;
            };
            if !forward(&tx, epoch, SessionEvent::RemoteCandidateReceived(candidate)) {
                break;
            }
        }
    })
}

pub(crate) fn pump_media(mut events: MediaEvents, epoch: u64, tx: InboundTx) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let event = match event {
                MediaEvent::LocalCandidateGenerated(c) => SessionEvent::LocalCandidateGenerated(c),
                MediaEvent::ConnectionStateChanged(s) => SessionEvent::ConnectionStateChanged(s),
            };
            if !forward(&tx, epoch, event) {
                break;
            }
        }
    })
}
