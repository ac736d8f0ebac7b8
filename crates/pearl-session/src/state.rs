//! Session-owned mutable state: instance status, outbound queue and the
//! active transport slot.
//!
//! Everything here is synchronous and runs under the session lock. Events
//! for downstream reducers are never dispatched from inside; callers collect
//! them and dispatch after the lock is released.

use std::sync::Arc;

use pearl_protocol::{
    CheckpointId, ClientMessage, GpuStatus, InstanceStatus, ProjectId, StatusOrigin,
    StatusTransition, StatusUpdate, Transport,
};
use tracing::{debug, info, warn};

use crate::queue::OutboundQueue;

#[derive(Default)]
pub(crate) struct SessionCore {
    pub status: InstanceStatus,
    pub queue: OutboundQueue,
    pub project_id: Option<ProjectId>,
    /// Checkpoint a running retrain started from.
    pub restore_checkpoint: Option<CheckpointId>,
    transport: Option<Arc<dyn Transport>>,
    generation: u64,
}

impl SessionCore {
    pub fn apply_status(
        &mut self,
        update: StatusUpdate,
        origin: StatusOrigin,
    ) -> Option<StatusTransition> {
        let transition = self.status.apply(update, origin)?;
        debug!(
            from = ?transition.from,
            to = ?transition.to,
            origin = ?transition.origin,
            "instance status transition"
        );
        if transition.is_stale_job_takeover() {
            info!("instance was already processing a job on attach; queueing abort");
            self.queue.enqueue_abort(Vec::new());
        }
        Some(transition)
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Drop the current transport and start a new connection generation.
    pub fn begin_connection(&mut self) -> u64 {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.generation += 1;
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn install_transport(&mut self, generation: u64, transport: Arc<dyn Transport>) -> bool {
        if !self.is_current(generation) {
            transport.close();
            return false;
        }
        self.transport = Some(transport);
        true
    }

    /// Forget the transport of `generation` after it closed or failed.
    pub fn release_transport(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.transport = None;
        true
    }

    pub fn close_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.generation += 1;
    }

    /// Whether the head of the queue may be sent right now.
    pub fn can_send(&self) -> bool {
        let Some(head) = self.queue.head() else {
            return false;
        };
        self.transport.is_some()
            && self.status.ws_connected
            && self.status.gpu_connected
            && (self.status.gpu_status == GpuStatus::Ready || head.express)
    }

    /// Send queued messages for as long as the send preconditions hold.
    /// Returns how many were sent.
    pub fn advance(&mut self) -> usize {
        let mut sent = 0;
        while self.can_send() {
            let Some(transport) = self.transport.clone() else {
                break;
            };
            let Some(message) = self.queue.head().map(|head| head.message.clone()) else {
                break;
            };

            if !message.is_status_probe() {
                self.apply_status(
                    StatusUpdate::gpu_status(GpuStatus::Processing),
                    StatusOrigin::Local,
                );
            }

            if let Err(error) = transport.send(&message) {
                warn!(action = message.action(), %error, "failed to send queued message");
                break;
            }
            debug!(action = message.action(), "sent queued message");

            let Some(entry) = self.queue.pop() else {
                break;
            };
            if entry.message.is_abort() {
                self.probe();
                self.queue.replace_with(entry.continuation);
            }
            sent += 1;
        }
        sent
    }

    /// Ask the worker for its status, bypassing the queue.
    pub fn probe(&self) -> bool {
        let Some(transport) = self.transport.as_ref() else {
            return false;
        };
        match transport.send(&ClientMessage::Status) {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "failed to send status probe");
                false
            }
        }
    }

    /// Back to the state of a session that never connected.
    pub fn reset(&mut self) {
        self.close_transport();
        self.queue.clear();
        self.status = InstanceStatus::default();
        self.project_id = None;
        self.restore_checkpoint = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use pearl_protocol::{AoiId, CheckpointId};

    fn connected_core(transport: &Arc<RecordingTransport>, status: GpuStatus) -> SessionCore {
        let mut core = SessionCore::default();
        let generation = core.begin_connection();
        core.install_transport(generation, transport.clone());
        core.apply_status(
            StatusUpdate::gpu_status(status)
                .with_ws_connected(true)
                .with_gpu_connected(true),
            StatusOrigin::Local,
        );
        core
    }

    #[test]
    fn normal_messages_wait_for_ready() {
        let transport = RecordingTransport::new();
        let mut core = connected_core(&transport, GpuStatus::Processing);
        core.queue.enqueue(ClientMessage::checkpoint(CheckpointId::new(1)));

        assert_eq!(core.advance(), 0);
        assert!(transport.sent().is_empty());

        core.apply_status(StatusUpdate::gpu_status(GpuStatus::Ready), StatusOrigin::Remote);
        assert_eq!(core.advance(), 1);
        assert_eq!(
            transport.sent(),
            vec![ClientMessage::checkpoint(CheckpointId::new(1))]
        );
        assert_eq!(core.status.gpu_status, GpuStatus::Processing);
    }

    #[test]
    fn express_messages_bypass_busy_status() {
        let transport = RecordingTransport::new();
        let mut core = connected_core(&transport, GpuStatus::Processing);
        core.queue.enqueue(ClientMessage::checkpoint(CheckpointId::new(1)));
        core.queue.enqueue_express(ClientMessage::load_aoi(AoiId::new(4)));

        assert_eq!(core.advance(), 1);
        assert_eq!(transport.sent(), vec![ClientMessage::load_aoi(AoiId::new(4))]);
        assert_eq!(core.queue.len(), 1);
    }

    #[test]
    fn nothing_is_sent_without_attached_worker() {
        let transport = RecordingTransport::new();
        let mut core = connected_core(&transport, GpuStatus::Ready);
        core.apply_status(StatusUpdate::default().with_gpu_connected(false), StatusOrigin::Remote);
        core.queue.enqueue_abort(Vec::new());

        assert_eq!(core.advance(), 0);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn sending_abort_probes_and_installs_continuation() {
        let transport = RecordingTransport::new();
        let mut core = connected_core(&transport, GpuStatus::Processing);
        core.queue.enqueue(ClientMessage::load_aoi(AoiId::new(1)));
        core.queue
            .enqueue_abort(vec![ClientMessage::checkpoint(CheckpointId::new(8))]);

        assert_eq!(core.advance(), 1);
        assert_eq!(
            transport.sent(),
            vec![ClientMessage::Abort, ClientMessage::Status]
        );
        let queued: Vec<_> = core.queue.messages().into_iter().map(|q| q.message).collect();
        assert_eq!(queued, vec![ClientMessage::checkpoint(CheckpointId::new(8))]);
    }

    #[test]
    fn remote_processing_after_initializing_queues_one_abort() {
        let mut core = SessionCore::default();
        core.apply_status(StatusUpdate::gpu_status(GpuStatus::Initializing), StatusOrigin::Local);
        core.apply_status(StatusUpdate::gpu_status(GpuStatus::Processing), StatusOrigin::Remote);
        core.apply_status(StatusUpdate::gpu_status(GpuStatus::Processing), StatusOrigin::Remote);

        let queued = core.queue.messages();
        assert_eq!(queued.len(), 1);
        assert!(queued[0].express);
        assert_eq!(queued[0].message, ClientMessage::Abort);
    }

    #[test]
    fn local_processing_mark_does_not_trigger_takeover() {
        let mut core = SessionCore::default();
        core.apply_status(StatusUpdate::gpu_status(GpuStatus::Initializing), StatusOrigin::Local);
        core.apply_status(StatusUpdate::gpu_status(GpuStatus::Processing), StatusOrigin::Local);
        assert!(core.queue.is_empty());
    }

    #[test]
    fn stale_generation_cannot_install_transport() {
        let first = RecordingTransport::new();
        let second = RecordingTransport::new();
        let mut core = SessionCore::default();
        let stale = core.begin_connection();
        let current = core.begin_connection();

        assert!(!core.install_transport(stale, first.clone()));
        assert!(first.is_closed());
        assert!(core.install_transport(current, second));
        assert!(!core.release_transport(stale));
        assert!(core.has_transport());
    }
}
