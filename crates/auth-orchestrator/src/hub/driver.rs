use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::protocol::constants::{Liveness, TOKEN_QUERY_PARAM};
use crate::protocol::envelope::Frame;

use super::connector::WsLink;
use super::{
    ChannelEvent, ChannelName, ConnectionStatus, FLUSH_ATTEMPTS, FailureReason, HubInner,
    InboundMessage, Queued,
};

/// What the driver loop does after one connection attempt.
enum Next {
    Retry,
    Stop,
}

impl HubInner {
    /// Connection lifecycle for one channel, owned by a single task.
    ///
    /// Runs until the channel fails terminally or the task is aborted by
    /// `stop`, `shutdown`, or a restart.
    pub(super) async fn drive(self: Arc<Self>, channel: ChannelName, session: u64) {
        loop {
            match self.attempt(channel, session).await {
                Next::Stop => return,
                Next::Retry => {
                    let Some(delay) = self.schedule_reconnect(channel, session) else {
                        return;
                    };
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(&self, channel: ChannelName, session: u64) -> Next {
        if !self.auth.auth_snapshot().can_open_channels() {
            self.fail(channel, session, FailureReason::NotAuthenticated);
            return Next::Stop;
        }

        if !self.health.is_healthy().await {
            self.note_failure(channel, session, FailureReason::BackendNotHealthy);
            return Next::Retry;
        }

        let url = match self.channel_url(channel) {
            Ok(url) => url,
            Err(reason) => {
                self.fail(channel, session, FailureReason::ConnectFailed(reason));
                return Next::Stop;
            }
        };

        if !self.set_status(channel, session, ConnectionStatus::Connecting) {
            return Next::Stop;
        }
        self.publish(ChannelEvent::Connecting { channel });

        match self.connector.connect(channel, &url).await {
            Ok(link) => {
                self.run_link(channel, session, link).await;
                if !self.set_status(channel, session, ConnectionStatus::Closed) {
                    return Next::Stop;
                }
                self.publish(ChannelEvent::Closed { channel });

                if self.auth.auth_snapshot().can_open_channels() {
                    Next::Retry
                } else {
                    self.fail(channel, session, FailureReason::NotAuthenticated);
                    Next::Stop
                }
            }
            Err(e) => {
                self.note_failure(channel, session, FailureReason::ConnectFailed(e.to_string()));
                Next::Retry
            }
        }
    }

    /// Channel URL with the current access token, when there is one.
    fn channel_url(&self, channel: ChannelName) -> Result<String, String> {
        let base = self.url_for(channel);
        match self.tokens.get_token() {
            Some(token) => Url::parse_with_params(&base, &[(TOKEN_QUERY_PARAM, token.as_str())])
                .map(String::from)
                .map_err(|e| format!("invalid channel URL: {e}")),
            None => Ok(base),
        }
    }

    /// Count a reconnect attempt. `None` once the ceiling is reached.
    fn schedule_reconnect(&self, channel: ChannelName, session: u64) -> Option<Duration> {
        let (attempt, delay) = {
            let mut slot = self.slot(channel);
            if slot.session != session {
                return None;
            }
            if slot.reconnect_attempts >= slot.max_reconnect_attempts {
                drop(slot);
                self.fail(channel, session, FailureReason::MaxReconnectAttempts);
                return None;
            }
            slot.reconnect_attempts += 1;
            slot.status = ConnectionStatus::ReconnectScheduled;
            let attempt = slot.reconnect_attempts;
            (attempt, self.reconnect_delay(attempt))
        };

        tracing::info!(
            %channel,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Channel reconnect scheduled"
        );
        self.publish(ChannelEvent::ReconnectScheduled {
            channel,
            attempt,
            delay,
        });
        Some(delay)
    }

    /// Open phase: flush the queue, then pump frames and heartbeats until
    /// the socket goes away.
    async fn run_link(&self, channel: ChannelName, session: u64, link: WsLink) {
        let WsLink {
            outbound,
            mut inbound,
        } = link;

        if !self.flush_and_open(channel, session, &outbound).await {
            return;
        }
        tracing::info!(%channel, "Channel open");
        self.publish(ChannelEvent::Opened { channel });

        let period = Duration::from_secs(self.config.heartbeat.interval_secs.max(1));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                frame = inbound.recv() => {
                    let Some(text) = frame else { break };
                    self.handle_frame(channel, &outbound, &text).await;
                }
                _ = heartbeat.tick() => {
                    if outbound.send(Liveness::PING.to_string()).await.is_err() {
                        tracing::debug!(%channel, "Heartbeat found socket closed");
                        break;
                    }
                }
            }
        }

        let mut slot = self.slot(channel);
        if slot.session == session {
            slot.link = None;
        }
    }

    /// Deliver queued messages in order, then publish the live sender.
    ///
    /// Messages queued while the flush runs are picked up by the next pass,
    /// so ordering holds across the switch to direct sends. If the socket
    /// dies mid-flush the undelivered tail goes back on the queue for the
    /// next open and `false` is returned.
    async fn flush_and_open(
        &self,
        channel: ChannelName,
        session: u64,
        outbound: &mpsc::Sender<String>,
    ) -> bool {
        loop {
            let batch = {
                let mut slot = self.slot(channel);
                if slot.session != session {
                    return false;
                }
                if slot.queue.is_empty() {
                    slot.status = ConnectionStatus::Open;
                    slot.link = Some(outbound.clone());
                    slot.reconnect_attempts = 0;
                    slot.failure_reason = None;
                    return true;
                }
                std::mem::take(&mut slot.queue)
            };

            tracing::debug!(%channel, count = batch.len(), "Flushing queued messages");
            let mut pending = batch.into_iter();
            while let Some(queued) = pending.next() {
                if let Err(mpsc::error::SendError(text)) = outbound.send(queued.text).await {
                    let failed = Queued {
                        text,
                        failed_opens: queued.failed_opens,
                    };
                    self.requeue_unsent(channel, std::iter::once(failed).chain(pending));
                    return false;
                }
            }
        }
    }

    /// Count a failed open against every undelivered message and requeue
    /// the ones still under [`FLUSH_ATTEMPTS`].
    fn requeue_unsent(&self, channel: ChannelName, unsent: impl Iterator<Item = Queued>) {
        let mut kept = Vec::new();
        let mut dropped = 0_usize;
        for mut queued in unsent {
            queued.failed_opens += 1;
            if queued.failed_opens >= FLUSH_ATTEMPTS {
                dropped += 1;
            } else {
                kept.push(queued);
            }
        }

        if dropped > 0 {
            tracing::warn!(
                %channel,
                dropped,
                attempts = FLUSH_ATTEMPTS,
                "Dropping queued messages after repeated failed opens"
            );
        }
        tracing::debug!(%channel, requeued = kept.len(), "Socket closed during flush");
        self.slot(channel).requeue_front(channel, kept);
    }

    async fn handle_frame(
        &self,
        channel: ChannelName,
        outbound: &mpsc::Sender<String>,
        text: &str,
    ) {
        match Frame::parse(text) {
            Frame::Ping => {
                let _ = outbound.send(Liveness::PONG.to_string()).await;
            }
            Frame::Pong => tracing::trace!(%channel, "Heartbeat acknowledged"),
            Frame::Message(envelope) => {
                let _ = self.inbound.send(InboundMessage { channel, envelope });
            }
            Frame::Unknown(raw) => {
                tracing::debug!(%channel, len = raw.len(), "Ignoring unrecognized frame");
            }
        }
    }

    fn set_status(&self, channel: ChannelName, session: u64, status: ConnectionStatus) -> bool {
        let mut slot = self.slot(channel);
        if slot.session != session {
            return false;
        }
        slot.status = status;
        true
    }

    /// Record a failure that will be retried.
    fn note_failure(&self, channel: ChannelName, session: u64, reason: FailureReason) {
        {
            let mut slot = self.slot(channel);
            if slot.session != session {
                return;
            }
            slot.failure_reason = Some(reason.clone());
            slot.last_failure = Some(Instant::now());
        }
        tracing::warn!(%channel, reason = %reason, "Channel connection failed");
        self.emit_failure(channel, reason);
    }

    /// Record a terminal failure.
    fn fail(&self, channel: ChannelName, session: u64, reason: FailureReason) {
        {
            let mut slot = self.slot(channel);
            if slot.session != session {
                return;
            }
            slot.status = ConnectionStatus::Failed;
            slot.failure_reason = Some(reason.clone());
            slot.last_failure = Some(Instant::now());
            slot.link = None;
        }
        tracing::warn!(%channel, reason = %reason, "Channel failed");
        self.publish(ChannelEvent::Failed {
            channel,
            reason: reason.clone(),
        });
        self.emit_failure(channel, reason);
    }
}
