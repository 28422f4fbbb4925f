//! Tokio actor that owns a [`Sender`] and feeds it events.
//!
//! The actor task selects over three inputs:
//!
//! - commands from [`SenderHandle`],
//! - [`NetEvent`]s from the network sessions,
//! - a timer queue holding everything the sender posted to its
//!   [`Scheduler`] (paced batches, the sender report timer).
//!
//! The sender is only ever touched from that task.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::clock::MonotonicClock;
use crate::config::SenderConfig;
use crate::error::{Result, SenderError};
use crate::event::{Scheduler, SenderEvent, SenderNotification};
use crate::media::TS_PACKET_SIZE;
use crate::sender::{Sender, SenderStats};
use crate::session::TransportMode;
use crate::transport::{NetEvent, NetSessionManager};

enum Command {
    Init {
        client_ip: IpAddr,
        client_rtp_port: u16,
        client_rtcp_port: Option<u16>,
        mode: TransportMode,
        reply: oneshot::Sender<Result<()>>,
    },
    FinishInit {
        reply: oneshot::Sender<Result<()>>,
    },
    RtpPort {
        reply: oneshot::Sender<u16>,
    },
    QueuePackets {
        presentation_time_us: i64,
        data: Vec<u8>,
        is_video: bool,
    },
    ScheduleSenderReport,
    Stats {
        reply: oneshot::Sender<SenderStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// An event due at `due`. Ties are broken by posting order.
#[derive(Debug)]
struct Timer {
    due: Instant,
    seq: u64,
    event: SenderEvent,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // Reversed: BinaryHeap is a max-heap, the earliest timer must be on top.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

#[derive(Debug, Default)]
struct TimerQueue {
    heap: BinaryHeap<Timer>,
    next_seq: u64,
}

impl TimerQueue {
    fn push(&mut self, due: Instant, event: SenderEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Timer { due, seq, event });
    }

    fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|t| t.due)
    }

    fn pop_due(&mut self, now: Instant) -> Option<SenderEvent> {
        if self.heap.peek()?.due > now {
            return None;
        }
        self.heap.pop().map(|t| t.event)
    }
}

/// [`Scheduler`] that hands posted events back to the actor loop.
struct ActorScheduler {
    timers: mpsc::UnboundedSender<(Instant, SenderEvent)>,
}

impl Scheduler for ActorScheduler {
    fn post(&mut self, event: SenderEvent, delay: Duration) {
        if self.timers.send((Instant::now() + delay, event)).is_err() {
            tracing::trace!("timer posted after actor stopped");
        }
    }
}

/// Handle to a running sender task.
///
/// Dropping the handle stops the task and closes all sessions.
#[derive(Debug)]
pub struct SenderHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init { .. } => "Init",
            Self::FinishInit { .. } => "FinishInit",
            Self::RtpPort { .. } => "RtpPort",
            Self::QueuePackets { .. } => "QueuePackets",
            Self::ScheduleSenderReport => "ScheduleSenderReport",
            Self::Stats { .. } => "Stats",
            Self::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

impl SenderHandle {
    /// Start a sender on the current tokio runtime, backed by real UDP/TCP
    /// sockets. Returns the handle and the notification stream.
    pub fn spawn(
        config: SenderConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SenderNotification>)> {
        let (net_tx, net_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let sender = Sender::new(
            config,
            Box::new(NetSessionManager::new(net_tx)),
            Box::new(ActorScheduler { timers: timer_tx }),
            Arc::new(MonotonicClock::new()),
            notify_tx,
        )?;

        let task = tokio::spawn(run(sender, command_rx, net_rx, timer_rx));
        tracing::debug!("sender task started");

        Ok((
            Self {
                commands: command_tx,
                task,
            },
            notify_rx,
        ))
    }

    /// See [`Sender::init`].
    pub async fn init(
        &self,
        client_ip: IpAddr,
        client_rtp_port: u16,
        client_rtcp_port: Option<u16>,
        mode: TransportMode,
    ) -> Result<()> {
        self.request(|reply| Command::Init {
            client_ip,
            client_rtp_port,
            client_rtcp_port,
            mode,
            reply,
        })
        .await?
    }

    /// See [`Sender::finish_init`].
    pub async fn finish_init(&self) -> Result<()> {
        self.request(|reply| Command::FinishInit { reply }).await?
    }

    pub async fn rtp_port(&self) -> Result<u16> {
        self.request(|reply| Command::RtpPort { reply }).await
    }

    pub async fn stats(&self) -> Result<SenderStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Queue a batch for paced sending without waiting for the task.
    ///
    /// The batch length is checked here; a batch queued before
    /// initialization completes is dropped by the task with a warning.
    pub fn queue_packets(
        &self,
        presentation_time_us: i64,
        data: Vec<u8>,
        is_video: bool,
    ) -> Result<()> {
        if data.len() % TS_PACKET_SIZE != 0 {
            return Err(SenderError::InvalidBatch { len: data.len() });
        }
        self.send(Command::QueuePackets {
            presentation_time_us,
            data,
            is_video,
        })
    }

    pub fn schedule_sender_report(&self) -> Result<()> {
        self.send(Command::ScheduleSenderReport)
    }

    /// Close all sessions and wait for the task to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await?;
        self.task.await.map_err(|_| SenderError::ActorClosed)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SenderError::ActorClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply))?;
        response.await.map_err(|_| SenderError::ActorClosed)
    }
}

async fn run(
    mut sender: Sender,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut net_events: mpsc::UnboundedReceiver<NetEvent>,
    mut posted: mpsc::UnboundedReceiver<(Instant, SenderEvent)>,
) {
    let mut timers = TimerQueue::default();

    loop {
        let next_due = timers.next_due();

        tokio::select! {
            biased;

            Some((due, event)) = posted.recv() => timers.push(due, event),

            _ = wait_until(next_due) => {
                let now = Instant::now();
                while let Some(event) = timers.pop_due(now) {
                    sender.handle_event(event);
                }
            }

            Some(event) = net_events.recv() => sender.handle_event(SenderEvent::Net(event)),

            command = commands.recv() => {
                let Some(command) = command else {
                    tracing::debug!("sender handle dropped");
                    break;
                };
                if !handle_command(&mut sender, command) {
                    break;
                }
            }
        }
    }

    sender.shutdown();
    tracing::debug!(pending_timers = timers.heap.len(), "sender task stopped");
}

/// Returns `false` once the task should stop.
fn handle_command(sender: &mut Sender, command: Command) -> bool {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        Command::Init {
            client_ip,
            client_rtp_port,
            client_rtcp_port,
            mode,
            reply,
        } => {
            let _ = reply.send(sender.init(client_ip, client_rtp_port, client_rtcp_port, mode));
        }
        Command::FinishInit { reply } => {
            let _ = reply.send(sender.finish_init());
        }
        Command::RtpPort { reply } => {
            let _ = reply.send(sender.rtp_port());
        }
        Command::QueuePackets {
            presentation_time_us,
            data,
            is_video,
        } => {
            if let Err(err) = sender.queue_packets(presentation_time_us, data, is_video) {
                tracing::warn!(error = %err, presentation_time_us, "batch dropped");
            }
        }
        Command::ScheduleSenderReport => sender.schedule_sender_report(),
        Command::Stats { reply } => {
            let _ = reply.send(sender.stats());
        }
        Command::Shutdown { reply } => {
            sender.shutdown();
            let _ = reply.send(());
            return false;
        }
    }
    true
}

async fn wait_until(due: Option<Instant>) {
    match due {
        Some(due) => sleep_until(due).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ts_batch(count: usize) -> Vec<u8> {
        let mut data = vec![0u8; count * TS_PACKET_SIZE];
        for packet in data.chunks_exact_mut(TS_PACKET_SIZE) {
            packet[0] = 0x47;
        }
        data
    }

    async fn interleaved() -> (SenderHandle, mpsc::UnboundedReceiver<SenderNotification>) {
        let (handle, mut notifications) = SenderHandle::spawn(SenderConfig::default()).unwrap();
        handle
            .init(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                0,
                Some(1),
                TransportMode::TcpInterleaved,
            )
            .await
            .unwrap();
        handle.finish_init().await.unwrap();
        assert_eq!(notifications.recv().await, Some(SenderNotification::InitDone));
        (handle, notifications)
    }

    async fn next_binary(
        notifications: &mut mpsc::UnboundedReceiver<SenderNotification>,
    ) -> (u8, Vec<u8>) {
        match notifications.recv().await {
            Some(SenderNotification::BinaryData { channel, data }) => (channel, data),
            other => panic!("expected BinaryData, got {other:?}"),
        }
    }

    #[test]
    fn timer_queue_orders_by_due_then_post_order() {
        let start = Instant::now();
        let mut queue = TimerQueue::default();
        queue.push(start + Duration::from_millis(20), SenderEvent::SendSenderReport);
        queue.push(
            start + Duration::from_millis(10),
            SenderEvent::Net(NetEvent::Connected {
                session: crate::transport::SessionId(1),
            }),
        );
        queue.push(
            start + Duration::from_millis(10),
            SenderEvent::Net(NetEvent::Connected {
                session: crate::transport::SessionId(2),
            }),
        );

        assert_eq!(queue.next_due(), Some(start + Duration::from_millis(10)));
        assert!(queue.pop_due(start).is_none());

        let now = start + Duration::from_millis(30);
        let order: Vec<SenderEvent> = std::iter::from_fn(|| queue.pop_due(now)).collect();
        assert_eq!(
            order,
            vec![
                SenderEvent::Net(NetEvent::Connected {
                    session: crate::transport::SessionId(1)
                }),
                SenderEvent::Net(NetEvent::Connected {
                    session: crate::transport::SessionId(2)
                }),
                SenderEvent::SendSenderReport,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn batches_paced_by_presentation_time() {
        let (handle, mut notifications) = interleaved().await;
        let start = Instant::now();

        handle.queue_packets(1_000_000, ts_batch(2), true).unwrap();
        handle.queue_packets(1_040_000, ts_batch(1), true).unwrap();

        let (channel, first) = next_binary(&mut notifications).await;
        assert_eq!(channel, 0);
        assert_eq!(first.len(), 12 + 2 * TS_PACKET_SIZE);
        assert!(start.elapsed() < Duration::from_millis(1));

        let (_, second) = next_binary(&mut notifications).await;
        assert_eq!(second.len(), 12 + TS_PACKET_SIZE);
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(u16::from_be_bytes([second[2], second[3]]), 1);

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.batches_sent, 2);
        assert_eq!(stats.rtp.packets_sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sender_report_every_interval() {
        let (handle, mut notifications) = interleaved().await;
        let start = Instant::now();

        for round in 1..=2u32 {
            let (channel, report) = next_binary(&mut notifications).await;
            assert_eq!(channel, 1);
            assert_eq!(report[1], 200);
            assert!(start.elapsed() >= Duration::from_secs(10 * round as u64));
        }

        // Asking again while armed does not add a second timer.
        handle.schedule_sender_report().unwrap();
        assert_eq!(handle.stats().await.unwrap().sender_reports_sent, 2);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_batch_rejected_at_handle() {
        let (handle, _notifications) = SenderHandle::spawn(SenderConfig::default()).unwrap();
        assert!(matches!(
            handle.queue_packets(0, vec![0; 10], false),
            Err(SenderError::InvalidBatch { len: 10 })
        ));
    }

    #[tokio::test]
    async fn errors_returned_through_handle() {
        let (handle, _notifications) = SenderHandle::spawn(SenderConfig::default()).unwrap();
        assert!(matches!(
            handle.finish_init().await,
            Err(SenderError::NotInitialized)
        ));
        assert_eq!(handle.rtp_port().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn calls_after_shutdown_fail() {
        let (handle, _notifications) = SenderHandle::spawn(SenderConfig::default()).unwrap();
        let commands = handle.commands.clone();
        handle.shutdown().await.unwrap();
        assert!(commands.send(Command::ScheduleSenderReport).is_err());
    }

    #[tokio::test]
    async fn invalid_config_fails_spawn() {
        let config = SenderConfig {
            note: "n".repeat(300),
            ..SenderConfig::default()
        };
        assert!(matches!(
            SenderHandle::spawn(config),
            Err(SenderError::InvalidConfig(_))
        ));
    }
}
