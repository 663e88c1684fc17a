//! Notification engine
//!
//! Events reach a session three ways:
//!
//! - **Polling**: an empty `Execute` drains the server's queue. A drain
//!   whose buffer fills up ends in `Pending` and is repeated.
//! - **Long-poll**: `AsyncWait` blocks until something is queued, then a
//!   drain collects it.
//! - **Push**: the server sends a datagram to a registered UDP port as a
//!   hint that a drain is worthwhile.
//!
//! Events for tables opened with `NO_NOTIFICATIONS` are dropped before
//! they reach the caller.

use crate::error::Result;
use crate::flag::NotificationTypes;
use crate::handle::HandleRef;
use crate::push::PushListener;
use crate::session::Session;
use crate::transport::{AddressFamily, AsyncContextHandle, NOTIFICATION_PENDING, Transport};
use crate::wire::{NotificationData, RopResponse};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Where a session stands with respect to event delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum NotificationState {
    /// No subscriptions.
    #[default]
    Idle,
    Subscribed,
    /// Blocked in `AsyncWait`.
    AwaitingDelivery,
    /// The server said events are queued; drains are in progress.
    DrainingBuffer,
}

/// What a subscription watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Scope {
    WholeStore,
    Folder(u64),
    /// `(folder_id, message_id)`.
    Message(u64, u64),
    /// Implicit subscription of an opened table.
    Table,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    /// Server handle events for this subscription are addressed to.
    pub handle: u32,
    pub at: HandleRef,
    pub types: NotificationTypes,
    pub scope: Scope,
}

/// One delivered event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub handle: u32,
    pub logon_id: u8,
    pub data: NotificationData,
}

impl Notification {
    #[must_use]
    pub fn from_response(response: &RopResponse) -> Option<Self> {
        match response {
            RopResponse::Notify {
                notification_handle,
                logon_id,
                data,
            } => Some(Self {
                handle: *notification_handle,
                logon_id: *logon_id,
                data: (**data).clone(),
            }),
            _ => None,
        }
    }
}

/// Result of draining until the server has nothing left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Drained {
    pub events: Vec<Notification>,
    /// Drain calls issued.
    pub rounds: u32,
    /// `false` if the round limit was hit while events were still pending.
    pub complete: bool,
}

/// Per-session notification bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct Notifications {
    pub(crate) state: NotificationState,
    subscriptions: Vec<Subscription>,
    /// Handles of tables opened with `NO_NOTIFICATIONS`.
    muted: HashSet<u32>,
    delivered: HashMap<u32, usize>,
    /// Events that arrived on ordinary calls, handed out by the next poll.
    pub(crate) inbox: Vec<Notification>,
    async_context: Option<AsyncContextHandle>,
}

impl Notifications {
    pub(crate) fn add(&mut self, subscription: Subscription) {
        self.muted.remove(&subscription.handle);
        self.subscriptions.push(subscription);
        if self.state == NotificationState::Idle {
            self.state = NotificationState::Subscribed;
        }
    }

    pub(crate) fn mute(&mut self, handle: u32) {
        self.muted.insert(handle);
    }

    /// Forget everything tied to a released handle.
    pub(crate) fn forget(&mut self, handle: u32) {
        self.muted.remove(&handle);
        self.subscriptions.retain(|s| s.handle != handle);
        self.settle();
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// State to return to once nothing is in flight.
    fn settle(&mut self) {
        self.state = if self.subscriptions.is_empty() {
            NotificationState::Idle
        } else {
            NotificationState::Subscribed
        };
    }

    /// Drop events for muted handles and count the rest.
    pub(crate) fn screen(&mut self, responses: &mut Vec<RopResponse>) {
        responses.retain(|response| {
            let RopResponse::Notify {
                notification_handle,
                ..
            } = response
            else {
                return true;
            };
            if self.muted.contains(notification_handle) {
                debug!(
                    "Dropping event for table {:#010x} opened without notifications",
                    notification_handle
                );
                return false;
            }
            *self.delivered.entry(*notification_handle).or_default() += 1;
            true
        });
    }
}

impl<T: Transport> Session<T> {
    #[must_use]
    pub const fn notification_state(&self) -> NotificationState {
        self.notifications.state
    }

    #[must_use]
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.notifications.subscriptions
    }

    /// Events delivered so far to the subscription with server `handle`.
    #[must_use]
    pub fn delivered(&self, handle: u32) -> usize {
        self.notifications
            .delivered
            .get(&handle)
            .copied()
            .unwrap_or(0)
    }

    /// Handle from the last successful [`Session::async_connect`].
    #[must_use]
    pub const fn async_context(&self) -> Option<AsyncContextHandle> {
        self.notifications.async_context
    }

    /// Drain until a round no longer ends in `Pending`, at most `limit`
    /// rounds.
    async fn drain_rounds(&mut self, limit: u32) -> Result<Drained> {
        let mut events = Vec::new();
        let mut rounds = 0;
        let mut complete = false;
        while rounds < limit.max(1) {
            self.notifications.state = NotificationState::DrainingBuffer;
            let outcome = match self.drain().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.notifications.settle();
                    return Err(e);
                }
            };
            rounds += 1;
            let stray = outcome.positional().count();
            if stray > 0 {
                warn!("Drain returned {} deferred responses; discarding", stray);
            }
            events.extend(outcome.notifications());
            if !outcome.is_pending() {
                complete = true;
                break;
            }
        }
        self.notifications.settle();
        if !complete {
            warn!("Events still pending after {} drains", rounds);
        }
        Ok(Drained {
            events,
            rounds,
            complete,
        })
    }

    /// Collect queued events.
    ///
    /// Each attempt drains, repeating while the buffer reports `Pending`
    /// (up to `MaxDrainRounds`). With `expect` set, every attempt first
    /// sleeps `SleepTime`, and attempts continue until something arrives
    /// or `RetryCount` attempts are spent. Without it there is a single
    /// drain and no sleep.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors.
    pub async fn poll(&mut self, expect: bool) -> Result<Vec<Notification>> {
        let mut events = std::mem::take(&mut self.notifications.inbox);
        let attempts = if expect {
            self.config.retry_count.max(1)
        } else {
            1
        };
        for attempt in 1..=attempts {
            if !events.is_empty() {
                break;
            }
            if expect {
                tokio::time::sleep(self.config.sleep_time).await;
            }
            let drained = self.drain_rounds(self.config.max_drain_rounds).await?;
            debug!(
                "Poll attempt {} drained {} events in {} rounds",
                attempt,
                drained.events.len(),
                drained.rounds
            );
            events.extend(drained.events);
        }
        Ok(events)
    }

    /// Drain without sleeping until the server reports nothing pending,
    /// bounded by `RetryCount` rounds.
    ///
    /// # Errors
    ///
    /// Propagates dispatcher errors.
    pub async fn drain_until_empty(&mut self) -> Result<Drained> {
        let mut drained = self.drain_rounds(self.config.retry_count).await?;
        let inbox = std::mem::take(&mut self.notifications.inbox);
        drained.events.splice(0..0, inbox);
        Ok(drained)
    }

    /// Bind an asynchronous notification context to this session.
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub async fn async_connect(&mut self) -> Result<AsyncContextHandle> {
        let handle = self.transport.async_connect().await?;
        info!("Async context {:#010x} bound", handle.0);
        self.notifications.async_context = Some(handle);
        Ok(handle)
    }

    /// Long-poll on `handle`. `Ok(true)` means events are queued and a
    /// drain will find them.
    ///
    /// The wait is bounded by `AsyncWaitMax + TimingDeviation`. A server
    /// that stays silent past that is treated as having no event.
    ///
    /// # Errors
    ///
    /// Returns `Error::Rpc` for an unknown or expired context handle, plus
    /// transport errors.
    pub async fn await_async(&mut self, handle: AsyncContextHandle) -> Result<bool> {
        let guard = self.config.async_wait_guard();
        self.notifications.state = NotificationState::AwaitingDelivery;
        let waited = tokio::time::timeout(guard, self.transport.async_wait(handle)).await;
        let flags = match waited {
            Ok(Ok(flags)) => flags,
            Ok(Err(e)) => {
                self.notifications.settle();
                return Err(e);
            }
            Err(_) => {
                warn!("AsyncWait gave no answer within {:?}", guard);
                0
            }
        };
        let pending = flags & NOTIFICATION_PENDING != 0;
        if pending {
            self.notifications.state = NotificationState::DrainingBuffer;
        } else {
            self.notifications.settle();
        }
        debug!("AsyncWait returned flags {:#010x}", flags);
        Ok(pending)
    }

    /// [`Session::await_async`], then drain if it reported events.
    ///
    /// # Errors
    ///
    /// Same as [`Session::await_async`] and [`Session::poll`].
    pub async fn await_and_poll(
        &mut self,
        handle: AsyncContextHandle,
    ) -> Result<Vec<Notification>> {
        if self.await_async(handle).await? {
            let drained = self.drain_rounds(self.config.max_drain_rounds).await?;
            let mut events = std::mem::take(&mut self.notifications.inbox);
            events.extend(drained.events);
            Ok(events)
        } else {
            self.notifications.settle();
            Ok(std::mem::take(&mut self.notifications.inbox))
        }
    }

    /// Ask the server to announce queued events with datagrams to `port`.
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub async fn register_push(
        &mut self,
        family: AddressFamily,
        port: u16,
        opaque: &[u8],
    ) -> Result<u32> {
        let handle = self.transport.register_push(family, port, opaque).await?;
        info!(
            "Push notifications registered on port {} as {:#010x}",
            port, handle
        );
        Ok(handle)
    }

    /// Wait for one push datagram on `port`. `Ok(None)` when nothing came;
    /// datagram delivery is best effort.
    ///
    /// # Errors
    ///
    /// Returns `Io` when the listener cannot bind.
    pub async fn push_received(
        &self,
        listener: &impl PushListener,
        family: AddressFamily,
        port: u16,
    ) -> Result<Option<Vec<u8>>> {
        let datagram = listener.received_datagram(family, port).await?;
        match &datagram {
            Some(bytes) => debug!("Push datagram of {} bytes on port {}", bytes.len(), port),
            None => debug!("No push datagram on port {}", port),
        }
        Ok(datagram)
    }
}
