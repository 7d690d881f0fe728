//! Notification sink
//!
//! The engine only needs a fire-and-forget `notify(user, event)`. Events are
//! collected while a transition runs and delivered after it commits, so a
//! rolled-back transition never notifies anyone.

use approval_types::{ActionId, ApprovalStatus, RequestId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// Something a user should hear about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    ActionAssigned {
        request_id: RequestId,
        action_id: ActionId,
        level: u32,
        due_at: DateTime<Utc>,
    },
    ActionReminder {
        request_id: RequestId,
        action_id: ActionId,
        due_at: DateTime<Utc>,
    },
    RequestEscalated {
        request_id: RequestId,
        from_level: u32,
        to_level: u32,
    },
    RequestResolved {
        request_id: RequestId,
        status: ApprovalStatus,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, user_id: UserId, event: &NotificationEvent);
}

/// Emits notifications as structured tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, user_id: UserId, event: &NotificationEvent) {
        match event {
            NotificationEvent::ActionAssigned {
                request_id,
                action_id,
                level,
                due_at,
            } => tracing::info!(
                user_id = %user_id,
                request_id = %request_id,
                action_id = %action_id,
                level,
                due_at = %due_at,
                "Approver has a pending action"
            ),
            NotificationEvent::ActionReminder {
                request_id,
                action_id,
                due_at,
            } => tracing::info!(
                user_id = %user_id,
                request_id = %request_id,
                action_id = %action_id,
                due_at = %due_at,
                "Pending action is due soon"
            ),
            NotificationEvent::RequestEscalated {
                request_id,
                from_level,
                to_level,
            } => tracing::info!(
                user_id = %user_id,
                request_id = %request_id,
                from_level,
                to_level,
                "Request escalated"
            ),
            NotificationEvent::RequestResolved { request_id, status } => tracing::info!(
                user_id = %user_id,
                request_id = %request_id,
                status = %status,
                "Request resolved"
            ),
        }
    }
}

/// Keeps every notification in memory
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<(UserId, NotificationEvent)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(UserId, NotificationEvent)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn sent_to(&self, user_id: UserId) -> Vec<NotificationEvent> {
        self.sent()
            .into_iter()
            .filter(|(user, _)| *user == user_id)
            .map(|(_, event)| event)
            .collect()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, user_id: UserId, event: &NotificationEvent) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((user_id, event.clone()));
    }
}

/// Notifications staged by one transition
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    pending: Vec<(UserId, NotificationEvent)>,
}

impl Outbox {
    pub(crate) fn push(&mut self, user_id: UserId, event: NotificationEvent) {
        self.pending.push((user_id, event));
    }

    /// Call only after the transition committed
    pub(crate) fn deliver(self, notifier: &dyn Notifier) {
        for (user_id, event) in &self.pending {
            notifier.notify(*user_id, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_delivers_in_order() {
        let notifier = MemoryNotifier::new();
        let user = UserId::generate();
        let request_id = RequestId::generate();

        let mut outbox = Outbox::default();
        outbox.push(
            user,
            NotificationEvent::RequestEscalated {
                request_id,
                from_level: 1,
                to_level: 2,
            },
        );
        outbox.push(
            user,
            NotificationEvent::RequestResolved {
                request_id,
                status: ApprovalStatus::Approved,
            },
        );
        assert!(notifier.sent().is_empty());

        outbox.deliver(&notifier);
        let events = notifier.sent_to(user);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            NotificationEvent::RequestResolved { .. }
        ));
    }
}
