//! Conversation Queue: bounded FIFO with at most one in-flight-or-waiting
//! request per user.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

use scribe_core::platform::MessageRef;
use scribe_core::types::{ChannelId, ServerId, UserId};

/// One queued question from a user.
#[derive(Debug, Clone)]
pub struct ConversationRequest {
    pub user_id: UserId,
    pub server_id: ServerId,
    pub message: String,
    /// Direct-message channel the answer goes back to.
    pub reply_channel: ChannelId,
    pub enqueued_at: String,
    /// Progress message the worker edits in place, when one was sent.
    pub status_display: Option<MessageRef>,
}

impl ConversationRequest {
    pub fn new(
        user_id: UserId,
        server_id: ServerId,
        message: impl Into<String>,
        reply_channel: ChannelId,
    ) -> Self {
        Self {
            user_id,
            server_id,
            message: message.into(),
            reply_channel,
            enqueued_at: chrono::Utc::now().to_rfc3339(),
            status_display: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full (capacity {capacity})")]
    Full { capacity: usize },

    /// The user already has a request queued or processing. `position` is
    /// the queued request's 1-based slot, `None` when it is in flight.
    #[error("request already active")]
    AlreadyActive { position: Option<usize> },
}

/// Counters reported by the `status` command.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: u64,
    pub failed: u64,
}

#[derive(PartialEq)]
enum UserState {
    Queued,
    Processing,
}

struct Inner {
    queue: VecDeque<ConversationRequest>,
    users: HashMap<String, UserState>,
    completed: u64,
    failed: u64,
}

pub struct ConversationQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

impl ConversationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                users: HashMap::new(),
                completed: 0,
                failed: 0,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue a request. Returns its 1-based position on success.
    pub fn submit(&self, request: ConversationRequest) -> Result<usize, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let user_key = request.user_id.as_str().to_string();

        if inner.users.contains_key(&user_key) {
            let position = inner
                .queue
                .iter()
                .position(|r| r.user_id == request.user_id)
                .map(|i| i + 1);
            return Err(QueueError::AlreadyActive { position });
        }
        if inner.queue.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }

        inner.queue.push_back(request);
        inner.users.insert(user_key, UserState::Queued);
        let position = inner.queue.len();
        drop(inner);

        self.notify.notify_one();
        Ok(position)
    }

    /// Remove and return the head request, suspending while the queue is
    /// empty. The user's slot stays held until [`Self::complete`].
    pub async fn pop(&self) -> ConversationRequest {
        loop {
            let notified = self.notify.notified();
            if let Some(request) = self.try_pop() {
                return request;
            }
            notified.await;
        }
    }

    fn try_pop(&self) -> Option<ConversationRequest> {
        let mut inner = self.inner.lock().unwrap();
        let request = inner.queue.pop_front()?;
        inner
            .users
            .insert(request.user_id.as_str().to_string(), UserState::Processing);
        Some(request)
    }

    /// Record a terminal state and release the user's slot.
    pub fn complete(&self, user_id: &UserId, ok: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.users.remove(user_id.as_str());
        if ok {
            inner.completed += 1;
        } else {
            inner.failed += 1;
        }
        debug!(user = %user_id, ok, "request completed");
    }

    /// 1-based FIFO position of the user's queued request.
    pub fn position(&self, user_id: &UserId) -> Option<usize> {
        let inner = self.inner.lock().unwrap();
        inner
            .queue
            .iter()
            .position(|r| &r.user_id == user_id)
            .map(|i| i + 1)
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().unwrap();
        QueueStats {
            queued: inner.queue.len(),
            processing: inner
                .users
                .values()
                .filter(|s| **s == UserState::Processing)
                .count(),
            completed: inner.completed,
            failed: inner.failed,
        }
    }
}
