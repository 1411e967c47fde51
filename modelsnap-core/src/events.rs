use crate::models::{Branch, Commit};
use crate::sync::SyncStatus;
use crate::watcher::ChangeEvent;
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SessionEvent {
    CommitCreated {
        commit: Commit,
    },
    BranchCreated {
        branch: Branch,
    },
    #[serde(rename_all = "camelCase")]
    BranchSwitched {
        branch_id: String,
        head_commit_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Restored {
        commit_id: String,
    },
    #[serde(rename_all = "camelCase")]
    CommitStarred {
        commit_id: String,
        starred: bool,
    },
    SyncStatus {
        status: SyncStatus,
    },
    ExternalChange {
        change: ChangeEvent,
    },
}

/// Single-subscriber event stream. Subscribing again replaces the previous
/// receiver, which then sees the stream end.
#[derive(Debug, Default)]
pub struct EventChannel {
    sender: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventChannel {
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sender = Some(tx);
        rx
    }

    pub fn unsubscribe(&mut self) {
        self.sender = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.sender.is_some()
    }

    pub fn emit(&mut self, event: SessionEvent) {
        if let Some(sender) = &self.sender {
            if sender.send(event).is_err() {
                // Receiver dropped without unsubscribing.
                self.sender = None;
            }
        }
    }
}
