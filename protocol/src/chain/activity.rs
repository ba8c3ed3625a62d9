//! Activity records: a short, human-facing history of accepted
//! transactions, kept in memory by the node and served newest first.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::unsigned::TxKind;
use crate::types::{Address, ContentKey, TxId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub timestamp: u64,
    pub sender: Address,
    pub tx_id: TxId,
    #[serde(rename = "type")]
    pub kind: TxKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ContentKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<u64>,
}

/// Bounded ring of [`Activity`] records. Oldest entries fall off first.
pub struct ActivityLog {
    capacity: usize,
    entries: Mutex<VecDeque<Activity>>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, activity: Activity) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(activity);
    }

    /// Every retained record, newest first.
    pub fn recent(&self) -> Vec<Activity> {
        self.entries.lock().iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
