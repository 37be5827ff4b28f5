use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::message::MessageKind;

/// Which slot of the normalized participant pair a user occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSide {
    Low,
    High,
}

/// Normalize an unordered participant pair. Uuid ordering is arbitrary but
/// stable, which is all the uniqueness constraint needs.
pub fn normalize_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Per-participant unread counters. The key domain is exactly the two
/// participant slots; writes go through `PairSide` so an id outside the
/// participant set can never grow a counter.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UnreadCounters {
    pub low: i32,
    pub high: i32,
}

impl UnreadCounters {
    pub fn get(&self, side: PairSide) -> i32 {
        match side {
            PairSide::Low => self.low,
            PairSide::High => self.high,
        }
    }

    pub fn increment(&mut self, side: PairSide) {
        match side {
            PairSide::Low => self.low += 1,
            PairSide::High => self.high += 1,
        }
    }

    pub fn reset(&mut self, side: PairSide) {
        match side {
            PairSide::Low => self.low = 0,
            PairSide::High => self.high = 0,
        }
    }
}

/// Summary of the newest message, denormalized for list previews.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessage {
    pub preview: String,
    pub sender_id: Uuid,
    pub kind: MessageKind,
    pub sent_at: DateTime<Utc>,
}

/// A persistent two-participant channel. Participants are stored by id,
/// never by ownership pointer; everything else resolves through lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_low: Uuid,
    pub user_high: Uuid,
    pub blocked_by: Option<Uuid>,
    pub unread: UnreadCounters,
    pub last_message: Option<LastMessage>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Conversation {
    pub fn participants(&self) -> [Uuid; 2] {
        [self.user_low, self.user_high]
    }

    pub fn is_participant(&self, user: Uuid) -> bool {
        user == self.user_low || user == self.user_high
    }

    pub fn side_of(&self, user: Uuid) -> Option<PairSide> {
        if user == self.user_low {
            Some(PairSide::Low)
        } else if user == self.user_high {
            Some(PairSide::High)
        } else {
            None
        }
    }

    /// Counterpart of `user`, if `user` is a participant.
    pub fn other_participant(&self, user: Uuid) -> Option<Uuid> {
        match self.side_of(user)? {
            PairSide::Low => Some(self.user_high),
            PairSide::High => Some(self.user_low),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked_by.is_some()
    }

    pub fn unread_for(&self, user: Uuid) -> Option<i32> {
        self.side_of(user).map(|side| self.unread.get(side))
    }
}
