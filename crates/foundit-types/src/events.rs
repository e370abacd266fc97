use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// A change to a row of the `messages` relation, as published on the live feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RowChange {
    /// A message was persisted.
    Insert(Message),

    /// A message's read flag changed. Carries the row after the update.
    Update(Message),
}

impl RowChange {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Insert(_) => ChangeKind::Insert,
            Self::Update(_) => ChangeKind::Update,
        }
    }

    pub fn row(&self) -> &Message {
        match self {
            Self::Insert(m) | Self::Update(m) => m,
        }
    }

    pub fn into_row(self) -> Message {
        match self {
            Self::Insert(m) | Self::Update(m) => m,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// Server-side filter expression for a subscription. Coarser than what most
/// views need; views re-check rows client-side where required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "column", content = "eq", rename_all = "snake_case")]
pub enum RowScope {
    /// `item_report_id=eq.<id>`
    ItemReportId(Uuid),
    /// `receiver_id=eq.<id>`
    ReceiverId(Uuid),
}

impl RowScope {
    pub fn matches(&self, row: &Message) -> bool {
        match self {
            Self::ItemReportId(id) => row.item_report_id == *id,
            Self::ReceiverId(id) => row.receiver_id == *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub scope: RowScope,
    pub kinds: Vec<ChangeKind>,
}

impl ChangeFilter {
    pub fn inserts(scope: RowScope) -> Self {
        Self {
            scope,
            kinds: vec![ChangeKind::Insert],
        }
    }

    pub fn inserts_and_updates(scope: RowScope) -> Self {
        Self {
            scope,
            kinds: vec![ChangeKind::Insert, ChangeKind::Update],
        }
    }

    pub fn matches(&self, change: &RowChange) -> bool {
        self.kinds.contains(&change.kind()) && self.scope.matches(change.row())
    }
}
