use bankfeed_core::{MergeError, Transaction};

/// What to do with one incoming record. Persistence is up to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    Insert(Transaction),
    Update(Transaction),
    NoOp,
}

impl ReconcileAction {
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileAction::Insert(_) => "insert",
            ReconcileAction::Update(_) => "update",
            ReconcileAction::NoOp => "noop",
        }
    }

    /// The record to write, if any.
    pub fn record(&self) -> Option<&Transaction> {
        match self {
            ReconcileAction::Insert(t) | ReconcileAction::Update(t) => Some(t),
            ReconcileAction::NoOp => None,
        }
    }
}

/// Decide insert / update / no-op for `incoming` against what is stored under its id.
pub fn decide(
    incoming: Transaction,
    stored: Option<&Transaction>,
) -> Result<ReconcileAction, MergeError> {
    let Some(stored) = stored else {
        return Ok(ReconcileAction::Insert(incoming));
    };

    let merged = stored.merge_incoming(&incoming)?;
    if merged.same_data(stored) {
        Ok(ReconcileAction::NoOp)
    } else {
        Ok(ReconcileAction::Update(merged))
    }
}

/// Same as [`decide`], resolving the stored record through `find_by_id`.
pub fn decide_with<F>(incoming: Transaction, find_by_id: F) -> Result<ReconcileAction, MergeError>
where
    F: FnOnce(&str) -> Option<Transaction>,
{
    let stored = find_by_id(&incoming.id);
    decide(incoming, stored.as_ref())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionTally {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl ActionTally {
    pub fn record(&mut self, action: &ReconcileAction) {
        match action {
            ReconcileAction::Insert(_) => self.inserted += 1,
            ReconcileAction::Update(_) => self.updated += 1,
            ReconcileAction::NoOp => self.unchanged += 1,
        }
    }

    pub fn merge(&mut self, other: ActionTally) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}
