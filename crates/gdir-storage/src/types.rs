use gdir_types::DirectoryEntry;

/// Result of an insert-if-absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was created; it carries the freshly assigned token.
    Inserted(DirectoryEntry),
    /// A row already existed and was left as is.
    Conflict(DirectoryEntry),
}

impl InsertOutcome {
    pub fn into_entry(self) -> DirectoryEntry {
        match self {
            InsertOutcome::Inserted(e) | InsertOutcome::Conflict(e) => e,
        }
    }
}

/// Result of a token-conditioned replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced(DirectoryEntry),
    /// Token mismatch. Carries the current row, or `None` if the row has
    /// been deleted since it was read.
    Conflict(Option<DirectoryEntry>),
}
