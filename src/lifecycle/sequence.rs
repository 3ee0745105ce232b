//! Sequence registry: the canonical lineage sequences, transition legality,
//! and lineage-hint disambiguation for states shared between sequences.

use super::state::{DocumentState, Lineage};

/// One canonical ordered path of primary states for one ingestion lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequence {
    pub lineage: Lineage,
    pub states: &'static [DocumentState],
}

impl Sequence {
    pub fn contains(&self, state: DocumentState) -> bool {
        self.states.contains(&state)
    }

    fn position(&self, state: DocumentState) -> Option<usize> {
        self.states.iter().position(|s| *s == state)
    }

    /// Sequence-relative successor of `state`, or `None` at the end.
    pub fn next_after(&self, state: DocumentState) -> Option<DocumentState> {
        let idx = self.position(state)?;
        self.states.get(idx + 1).copied()
    }

    /// Sequence-relative predecessor of `state`, or `None` at the start.
    pub fn previous_before(&self, state: DocumentState) -> Option<DocumentState> {
        let idx = self.position(state)?;
        idx.checked_sub(1).and_then(|i| self.states.get(i)).copied()
    }
}

/// Canonical sequences in disambiguation priority order.
pub static SEQUENCES: [Sequence; 3] = [
    Sequence {
        lineage: Lineage::Document,
        states: &[
            DocumentState::Init,
            DocumentState::Uploaded,
            DocumentState::Markdowned,
            DocumentState::Chunked,
            DocumentState::Embedded,
        ],
    },
    Sequence {
        lineage: Lineage::Bookmark,
        states: &[
            DocumentState::Init,
            DocumentState::Bookmarked,
            DocumentState::Markdowned,
            DocumentState::Chunked,
            DocumentState::Embedded,
        ],
    },
    Sequence {
        lineage: Lineage::Chat,
        states: &[
            DocumentState::Init,
            DocumentState::SavedChat,
            DocumentState::QaExtracted,
            DocumentState::Embedded,
        ],
    },
];

/// Transitions legal in addition to the sequence-relative neighbors.
const SIDE_TRANSITIONS: &[(DocumentState, DocumentState)] = &[
    (DocumentState::Markdowned, DocumentState::Uploaded),
    (DocumentState::Markdowned, DocumentState::Bookmarked),
    (DocumentState::Chunked, DocumentState::Markdowned),
    (DocumentState::Embedded, DocumentState::Chunked),
    (DocumentState::Embedded, DocumentState::QaExtracted),
    (DocumentState::Uploaded, DocumentState::Init),
    (DocumentState::Bookmarked, DocumentState::Init),
    (DocumentState::SavedChat, DocumentState::Init),
];

/// All canonical sequences whose member list contains `state`.
pub fn sequences_containing(state: DocumentState) -> Vec<&'static Sequence> {
    SEQUENCES.iter().filter(|seq| seq.contains(state)).collect()
}

/// Pick the sequence that owns `state`, using the previously visited state
/// as a tie-breaker when `state` is shared between sequences. Falls back to
/// the fixed priority order (Document, Bookmark, Chat).
pub fn resolve_sequence(
    state: DocumentState,
    lineage_hint: Option<DocumentState>,
) -> &'static Sequence {
    if let Some(hint) = lineage_hint {
        if let Some(seq) = SEQUENCES
            .iter()
            .find(|seq| seq.contains(state) && seq.contains(hint))
        {
            return seq;
        }
    }
    SEQUENCES
        .iter()
        .find(|seq| seq.contains(state))
        .unwrap_or(&SEQUENCES[0])
}

/// Sequence-relative next state, or `None` at the end of the lineage.
pub fn next_of(state: DocumentState, lineage_hint: Option<DocumentState>) -> Option<DocumentState> {
    resolve_sequence(state, lineage_hint).next_after(state)
}

/// Sequence-relative previous state, or `None` at the start of the lineage.
pub fn previous_of(
    state: DocumentState,
    lineage_hint: Option<DocumentState>,
) -> Option<DocumentState> {
    resolve_sequence(state, lineage_hint).previous_before(state)
}

/// Whether `current -> target` is a legal transition: the sequence-relative
/// next or previous state under the resolved lineage, or a side transition.
pub fn can_transition(
    current: DocumentState,
    target: DocumentState,
    lineage_hint: Option<DocumentState>,
) -> bool {
    if next_of(current, lineage_hint) == Some(target) {
        return true;
    }
    if previous_of(current, lineage_hint) == Some(target) {
        return true;
    }
    SIDE_TRANSITIONS.contains(&(current, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use DocumentState::*;

    #[test]
    fn every_state_belongs_to_a_sequence() {
        for state in DocumentState::ALL {
            assert!(
                !sequences_containing(state).is_empty(),
                "{state} is in no sequence"
            );
        }
    }

    #[test]
    fn shared_states_resolve_by_hint() {
        assert_eq!(
            resolve_sequence(Embedded, Some(QaExtracted)).lineage,
            Lineage::Chat
        );
        assert_eq!(
            resolve_sequence(Embedded, Some(Chunked)).lineage,
            Lineage::Document
        );
        assert_eq!(
            resolve_sequence(Markdowned, Some(Bookmarked)).lineage,
            Lineage::Bookmark
        );
        assert_eq!(
            resolve_sequence(Init, Some(SavedChat)).lineage,
            Lineage::Chat
        );
    }

    #[test]
    fn unresolvable_hint_falls_back_to_priority() {
        assert_eq!(resolve_sequence(Embedded, None).lineage, Lineage::Document);
        assert_eq!(
            resolve_sequence(QaExtracted, Some(Uploaded)).lineage,
            Lineage::Chat
        );
    }

    #[test]
    fn neighbors_follow_the_resolved_lineage() {
        assert_eq!(next_of(Init, Some(Bookmarked)), Some(Bookmarked));
        assert_eq!(next_of(Init, None), Some(Uploaded));
        assert_eq!(previous_of(Embedded, Some(QaExtracted)), Some(QaExtracted));
        assert_eq!(previous_of(Embedded, Some(Chunked)), Some(Chunked));
        assert_eq!(next_of(Embedded, None), None);
        assert_eq!(previous_of(Init, None), None);
    }

    #[test]
    fn side_transitions_are_legal() {
        assert!(can_transition(Markdowned, Uploaded, Some(Bookmarked)));
        assert!(can_transition(Markdowned, Bookmarked, Some(Uploaded)));
        assert!(can_transition(Embedded, QaExtracted, Some(Chunked)));
        assert!(can_transition(SavedChat, Init, None));
    }

    #[test]
    fn skipping_states_is_illegal() {
        assert!(!can_transition(Init, Markdowned, None));
        assert!(!can_transition(Uploaded, Chunked, None));
        assert!(!can_transition(Init, Embedded, Some(SavedChat)));
        assert!(!can_transition(Chunked, Init, None));
    }
}
