//! Site state: the tracker's cursor into the visitor/session/section hierarchy.
//!
//! Clicks are never part of site state.

use crate::event::{
    Kind, Reference, ReferenceError, SectionKind, SectionReference, SessionKind, SessionReference,
    VisitorKind, VisitorReference,
};
use thiserror::Error;

/// Errors returned by a [`SiteStateStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SiteStateError {
    /// The backend failed to read or write
    #[error("Site state storage failed: {0}")]
    Internal(String),

    /// A stored value is present but is not a valid reference
    #[error("Malformed site state: {0}")]
    MalformedData(String),

    /// Nothing is stored; callers treat this as "no ancestor yet"
    #[error("No site state stored")]
    NotFound,
}

impl From<ReferenceError> for SiteStateError {
    fn from(value: ReferenceError) -> Self {
        Self::MalformedData(value.to_string())
    }
}

/// The currently active visitor, session and section.
///
/// Committed states satisfy `section ⇒ session ⇒ visitor`; see [`SiteState::is_consistent`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteState {
    /// Active visitor
    pub visitor: Option<VisitorReference>,
    /// Active session, scoped under `visitor`
    pub session: Option<SessionReference>,
    /// Active section, scoped under `session`
    pub section: Option<SectionReference>,
}

impl SiteState {
    /// The state with nothing active.
    pub const EMPTY: Self = Self {
        visitor: None,
        session: None,
        section: None,
    };

    /// Whether no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.visitor.is_none() && self.session.is_none() && self.section.is_none()
    }

    /// Whether every present field has its ancestors present too.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        (self.section.is_none() || self.session.is_some())
            && (self.session.is_none() || self.visitor.is_some())
    }

    /// Drop any field whose ancestor is missing.
    #[must_use]
    pub const fn normalized(mut self) -> Self {
        if self.visitor.is_none() {
            self.session = None;
        }
        if self.session.is_none() {
            self.section = None;
        }
        self
    }
}

/// Event kinds that are retained in site state (every kind but clicks).
pub trait Retained: Kind {
    /// The active reference of this kind.
    fn current(state: &SiteState) -> Option<Reference<Self>>;

    /// Replace the active reference of this kind, clearing every descendant.
    fn assign(state: &mut SiteState, reference: Option<Reference<Self>>);
}

impl Retained for VisitorKind {
    fn current(state: &SiteState) -> Option<Reference<Self>> {
        state.visitor
    }

    fn assign(state: &mut SiteState, reference: Option<Reference<Self>>) {
        *state = SiteState {
            visitor: reference,
            session: None,
            section: None,
        };
    }
}

impl Retained for SessionKind {
    fn current(state: &SiteState) -> Option<Reference<Self>> {
        state.session
    }

    fn assign(state: &mut SiteState, reference: Option<Reference<Self>>) {
        state.session = reference;
        state.section = None;
    }
}

impl Retained for SectionKind {
    fn current(state: &SiteState) -> Option<Reference<Self>> {
        state.section
    }

    fn assign(state: &mut SiteState, reference: Option<Reference<Self>>) {
        state.section = reference;
    }
}

/// Persistence collaborator for site state.
///
/// Implementations need not be atomic across the three fields; a failed `set` may leave a partial
/// write behind. The event manager only ever hands a complete, consistent state to `set`.
pub trait SiteStateStore {
    /// Read the stored state.
    ///
    /// # Errors
    ///
    /// - [`SiteStateError::NotFound`] when nothing is stored
    /// - [`SiteStateError::MalformedData`] when a stored value fails reference validation
    /// - [`SiteStateError::Internal`] when the backend fails
    fn get(&self) -> Result<SiteState, SiteStateError>;

    /// Store `state`, clearing every absent field.
    ///
    /// # Errors
    ///
    /// Returns [`SiteStateError::Internal`] when a backend write fails.
    fn set(&mut self, state: &SiteState) -> Result<SiteState, SiteStateError>;

    /// Remove every stored field.
    ///
    /// # Errors
    ///
    /// Returns [`SiteStateError::Internal`] when a backend write fails.
    fn clear(&mut self) -> Result<SiteState, SiteStateError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Section, Session, Visitor};

    fn full_state() -> SiteState {
        let visitor = Visitor::new(());
        let session = Session::new(visitor.reference());
        let section = Section::new(session.reference());
        SiteState {
            visitor: Some(visitor.reference()),
            session: Some(session.reference()),
            section: Some(section.reference()),
        }
    }

    #[test]
    fn test_assign_visitor_resets_descendants() {
        let mut state = full_state();
        let visitor = Visitor::new(()).reference();

        VisitorKind::assign(&mut state, Some(visitor));

        assert_eq!(state.visitor, Some(visitor));
        assert_eq!(state.session, None);
        assert_eq!(state.section, None);
    }

    #[test]
    fn test_assign_session_keeps_visitor() {
        let mut state = full_state();
        let visitor = state.visitor;

        SessionKind::assign(&mut state, None);

        assert_eq!(state.visitor, visitor);
        assert!(state.session.is_none());
        assert!(state.section.is_none());
        assert!(state.is_consistent());
    }

    #[test]
    fn test_assign_section_touches_only_section() {
        let mut state = full_state();
        let before = state;

        SectionKind::assign(&mut state, None);

        assert_eq!(state.visitor, before.visitor);
        assert_eq!(state.session, before.session);
        assert!(state.section.is_none());
    }

    #[test]
    fn test_normalized_drops_orphans() {
        let full = full_state();
        let orphaned = SiteState {
            visitor: None,
            ..full
        };

        assert!(!orphaned.is_consistent());
        assert_eq!(orphaned.normalized(), SiteState::EMPTY);

        let no_session = SiteState {
            session: None,
            ..full
        };
        assert_eq!(
            no_session.normalized(),
            SiteState {
                visitor: full.visitor,
                ..SiteState::EMPTY
            }
        );
        assert_eq!(full.normalized(), full);
    }

    proptest::proptest! {
        #[test]
        fn prop_normalized_is_consistent_and_idempotent(
            visitor in proptest::bool::ANY,
            session in proptest::bool::ANY,
            section in proptest::bool::ANY,
        ) {
            let full = full_state();
            let state = SiteState {
                visitor: full.visitor.filter(|_| visitor),
                session: full.session.filter(|_| session),
                section: full.section.filter(|_| section),
            };

            let normalized = state.normalized();
            proptest::prop_assert!(normalized.is_consistent());
            proptest::prop_assert_eq!(normalized.normalized(), normalized);
            if state.is_consistent() {
                proptest::prop_assert_eq!(normalized, state);
            }
        }
    }
}
