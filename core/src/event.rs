//! Event and reference model for the tracker hierarchy.
//!
//! Every tracked activity belongs to a strict ancestry chain:
//!
//! ```text
//! Visitor (1) ──► Session (2) ──► Section (3) ──► Click (4)
//! ```
//!
//! A [`Reference<K>`] is the identity-only projection of an event of kind `K`. An [`Event<K>`] is a
//! reference plus its parent link, where the parent type is fixed by [`Kind::Parent`].
//! Constructing a session therefore requires a [`VisitorReference`], a section requires a
//! [`SessionReference`] and a click requires a [`SectionReference`]; the compiler enforces the
//! parent rank.
//!
//! No kind takes a `Reference<ClickKind>` as its parent: clicks are terminal.
//!
//! # Example
//!
//! ```
//! use salus_core::event::{Click, Section, Session, Visitor};
//!
//! let visitor = Visitor::new(());
//! let session = Session::new(visitor.reference());
//! let section = Section::new(session.reference());
//! let click = Click::new(section.reference());
//!
//! assert_eq!(click.parent().id(), section.id());
//! ```

use crate::wire::PublishEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use thiserror::Error;
use uuid::Uuid;

/// Attribute key carrying the parent id in the wire format.
pub const PARENT_ATTRIBUTE: &str = "parent";

/// The four ranked event kinds.
///
/// Serializes as its numeric rank so the wire format reads `{"t": 3, ...}` for a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum EventType {
    /// A returning or new browser identity
    Visitor = 1,
    /// A browser-session-scoped visit
    Session = 2,
    /// A logical area of a page
    Section = 3,
    /// A single interaction inside a section
    Click = 4,
}

impl EventType {
    /// Position of this kind in the hierarchy (1 = visitor, 4 = click).
    #[must_use]
    pub const fn rank(self) -> u8 {
        self as u8
    }

    /// The kind a parent of this kind must have, if any.
    #[must_use]
    pub const fn parent_type(self) -> Option<Self> {
        match self {
            Self::Visitor => None,
            Self::Session => Some(Self::Visitor),
            Self::Section => Some(Self::Session),
            Self::Click => Some(Self::Section),
        }
    }

    /// Whether this kind starts a new lineage.
    #[must_use]
    pub const fn is_root(self) -> bool {
        matches!(self, Self::Visitor)
    }

    /// Whether this kind can never be referenced as a parent.
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        matches!(self, Self::Click)
    }

    /// Stable lowercase name, used as a metrics label and in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Visitor => "visitor",
            Self::Session => "session",
            Self::Section => "section",
            Self::Click => "click",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EventType> for u8 {
    fn from(value: EventType) -> Self {
        value.rank()
    }
}

impl TryFrom<u8> for EventType {
    type Error = ReferenceError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Visitor),
            2 => Ok(Self::Session),
            3 => Ok(Self::Section),
            4 => Ok(Self::Click),
            other => Err(ReferenceError::UnknownEventType(other)),
        }
    }
}

/// Reasons a reference is malformed.
///
/// Every variant means "value present but unusable"; none of them means "absent".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    /// The id is not a syntactically valid UUID
    #[error("Invalid reference id '{0}'")]
    InvalidUuid(String),

    /// The id is a UUID but not a version 7 UUID
    #[error("Reference id {id} is UUID version {version}, expected 7")]
    UnsupportedVersion {
        /// The offending id
        id: Uuid,
        /// The version found in the id
        version: usize,
    },

    /// The reference carries a different event type than the one expected
    #[error("Expected a {expected} reference, found {found}")]
    KindMismatch {
        /// Expected kind
        expected: EventType,
        /// Kind carried by the value
        found: EventType,
    },

    /// Numeric event type outside the known ranks
    #[error("Unknown event type {0}")]
    UnknownEventType(u8),
}

fn ensure_v7(id: Uuid) -> Result<Uuid, ReferenceError> {
    match id.get_version_num() {
        7 => Ok(id),
        version => Err(ReferenceError::UnsupportedVersion { id, version }),
    }
}

/// Untyped identity of an event: its kind and id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventReference {
    /// Kind of the referenced event
    pub event_type: EventType,
    /// UUIDv7 id of the referenced event
    pub id: Uuid,
}

impl EventReference {
    /// Validate a raw `(event_type, id)` pair read from outside the process.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::InvalidUuid`] if `id` does not parse and
    /// [`ReferenceError::UnsupportedVersion`] if it is not a version 7 UUID.
    pub fn parse(event_type: EventType, id: &str) -> Result<Self, ReferenceError> {
        let id = Uuid::parse_str(id).map_err(|_| ReferenceError::InvalidUuid(id.to_string()))?;
        Ok(Self {
            event_type,
            id: ensure_v7(id)?,
        })
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Type-level marker for one of the four event kinds.
///
/// Sealed: the hierarchy is closed.
pub trait Kind: sealed::Sealed + Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Runtime tag of this kind
    const EVENT_TYPE: EventType;

    /// Parent link type: `()` for visitors, the reference of the next-lower rank otherwise
    type Parent: ParentLink;

    /// Wrap a typed event into the heterogeneous [`TrackedEvent`].
    fn track(event: Event<Self>) -> TrackedEvent;
}

/// The parent slot of an event.
pub trait ParentLink: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Kind of the parent, `None` when the event has no parent
    const PARENT_TYPE: Option<EventType>;

    /// Id of the parent, `None` when the event has no parent
    fn parent_id(&self) -> Option<Uuid>;
}

impl ParentLink for () {
    const PARENT_TYPE: Option<EventType> = None;

    fn parent_id(&self) -> Option<Uuid> {
        None
    }
}

impl<K: Kind> ParentLink for Reference<K> {
    const PARENT_TYPE: Option<EventType> = Some(K::EVENT_TYPE);

    fn parent_id(&self) -> Option<Uuid> {
        Some(self.id)
    }
}

/// Marker for visitor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisitorKind {}

/// Marker for session events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {}

/// Marker for section events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {}

/// Marker for click events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClickKind {}

impl sealed::Sealed for VisitorKind {}
impl sealed::Sealed for SessionKind {}
impl sealed::Sealed for SectionKind {}
impl sealed::Sealed for ClickKind {}

impl Kind for VisitorKind {
    const EVENT_TYPE: EventType = EventType::Visitor;
    type Parent = ();

    fn track(event: Event<Self>) -> TrackedEvent {
        TrackedEvent::Visitor(event)
    }
}

impl Kind for SessionKind {
    const EVENT_TYPE: EventType = EventType::Session;
    type Parent = VisitorReference;

    fn track(event: Event<Self>) -> TrackedEvent {
        TrackedEvent::Session(event)
    }
}

impl Kind for SectionKind {
    const EVENT_TYPE: EventType = EventType::Section;
    type Parent = SessionReference;

    fn track(event: Event<Self>) -> TrackedEvent {
        TrackedEvent::Section(event)
    }
}

impl Kind for ClickKind {
    const EVENT_TYPE: EventType = EventType::Click;
    type Parent = SectionReference;

    fn track(event: Event<Self>) -> TrackedEvent {
        TrackedEvent::Click(event)
    }
}

/// Identity-only projection of an event of kind `K`.
///
/// Compared by id. A `Reference` always holds a version 7 UUID.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reference<K: Kind> {
    id: Uuid,
    kind: PhantomData<K>,
}

/// Reference to a visitor
pub type VisitorReference = Reference<VisitorKind>;
/// Reference to a session
pub type SessionReference = Reference<SessionKind>;
/// Reference to a section
pub type SectionReference = Reference<SectionKind>;
/// Reference to a click
pub type ClickReference = Reference<ClickKind>;

impl<K: Kind> Reference<K> {
    const fn from_v7(id: Uuid) -> Self {
        Self {
            id,
            kind: PhantomData,
        }
    }

    /// Build a reference from an already-parsed UUID.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::UnsupportedVersion`] unless `id` is a version 7 UUID.
    pub fn from_uuid(id: Uuid) -> Result<Self, ReferenceError> {
        ensure_v7(id).map(Self::from_v7)
    }

    /// Parse a stored id string into a typed reference.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::InvalidUuid`] or [`ReferenceError::UnsupportedVersion`] when the
    /// id is malformed.
    pub fn parse(id: &str) -> Result<Self, ReferenceError> {
        EventReference::parse(K::EVENT_TYPE, id).map(|reference| Self::from_v7(reference.id))
    }

    /// The referenced event's id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The referenced event's kind.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        K::EVENT_TYPE
    }

    /// Forget the static kind.
    #[must_use]
    pub const fn erase(&self) -> EventReference {
        EventReference {
            event_type: K::EVENT_TYPE,
            id: self.id,
        }
    }
}

impl<K: Kind> fmt::Debug for Reference<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference<{}>({})", K::EVENT_TYPE, self.id)
    }
}

impl<K: Kind> TryFrom<EventReference> for Reference<K> {
    type Error = ReferenceError;

    fn try_from(value: EventReference) -> Result<Self, Self::Error> {
        if value.event_type != K::EVENT_TYPE {
            return Err(ReferenceError::KindMismatch {
                expected: K::EVENT_TYPE,
                found: value.event_type,
            });
        }
        Self::from_uuid(value.id)
    }
}

impl<K: Kind> From<Reference<K>> for EventReference {
    fn from(value: Reference<K>) -> Self {
        value.erase()
    }
}

/// An immutable event of kind `K`: a fresh identity plus its parent link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event<K: Kind> {
    reference: Reference<K>,
    parent: K::Parent,
}

/// A visitor event
pub type Visitor = Event<VisitorKind>;
/// A session event
pub type Session = Event<SessionKind>;
/// A section event
pub type Section = Event<SectionKind>;
/// A click event
pub type Click = Event<ClickKind>;

impl<K: Kind> Event<K> {
    /// Create a new event under `parent`, assigning a fresh UUIDv7 id.
    #[must_use]
    pub fn new(parent: K::Parent) -> Self {
        Self {
            reference: Reference::from_v7(Uuid::now_v7()),
            parent,
        }
    }

    /// Identity of this event.
    #[must_use]
    pub const fn reference(&self) -> Reference<K> {
        self.reference
    }

    /// Id of this event.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.reference.id
    }

    /// Parent link of this event.
    #[must_use]
    pub const fn parent(&self) -> &K::Parent {
        &self.parent
    }

    /// Kind of this event.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        K::EVENT_TYPE
    }

    /// Project into the wire format. Pure.
    #[must_use]
    pub fn to_publish_event(&self) -> PublishEvent {
        PublishEvent {
            t: K::EVENT_TYPE,
            i: self.id(),
            a: self.parent.parent_id().map(|parent| {
                BTreeMap::from([(PARENT_ATTRIBUTE.to_string(), parent.to_string())])
            }),
        }
    }
}

/// Any event, as held in the pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedEvent {
    /// A visitor event
    Visitor(Visitor),
    /// A session event
    Session(Session),
    /// A section event
    Section(Section),
    /// A click event
    Click(Click),
}

impl TrackedEvent {
    /// Kind of the wrapped event.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Visitor(_) => EventType::Visitor,
            Self::Session(_) => EventType::Session,
            Self::Section(_) => EventType::Section,
            Self::Click(_) => EventType::Click,
        }
    }

    /// Id of the wrapped event.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        match self {
            Self::Visitor(e) => e.id(),
            Self::Session(e) => e.id(),
            Self::Section(e) => e.id(),
            Self::Click(e) => e.id(),
        }
    }

    /// Id of the wrapped event's parent, if it has one.
    #[must_use]
    pub fn parent_id(&self) -> Option<Uuid> {
        match self {
            Self::Visitor(e) => e.parent().parent_id(),
            Self::Session(e) => e.parent().parent_id(),
            Self::Section(e) => e.parent().parent_id(),
            Self::Click(e) => e.parent().parent_id(),
        }
    }

    /// Untyped identity of the wrapped event.
    #[must_use]
    pub const fn reference(&self) -> EventReference {
        EventReference {
            event_type: self.event_type(),
            id: self.id(),
        }
    }

    /// Project into the wire format. Pure.
    #[must_use]
    pub fn to_publish_event(&self) -> PublishEvent {
        match self {
            Self::Visitor(e) => e.to_publish_event(),
            Self::Session(e) => e.to_publish_event(),
            Self::Section(e) => e.to_publish_event(),
            Self::Click(e) => e.to_publish_event(),
        }
    }
}

impl<K: Kind> From<Event<K>> for TrackedEvent {
    fn from(event: Event<K>) -> Self {
        K::track(event)
    }
}
