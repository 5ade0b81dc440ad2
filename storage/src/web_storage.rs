//! Site-state store over a durable and a session-scoped key-value backend.

use crate::backend::{KeyValueStorage, StorageError};
use salus_core::{
    Kind, Reference, SectionReference, SessionReference, SiteState, SiteStateError,
    SiteStateStore, VisitorReference,
};

/// Prefix shared by every stored key.
pub const KEY_PREFIX: &str = "SALUS";

/// Counter incremented whenever a backend operation fails.
pub const STORAGE_FAILURES: &str = "salus.storage.failures";

/// Stores the visitor in `durable`, the session in `session`, and the section in memory.
///
/// Keys are `SALUS_VISITOR_{api_key}` and `SALUS_SESSION_{api_key}`, so trackers with different
/// API keys sharing a backend do not see each other's state. The section is never written to a
/// backend and is lost with this value.
#[derive(Debug)]
pub struct WebStorageSiteStateStore<D, S> {
    durable: D,
    session: S,
    visitor_key: String,
    session_key: String,
    section: Option<SectionReference>,
}

impl<D, S> WebStorageSiteStateStore<D, S>
where
    D: KeyValueStorage,
    S: KeyValueStorage,
{
    /// Create a store scoped to `api_key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidApiKey`] if `api_key` is blank.
    pub fn new(api_key: &str, durable: D, session: S) -> Result<Self, StorageError> {
        if api_key.trim().is_empty() {
            return Err(StorageError::InvalidApiKey);
        }
        Ok(Self {
            durable,
            session,
            visitor_key: storage_key("VISITOR", api_key),
            session_key: storage_key("SESSION", api_key),
            section: None,
        })
    }

    /// Key the visitor id is stored under.
    #[must_use]
    pub fn visitor_key(&self) -> &str {
        &self.visitor_key
    }

    /// Key the session id is stored under.
    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Durable backend.
    #[must_use]
    pub const fn durable(&self) -> &D {
        &self.durable
    }

    /// Session-scoped backend.
    #[must_use]
    pub const fn session(&self) -> &S {
        &self.session
    }

    fn read_visitor(&self) -> Result<Option<VisitorReference>, SiteStateError> {
        read_reference(&self.durable, &self.visitor_key)
    }

    fn read_session(&self) -> Result<Option<SessionReference>, SiteStateError> {
        read_reference(&self.session, &self.session_key)
    }

    fn write_visitor(&mut self, visitor: Option<VisitorReference>) -> Result<(), SiteStateError> {
        write_reference(&mut self.durable, &self.visitor_key, visitor)
    }

    fn write_session(&mut self, session: Option<SessionReference>) -> Result<(), SiteStateError> {
        write_reference(&mut self.session, &self.session_key, session)
    }
}

impl<D, S> SiteStateStore for WebStorageSiteStateStore<D, S>
where
    D: KeyValueStorage,
    S: KeyValueStorage,
{
    fn get(&self) -> Result<SiteState, SiteStateError> {
        let Some(visitor) = self.read_visitor()? else {
            return Err(SiteStateError::NotFound);
        };
        let Some(session) = self.read_session()? else {
            return Ok(SiteState {
                visitor: Some(visitor),
                ..SiteState::EMPTY
            });
        };
        Ok(SiteState {
            visitor: Some(visitor),
            session: Some(session),
            section: self.section,
        })
    }

    fn set(&mut self, state: &SiteState) -> Result<SiteState, SiteStateError> {
        self.section = state.section;
        self.write_session(state.session)?;
        self.write_visitor(state.visitor)?;
        tracing::trace!(
            visitor = state.visitor.is_some(),
            session = state.session.is_some(),
            section = state.section.is_some(),
            "Site state stored"
        );
        Ok(*state)
    }

    fn clear(&mut self) -> Result<SiteState, SiteStateError> {
        self.section = None;
        self.write_session(None)?;
        self.write_visitor(None)?;
        tracing::trace!("Site state cleared");
        Ok(SiteState::EMPTY)
    }
}

fn storage_key(suffix: &str, api_key: &str) -> String {
    format!("{KEY_PREFIX}_{suffix}_{api_key}")
}

fn read_reference<K: Kind>(
    storage: &impl KeyValueStorage,
    key: &str,
) -> Result<Option<Reference<K>>, SiteStateError> {
    let Some(id) = storage.get_item(key).map_err(|e| backend_failure("get", key, &e))? else {
        return Ok(None);
    };
    Reference::parse(&id).map(Some).map_err(|e| {
        tracing::warn!(key, error = %e, "Stored reference is malformed");
        SiteStateError::from(e)
    })
}

fn write_reference<K: Kind>(
    storage: &mut impl KeyValueStorage,
    key: &str,
    reference: Option<Reference<K>>,
) -> Result<(), SiteStateError> {
    let result = match reference {
        Some(reference) => storage.set_item(key, &reference.id().to_string()),
        None => storage.remove_item(key),
    };
    result.map_err(|e| backend_failure(if reference.is_some() { "set" } else { "remove" }, key, &e))
}

fn backend_failure(operation: &'static str, key: &str, error: &StorageError) -> SiteStateError {
    tracing::warn!(operation, key, error = %error, "Storage backend failed");
    metrics::counter!(STORAGE_FAILURES, "operation" => operation).increment(1);
    SiteStateError::Internal(error.to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::backend::MemoryStorage;
    use salus_core::{Section, Session, Visitor};

    type MemoryStore = WebStorageSiteStateStore<MemoryStorage, MemoryStorage>;

    fn store() -> MemoryStore {
        WebStorageSiteStateStore::new("abc-xyz", MemoryStorage::new(), MemoryStorage::new())
            .unwrap()
    }

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
    fn test_keys_are_scoped_by_api_key() {
        let store = store();
        assert_eq!(store.visitor_key(), "SALUS_VISITOR_abc-xyz");
        assert_eq!(store.session_key(), "SALUS_SESSION_abc-xyz");
    }

    #[test]
    fn test_blank_api_key_is_rejected() {
        let err = MemoryStore::new("  ", MemoryStorage::new(), MemoryStorage::new()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidApiKey));
    }

    #[test]
    fn test_empty_store_is_not_found() {
        assert_eq!(store().get(), Err(SiteStateError::NotFound));
    }

    #[test]
    fn test_set_then_get_returns_state() {
        let mut store = store();
        let state = full_state();

        assert_eq!(store.set(&state).unwrap(), state);
        assert_eq!(store.get().unwrap(), state);
    }

    #[test]
    fn test_fields_land_in_their_backends() {
        let mut store = store();
        let state = full_state();
        store.set(&state).unwrap();

        let visitor_id = state.visitor.unwrap().id().to_string();
        let session_id = state.session.unwrap().id().to_string();
        assert_eq!(
            store.durable().get_item("SALUS_VISITOR_abc-xyz").unwrap(),
            Some(visitor_id)
        );
        assert_eq!(
            store.session().get_item("SALUS_SESSION_abc-xyz").unwrap(),
            Some(session_id)
        );
        assert_eq!(store.durable().len(), 1);
        assert_eq!(store.session().len(), 1);
    }

    #[test]
    fn test_missing_session_yields_partial_state() {
        let mut store = store();
        let mut state = full_state();
        state.session = None;
        state.section = None;
        store.set(&state).unwrap();

        let loaded = store.get().unwrap();
        assert_eq!(loaded.visitor, state.visitor);
        assert_eq!(loaded.session, None);
        assert_eq!(loaded.section, None);
    }

    #[test]
    fn test_malformed_visitor() {
        let mut store = store();
        let mut durable = store.durable().clone();
        durable.set_item(store.visitor_key(), "not-a-uuid").unwrap();

        assert!(matches!(store.get(), Err(SiteStateError::MalformedData(_))));

        store.clear().unwrap();
        assert_eq!(store.get(), Err(SiteStateError::NotFound));
    }

    #[test]
    fn test_malformed_session() {
        let mut store = store();
        store.set(&full_state()).unwrap();
        let mut session = store.session().clone();
        session
            .set_item(store.session_key(), "00000000-0000-4000-8000-000000000000")
            .unwrap();

        assert!(matches!(store.get(), Err(SiteStateError::MalformedData(_))));
    }

    #[test]
    fn test_clear_removes_session_from_session_backend() {
        let mut store = store();
        store.set(&full_state()).unwrap();

        assert_eq!(store.clear().unwrap(), SiteState::EMPTY);
        assert!(store.durable().is_empty());
        assert!(store.session().is_empty());
        assert_eq!(store.get(), Err(SiteStateError::NotFound));
    }

    #[test]
    fn test_set_clears_absent_fields() {
        let mut store = store();
        store.set(&full_state()).unwrap();

        let visitor_only = SiteState {
            visitor: Some(Visitor::new(()).reference()),
            ..SiteState::EMPTY
        };
        store.set(&visitor_only).unwrap();

        assert_eq!(store.get().unwrap(), visitor_only);
        assert!(store.session().is_empty());
    }
}
