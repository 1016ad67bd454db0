//! Pooled-resource slots and lazy acquisition
//!
//! A context does not own its links. It holds [`PooledSlot`]s acquired from
//! a [`PooledResourceFactory`] and hands them back on cleanup, marking a
//! slot stale when its link was interrupted mid-request. Several context
//! names may alias one slot; sharing happens through [`PooledHandle`] and
//! release is guarded so it runs exactly once per slot.
//!
//! Slots enter a context lazily: the first lookup of an unknown name asks
//! the context's [`ResourceBroker`] to supply one.

use crate::link::{DataReceiver, DataSource, LinkObject};
use crate::result::{EngineError, LinkError, Result};
use std::cell::RefCell;
use std::rc::Rc;

/// Shared factory handle, cloneable across the slots it produced.
pub type SharedFactory = Rc<RefCell<dyn PooledResourceFactory>>;

/// Shared slot handle; aliased names clone this.
pub type PooledHandle = Rc<RefCell<PooledSlot>>;

/// Hands out links and takes them back.
///
/// The engine only ever calls `acquire` and `release`; `check` exists for
/// pool implementations that validate links between uses.
pub trait PooledResourceFactory {
    /// Produces a ready-to-use link.
    fn acquire(&mut self) -> std::result::Result<LinkObject, LinkError>;

    /// Takes a link back. `stale` marks a link that was interrupted and
    /// should not be reused as-is.
    fn release(&mut self, link: LinkObject, stale: bool);

    /// Whether the link is still fit for use.
    fn check(&self, link: &LinkObject) -> bool;
}

/// Supplies pooled slots to a context on first use.
///
/// Returning `Ok(None)` means the broker does not know the name, which
/// surfaces as a not-found error on the context. Returning `Err` surfaces
/// as a resource-unavailable error and leaves nothing registered.
pub trait ResourceBroker {
    /// Supplies the slot behind a data-source name.
    fn init_data_source(&mut self, name: &str) -> std::result::Result<Option<PooledHandle>, LinkError>;

    /// Supplies the slot behind a data-receiver name.
    fn init_data_receiver(&mut self, name: &str) -> std::result::Result<Option<PooledHandle>, LinkError>;

    /// Supplies the slot behind a generic pooled-object name.
    fn init_pooled_object(&mut self, name: &str) -> std::result::Result<Option<PooledHandle>, LinkError> {
        self.init_data_source(name)
    }
}

/// Broker that knows no resources; the default for fresh contexts.
#[derive(Debug, Default)]
pub struct NoResources;

impl ResourceBroker for NoResources {
    fn init_data_source(&mut self, _name: &str) -> std::result::Result<Option<PooledHandle>, LinkError> {
        Ok(None)
    }

    fn init_data_receiver(&mut self, _name: &str) -> std::result::Result<Option<PooledHandle>, LinkError> {
        Ok(None)
    }
}

/// One pooled link together with the factory it returns to.
pub struct PooledSlot {
    name: String,
    link: Option<LinkObject>,
    factory: SharedFactory,
    stale: bool,
}

impl std::fmt::Debug for PooledSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSlot")
            .field("name", &self.name)
            .field("link", &self.link.as_ref().map(LinkObject::kind_name))
            .field("stale", &self.stale)
            .finish()
    }
}

impl PooledSlot {
    /// Acquires a link from the factory and wraps it in a shared slot.
    pub fn acquire(name: impl Into<String>, factory: SharedFactory) -> std::result::Result<PooledHandle, LinkError> {
        let link = factory.borrow_mut().acquire()?;
        Ok(Rc::new(RefCell::new(PooledSlot {
            name: name.into(),
            link: Some(link),
            factory,
            stale: false,
        })))
    }

    /// Pool name this slot was acquired under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the slot still holds its link.
    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    /// Marks the link as interrupted; passed to the factory on release.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Whether the slot was marked stale.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Returns the link to the factory. Safe to call more than once; only
    /// the first call hands the link back.
    pub fn release(&mut self) {
        if let Some(link) = self.link.take() {
            self.factory.borrow_mut().release(link, self.stale);
        }
    }

    /// The held link, or an error when the slot was already released.
    pub fn link(&mut self) -> Result<&mut LinkObject> {
        let name = self.name.clone();
        self.link
            .as_mut()
            .ok_or_else(|| EngineError::ResourceUnavailable {
                name,
                source: "pooled link already released".into(),
            })
    }

    /// The held link as a data source.
    pub fn source(&mut self) -> Result<&mut dyn DataSource> {
        let name = self.name.clone();
        match self.link()? {
            LinkObject::Source(s) => Ok(s.as_mut()),
            other => Err(EngineError::Format(format!(
                "Pooled object '{}' is a {}, not a data source",
                name,
                other.kind_name()
            ))),
        }
    }

    /// The held link as a data receiver.
    pub fn receiver(&mut self) -> Result<&mut dyn DataReceiver> {
        let name = self.name.clone();
        match self.link()? {
            LinkObject::Receiver(r) => Ok(r.as_mut()),
            other => Err(EngineError::Format(format!(
                "Pooled object '{}' is a {}, not a data receiver",
                name,
                other.kind_name()
            ))),
        }
    }

    /// Best-effort cancel of the held link; a released slot is a no-op.
    pub fn cancel(&mut self) -> Result<()> {
        match self.link.as_mut() {
            Some(link) => link.cancel(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Cursor, DataLink};
    use std::time::Duration;

    struct IdleSource;

    impl DataLink for IdleSource {
        fn cancel(&mut self) -> Result<()> {
            Ok(())
        }

        fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
            Ok(())
        }
    }

    impl DataSource for IdleSource {
        fn request(&mut self, _query: &str) -> Result<Box<dyn Cursor>> {
            Err(EngineError::Format("no data".to_string()))
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        acquired: usize,
        released: Vec<bool>,
    }

    impl PooledResourceFactory for CountingFactory {
        fn acquire(&mut self) -> std::result::Result<LinkObject, LinkError> {
            self.acquired += 1;
            Ok(LinkObject::Source(Box::new(IdleSource)))
        }

        fn release(&mut self, _link: LinkObject, stale: bool) {
            self.released.push(stale);
        }

        fn check(&self, _link: &LinkObject) -> bool {
            true
        }
    }

    #[test]
    fn test_release_hands_link_back_once() {
        let factory = Rc::new(RefCell::new(CountingFactory::default()));
        let shared: SharedFactory = factory.clone();
        let handle = PooledSlot::acquire("db", shared).unwrap();

        handle.borrow_mut().release();
        handle.borrow_mut().release();

        assert_eq!(factory.borrow().acquired, 1);
        assert_eq!(factory.borrow().released, vec![false]);
    }

    #[test]
    fn test_stale_flag_reaches_factory() {
        let factory = Rc::new(RefCell::new(CountingFactory::default()));
        let shared: SharedFactory = factory.clone();
        let handle = PooledSlot::acquire("db", shared).unwrap();

        handle.borrow_mut().mark_stale();
        handle.borrow_mut().release();

        assert_eq!(factory.borrow().released, vec![true]);
    }

    #[test]
    fn test_released_slot_rejects_access() {
        let factory = Rc::new(RefCell::new(CountingFactory::default()));
        let shared: SharedFactory = factory.clone();
        let handle = PooledSlot::acquire("db", shared).unwrap();

        handle.borrow_mut().release();
        let err = handle.borrow_mut().source().err().unwrap();
        assert!(matches!(err, EngineError::ResourceUnavailable { .. }));
    }

    #[test]
    fn test_wrong_kind_is_reported() {
        let factory = Rc::new(RefCell::new(CountingFactory::default()));
        let shared: SharedFactory = factory.clone();
        let handle = PooledSlot::acquire("db", shared).unwrap();

        let err = handle.borrow_mut().receiver().err().unwrap();
        assert!(err.to_string().contains("not a data receiver"));
    }
}
