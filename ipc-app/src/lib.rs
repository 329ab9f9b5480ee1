//! The connect-by-name seam between the wire/runtime layers and whatever
//! plays the role of an application launcher or service manager (spec §6
//! expansion).
//!
//! This crate captures exactly the interface spec.md already names —
//! "a way to ask for a named service and get back a handle, and a way for
//! something to offer named services" — and nothing else: no
//! process-spawning, manifest parsing, or sandboxing (spec.md §1's
//! "platform-specific process-spawning wrappers" stays out of scope).
//!
//! Grounded on two places in the retrieval pack that already solve this
//! seam, at different layers:
//! - `nx_sf::service::Service`'s `own_handle`/`object_id` fields, which
//!   distinguish a session a wrapper owns (and must close) from one it
//!   only borrows.
//! - Mojo's `ApplicationConnectorImpl::ConnectToApplication`, which
//!   resolves a connect-by-name call by forwarding it to a manager that
//!   holds the name -> provider directory.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::{String, ToString};

use hashbrown::HashMap;
use ipc_handle::{ErrorKind, Handle, KernelOps};

/// Something that can hand out a session handle for a named service.
///
/// A [`Registry`] itself implements this trait, so `connect_to_service`
/// works the same way whether the caller is talking to a single
/// provider or to a whole directory of them.
pub trait ServiceProvider {
    /// Connects to the named service, returning a fresh session handle.
    fn connect_to_service(&self, name: &str) -> Result<Handle, ConnectError>;
}

/// Everything that can go wrong resolving a
/// [`ServiceProvider::connect_to_service`] call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// No provider is registered under this name.
    #[error("no provider registered for service \"{0}\"")]
    NotFound(String),
    /// A provider was found but itself failed to produce a handle.
    #[error(transparent)]
    Kernel(#[from] ErrorKind),
}

/// A name -> [`ServiceProvider`] directory. Mirrors the role Mojo's
/// `ApplicationManager` plays for `ApplicationConnectorImpl`: every
/// connect-by-name call is resolved by looking the name up here.
pub trait ServiceRegistry {
    /// Registers `provider` under `name`, replacing any previous
    /// registration under the same name.
    fn register(&mut self, name: &str, provider: Box<dyn ServiceProvider>);
    /// Removes the registration under `name`, if any.
    fn remove(&mut self, name: &str);
}

/// The default in-process [`ServiceRegistry`]: a name-keyed table of
/// providers, itself usable as a [`ServiceProvider`] — connecting to it
/// dispatches to whichever provider is currently registered under that
/// name.
#[derive(Default)]
pub struct Registry {
    providers: HashMap<String, Box<dyn ServiceProvider>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self { providers: HashMap::new() }
    }

    /// The number of names currently registered.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// `true` if no names are registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl ServiceRegistry for Registry {
    fn register(&mut self, name: &str, provider: Box<dyn ServiceProvider>) {
        self.providers.insert(name.to_string(), provider);
    }

    fn remove(&mut self, name: &str) {
        self.providers.remove(name);
    }
}

impl ServiceProvider for Registry {
    fn connect_to_service(&self, name: &str) -> Result<Handle, ConnectError> {
        self.providers
            .get(name)
            .ok_or_else(|| ConnectError::NotFound(name.to_string()))?
            .connect_to_service(name)
    }
}

/// A session handle plus the ownership bookkeeping needed to close it
/// exactly once.
///
/// Mirrors `nx_sf::service::Service`'s `own_handle` field: an owned
/// `Service` closes its handle on drop, a borrowed one does not. That
/// struct's other field, `object_id`, distinguishes CMIF domain objects
/// multiplexed over a shared session — this runtime's wire format has no
/// domain concept, so only the ownership half survives here.
pub struct Service<'k> {
    kernel: &'k dyn KernelOps,
    handle: Handle,
    owns_handle: bool,
}

impl<'k> Service<'k> {
    /// Wraps a freshly connected session handle that this `Service` owns
    /// outright: dropping it closes `handle`.
    pub fn new(handle: Handle, kernel: &'k dyn KernelOps) -> Self {
        Self { kernel, handle, owns_handle: true }
    }

    /// Wraps a handle borrowed from elsewhere: dropping this `Service`
    /// will not close it.
    pub fn borrowed(handle: Handle, kernel: &'k dyn KernelOps) -> Self {
        Self { kernel, handle, owns_handle: false }
    }

    /// The underlying session handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// `true` if dropping this `Service` will close its handle.
    pub fn owns_handle(&self) -> bool {
        self.owns_handle
    }

    /// Closes the session now rather than waiting for drop. Consumes
    /// `self` to prevent use-after-close. A no-op if this `Service` only
    /// borrows the handle.
    pub fn close(mut self) -> Result<(), ErrorKind> {
        if self.owns_handle {
            self.owns_handle = false;
            self.kernel.handle_close(self.handle)
        } else {
            Ok(())
        }
    }
}

impl Drop for Service<'_> {
    fn drop(&mut self) {
        if self.owns_handle {
            let _ = self.kernel.handle_close(self.handle);
        }
    }
}

/// Connects to `name` through `provider` and wraps the resulting handle as
/// an owned [`Service`]. The free-function form Mojo's
/// `ApplicationConnectorImpl::ConnectToApplication` plays for a single
/// caller, without needing a trait object to hold the registry by.
pub fn connect<'k>(
    provider: &dyn ServiceProvider,
    name: &str,
    kernel: &'k dyn KernelOps,
) -> Result<Service<'k>, ConnectError> {
    let handle = provider.connect_to_service(name)?;
    Ok(Service::new(handle, kernel))
}

#[cfg(test)]
mod tests {
    use ipc_handle::Rights;
    use ipc_handle::kernel::tests::FakeKernel;

    use super::*;

    struct FixedProvider {
        handle: Handle,
    }

    impl ServiceProvider for FixedProvider {
        fn connect_to_service(&self, _name: &str) -> Result<Handle, ConnectError> {
            Ok(self.handle)
        }
    }

    #[test]
    fn connect_to_registered_name_succeeds() {
        let kernel = FakeKernel::new();
        let handle = kernel.make_handle(Rights::FULL);
        let mut registry = Registry::new();
        registry.register("echo", Box::new(FixedProvider { handle }));

        let service = connect(&registry, "echo", &kernel).unwrap();
        assert_eq!(service.handle(), handle);
        assert!(service.owns_handle());
    }

    #[test]
    fn connect_to_unregistered_name_fails() {
        let kernel = FakeKernel::new();
        let registry = Registry::new();
        let err = connect(&registry, "missing", &kernel).unwrap_err();
        assert_eq!(err, ConnectError::NotFound("missing".to_string()));
    }

    #[test]
    fn remove_then_connect_fails() {
        let kernel = FakeKernel::new();
        let handle = kernel.make_handle(Rights::FULL);
        let mut registry = Registry::new();
        registry.register("echo", Box::new(FixedProvider { handle }));
        registry.remove("echo");

        assert!(connect(&registry, "echo", &kernel).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn re_registering_a_name_replaces_the_provider() {
        let kernel = FakeKernel::new();
        let first = kernel.make_handle(Rights::FULL);
        let second = kernel.make_handle(Rights::FULL);
        let mut registry = Registry::new();
        registry.register("echo", Box::new(FixedProvider { handle: first }));
        registry.register("echo", Box::new(FixedProvider { handle: second }));

        let service = connect(&registry, "echo", &kernel).unwrap();
        assert_eq!(service.handle(), second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn owned_service_closes_its_handle_on_drop() {
        let kernel = FakeKernel::new();
        let handle = kernel.make_handle(Rights::FULL);
        {
            let _service = Service::new(handle, &kernel);
        }
        assert!(kernel.is_closed(handle));
    }

    #[test]
    fn borrowed_service_does_not_close_its_handle_on_drop() {
        let kernel = FakeKernel::new();
        let handle = kernel.make_handle(Rights::FULL);
        {
            let _service = Service::borrowed(handle, &kernel);
        }
        assert!(!kernel.is_closed(handle));
        kernel.handle_close(handle).unwrap();
    }

    #[test]
    fn explicit_close_reports_the_kernel_result() {
        let kernel = FakeKernel::new();
        let handle = kernel.make_handle(Rights::FULL);
        let service = Service::new(handle, &kernel);
        service.close().unwrap();
        assert!(kernel.is_closed(handle));
    }
}
