//! Minimal resolution container.
//!
//! Just enough dependency injection to give every request its own scope:
//! a root [`Container`] built once at startup, and cheap child scopes made
//! from it per request with [`Container::create_scope`].
//!
//! | Lifetime | Constructed | Cached in |
//! |---|---|---|
//! | [`Lifetime::Transient`] | on every build | nowhere |
//! | [`Lifetime::Scoped`] | once per scope | the scope that built it |
//! | [`Lifetime::Singleton`] | once per root | the root, shared by all scopes |
//!
//! ```rust
//! use std::sync::Arc;
//! use scopewire::{Container, Error, Inject, Lifetime, as_class};
//!
//! struct Db;
//! impl Inject for Db {
//!     fn construct(_: &Container) -> Result<Self, Error> { Ok(Db) }
//! }
//!
//! struct Repo { db: Arc<Db> }
//! impl Inject for Repo {
//!     fn construct(cx: &Container) -> Result<Self, Error> {
//!         Ok(Repo { db: cx.resolve::<Db>()? })
//!     }
//! }
//!
//! let root = Container::builder()
//!     .register(as_class::<Db>().lifetime(Lifetime::Singleton))
//!     .register(as_class::<Repo>().lifetime(Lifetime::Scoped))
//!     .build();
//!
//! let scope = root.create_scope();
//! let repo = scope.resolve::<Repo>().unwrap();
//! assert!(Arc::ptr_eq(&repo, &scope.resolve::<Repo>().unwrap()));
//! ```

use std::any::{Any, TypeId, type_name};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use crate::error::Error;

type Erased = Arc<dyn Any + Send + Sync>;
type Construct<T> = Arc<dyn Fn(&Container) -> Result<T, Error> + Send + Sync>;

/// How long a built instance lives.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Lifetime {
    #[default]
    Transient,
    Scoped,
    Singleton,
}

/// Types that know how to construct themselves from a container.
///
/// This is the class-shaped factory: the type itself is the recipe.
pub trait Inject: Sized + Send + Sync + 'static {
    fn construct(cx: &Container) -> Result<Self, Error>;
}

/// Which of the two factory shapes a [`Factory`] is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FactoryKind {
    Class,
    Function,
}

/// A recipe for `T`, either a type implementing [`Inject`] or a function.
pub enum Factory<T> {
    Class(Construct<T>),
    Function(Construct<T>),
}

impl<T: Send + Sync + 'static> Factory<T> {
    /// The class-shaped factory for `T`.
    pub fn class() -> Self
    where
        T: Inject,
    {
        Self::Class(Arc::new(T::construct))
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Container) -> Result<T, Error> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }
}

impl<T> Factory<T> {
    pub fn kind(&self) -> FactoryKind {
        match self {
            Self::Class(_) => FactoryKind::Class,
            Self::Function(_) => FactoryKind::Function,
        }
    }

    fn construct(&self, cx: &Container) -> Result<T, Error> {
        match self {
            Self::Class(f) | Self::Function(f) => f(cx),
        }
    }
}

impl<T> Clone for Factory<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Class(f) => Self::Class(Arc::clone(f)),
            Self::Function(f) => Self::Function(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for Factory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}<{}>", self.kind(), type_name::<T>())
    }
}

/// Options applied when a [`Resolver`] builds its instance.
#[derive(Clone, Debug, Default)]
pub struct ResolverOptions {
    pub lifetime: Lifetime,
    pub name: Option<Cow<'static, str>>,
}

impl ResolverOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A factory plus resolution options, with an identity of its own.
///
/// Scoped and singleton instances are cached under that identity, so two
/// clones of one resolver share instances while two resolvers built from
/// the same factory do not.
pub struct Resolver<T> {
    id: u64,
    factory: Factory<T>,
    options: ResolverOptions,
}

static NEXT_RESOLVER_ID: AtomicU64 = AtomicU64::new(0);

impl<T> Resolver<T> {
    pub fn new(factory: Factory<T>) -> Self {
        Self::with_options(factory, ResolverOptions::default())
    }

    pub fn with_options(factory: Factory<T>, options: ResolverOptions) -> Self {
        Self { id: NEXT_RESOLVER_ID.fetch_add(1, Ordering::Relaxed), factory, options }
    }

    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.options.lifetime = lifetime;
        self
    }

    /// Registers under `name` instead of as the default provider of `T`.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    pub fn kind(&self) -> FactoryKind {
        self.factory.kind()
    }

    pub fn factory(&self) -> &Factory<T> {
        &self.factory
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self { id: self.id, factory: self.factory.clone(), options: self.options.clone() }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("id", &self.id)
            .field("factory", &self.factory)
            .field("options", &self.options)
            .finish()
    }
}

impl<T> From<Factory<T>> for Resolver<T> {
    fn from(factory: Factory<T>) -> Self {
        Self::new(factory)
    }
}

/// A transient resolver for a type implementing [`Inject`].
pub fn as_class<T: Inject>() -> Resolver<T> {
    Resolver::new(Factory::class())
}

/// A transient resolver for a factory function.
pub fn as_function<T, F>(f: F) -> Resolver<T>
where
    T: Send + Sync + 'static,
    F: Fn(&Container) -> Result<T, Error> + Send + Sync + 'static,
{
    Resolver::new(Factory::function(f))
}

// ── Container ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct Key {
    ty: TypeId,
    name: Option<Cow<'static, str>>,
}

#[derive(Default)]
struct Cache {
    instances: Mutex<HashMap<u64, Erased>>,
}

impl Cache {
    fn get<T: Send + Sync + 'static>(&self, id: u64) -> Option<Arc<T>> {
        let instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        instances.get(&id).cloned()?.downcast().ok()
    }

    /// Stores `instance` unless another build won the race, and returns
    /// whichever instance ended up cached.
    fn insert<T: Send + Sync + 'static>(&self, id: u64, instance: Arc<T>) -> Arc<T> {
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        let cached = instances.entry(id).or_insert_with(|| instance.clone() as Erased);
        Arc::clone(cached).downcast().unwrap_or(instance)
    }

    fn len(&self) -> usize {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct Scope {
    registry: Arc<HashMap<Key, Erased>>,
    singletons: Arc<Cache>,
    scoped: Cache,
    root: Option<Container>,
    depth: usize,
}

/// A resolution context: the root built at startup, or a scope made from it.
#[derive(Clone)]
pub struct Container {
    scope: Arc<Scope>,
}

impl Container {
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::default()
    }

    /// Creates a child scope.
    ///
    /// The child shares registrations and singletons with its parent and
    /// starts with an empty scoped cache. No I/O, no construction.
    pub fn create_scope(&self) -> Container {
        let depth = self.scope.depth + 1;
        trace!(depth, "created resolution scope");
        Container {
            scope: Arc::new(Scope {
                registry: Arc::clone(&self.scope.registry),
                singletons: Arc::clone(&self.scope.singletons),
                scoped: Cache::default(),
                root: Some(self.root()),
                depth,
            }),
        }
    }

    /// Builds an instance from `resolver`, honouring its lifetime.
    pub fn build<T: Send + Sync + 'static>(&self, resolver: &Resolver<T>) -> Result<Arc<T>, Error> {
        match resolver.options.lifetime {
            Lifetime::Transient => self.construct(resolver).map(Arc::new),
            Lifetime::Scoped => self.cached(&self.scope.scoped, resolver),
            // Singletons are built against the root so they never capture
            // scoped instances of whichever request happened to come first.
            Lifetime::Singleton => {
                let root = self.root();
                root.cached(&root.scope.singletons, resolver)
            }
        }
    }

    /// Resolves the registration for `T`.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, Error> {
        self.resolve_key(Key { ty: TypeId::of::<T>(), name: None })
    }

    /// Resolves the registration for `T` made under `name`.
    pub fn resolve_named<T: Send + Sync + 'static>(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> Result<Arc<T>, Error> {
        self.resolve_key(Key { ty: TypeId::of::<T>(), name: Some(name.into()) })
    }

    pub fn has<T: 'static>(&self) -> bool {
        self.scope.registry.contains_key(&Key { ty: TypeId::of::<T>(), name: None })
    }

    /// How many scopes sit between this container and the root.
    pub fn depth(&self) -> usize {
        self.scope.depth
    }

    /// Whether `self` and `other` are handles to the same scope.
    pub fn same_scope(&self, other: &Container) -> bool {
        Arc::ptr_eq(&self.scope, &other.scope)
    }

    fn root(&self) -> Container {
        self.scope.root.clone().unwrap_or_else(|| self.clone())
    }

    fn resolve_key<T: Send + Sync + 'static>(&self, key: Key) -> Result<Arc<T>, Error> {
        let resolver = self
            .scope
            .registry
            .get(&key)
            .and_then(|erased| erased.downcast_ref::<Resolver<T>>())
            .ok_or_else(|| Error::NotRegistered { type_name: type_name::<T>(), name: key.name.clone() })?
            .clone();
        self.build(&resolver)
    }

    fn construct<T: Send + Sync + 'static>(&self, resolver: &Resolver<T>) -> Result<T, Error> {
        resolver.factory.construct(self).map_err(Error::construct::<T>)
    }

    fn cached<T: Send + Sync + 'static>(
        &self,
        cache: &Cache,
        resolver: &Resolver<T>,
    ) -> Result<Arc<T>, Error> {
        if let Some(hit) = cache.get(resolver.id) {
            return Ok(hit);
        }
        // The lock is released while constructing: factories resolve their
        // own dependencies through the same cache.
        let built = Arc::new(self.construct(resolver)?);
        Ok(cache.insert(resolver.id, built))
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("depth", &self.scope.depth)
            .field("registrations", &self.scope.registry.len())
            .field("scoped", &self.scope.scoped.len())
            .finish()
    }
}

/// Collects registrations for a root [`Container`].
#[derive(Default)]
pub struct ContainerBuilder {
    registry: HashMap<Key, Erased>,
}

impl ContainerBuilder {
    /// Registers `resolver` as the provider of `T`, replacing any earlier one.
    pub fn register<T: Send + Sync + 'static>(mut self, resolver: impl Into<Resolver<T>>) -> Self {
        let resolver = resolver.into();
        let key = Key { ty: TypeId::of::<T>(), name: resolver.options.name.clone() };
        debug!(ty = type_name::<T>(), name = ?key.name, lifetime = ?resolver.options.lifetime, "registered");
        self.registry.insert(key, Arc::new(resolver));
        self
    }

    /// Registers a ready-made value, shared as a singleton.
    pub fn value<T: Clone + Send + Sync + 'static>(self, value: T) -> Self {
        self.register(as_function(move |_| Ok(value.clone())).lifetime(Lifetime::Singleton))
    }

    pub fn build(self) -> Container {
        Container {
            scope: Arc::new(Scope {
                registry: Arc::new(self.registry),
                singletons: Arc::new(Cache::default()),
                scoped: Cache::default(),
                root: None,
                depth: 0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    static BUILT: AtomicUsize = AtomicUsize::new(0);

    struct Counter(usize);

    impl Inject for Counter {
        fn construct(_: &Container) -> Result<Self, Error> {
            Ok(Counter(BUILT.fetch_add(1, Ordering::SeqCst)))
        }
    }

    #[test]
    fn transient_builds_every_time() {
        let root = Container::builder().build();
        let resolver = as_class::<Counter>();

        let a = root.build(&resolver).unwrap();
        let b = root.build(&resolver).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn scoped_instances_are_cached_per_scope() {
        let root = Container::builder().build();
        let resolver = as_class::<Counter>().lifetime(Lifetime::Scoped);
        let first = root.create_scope();
        let second = root.create_scope();

        let a = first.build(&resolver).unwrap();
        assert!(Arc::ptr_eq(&a, &first.build(&resolver).unwrap()));
        assert!(!Arc::ptr_eq(&a, &second.build(&resolver).unwrap()));
    }

    #[test]
    fn singletons_are_shared_across_scopes() {
        let root = Container::builder()
            .register(as_class::<Counter>().lifetime(Lifetime::Singleton))
            .build();

        let a = root.create_scope().resolve::<Counter>().unwrap();
        let b = root.create_scope().create_scope().resolve::<Counter>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn named_registrations_do_not_shadow_the_default() {
        let root = Container::builder()
            .value(1_u32)
            .register(as_function(|_| Ok(2_u32)).lifetime(Lifetime::Singleton).named("two"))
            .build();

        assert_eq!(*root.resolve::<u32>().unwrap(), 1);
        assert_eq!(*root.resolve_named::<u32>("two").unwrap(), 2);
    }

    #[test]
    fn missing_dependency_is_reported_with_its_dependent() {
        #[derive(Debug)]
        struct Needy;
        impl Inject for Needy {
            fn construct(cx: &Container) -> Result<Self, Error> {
                cx.resolve::<String>()?;
                Ok(Needy)
            }
        }

        let err = Container::builder().build().build(&as_class::<Needy>()).unwrap_err();
        let Error::Construct { source, .. } = err else { panic!("expected construct error") };
        assert!(source.to_string().contains("no registration for `alloc::string::String`"));
    }

    #[test]
    fn scopes_know_their_depth() {
        let root = Container::builder().build();
        let child = root.create_scope();

        assert_eq!(root.depth(), 0);
        assert_eq!(child.depth(), 1);
        assert_eq!(child.create_scope().depth(), 2);
        assert!(!child.same_scope(&root.create_scope()));
    }
}
