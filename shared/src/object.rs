//! Distributed object model
//!
//! A distributed object is composed of an [`ObjectCore`] (identity, location
//! and an optional global registry key) plus role-specific state. Objects
//! live in an [`ObjectTable`] owned by a repository; the repository hands its
//! context `C` to every hook and field handler, so objects never hold a
//! reference back to the repository.
//!
//! Incoming field updates are routed through a [`ClassRegistry`], an explicit
//! table from field name to handler built at startup and validated against
//! the shared [`Schema`].

use crate::channel::{DoId, ZoneId};
use crate::constants::{GlobalObjectId, ZONE_ID_INVALID};
use crate::error::{ObjectError, SchemaError};
use crate::field::FieldArgs;
use crate::protocol::RequiredField;
use crate::schema::Schema;
use log::{debug, info, warn};
use std::any::Any;
use std::collections::{HashMap, HashSet};

/// Outbound path for field updates, implemented by repository contexts.
pub trait FieldSink {
    fn send_field_update(
        &mut self,
        do_id: DoId,
        field: &str,
        args: FieldArgs,
    ) -> Result<(), ObjectError>;
}

/// Identity and location shared by every distributed object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectCore {
    do_id: Option<DoId>,
    parent_id: DoId,
    zone_id: ZoneId,
    global: Option<GlobalObjectId>,
}

impl ObjectCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Core of a global singleton addressed by a well-known key.
    pub fn global(id: GlobalObjectId) -> Self {
        Self {
            global: Some(id),
            ..Self::default()
        }
    }

    /// Binds identity. Global objects always live in the "none" zone.
    pub fn generate(
        &mut self,
        do_id: DoId,
        parent_id: DoId,
        zone_id: ZoneId,
    ) -> Result<(), ObjectError> {
        if let Some(existing) = self.do_id {
            return Err(ObjectError::AlreadyGenerated(existing));
        }

        self.do_id = Some(do_id);
        self.parent_id = parent_id;
        self.zone_id = if self.global.is_some() {
            ZONE_ID_INVALID
        } else {
            zone_id
        };
        Ok(())
    }

    /// Unbinds identity, returning the id that was bound if any.
    pub fn unbind(&mut self) -> Option<DoId> {
        self.do_id.take()
    }

    pub fn do_id(&self) -> Option<DoId> {
        self.do_id
    }

    pub fn is_generated(&self) -> bool {
        self.do_id.is_some()
    }

    pub fn parent_id(&self) -> DoId {
        self.parent_id
    }

    pub fn zone_id(&self) -> ZoneId {
        self.zone_id
    }

    pub fn global_id(&self) -> Option<GlobalObjectId> {
        self.global
    }

    /// Hands a field update for this object to the repository.
    ///
    /// No schema check happens here; the receiving side validates.
    pub fn send_field_update<S: FieldSink + ?Sized>(
        &self,
        sink: &mut S,
        field: &str,
        args: FieldArgs,
    ) -> Result<(), ObjectError> {
        let do_id = self.do_id.ok_or(ObjectError::NotGenerated)?;
        sink.send_field_update(do_id, field, args)
    }
}

/// Upcast helper so boxed objects can be downcast to their concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A replicated object living in a repository with context `C`.
pub trait DistributedObject<C>: AsAny {
    fn class_name(&self) -> &'static str;

    fn core(&self) -> &ObjectCore;

    fn core_mut(&mut self) -> &mut ObjectCore;

    /// Field values a server sends along when it creates this object.
    fn required_fields(&self) -> Vec<RequiredField> {
        Vec::new()
    }

    /// Runs once identity and required fields are in place.
    fn announce_generate(&mut self, _ctx: &mut C) -> Result<(), ObjectError> {
        Ok(())
    }

    /// Runs once as the object leaves the repository, while still bound.
    fn on_delete(&mut self, _ctx: &mut C) {}
}

pub type FieldHandler<T, C> = fn(&mut T, &mut C, &FieldArgs) -> Result<(), ObjectError>;

/// A concrete distributed class that can be registered for dispatch.
pub trait DistributedClass<C: 'static>: DistributedObject<C> + Sized {
    /// Schema class this type implements for its role.
    const CLASS_NAME: &'static str;

    fn create() -> Self;

    fn field_handlers() -> Vec<(&'static str, FieldHandler<Self, C>)>;
}

type ErasedHandler<C> =
    Box<dyn Fn(&mut dyn DistributedObject<C>, &mut C, &FieldArgs) -> Result<(), ObjectError>>;
type Factory<C> = Box<dyn Fn() -> Box<dyn DistributedObject<C>>>;

struct RegisteredClass<C> {
    factory: Factory<C>,
    handlers: HashMap<&'static str, ErasedHandler<C>>,
}

/// Per-role table of classes and their field handlers.
pub struct ClassRegistry<C> {
    schema: Schema,
    classes: HashMap<&'static str, RegisteredClass<C>>,
}

impl<C: 'static> ClassRegistry<C> {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            classes: HashMap::new(),
        }
    }

    /// Registers `T`, failing if its class or any handled field is missing
    /// from the schema.
    pub fn register<T: DistributedClass<C>>(&mut self) -> Result<(), SchemaError> {
        let class = self
            .schema
            .class(T::CLASS_NAME)
            .ok_or_else(|| SchemaError::UnknownClass(T::CLASS_NAME.to_string()))?;

        if self.classes.contains_key(T::CLASS_NAME) {
            return Err(SchemaError::DuplicateClass(T::CLASS_NAME.to_string()));
        }

        let mut handlers: HashMap<&'static str, ErasedHandler<C>> = HashMap::new();
        for (field, handler) in T::field_handlers() {
            if !class.has_field(field) {
                return Err(SchemaError::UnknownField {
                    class: T::CLASS_NAME.to_string(),
                    field: field.to_string(),
                });
            }

            handlers.insert(
                field,
                Box::new(move |object, ctx, args| {
                    let object = AsAny::as_any_mut(object)
                        .downcast_mut::<T>()
                        .ok_or_else(|| {
                            ObjectError::Handler(format!("object is not a {}", T::CLASS_NAME))
                        })?;
                    handler(object, ctx, args)
                }),
            );
        }

        debug!(
            "Registered class {} with {} field handlers",
            T::CLASS_NAME,
            handlers.len()
        );
        self.classes.insert(
            T::CLASS_NAME,
            RegisteredClass {
                factory: Box::new(|| Box::new(T::create())),
                handlers,
            },
        );
        Ok(())
    }

    pub fn is_registered(&self, class_name: &str) -> bool {
        self.classes.contains_key(class_name)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Instantiates an ungenerated object of a registered class.
    pub fn create(&self, class_name: &str) -> Result<Box<dyn DistributedObject<C>>, ObjectError> {
        self.classes
            .get(class_name)
            .map(|class| (class.factory)())
            .ok_or_else(|| ObjectError::UnknownClass(class_name.to_string()))
    }

    pub fn dispatch(
        &self,
        object: &mut dyn DistributedObject<C>,
        ctx: &mut C,
        field: &str,
        args: &FieldArgs,
    ) -> Result<(), ObjectError> {
        let class_name = object.class_name();
        let handler = self
            .classes
            .get(class_name)
            .and_then(|class| class.handlers.get(field))
            .ok_or_else(|| ObjectError::UnknownField {
                class: class_name.to_string(),
                field: field.to_string(),
            })?;

        handler(object, ctx, args)
    }
}

/// Where an object is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectLocation {
    pub do_id: DoId,
    pub parent_id: DoId,
    pub zone_id: ZoneId,
}

impl ObjectLocation {
    pub fn new(do_id: DoId, parent_id: DoId, zone_id: ZoneId) -> Self {
        Self {
            do_id,
            parent_id,
            zone_id,
        }
    }
}

/// Live objects of one repository, keyed by `do_id`.
pub struct ObjectTable<C> {
    objects: HashMap<DoId, Box<dyn DistributedObject<C>>>,
    singletons: HashSet<&'static str>,
}

impl<C: 'static> Default for ObjectTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> ObjectTable<C> {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            singletons: HashSet::new(),
        }
    }

    /// Binds `object` at `location`, applies its required fields and
    /// announces it.
    ///
    /// A second global singleton of the same class is rejected. Required
    /// fields that fail to apply are logged and skipped.
    pub fn generate(
        &mut self,
        ctx: &mut C,
        registry: &ClassRegistry<C>,
        mut object: Box<dyn DistributedObject<C>>,
        location: ObjectLocation,
        required: &[RequiredField],
    ) -> Result<(), ObjectError> {
        let class_name = object.class_name();
        if self.objects.contains_key(&location.do_id) {
            return Err(ObjectError::DuplicateObject(location.do_id));
        }

        let is_global = object.core().global_id().is_some();
        if is_global && self.singletons.contains(class_name) {
            return Err(ObjectError::DuplicateSingleton {
                class: class_name.to_string(),
            });
        }

        object
            .core_mut()
            .generate(location.do_id, location.parent_id, location.zone_id)?;

        for (field, args) in required {
            if let Err(e) = registry.dispatch(object.as_mut(), ctx, field, args) {
                warn!(
                    "Dropping required field {}.{} for {}: {}",
                    class_name, field, location.do_id, e
                );
            }
        }

        if let Err(e) = object.announce_generate(ctx) {
            object.core_mut().unbind();
            return Err(e);
        }

        if is_global {
            self.singletons.insert(class_name);
            info!("{} generated under DoId {}", class_name, location.do_id);
        } else {
            debug!(
                "{} generated under DoId {} (parent {}, zone {})",
                class_name, location.do_id, location.parent_id, location.zone_id
            );
        }

        self.objects.insert(location.do_id, object);
        Ok(())
    }

    /// Removes and tears down an object. Returns false if it was not live.
    pub fn delete(&mut self, ctx: &mut C, do_id: DoId) -> bool {
        let Some(mut object) = self.objects.remove(&do_id) else {
            return false;
        };

        object.on_delete(ctx);
        if object.core().global_id().is_some() {
            self.singletons.remove(object.class_name());
        }
        object.core_mut().unbind();
        debug!("{} {} deleted", object.class_name(), do_id);
        true
    }

    /// Deletes every live object.
    pub fn clear(&mut self, ctx: &mut C) {
        let ids: Vec<DoId> = self.objects.keys().copied().collect();
        for do_id in ids {
            self.delete(ctx, do_id);
        }
    }

    /// Routes a field update to the live object `do_id`.
    pub fn dispatch(
        &mut self,
        ctx: &mut C,
        registry: &ClassRegistry<C>,
        do_id: DoId,
        field: &str,
        args: &FieldArgs,
    ) -> Result<(), ObjectError> {
        let object = self
            .objects
            .get_mut(&do_id)
            .ok_or(ObjectError::UnknownObject(do_id))?;
        registry.dispatch(object.as_mut(), ctx, field, args)
    }

    pub fn contains(&self, do_id: DoId) -> bool {
        self.objects.contains_key(&do_id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, do_id: DoId) -> Option<&dyn DistributedObject<C>> {
        self.objects.get(&do_id).map(|object| object.as_ref())
    }

    pub fn get_as<T: Any>(&self, do_id: DoId) -> Option<&T> {
        let object = self.objects.get(&do_id)?;
        AsAny::as_any(object.as_ref()).downcast_ref::<T>()
    }

    pub fn get_as_mut<T: Any>(&mut self, do_id: DoId) -> Option<&mut T> {
        let object = self.objects.get_mut(&do_id)?;
        AsAny::as_any_mut(object.as_mut()).downcast_mut::<T>()
    }
}
