//! Shape declarations.
//!
//! A shape is a plain struct that rows are mapped into. It describes itself
//! once through [`Shape::describe`], filling a [`ShapeBuilder`] with its table,
//! key, and fields. The resulting [`ShapeDescriptor`] is type-erased so the
//! catalog, compiler, and composer can work over any shape at runtime.
//!
//! ```
//! use rowmap::shape::{Shape, ShapeBuilder};
//!
//! #[derive(Debug, Default)]
//! struct Person {
//!     id: i64,
//!     name: String,
//!     age: Option<i32>,
//! }
//!
//! impl Shape for Person {
//!     fn describe(shape: &mut ShapeBuilder<Self>) {
//!         shape.table("people").primary_key("id").auto_increment();
//!         shape.field("id", |p| &p.id, |p| &mut p.id);
//!         shape.field("name", |p| &p.name, |p| &mut p.name).column("full_name");
//!         shape.field("age", |p| &p.age, |p| &mut p.age);
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::value::{enum_from_value, ConversionError, DbEnum, FieldValue, Value, ValueType};

/// A type-erased shape instance.
pub type Instance = Box<dyn Any + Send>;

/// Reads a field out of a type-erased instance.
pub type Getter = Arc<dyn Fn(&dyn Any) -> Value + Send + Sync>;

/// Writes a field of a type-erased instance.
pub type Setter = Arc<dyn Fn(&mut dyn Any, Value) -> Result<(), ConversionError> + Send + Sync>;

/// Moves a child instance into a reference field of its parent.
pub type Assigner = Arc<dyn Fn(&mut dyn Any, Instance) -> Result<(), ConversionError> + Send + Sync>;

/// A structured target type for row mapping.
pub trait Shape: Default + Send + Sync + 'static {
    /// Declare table, key, and fields.
    fn describe(shape: &mut ShapeBuilder<Self>);

    /// Called after a row has been written into a fresh instance.
    fn on_loaded(&mut self) {}
}

/// Runtime handle to a shape type.
#[derive(Clone, Copy)]
pub struct ShapeType {
    pub id: TypeId,
    pub name: &'static str,
    describe: fn() -> ShapeDescriptor,
}

impl ShapeType {
    pub fn of<T: Shape>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            describe: build_descriptor::<T>,
        }
    }

    /// Run the shape's declaration.
    pub fn describe(&self) -> ShapeDescriptor {
        (self.describe)()
    }
}

impl PartialEq for ShapeType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ShapeType {}

impl Hash for ShapeType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ShapeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Everything a shape declared about itself.
pub struct ShapeDescriptor {
    pub type_id: TypeId,
    /// Full type path, used for crate-scoped mapper lookups.
    pub type_name: &'static str,
    /// Short type name, the default table name.
    pub name: String,
    pub table: Option<String>,
    pub primary_key: Option<String>,
    pub auto_increment: bool,
    pub sequence_name: Option<String>,
    /// Only fields marked `mapped()` (or given a column) are bound.
    pub explicit_columns: bool,
    pub fields: Vec<FieldDescriptor>,
    pub links: Vec<LinkDescriptor>,
    construct: fn() -> Instance,
    on_loaded: fn(&mut dyn Any),
}

impl ShapeDescriptor {
    /// A fresh default instance.
    pub fn construct(&self) -> Instance {
        (self.construct)()
    }

    pub fn run_on_loaded(&self, instance: &mut dyn Any) {
        (self.on_loaded)(instance)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl fmt::Debug for ShapeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapeDescriptor")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("auto_increment", &self.auto_increment)
            .field("fields", &self.fields)
            .field("links", &self.links)
            .finish()
    }
}

/// One declared field of a shape.
#[derive(Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub value_type: ValueType,
    pub nullable: bool,
    pub column: Option<String>,
    pub declared: bool,
    pub ignore: bool,
    pub result_only: bool,
    pub force_utc: bool,
    pub(crate) get: Getter,
    pub(crate) set: Setter,
}

impl FieldDescriptor {
    /// Map to a differently named column. Implies `mapped()`.
    pub fn column(&mut self, name: impl Into<String>) -> &mut Self {
        self.column = Some(name.into());
        self.declared = true;
        self
    }

    /// Opt in to mapping on a shape with explicit columns.
    pub fn mapped(&mut self) -> &mut Self {
        self.declared = true;
        self
    }

    /// Never map this field.
    pub fn ignore(&mut self) -> &mut Self {
        self.ignore = true;
        self
    }

    /// Read from results but never written by insert or update.
    pub fn result_only(&mut self) -> &mut Self {
        self.result_only = true;
        self
    }

    /// Treat timestamps read into this field as UTC.
    pub fn force_utc(&mut self) -> &mut Self {
        self.force_utc = true;
        self
    }

    pub fn get(&self, instance: &dyn Any) -> Value {
        (self.get)(instance)
    }

    pub fn set(&self, instance: &mut dyn Any, value: Value) -> Result<(), ConversionError> {
        (self.set)(instance, value)
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("column", &self.column)
            .field("result_only", &self.result_only)
            .finish()
    }
}

/// A field holding another shape, filled in by auto-link.
#[derive(Clone)]
pub struct LinkDescriptor {
    pub name: String,
    pub target: TypeId,
    pub target_name: &'static str,
    pub(crate) assign: Assigner,
}

impl LinkDescriptor {
    pub fn assign(&self, parent: &mut dyn Any, child: Instance) -> Result<(), ConversionError> {
        (self.assign)(parent, child)
    }
}

impl fmt::Debug for LinkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.target_name)
    }
}

fn short_name(type_name: &str) -> String {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

fn wrong_instance<T>() -> ConversionError {
    ConversionError::new(format!("instance is not a {}", std::any::type_name::<T>()))
}

fn construct<T: Shape>() -> Instance {
    Box::new(T::default())
}

fn on_loaded<T: Shape>(instance: &mut dyn Any) {
    if let Some(shape) = instance.downcast_mut::<T>() {
        shape.on_loaded();
    }
}

fn build_descriptor<T: Shape>() -> ShapeDescriptor {
    let mut builder = ShapeBuilder::<T>::new();
    T::describe(&mut builder);
    builder.desc
}

/// Collects a shape's declaration.
pub struct ShapeBuilder<T> {
    desc: ShapeDescriptor,
    _shape: PhantomData<fn() -> T>,
}

impl<T: Shape> ShapeBuilder<T> {
    fn new() -> Self {
        let type_name = std::any::type_name::<T>();
        Self {
            desc: ShapeDescriptor {
                type_id: TypeId::of::<T>(),
                type_name,
                name: short_name(type_name),
                table: None,
                primary_key: None,
                auto_increment: false,
                sequence_name: None,
                explicit_columns: false,
                fields: Vec::new(),
                links: Vec::new(),
                construct: construct::<T>,
                on_loaded: on_loaded::<T>,
            },
            _shape: PhantomData,
        }
    }

    pub fn table(&mut self, name: impl Into<String>) -> &mut Self {
        self.desc.table = Some(name.into());
        self
    }

    pub fn primary_key(&mut self, column: impl Into<String>) -> &mut Self {
        self.desc.primary_key = Some(column.into());
        self
    }

    /// The primary key is generated by the database.
    pub fn auto_increment(&mut self) -> &mut Self {
        self.desc.auto_increment = true;
        self
    }

    pub fn sequence(&mut self, name: impl Into<String>) -> &mut Self {
        self.desc.sequence_name = Some(name.into());
        self
    }

    /// Only fields marked `mapped()` take part in mapping.
    pub fn explicit_columns(&mut self) -> &mut Self {
        self.desc.explicit_columns = true;
        self
    }

    /// Declare a value field.
    pub fn field<V, G, M>(&mut self, name: &str, get: G, get_mut: M) -> &mut FieldDescriptor
    where
        V: FieldValue,
        G: Fn(&T) -> &V + Send + Sync + 'static,
        M: Fn(&mut T) -> &mut V + Send + Sync + 'static,
    {
        let getter: Getter = Arc::new(move |any: &dyn Any| match any.downcast_ref::<T>() {
            Some(shape) => get(shape).to_value(),
            None => Value::Null,
        });
        let setter: Setter = Arc::new(move |any: &mut dyn Any, value: Value| {
            let shape = any.downcast_mut::<T>().ok_or_else(wrong_instance::<T>)?;
            *get_mut(shape) = V::from_value(value)?;
            Ok(())
        });
        self.push_field(name, V::value_type(), V::nullable(), getter, setter)
    }

    /// Declare an enumerated field stored by discriminant.
    pub fn enum_field<E, G, M>(&mut self, name: &str, get: G, get_mut: M) -> &mut FieldDescriptor
    where
        E: DbEnum + Default,
        G: Fn(&T) -> &E + Send + Sync + 'static,
        M: Fn(&mut T) -> &mut E + Send + Sync + 'static,
    {
        let getter: Getter = Arc::new(move |any: &dyn Any| match any.downcast_ref::<T>() {
            Some(shape) => Value::Int(get(shape).discriminant()),
            None => Value::Null,
        });
        let setter: Setter = Arc::new(move |any: &mut dyn Any, value: Value| {
            let shape = any.downcast_mut::<T>().ok_or_else(wrong_instance::<T>)?;
            *get_mut(shape) = if value.is_null() {
                E::default()
            } else {
                enum_from_value::<E>(value)?
            };
            Ok(())
        });
        self.push_field(name, ValueType::Enum(E::INFO), false, getter, setter)
    }

    /// Declare a field holding another shape, for auto-link.
    pub fn link<S, A>(&mut self, name: &str, assign: A) -> &mut Self
    where
        S: Shape,
        A: Fn(&mut T, S) + Send + Sync + 'static,
    {
        let assigner: Assigner = Arc::new(move |parent: &mut dyn Any, child: Instance| {
            let parent = parent.downcast_mut::<T>().ok_or_else(wrong_instance::<T>)?;
            let child = child.downcast::<S>().map_err(|_| wrong_instance::<S>())?;
            assign(parent, *child);
            Ok(())
        });
        self.desc.links.push(LinkDescriptor {
            name: name.to_string(),
            target: TypeId::of::<S>(),
            target_name: std::any::type_name::<S>(),
            assign: assigner,
        });
        self
    }

    fn push_field(
        &mut self,
        name: &str,
        value_type: ValueType,
        nullable: bool,
        get: Getter,
        set: Setter,
    ) -> &mut FieldDescriptor {
        self.desc.fields.push(FieldDescriptor {
            name: name.to_string(),
            value_type,
            nullable,
            column: None,
            declared: false,
            ignore: false,
            result_only: false,
            force_utc: false,
            get,
            set,
        });
        let last = self.desc.fields.len() - 1;
        &mut self.desc.fields[last]
    }
}
