//! Classes, method tables and the runtime class table.

use crate::error::{InterceptError, Result};
use crate::runtime::encoding::{Signature, TypeLayout};
use crate::runtime::object::Object;
use crate::types::{ClassId, Selector, Value};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

type VoidFn = dyn Fn(&Object) + Send + Sync;
type VoidObjectFn = dyn Fn(&Object, &Value) + Send + Sync;
type IntegerFn = dyn Fn(&Object) -> i64 + Send + Sync;
type ObjectFn = dyn Fn(&Object) -> Value + Send + Sync;
type GenericFn = dyn Fn(&Object, &[Value]) -> Result<Value> + Send + Sync;

/// Body of a method.
///
/// The typed shapes let trampolines call straight through without boxing
/// arguments; `Generic` takes a boxed argument slice.
#[derive(Clone)]
pub enum Implementation {
    /// `v@:`
    Void(Arc<VoidFn>),
    /// `v@:@`
    VoidObject(Arc<VoidObjectFn>),
    /// Integer return, no arguments.
    Integer(Arc<IntegerFn>),
    /// `@@:`
    Object(Arc<ObjectFn>),
    Generic(Arc<GenericFn>),
}

impl Implementation {
    pub fn void(f: impl Fn(&Object) + Send + Sync + 'static) -> Self {
        Implementation::Void(Arc::new(f))
    }

    pub fn void_object(f: impl Fn(&Object, &Value) + Send + Sync + 'static) -> Self {
        Implementation::VoidObject(Arc::new(f))
    }

    pub fn integer(f: impl Fn(&Object) -> i64 + Send + Sync + 'static) -> Self {
        Implementation::Integer(Arc::new(f))
    }

    pub fn object(f: impl Fn(&Object) -> Value + Send + Sync + 'static) -> Self {
        Implementation::Object(Arc::new(f))
    }

    pub fn generic(
        f: impl Fn(&Object, &[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Implementation::Generic(Arc::new(f))
    }

    /// Call with boxed arguments. Arity has already been checked against the
    /// method signature.
    pub fn call(&self, receiver: &Object, args: &[Value]) -> Result<Value> {
        match self {
            Implementation::Void(f) => {
                f(receiver);
                Ok(Value::Nil)
            }
            Implementation::VoidObject(f) => {
                f(receiver, args.first().unwrap_or(&Value::Nil));
                Ok(Value::Nil)
            }
            Implementation::Integer(f) => Ok(Value::Int(f(receiver))),
            Implementation::Object(f) => Ok(f(receiver)),
            Implementation::Generic(f) => f(receiver, args),
        }
    }

    pub fn call_void(&self, receiver: &Object) -> Result<()> {
        match self {
            Implementation::Void(f) => {
                f(receiver);
                Ok(())
            }
            other => other.call(receiver, &[]).map(|_| ()),
        }
    }

    pub fn call_with_object(&self, receiver: &Object, arg: &Value) -> Result<()> {
        match self {
            Implementation::VoidObject(f) => {
                f(receiver, arg);
                Ok(())
            }
            other => other.call(receiver, std::slice::from_ref(arg)).map(|_| ()),
        }
    }

    pub fn call_integer(&self, receiver: &Object) -> Result<i64> {
        match self {
            Implementation::Integer(f) => Ok(f(receiver)),
            other => Ok(other.call(receiver, &[])?.as_int().unwrap_or_default()),
        }
    }

    pub fn call_for_object(&self, receiver: &Object) -> Result<Value> {
        match self {
            Implementation::Object(f) => Ok(f(receiver)),
            other => other.call(receiver, &[]),
        }
    }

    /// Whether two handles point at the same body.
    pub fn ptr_eq(&self, other: &Implementation) -> bool {
        match (self, other) {
            (Implementation::Void(a), Implementation::Void(b)) => Arc::ptr_eq(a, b),
            (Implementation::VoidObject(a), Implementation::VoidObject(b)) => Arc::ptr_eq(a, b),
            (Implementation::Integer(a), Implementation::Integer(b)) => Arc::ptr_eq(a, b),
            (Implementation::Object(a), Implementation::Object(b)) => Arc::ptr_eq(a, b),
            (Implementation::Generic(a), Implementation::Generic(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Implementation::Void(_) => "void",
            Implementation::VoidObject(_) => "void_object",
            Implementation::Integer(_) => "integer",
            Implementation::Object(_) => "object",
            Implementation::Generic(_) => "generic",
        }
    }
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Implementation({})", self.shape())
    }
}

/// A method table entry.
#[derive(Clone, Debug)]
pub struct Method {
    selector: Selector,
    signature: Signature,
    implementation: Implementation,
}

impl Method {
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn implementation(&self) -> &Implementation {
        &self.implementation
    }
}

/// Declared property attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    /// Stored without extending the value's lifetime.
    pub weak: bool,
}

/// An immutable class description.
pub struct Class {
    id: ClassId,
    name: String,
    superclass: Option<Arc<Class>>,
    methods: HashMap<Selector, Method>,
    properties: HashMap<String, Property>,
    synthetic: bool,
}

impl Class {
    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn superclass(&self) -> Option<&Arc<Class>> {
        self.superclass.as_ref()
    }

    /// Whether this class was generated to host interception hooks.
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// Method declared directly on this class (ancestors not consulted).
    pub fn own_method(&self, selector: &Selector) -> Option<&Method> {
        self.methods.get(selector)
    }

    /// Method declared on this class or the nearest ancestor.
    pub fn method(&self, selector: &Selector) -> Option<&Method> {
        self.ancestry().find_map(|class| class.methods.get(selector))
    }

    /// Property declared on this class or an ancestor.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.ancestry().find_map(|class| class.properties.get(name))
    }

    pub fn own_method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn own_property_count(&self) -> usize {
        self.properties.len()
    }

    /// This class followed by each superclass up to the root.
    pub fn ancestry(&self) -> impl Iterator<Item = &Class> {
        std::iter::successors(Some(self), |class| class.superclass.as_deref())
    }

    /// Whether `self` is `other` or descends from it.
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        self.ancestry().any(|class| class.id == other.id)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("superclass", &self.superclass.as_ref().map(|s| s.name()))
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// Builds a class for registration with a [`Runtime`].
pub struct ClassBuilder {
    name: String,
    superclass: Option<Arc<Class>>,
    methods: Vec<(Selector, std::result::Result<Signature, InterceptError>, Implementation)>,
    properties: Vec<Property>,
    synthetic: bool,
}

impl ClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superclass: None,
            methods: Vec::new(),
            properties: Vec::new(),
            synthetic: false,
        }
    }

    pub fn superclass(mut self, superclass: &Arc<Class>) -> Self {
        self.superclass = Some(Arc::clone(superclass));
        self
    }

    /// Add a method with an explicit type encoding and a boxed-argument body.
    pub fn method(
        mut self,
        selector: impl Into<Selector>,
        encoding: &str,
        f: impl Fn(&Object, &[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.methods.push((
            selector.into(),
            Signature::parse(encoding),
            Implementation::generic(f),
        ));
        self
    }

    /// Add a method with an explicit encoding and a prebuilt implementation.
    pub fn implementation(
        mut self,
        selector: impl Into<Selector>,
        encoding: &str,
        implementation: Implementation,
    ) -> Self {
        self.methods
            .push((selector.into(), Signature::parse(encoding), implementation));
        self
    }

    pub fn void_method(
        mut self,
        selector: impl Into<Selector>,
        f: impl Fn(&Object) + Send + Sync + 'static,
    ) -> Self {
        self.methods.push((
            selector.into(),
            Ok(Signature::void()),
            Implementation::void(f),
        ));
        self
    }

    pub fn void_object_method(
        mut self,
        selector: impl Into<Selector>,
        f: impl Fn(&Object, &Value) + Send + Sync + 'static,
    ) -> Self {
        self.methods.push((
            selector.into(),
            Ok(Signature::new(TypeLayout::Void, vec![TypeLayout::Object])),
            Implementation::void_object(f),
        ));
        self
    }

    pub fn integer_method(
        mut self,
        selector: impl Into<Selector>,
        f: impl Fn(&Object) -> i64 + Send + Sync + 'static,
    ) -> Self {
        self.methods.push((
            selector.into(),
            Ok(Signature::new(TypeLayout::LongLong, Vec::new())),
            Implementation::integer(f),
        ));
        self
    }

    pub fn object_method(
        mut self,
        selector: impl Into<Selector>,
        f: impl Fn(&Object) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.methods.push((
            selector.into(),
            Ok(Signature::new(TypeLayout::Object, Vec::new())),
            Implementation::object(f),
        ));
        self
    }

    /// Declare a property with a synthesized getter and setter.
    pub fn property(self, name: impl Into<String>) -> Self {
        self.declare_property(name.into(), false)
    }

    /// Declare a property whose setter stores a weak reference.
    pub fn weak_property(self, name: impl Into<String>) -> Self {
        self.declare_property(name.into(), true)
    }

    fn declare_property(mut self, name: String, weak: bool) -> Self {
        let key = name.clone();
        self = self.object_method(Selector::getter_for(&name), move |obj| {
            obj.value_for_key(&key)
        });

        let key = name.clone();
        self = self.void_object_method(Selector::setter_for(&name), move |obj, value| {
            let stored = match (weak, value) {
                (true, Value::Object(target)) => Value::Weak(target.downgrade()),
                _ => value.clone(),
            };
            obj.set_value_for_key(&key, stored);
        });

        self.properties.push(Property { name, weak });
        self
    }

    pub(crate) fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    pub fn register(self, runtime: &Runtime) -> Result<Arc<Class>> {
        runtime.register(self)
    }
}

/// Process class table.
///
/// Class names are unique; a registered class is never removed.
pub struct Runtime {
    classes: RwLock<HashMap<String, Arc<Class>>>,
    next_id: AtomicU64,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            classes: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The shared process-wide runtime.
    pub fn global() -> &'static Arc<Runtime> {
        static GLOBAL: OnceLock<Arc<Runtime>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Runtime::new()))
    }

    /// Register a class. Fails if the name is taken or a method encoding is
    /// malformed; nothing is registered in that case.
    pub fn register(&self, builder: ClassBuilder) -> Result<Arc<Class>> {
        let mut methods = HashMap::with_capacity(builder.methods.len());
        for (selector, signature, implementation) in builder.methods {
            let signature = signature?;
            methods.insert(
                selector.clone(),
                Method {
                    selector,
                    signature,
                    implementation,
                },
            );
        }
        let properties = builder
            .properties
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();

        let mut classes = self.classes.write();
        if classes.contains_key(&builder.name) {
            return Err(InterceptError::ClassExists(builder.name));
        }

        let class = Arc::new(Class {
            id: ClassId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            name: builder.name.clone(),
            superclass: builder.superclass,
            methods,
            properties,
            synthetic: builder.synthetic,
        });
        classes.insert(builder.name, Arc::clone(&class));
        Ok(class)
    }

    pub fn class_named(&self, name: &str) -> Option<Arc<Class>> {
        self.classes.read().get(name).cloned()
    }

    pub fn class_count(&self) -> usize {
        self.classes.read().len()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
