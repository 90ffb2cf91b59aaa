//! Lifecycle bindings
//!
//! Plain records produced by the metadata resolver: which closures play the
//! constructor, initialize, cleanup and test roles for a class or module.
//! The engine treats them as opaque data and never re-inspects them.
//!
//! Fixtures are ordinary Rust types implementing [`TestInstance`]. A derived
//! fixture embeds its base fixture and exposes it through
//! [`TestInstance::as_base`], which is how base-class hooks reach their own
//! state on a derived instance.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::BindingError;
use crate::models::{CaseContext, TestFault};

/// What every user method returns
pub type MethodResult = Result<(), TestFault>;

/// Object-safe access to `Any` for fixtures
pub trait AsAny {
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Setter for a fixture's context slot
pub type ContextSetter<'a> = Box<dyn FnOnce(CaseContext) -> MethodResult + Send + 'a>;

/// How a fixture exposes a slot for the per-case context
pub enum ContextSlot<'a> {
    /// No slot
    Absent,
    /// A slot without a setter
    ReadOnly,
    Writable(ContextSetter<'a>),
}

/// Disposal contract, run after every cleanup method
pub trait Disposable {
    fn dispose(&mut self) -> MethodResult;
}

/// A test class instance
pub trait TestInstance: AsAny + Send {
    fn context_slot(&mut self) -> ContextSlot<'_> {
        ContextSlot::Absent
    }

    fn as_disposable(&mut self) -> Option<&mut dyn Disposable> {
        None
    }

    /// Embedded base fixture with the given type id
    fn as_base(&mut self, base: TypeId) -> Option<&mut dyn Any> {
        let _ = base;
        None
    }
}

/// Resolve `T` on an instance, either the instance itself or an embedded base
pub fn downcast_instance<T: Any>(instance: &mut dyn TestInstance) -> Option<&mut T> {
    if instance.as_any_mut().is::<T>() {
        return instance.as_any_mut().downcast_mut::<T>();
    }
    instance
        .as_base(TypeId::of::<T>())
        .and_then(|base| base.downcast_mut::<T>())
}

fn instance_mismatch<T>() -> TestFault {
    TestFault::error(
        "InstanceMismatch",
        format!(
            "instance does not expose fixture type {}",
            std::any::type_name::<T>()
        ),
    )
}

type SyncFn = dyn Fn(&mut dyn TestInstance, &CaseContext, &[Value]) -> MethodResult + Send + Sync;

/// Erased asynchronous method
pub trait AsyncMethod: Send + Sync {
    fn call<'a>(
        &'a self,
        instance: &'a mut dyn TestInstance,
        ctx: &'a CaseContext,
        args: &'a [Value],
    ) -> BoxFuture<'a, MethodResult>;
}

struct TypedAsync<T, F> {
    f: F,
    _fixture: PhantomData<fn() -> T>,
}

impl<T, F> AsyncMethod for TypedAsync<T, F>
where
    T: Any,
    F: for<'a> Fn(&'a mut T, &'a CaseContext, &'a [Value]) -> BoxFuture<'a, MethodResult>
        + Send
        + Sync,
{
    fn call<'a>(
        &'a self,
        instance: &'a mut dyn TestInstance,
        ctx: &'a CaseContext,
        args: &'a [Value],
    ) -> BoxFuture<'a, MethodResult> {
        match downcast_instance::<T>(instance) {
            Some(fixture) => (self.f)(fixture, ctx, args),
            None => Box::pin(futures::future::ready(Err(instance_mismatch::<T>()))),
        }
    }
}

/// An instance method: a test body or an instance initialize/cleanup
#[derive(Clone)]
pub enum Method {
    Sync(Arc<SyncFn>),
    Async(Arc<dyn AsyncMethod>),
}

impl Method {
    pub fn sync<T, F>(f: F) -> Self
    where
        T: Any,
        F: Fn(&mut T, &CaseContext, &[Value]) -> MethodResult + Send + Sync + 'static,
    {
        Method::Sync(Arc::new(
            move |instance: &mut dyn TestInstance, ctx: &CaseContext, args: &[Value]| {
                match downcast_instance::<T>(instance) {
                    Some(fixture) => f(fixture, ctx, args),
                    None => Err(instance_mismatch::<T>()),
                }
            },
        ))
    }

    pub fn asynchronous<T, F>(f: F) -> Self
    where
        T: Any,
        F: for<'a> Fn(&'a mut T, &'a CaseContext, &'a [Value]) -> BoxFuture<'a, MethodResult>
            + Send
            + Sync
            + 'static,
    {
        Method::Async(Arc::new(TypedAsync {
            f,
            _fixture: PhantomData,
        }))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Method::Async(_))
    }

    /// Run on the current task, converting panics into faults
    pub async fn invoke(
        &self,
        instance: &mut dyn TestInstance,
        ctx: &CaseContext,
        args: &[Value],
    ) -> MethodResult {
        match self {
            Method::Sync(f) => catch_unwind(AssertUnwindSafe(|| f(instance, ctx, args)))
                .unwrap_or_else(|panic| Err(TestFault::from_panic(panic))),
            Method::Async(f) => AssertUnwindSafe(f.call(instance, ctx, args))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(TestFault::from_panic(panic))),
        }
    }

    /// Run a synchronous method on the calling thread; `None` for async methods
    pub fn invoke_blocking(
        &self,
        instance: &mut dyn TestInstance,
        ctx: &CaseContext,
        args: &[Value],
    ) -> Option<MethodResult> {
        match self {
            Method::Sync(f) => Some(
                catch_unwind(AssertUnwindSafe(|| f(instance, ctx, args)))
                    .unwrap_or_else(|panic| Err(TestFault::from_panic(panic))),
            ),
            Method::Async(_) => None,
        }
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Sync(_) => f.write_str("Method::Sync"),
            Method::Async(_) => f.write_str("Method::Async"),
        }
    }
}

/// Named instance-level initialize or cleanup
#[derive(Clone, Debug)]
pub struct InstanceHook {
    pub name: String,
    pub method: Method,
}

type ScopeFn = dyn Fn(CaseContext) -> BoxFuture<'static, MethodResult> + Send + Sync;

/// Static module- or class-scoped initialize or cleanup
#[derive(Clone)]
pub struct ScopeHook {
    pub name: String,
    run: Arc<ScopeFn>,
}

impl ScopeHook {
    pub fn sync<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&CaseContext) -> MethodResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move |ctx: CaseContext| {
                let result = f(&ctx);
                Box::pin(futures::future::ready(result)) as BoxFuture<'static, MethodResult>
            }),
        }
    }

    pub fn asynchronous<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(CaseContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move |ctx: CaseContext| {
                Box::pin(f(ctx)) as BoxFuture<'static, MethodResult>
            }),
        }
    }

    /// Run the hook, converting panics into faults
    pub async fn invoke(&self, ctx: &CaseContext) -> MethodResult {
        let future = match catch_unwind(AssertUnwindSafe(|| (self.run)(ctx.clone()))) {
            Ok(future) => future,
            Err(panic) => return Err(TestFault::from_panic(panic)),
        };
        AssertUnwindSafe(future)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(TestFault::from_panic(panic)))
    }
}

impl fmt::Debug for ScopeHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeHook").field("name", &self.name).finish()
    }
}

/// Declared type of a data-driven parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    Bool,
    Integer,
    Float,
    Text,
    /// Accepts any value, including null
    Any,
}

impl ParamType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::Bool => value.is_boolean(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Float => value.is_number(),
            ParamType::Text => value.is_string(),
            ParamType::Any => true,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::Bool => "bool",
            ParamType::Integer => "integer",
            ParamType::Float => "float",
            ParamType::Text => "text",
            ParamType::Any => "any",
        };
        f.write_str(name)
    }
}

/// A test method and its declared parameters
#[derive(Clone, Debug)]
pub struct TestMethod {
    pub name: String,
    pub method: Method,
    pub parameters: Vec<ParamType>,
}

impl TestMethod {
    /// Check a data row against the declared parameters
    pub fn check_arguments(&self, args: &[Value]) -> Result<(), String> {
        if args.len() != self.parameters.len() {
            return Err(format!(
                "Parameter count mismatch: {} expects {} argument(s) but the row supplies {}.",
                self.name,
                self.parameters.len(),
                args.len()
            ));
        }
        for (position, (param, value)) in self.parameters.iter().zip(args).enumerate() {
            if !param.accepts(value) {
                return Err(format!(
                    "Argument {} of {} should be {} but the row supplies {}.",
                    position, self.name, param, value
                ));
            }
        }
        Ok(())
    }
}

pub type Constructor = Arc<dyn Fn() -> Result<Box<dyn TestInstance>, TestFault> + Send + Sync>;

/// Everything the resolver knows about one class (not including ancestry)
#[derive(Clone)]
pub struct ClassBinding {
    pub name: String,
    pub base: Option<String>,
    pub class_initialize: Option<ScopeHook>,
    pub class_cleanup: Option<ScopeHook>,
    pub test_initialize: Option<InstanceHook>,
    pub test_cleanup: Option<InstanceHook>,
    pub constructor: Option<Constructor>,
    pub methods: HashMap<String, TestMethod>,
}

impl ClassBinding {
    pub fn builder<T: TestInstance + Any>(name: impl Into<String>) -> ClassBuilder<T> {
        ClassBuilder {
            binding: ClassBinding {
                name: name.into(),
                base: None,
                class_initialize: None,
                class_cleanup: None,
                test_initialize: None,
                test_cleanup: None,
                constructor: None,
                methods: HashMap::new(),
            },
            _fixture: PhantomData,
        }
    }
}

impl fmt::Debug for ClassBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("ClassBinding")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("methods", &methods)
            .finish()
    }
}

/// Typed builder for [`ClassBinding`]
pub struct ClassBuilder<T> {
    binding: ClassBinding,
    _fixture: PhantomData<fn() -> T>,
}

impl<T: TestInstance + Any> ClassBuilder<T> {
    pub fn inherits(mut self, base: impl Into<String>) -> Self {
        self.binding.base = Some(base.into());
        self
    }

    pub fn constructor<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<T, TestFault> + Send + Sync + 'static,
    {
        self.binding.constructor = Some(Arc::new(move || {
            f().map(|fixture| Box::new(fixture) as Box<dyn TestInstance>)
        }));
        self
    }

    pub fn default_constructor(self) -> Self
    where
        T: Default,
    {
        self.constructor(|| Ok(T::default()))
    }

    pub fn class_initialize(mut self, hook: ScopeHook) -> Self {
        self.binding.class_initialize = Some(hook);
        self
    }

    pub fn class_cleanup(mut self, hook: ScopeHook) -> Self {
        self.binding.class_cleanup = Some(hook);
        self
    }

    pub fn test_initialize<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut T, &CaseContext) -> MethodResult + Send + Sync + 'static,
    {
        self.test_initialize_with(name, Method::sync::<T, _>(move |t, ctx, _| f(t, ctx)))
    }

    pub fn test_initialize_with(mut self, name: impl Into<String>, method: Method) -> Self {
        self.binding.test_initialize = Some(InstanceHook {
            name: name.into(),
            method,
        });
        self
    }

    pub fn test_cleanup<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut T, &CaseContext) -> MethodResult + Send + Sync + 'static,
    {
        self.test_cleanup_with(name, Method::sync::<T, _>(move |t, ctx, _| f(t, ctx)))
    }

    pub fn test_cleanup_with(mut self, name: impl Into<String>, method: Method) -> Self {
        self.binding.test_cleanup = Some(InstanceHook {
            name: name.into(),
            method,
        });
        self
    }

    /// Parameterless synchronous test
    pub fn test<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut T, &CaseContext) -> MethodResult + Send + Sync + 'static,
    {
        self.method(name, Vec::new(), Method::sync::<T, _>(move |t, ctx, _| f(t, ctx)))
    }

    /// Synchronous data-driven test
    pub fn data_test<F>(self, name: impl Into<String>, parameters: Vec<ParamType>, f: F) -> Self
    where
        F: Fn(&mut T, &CaseContext, &[Value]) -> MethodResult + Send + Sync + 'static,
    {
        self.method(name, parameters, Method::sync::<T, _>(f))
    }

    /// Parameterless asynchronous test
    pub fn async_test<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut T, &'a CaseContext) -> BoxFuture<'a, MethodResult>
            + Send
            + Sync
            + 'static,
    {
        self.method(
            name,
            Vec::new(),
            Method::asynchronous::<T, _>(move |t, ctx, _| f(t, ctx)),
        )
    }

    pub fn method(mut self, name: impl Into<String>, parameters: Vec<ParamType>, method: Method) -> Self {
        let name = name.into();
        self.binding.methods.insert(
            name.clone(),
            TestMethod {
                name,
                method,
                parameters,
            },
        );
        self
    }

    pub fn build(self) -> ClassBinding {
        self.binding
    }
}

/// Module-wide initialize/cleanup
#[derive(Clone, Debug, Default)]
pub struct ModuleBinding {
    pub name: String,
    pub initialize: Option<ScopeHook>,
    pub cleanup: Option<ScopeHook>,
}

impl ModuleBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initialize: None,
            cleanup: None,
        }
    }

    pub fn with_initialize(mut self, hook: ScopeHook) -> Self {
        self.initialize = Some(hook);
        self
    }

    pub fn with_cleanup(mut self, hook: ScopeHook) -> Self {
        self.cleanup = Some(hook);
        self
    }
}

/// Sole source of truth for which methods play each lifecycle role
pub trait BindingResolver: Send + Sync {
    fn resolve_module(&self, module: &str) -> Result<Arc<ModuleBinding>, BindingError>;

    fn resolve_class(&self, module: &str, class: &str) -> Result<Arc<ClassBinding>, BindingError>;
}
