//! Lifecycle registry module
//!
//! Bindings supplied by the metadata resolver, the per-module and per-class
//! execution state built from them, and the registry that owns that state.

pub mod binding;
mod catalog;
mod registry;
mod state;

pub use binding::{
    downcast_instance, AsAny, AsyncMethod, BindingResolver, ClassBinding, ClassBuilder,
    Constructor, ContextSetter, ContextSlot, Disposable, InstanceHook, Method, MethodResult,
    ModuleBinding, ParamType, ScopeHook, TestInstance, TestMethod,
};
pub use catalog::BindingCatalog;
pub use registry::LifecycleRegistry;
pub use state::{
    CachedFailure, ClassChains, ClassLevel, ClassLifecycleState, LifecycleStatus,
    ModuleLifecycleState,
};
