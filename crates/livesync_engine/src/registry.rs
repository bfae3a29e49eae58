//! Named hook, transform and compute functions.
//!
//! Configurations refer to user code by name. The registry maps those names
//! to typed callables; it is populated at startup and consulted both when a
//! configuration is saved (unknown names are rejected) and at sync time.

use crate::config::{Direction, SyncConfiguration};
use crate::context::SyncContext;
use crate::error::{HookError, HookKind, SyncError, SyncResult};
use livesync_store::{Record, Value};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Arguments passed to lifecycle hooks.
#[derive(Debug, Clone, Copy)]
pub struct HookInput<'a> {
    /// Record being synced from.
    pub source: &'a Record,
    /// Target record, once persisted (`after_sync` only).
    pub target: Option<&'a Record>,
    /// Sync direction.
    pub direction: Direction,
    /// Active configuration.
    pub configuration: &'a SyncConfiguration,
}

/// `before_sync` / `after_sync` hook.
pub type SyncHook =
    Arc<dyn Fn(&HookInput<'_>, &mut SyncContext) -> Result<(), HookError> + Send + Sync>;

/// `sync_name` hook, returning the target identity to use.
pub type NameHook = Arc<
    dyn Fn(&HookInput<'_>, &mut SyncContext) -> Result<Option<String>, HookError> + Send + Sync,
>;

/// Value transform, given the source value and the source record.
pub type TransformFn = Arc<dyn Fn(&Value, &Record) -> Result<Value, HookError> + Send + Sync>;

/// Computed field, evaluated against the source record.
pub type ComputeFn = Arc<dyn Fn(&Record) -> Result<Value, HookError> + Send + Sync>;

/// Registry of named user functions.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<String, SyncHook>>,
    name_hooks: RwLock<HashMap<String, NameHook>>,
    transforms: RwLock<HashMap<String, TransformFn>>,
    computes: RwLock<HashMap<String, ComputeFn>>,
}

impl HookRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a `before_sync` / `after_sync` hook.
    pub fn register_hook<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(&HookInput<'_>, &mut SyncContext) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.hooks.write().insert(name.into(), Arc::new(hook));
    }

    /// Registers a `sync_name` hook.
    pub fn register_name_hook<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(&HookInput<'_>, &mut SyncContext) -> Result<Option<String>, HookError>
            + Send
            + Sync
            + 'static,
    {
        self.name_hooks.write().insert(name.into(), Arc::new(hook));
    }

    /// Registers a value transform.
    pub fn register_transform<F>(&self, name: impl Into<String>, transform: F)
    where
        F: Fn(&Value, &Record) -> Result<Value, HookError> + Send + Sync + 'static,
    {
        self.transforms
            .write()
            .insert(name.into(), Arc::new(transform));
    }

    /// Registers a compute function.
    pub fn register_compute<F>(&self, name: impl Into<String>, compute: F)
    where
        F: Fn(&Record) -> Result<Value, HookError> + Send + Sync + 'static,
    {
        self.computes.write().insert(name.into(), Arc::new(compute));
    }

    /// Returns true if `name` is registered for `kind`.
    pub fn contains(&self, kind: HookKind, name: &str) -> bool {
        match kind {
            HookKind::Hook => self.hooks.read().contains_key(name),
            HookKind::NameHook => self.name_hooks.read().contains_key(name),
            HookKind::Transform => self.transforms.read().contains_key(name),
            HookKind::Compute => self.computes.read().contains_key(name),
        }
    }

    /// Looks up a lifecycle hook.
    pub fn hook(&self, name: &str) -> SyncResult<SyncHook> {
        lookup(&self.hooks, HookKind::Hook, name)
    }

    /// Looks up a name hook.
    pub fn name_hook(&self, name: &str) -> SyncResult<NameHook> {
        lookup(&self.name_hooks, HookKind::NameHook, name)
    }

    /// Looks up a transform.
    pub fn transform(&self, name: &str) -> SyncResult<TransformFn> {
        lookup(&self.transforms, HookKind::Transform, name)
    }

    /// Looks up a compute function.
    pub fn compute(&self, name: &str) -> SyncResult<ComputeFn> {
        lookup(&self.computes, HookKind::Compute, name)
    }

    /// Runs a lifecycle hook by name.
    pub fn run_hook(
        &self,
        name: &str,
        input: &HookInput<'_>,
        ctx: &mut SyncContext,
    ) -> SyncResult<()> {
        let hook = self.hook(name)?;
        contain(|| hook(input, ctx)).map_err(|e| hook_failed(name, e))
    }

    /// Runs a name hook by name.
    pub fn run_name_hook(
        &self,
        name: &str,
        input: &HookInput<'_>,
        ctx: &mut SyncContext,
    ) -> SyncResult<Option<String>> {
        let hook = self.name_hook(name)?;
        contain(|| hook(input, ctx)).map_err(|e| hook_failed(name, e))
    }

    /// Applies a transform by name.
    pub fn apply_transform(
        &self,
        name: &str,
        field: &str,
        value: &Value,
        source: &Record,
    ) -> SyncResult<Value> {
        let transform = self.transform(name)?;
        contain(|| transform(value, source)).map_err(|e| SyncError::Transform {
            name: name.to_string(),
            field: field.to_string(),
            message: e.message,
        })
    }

    /// Evaluates a compute function by name.
    pub fn evaluate(&self, name: &str, source: &Record) -> SyncResult<Value> {
        let compute = self.compute(name)?;
        contain(|| compute(source)).map_err(|e| hook_failed(name, e))
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.hooks.read().len())
            .field("name_hooks", &self.name_hooks.read().len())
            .field("transforms", &self.transforms.read().len())
            .field("computes", &self.computes.read().len())
            .finish()
    }
}

fn lookup<T: Clone>(
    map: &RwLock<HashMap<String, T>>,
    kind: HookKind,
    name: &str,
) -> SyncResult<T> {
    map.read()
        .get(name)
        .cloned()
        .ok_or_else(|| SyncError::UnknownHook {
            kind,
            name: name.to_string(),
        })
}

fn hook_failed(name: &str, err: HookError) -> SyncError {
    SyncError::Hook {
        name: name.to_string(),
        message: err.message,
    }
}

/// Runs user code, turning a panic into a [`HookError`].
pub(crate) fn contain<T>(f: impl FnOnce() -> Result<T, HookError>) -> Result<T, HookError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(panic_error(payload.as_ref())))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn panic_error(payload: &(dyn Any + Send)) -> HookError {
    HookError::new(format!("panicked: {}", panic_message(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SyncEvent;

    fn input<'a>(record: &'a Record, config: &'a SyncConfiguration) -> HookInput<'a> {
        HookInput {
            source: record,
            target: None,
            direction: Direction::Forward,
            configuration: config,
        }
    }

    #[test]
    fn unknown_names_are_typed_errors() {
        let registry = HookRegistry::new();
        let err = registry.transform("upper").err().unwrap();
        assert!(matches!(
            err,
            SyncError::UnknownHook {
                kind: HookKind::Transform,
                ..
            }
        ));
        assert!(!registry.contains(HookKind::Hook, "x"));
    }

    #[test]
    fn transforms_apply() {
        let registry = HookRegistry::new();
        registry.register_transform("upper", |v: &Value, _: &Record| {
            Ok(Value::from(v.to_string().to_uppercase()))
        });
        let record = Record::new("A");
        let out = registry
            .apply_transform("upper", "name", &Value::from("ada"), &record)
            .unwrap();
        assert_eq!(out, Value::from("ADA"));
    }

    #[test]
    fn hook_panics_are_contained() {
        let registry = HookRegistry::new();
        registry.register_hook("explode", |_: &HookInput<'_>, _: &mut SyncContext| {
            panic!("boom")
        });
        let record = Record::new("A");
        let config = SyncConfiguration::new("c", "A", "B");
        let mut ctx = SyncContext::new("c", Direction::Forward, SyncEvent::Manual);

        let err = registry
            .run_hook("explode", &input(&record, &config), &mut ctx)
            .unwrap_err();
        assert!(err.to_string().contains("panicked: boom"));
    }

    #[test]
    fn name_hooks_share_context() {
        let registry = HookRegistry::new();
        registry.register_name_hook("by_email", |input: &HookInput<'_>, ctx: &mut SyncContext| {
            ctx.insert("seen", true);
            Ok(input.source.get("email").as_text().map(str::to_string))
        });
        let record = Record::new("A").with_field("email", "a@example.com");
        let config = SyncConfiguration::new("c", "A", "B");
        let mut ctx = SyncContext::new("c", Direction::Forward, SyncEvent::Manual);

        let name = registry
            .run_name_hook("by_email", &input(&record, &config), &mut ctx)
            .unwrap();
        assert_eq!(name.as_deref(), Some("a@example.com"));
        assert_eq!(ctx.get::<bool>("seen"), Some(true));
    }
}
