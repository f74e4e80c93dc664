//! Reflection-free type identity and the heterogeneous value boxing used to
//! carry per-node outputs through a [`crate::plan::PlanTemplate`].
//!
//! A plan is a flat sequence of nodes whose payload types can all differ
//! (`Req → A → B → Resp`). Rust has no runtime reflection, so the engine
//! cannot do what a dynamically-typed host would do and simply stash
//! whatever a module returns. Instead every node output is boxed as
//! `Arc<dyn Any + Send + Sync>` ("covariant outcome records", see the
//! design notes) alongside a [`TypeTag`] captured at registration/build
//! time, and accessed through a typed accessor that downcasts and fails
//! with a structural error on mismatch rather than a silent `None`.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// A reflection-free type identity, captured once via [`TypeTag::of`] at
/// blueprint-build or catalog-registration time and compared structurally
/// thereafter (never via `Any::downcast` alone, since a plan-compile-time
/// signature check must produce a readable error naming both types).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    /// Capture the type identity of `T`.
    pub fn of<T: 'static>() -> Self {
        TypeTag {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The human-readable type name, used in compile-error messages.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A type-erased, reference-counted node output.
pub type AnyBox = Arc<dyn Any + Send + Sync>;

/// Box a typed value for storage in a node-outcome slot.
pub fn box_value<T: Send + Sync + 'static>(value: T) -> AnyBox {
    Arc::new(value)
}

/// Downcast a boxed node output back to `T`.
///
/// Returns `None` on mismatch; callers that have already validated the
/// [`TypeTag`] at plan-compile time should treat a `None` here as an
/// engine bug (the slot table and the plan disagreed), not a runtime
/// outcome — see [`crate::error`].
pub fn downcast_value<T: Send + Sync + 'static>(value: &AnyBox) -> Option<&T> {
    value.downcast_ref::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tags_compare_by_identity_not_name_collision() {
        assert_eq!(TypeTag::of::<u32>(), TypeTag::of::<u32>());
        assert_ne!(TypeTag::of::<u32>(), TypeTag::of::<i32>());
    }

    #[test]
    fn boxed_values_round_trip() {
        let boxed = box_value(42u32);
        assert_eq!(downcast_value::<u32>(&boxed), Some(&42));
        assert_eq!(downcast_value::<String>(&boxed), None);
    }
}
