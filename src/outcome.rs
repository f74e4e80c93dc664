//! The result algebra every module, step, stage member, and join produces.
//!
//! `Outcome<T>` is the single currency the execution engine deals in: every
//! node in a plan resolves to exactly one `Outcome`, and the engine never
//! converts a non-fatal failure into a `Result::Err` — see the crate-level
//! docs for the structural-vs-runtime error split.

use std::fmt;

/// Canonical code assigned to every successful [`Outcome::Ok`].
pub const OK_CODE: &str = "OK";

/// The tagged union produced by modules, steps, stage fan-out members, and
/// joins.
///
/// # Invariants
/// - [`Outcome::Ok`] and [`Outcome::Fallback`] always carry a value.
/// - [`Outcome::Error`], [`Outcome::Timeout`], [`Outcome::Skipped`], and
///   [`Outcome::Canceled`] always carry a non-empty code.
/// - [`Outcome::Unspecified`] is the zero value; its payload is inaccessible.
///
/// Equality is structural over `(kind, code, value)` — two outcomes of
/// different variants are never equal even if one coerces to the other's
/// shape.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// Zero value. No node should terminate execution carrying this; it
    /// exists so `ctx.nodeOutcomes[i]` has something to initialize to.
    Unspecified,
    /// Successful completion. Always carries [`OK_CODE`].
    Ok(T),
    /// Non-fatal failure with an application- or engine-assigned code.
    Error(String),
    /// The node did not complete before its deadline.
    Timeout(String),
    /// The node was eligible but intentionally not executed.
    Skipped(String),
    /// The node ran and produced a usable, but degraded, result.
    Fallback(T, String),
    /// The node did not run (or did not finish) because of cancellation.
    Canceled(String),
}

impl<T> Default for Outcome<T> {
    fn default() -> Self {
        Outcome::Unspecified
    }
}

impl<T> Outcome<T> {
    /// Build a successful outcome. Panics if this were ever allowed to
    /// carry a "null" payload — in Rust there is no null `T`, so this
    /// constructor exists purely for API symmetry with the other
    /// constructors below, all of which do enforce non-empty codes.
    pub fn ok(value: T) -> Self {
        Outcome::Ok(value)
    }

    /// Build an [`Outcome::Error`]. `code` must be non-empty.
    ///
    /// # Panics
    /// Panics if `code` is empty — constructing an outcome with an empty
    /// code is a programmer error, not a representable runtime state.
    pub fn error(code: impl Into<String>) -> Self {
        Self::coded(code, Outcome::Error)
    }

    /// Build an [`Outcome::Timeout`]. `code` must be non-empty.
    pub fn timeout(code: impl Into<String>) -> Self {
        Self::coded(code, Outcome::Timeout)
    }

    /// Build an [`Outcome::Skipped`]. `code` must be non-empty.
    pub fn skipped(code: impl Into<String>) -> Self {
        Self::coded(code, Outcome::Skipped)
    }

    /// Build an [`Outcome::Canceled`]. `code` must be non-empty.
    pub fn canceled(code: impl Into<String>) -> Self {
        Self::coded(code, Outcome::Canceled)
    }

    /// Build an [`Outcome::Fallback`]. `code` must be non-empty.
    pub fn fallback(value: T, code: impl Into<String>) -> Self {
        let code = code.into();
        assert!(!code.is_empty(), "Outcome::Fallback requires a non-empty code");
        Outcome::Fallback(value, code)
    }

    fn coded(code: impl Into<String>, build: impl FnOnce(String) -> Self) -> Self {
        let code = code.into();
        assert!(!code.is_empty(), "outcome code must be non-empty");
        build(code)
    }

    /// The outcome's code, if it carries one. `Ok` always reports
    /// [`OK_CODE`]; `Unspecified` reports `None`.
    pub fn code(&self) -> Option<&str> {
        match self {
            Outcome::Unspecified => None,
            Outcome::Ok(_) => Some(OK_CODE),
            Outcome::Error(c) | Outcome::Timeout(c) | Outcome::Skipped(c) | Outcome::Canceled(c) => {
                Some(c.as_str())
            }
            Outcome::Fallback(_, c) => Some(c.as_str()),
        }
    }

    /// A short, stable discriminant name for metrics/telemetry tagging.
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Unspecified => OutcomeKind::Unspecified,
            Outcome::Ok(_) => OutcomeKind::Ok,
            Outcome::Error(_) => OutcomeKind::Error,
            Outcome::Timeout(_) => OutcomeKind::Timeout,
            Outcome::Skipped(_) => OutcomeKind::Skipped,
            Outcome::Fallback(_, _) => OutcomeKind::Fallback,
            Outcome::Canceled(_) => OutcomeKind::Canceled,
        }
    }

    /// Whether this outcome carries a usable value (`Ok` or `Fallback`).
    pub fn has_value(&self) -> bool {
        matches!(self, Outcome::Ok(_) | Outcome::Fallback(_, _))
    }

    /// Access the carried value, or `None` for non-value variants.
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Ok(v) | Outcome::Fallback(v, _) => Some(v),
            _ => None,
        }
    }

    /// Access the carried value, panicking if this outcome doesn't carry
    /// one. Used internally by the engine once it has already branched on
    /// [`Outcome::has_value`]; reaching the panic means the engine's own
    /// invariants broke, which is a programmer error per the crate's error
    /// model, not a runtime outcome.
    pub fn expect_value(&self, context: &str) -> &T {
        self.value()
            .unwrap_or_else(|| panic!("Outcome::expect_value: {context} carries no value (kind={:?})", self.kind()))
    }
}

impl<T: PartialEq> PartialEq for Outcome<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Outcome::Unspecified, Outcome::Unspecified) => true,
            (Outcome::Ok(a), Outcome::Ok(b)) => a == b,
            (Outcome::Error(a), Outcome::Error(b)) => a == b,
            (Outcome::Timeout(a), Outcome::Timeout(b)) => a == b,
            (Outcome::Skipped(a), Outcome::Skipped(b)) => a == b,
            (Outcome::Fallback(a, ca), Outcome::Fallback(b, cb)) => a == b && ca == cb,
            (Outcome::Canceled(a), Outcome::Canceled(b)) => a == b,
            _ => false,
        }
    }
}

impl<T: Eq> Eq for Outcome<T> {}

/// Stable discriminant for an [`Outcome`], independent of its payload.
///
/// Used as the `outcome_kind` metrics tag and in `ExecExplain` records,
/// where the payload itself is neither serializable in general nor wanted
/// in a telemetry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Unspecified,
    Ok,
    Error,
    Timeout,
    Skipped,
    Fallback,
    Canceled,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeKind::Unspecified => "unspecified",
            OutcomeKind::Ok => "ok",
            OutcomeKind::Error => "error",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::Skipped => "skipped",
            OutcomeKind::Fallback => "fallback",
            OutcomeKind::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_reports_canonical_code() {
        let o = Outcome::ok(42);
        assert_eq!(o.code(), Some(OK_CODE));
        assert_eq!(o.value(), Some(&42));
    }

    #[test]
    fn unspecified_has_no_code_or_value() {
        let o: Outcome<i32> = Outcome::default();
        assert_eq!(o.code(), None);
        assert_eq!(o.value(), None);
        assert_eq!(o.kind(), OutcomeKind::Unspecified);
    }

    #[test]
    #[should_panic(expected = "non-empty")]
    fn error_rejects_empty_code() {
        let _ = Outcome::<()>::error("");
    }

    #[test]
    fn equality_is_structural_and_kind_sensitive() {
        let a: Outcome<i32> = Outcome::skipped("GATE_FALSE");
        let b: Outcome<i32> = Outcome::skipped("GATE_FALSE");
        let c: Outcome<i32> = Outcome::skipped("FANOUT_TRIM");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(Outcome::Unspecified, Outcome::error("X"));
    }

    #[test]
    fn fallback_carries_value_and_code() {
        let o = Outcome::fallback("cached", "STALE_OK");
        assert!(o.has_value());
        assert_eq!(o.value(), Some(&"cached"));
        assert_eq!(o.code(), Some("STALE_OK"));
    }
}
