//! Change tracking for sensor readings
//!
//! A [`TrackedValue`] remembers whether its value changed since it was last
//! published. Assigning a value equal to the current one is a no-op, so a
//! broker redelivering an unchanged retained reading never triggers a
//! republish.

use std::fmt;

/// Equality used to decide whether an assignment is a change
pub type Equality<T> = fn(&Option<T>, &Option<T>) -> bool;

/// Optional value paired with a "needs processed" flag
#[derive(Clone)]
pub struct TrackedValue<T> {
    value: Option<T>,
    needs_processed: bool,
    is_equal: Equality<T>,
}

impl<T: PartialEq> TrackedValue<T> {
    /// Track a value using its `PartialEq` implementation
    ///
    /// For floating point readings this means NaN never equals anything, so
    /// assigning NaN always marks the value dirty. Callers consuming the value
    /// are expected to treat NaN as unusable.
    pub fn new(value: Option<T>, needs_processed: bool) -> Self {
        Self::with_equality(value, needs_processed, |lhs, rhs| lhs == rhs)
    }
}

impl<T> TrackedValue<T> {
    /// Track a value with a caller-supplied equality function
    pub fn with_equality(value: Option<T>, needs_processed: bool, is_equal: Equality<T>) -> Self {
        Self {
            value,
            needs_processed,
            is_equal,
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Assign a new value, marking it dirty only when it differs
    ///
    /// Returns whether the assignment changed the stored value.
    pub fn set(&mut self, new_value: Option<T>) -> bool {
        if (self.is_equal)(&new_value, &self.value) {
            return false;
        }
        self.value = new_value;
        self.needs_processed = true;
        true
    }

    pub fn needs_processed(&self) -> bool {
        self.needs_processed
    }

    /// Clear the dirty flag after a successful publish
    pub fn mark_processed(&mut self) {
        self.needs_processed = false;
    }
}

impl<T: Copy> TrackedValue<T> {
    pub fn value(&self) -> Option<T> {
        self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for TrackedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedValue")
            .field("value", &self.value)
            .field("needs_processed", &self.needs_processed)
            .finish()
    }
}

impl<T: PartialEq> PartialEq for TrackedValue<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.needs_processed == other.needs_processed
    }
}

impl<T: PartialEq> Default for TrackedValue<T> {
    fn default() -> Self {
        Self::new(None, false)
    }
}
