//! Stack-Safe Recursion Primitive
//!
//! Deeply nested parse graphs and arbitrarily long fragment chains mean
//! that every recursively defined traversal in this crate must run in
//! constant native stack space. This module provides the two-case
//! computation the rest of the crate builds on: a step is either
//! [`Trampoline::Done`] and carries its result, or [`Trampoline::Pending`]
//! and carries a thunk producing the next step. The [`run`](Trampoline::run)
//! driver unwraps pending steps in a loop, so recursion depth is bounded by
//! loop iterations rather than call frames.
//!
//! # Example
//!
//! ```rust
//! use byteform::trampoline::Trampoline;
//!
//! fn count_down(n: u64) -> Trampoline<u64> {
//!     if n == 0 {
//!         Trampoline::done(0)
//!     } else {
//!         Trampoline::pending(move || count_down(n - 1))
//!     }
//! }
//!
//! assert_eq!(count_down(1_000_000).run(), 0);
//! ```

/// A single step of a stack-safe computation.
///
/// Inspecting the wrong case is a programming error and fails loudly:
/// [`result`](Trampoline::result) panics on a pending step and
/// [`next`](Trampoline::next) panics on a done step. Code that does not
/// know which case it holds must go through [`run`](Trampoline::run).
pub enum Trampoline<T> {
    /// The computation has finished and carries its result.
    Done(T),

    /// More work remains; the thunk produces the next step.
    Pending(Box<dyn FnOnce() -> Trampoline<T>>),
}

impl<T> Trampoline<T> {
    /// Wrap a finished result.
    #[inline]
    pub fn done(value: T) -> Self {
        Trampoline::Done(value)
    }

    /// Defer a computation producing the next step.
    #[inline]
    pub fn pending(next: impl FnOnce() -> Trampoline<T> + 'static) -> Self {
        Trampoline::Pending(Box::new(next))
    }

    /// Whether this step is finished.
    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, Trampoline::Done(_))
    }

    /// Take the result of a finished step.
    ///
    /// # Panics
    /// Panics if the step is still pending. Callers that cannot prove the
    /// step is done must use [`run`](Trampoline::run) instead.
    pub fn result(self) -> T {
        match self {
            Trampoline::Done(value) => value,
            Trampoline::Pending(_) => {
                panic!("Trampoline::result called on a pending step; use run()")
            }
        }
    }

    /// Advance a pending step to its successor.
    ///
    /// # Panics
    /// Panics if the step is already done.
    pub fn next(self) -> Trampoline<T> {
        match self {
            Trampoline::Done(_) => {
                panic!("Trampoline::next called on a completed step")
            }
            Trampoline::Pending(thunk) => thunk(),
        }
    }

    /// Drive the computation to completion iteratively.
    ///
    /// Each pending step is unwrapped on the driver's own loop iteration,
    /// so the native stack never grows with the logical recursion depth.
    pub fn run(self) -> T {
        let mut step = self;
        loop {
            match step {
                Trampoline::Done(value) => return value,
                Trampoline::Pending(thunk) => step = thunk(),
            }
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Trampoline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trampoline::Done(value) => f.debug_tuple("Done").field(value).finish(),
            Trampoline::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_to(n: u64, acc: u64) -> Trampoline<u64> {
        if n == 0 {
            Trampoline::done(acc)
        } else {
            Trampoline::pending(move || sum_to(n - 1, acc + n))
        }
    }

    #[test]
    fn test_done_result() {
        assert_eq!(Trampoline::done(42).result(), 42);
    }

    #[test]
    fn test_run_immediate() {
        assert_eq!(Trampoline::done("x").run(), "x");
    }

    #[test]
    fn test_deep_recursion_does_not_overflow() {
        // Deep enough to blow the native stack if run were recursive.
        let total = sum_to(1_000_000, 0).run();
        assert_eq!(total, 500_000_500_000);
    }

    #[test]
    fn test_next_steps_through() {
        let step = sum_to(2, 0);
        assert!(!step.is_done());
        let step = step.next();
        let step = step.next();
        assert_eq!(step.result(), 3);
    }

    #[test]
    #[should_panic(expected = "pending step")]
    fn test_result_on_pending_panics() {
        let step: Trampoline<u64> = Trampoline::pending(|| Trampoline::done(1));
        let _ = step.result();
    }

    #[test]
    #[should_panic(expected = "completed step")]
    fn test_next_on_done_panics() {
        let step = Trampoline::done(1);
        let _ = step.next();
    }
}
