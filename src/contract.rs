//! Contract checking.
//!
//! The crate distinguishes two classes of fatal condition: a violated
//! precondition means the caller used an interface outside its contract,
//! while a violated invariant means the implementation itself got its
//! bookkeeping wrong. Both abort the current task via a panic carrying a
//! labeled kind so that tests can observe which class fired. Neither is
//! ever reported as a recoverable error.

/// Aborts with a labeled panic if a caller-side contract is violated.
#[macro_export]
macro_rules! precondition {
    ($cond:expr, $msg:expr) => {
        if !$cond {
            panic!("precondition violated: {}", $msg);
        }
    };
}

/// Aborts with a labeled panic if an internal invariant is violated.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $msg:expr) => {
        if !$cond {
            panic!("invariant violated: {}", $msg);
        }
    };
}

#[cfg(test)]
mod test {
    #[test]
    #[should_panic(expected = "precondition violated")]
    fn precondition_labels_caller_bugs() {
        precondition!(1 == 2, "numbers stopped working");
    }

    #[test]
    #[should_panic(expected = "invariant violated")]
    fn invariant_labels_implementation_bugs() {
        invariant!(false, "table entry vanished");
    }
}
