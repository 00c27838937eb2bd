//! Resource-naming strategies for ephemeral namespaces.
//!
//! Per-run resource names are injected by the caller rather than hardcoded as
//! random suffixes, which keeps the harness deterministic where tests need it:
//! [`RandomSuffix`] for isolation between concurrent runs, [`SequentialNames`]
//! for reproducible names.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Produces unique resource names from a caller-supplied prefix.
pub trait NamingStrategy: Send + Sync {
    /// Produce the next name for the given prefix.
    fn next_name(&self, prefix: &str) -> String;
}

/// Appends a random 32-hex-digit suffix (e.g. `db-4be0643f1d98573b97cdca98a65347dd`).
#[derive(Debug, Default)]
pub struct RandomSuffix;

impl NamingStrategy for RandomSuffix {
    fn next_name(&self, prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::new_v4().simple())
    }
}

/// Appends a monotonically increasing counter (e.g. `db-0`, `db-1`).
#[derive(Debug, Default)]
pub struct SequentialNames {
    counter: AtomicU64,
}

impl NamingStrategy for SequentialNames {
    fn next_name(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_suffix_names_keep_the_prefix_and_differ() {
        let strategy = RandomSuffix;
        let a = strategy.next_name("db");
        let b = strategy.next_name("db");
        assert!(a.starts_with("db-"));
        assert!(b.starts_with("db-"));
        assert_ne!(a, b);
    }

    #[test]
    fn sequential_names_are_deterministic() {
        let strategy = SequentialNames::default();
        assert_eq!(strategy.next_name("db"), "db-0");
        assert_eq!(strategy.next_name("db"), "db-1");
        assert_eq!(strategy.next_name("container"), "container-2");
    }
}
