//! Thread-safe wrapper around the keyspace dispatch state.
//!
//! Command groups execute on the reactor thread or on a connection worker depending on
//! dispatch; both paths funnel through one `Keyspace` so they observe the same store.

use std::sync::Mutex;

use rift_core::dispatch::DispatchState;

/// Process-wide keyspace.
#[derive(Debug, Default)]
pub struct Keyspace {
    state: Mutex<DispatchState>,
}

impl Keyspace {
    /// Builds an empty keyspace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `operation` with exclusive access to the dispatch state.
    ///
    /// Lock poisoning is treated as unrecoverable corruption of the store: a handler panic
    /// while holding the lock aborts the process rather than serving damaged data.
    pub fn with_state<R>(&self, operation: impl FnOnce(&mut DispatchState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(_poisoned) => std::process::abort(),
        };
        operation(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::Keyspace;
    use googletest::prelude::*;
    use rstest::rstest;
    use std::sync::Arc;
    use std::thread;

    #[rstest]
    fn state_is_shared_across_threads() {
        let keyspace = Arc::new(Keyspace::new());

        let writers: Vec<_> = (0..4_u32)
            .map(|writer| {
                let keyspace = Arc::clone(&keyspace);
                thread::spawn(move || {
                    for item in 0..25_u32 {
                        let key = format!("w{writer}:{item}").into_bytes();
                        keyspace.with_state(|state| state.set(key.clone(), b"x".to_vec()));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("writer thread must not panic");
        }

        assert_that!(keyspace.with_state(|state| state.key_count()), eq(100_usize));
    }
}
