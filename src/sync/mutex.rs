//! Mutex shim - parking_lot when the feature is on, std otherwise.
//!
//! Both flavours expose the same `const fn new` and a non-poisoning `lock`.

#[cfg(feature = "parking_lot")]
pub use parking_lot::Mutex;

#[cfg(not(feature = "parking_lot"))]
mod std_mutex {
    use std::ops::{Deref, DerefMut};
    use std::sync::{Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};

    /// Thin wrapper around std::sync::Mutex.
    pub struct Mutex<T>(StdMutex<T>);

    impl<T> Mutex<T> {
        pub const fn new(value: T) -> Self {
            Self(StdMutex::new(value))
        }

        /// Lock the mutex, recovering the data if a holder panicked.
        ///
        /// Contract violations panic while the tracker lock may be held;
        /// the tracked data stays consistent across such a panic.
        pub fn lock(&self) -> MutexGuard<'_, T> {
            MutexGuard(self.0.lock().unwrap_or_else(PoisonError::into_inner))
        }
    }

    impl<T: Default> Default for Mutex<T> {
        fn default() -> Self {
            Self::new(T::default())
        }
    }

    /// Guard for std mutex.
    pub struct MutexGuard<'a, T>(StdMutexGuard<'a, T>);

    impl<T> Deref for MutexGuard<'_, T> {
        type Target = T;

        fn deref(&self) -> &Self::Target {
            &self.0
        }
    }

    impl<T> DerefMut for MutexGuard<'_, T> {
        fn deref_mut(&mut self) -> &mut Self::Target {
            &mut self.0
        }
    }
}

#[cfg(not(feature = "parking_lot"))]
pub use std_mutex::Mutex;

#[cfg(test)]
mod tests {
    use super::Mutex;

    #[derive(Default)]
    struct Slots {
        taken: Mutex<Vec<usize>>,
    }

    #[test]
    fn test_default_and_lock() {
        let slots = Slots::default();
        slots.taken.lock().push(3);
        assert_eq!(*slots.taken.lock(), vec![3]);
    }

    #[test]
    fn test_lock_recovers_after_panic() {
        let shared = std::sync::Arc::new(Mutex::new(1u32));
        let clone = shared.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock();
            panic!("holder panicked");
        })
        .join();

        *shared.lock() += 1;
        assert_eq!(*shared.lock(), 2);
    }
}
