//! Single-assignment lazy cell used by the descriptor model.

use std::ptr;
use std::sync::{
    atomic::{AtomicPtr, Ordering},
    RwLock, RwLockReadGuard, RwLockWriteGuard,
};

/// A thread-safe "initialise once, then freely mutable" cell.
///
/// The first observer triggers its initialiser; concurrent observers race on an
/// atomic compare-and-swap of the holder pointer, losers discard their computed
/// value and adopt the winner's. After initialisation the value is freely mutable
/// through [`LazyCell::set`] and [`LazyCell::write`]; callers mixing writes with
/// concurrent reads coordinate through the cell's reader/writer lock.
///
/// Descriptor fields sit behind these cells so that materialisation from a parsed
/// image stays lazy while user edits after the fact remain cheap.
///
/// # Examples
///
/// ```rust
/// use cilforge::metadata::model::LazyCell;
///
/// let cell: LazyCell<String> = LazyCell::new();
/// assert!(!cell.is_initialized());
///
/// assert_eq!(&*cell.get_or_init(|| "computed".to_string()), "computed");
/// cell.set("edited".to_string());
/// assert_eq!(&*cell.get_or_init(|| unreachable!()), "edited");
/// ```
pub struct LazyCell<T> {
    slot: AtomicPtr<RwLock<T>>,
}

// The raw pointer is only ever a Box allocated by this cell; ownership semantics
// match RwLock<T>
unsafe impl<T: Send> Send for LazyCell<T> {}
unsafe impl<T: Send + Sync> Sync for LazyCell<T> {}

impl<T> LazyCell<T> {
    /// Create an uninitialised cell
    #[must_use]
    pub const fn new() -> Self {
        LazyCell {
            slot: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Create a cell already holding `value`
    #[must_use]
    pub fn with_value(value: T) -> Self {
        LazyCell {
            slot: AtomicPtr::new(Box::into_raw(Box::new(RwLock::new(value)))),
        }
    }

    /// Returns true if an initialiser or [`LazyCell::set`] has already run
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        !self.slot.load(Ordering::Acquire).is_null()
    }

    fn holder(&self) -> Option<&RwLock<T>> {
        let ptr = self.slot.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // Holders are never freed before the cell drops
            Some(unsafe { &*ptr })
        }
    }

    /// Install `candidate` unless another thread won the race; either way, return
    /// the surviving holder.
    fn install(&self, candidate: T) -> &RwLock<T> {
        let boxed = Box::into_raw(Box::new(RwLock::new(candidate)));
        match self.slot.compare_exchange(
            ptr::null_mut(),
            boxed,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => unsafe { &*boxed },
            Err(winner) => {
                // Lost the race: discard our value, adopt the winner's
                drop(unsafe { Box::from_raw(boxed) });
                unsafe { &*winner }
            }
        }
    }

    /// Read the value, running `init` if the cell is still empty.
    ///
    /// Racing initialisers may each run; exactly one result is kept.
    ///
    /// ## Arguments
    /// * 'init' - Computes the initial value when the cell is empty
    pub fn get_or_init<F: FnOnce() -> T>(&self, init: F) -> RwLockReadGuard<'_, T> {
        let holder = match self.holder() {
            Some(holder) => holder,
            None => self.install(init()),
        };

        holder.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Read the value if the cell is initialised
    pub fn get(&self) -> Option<RwLockReadGuard<'_, T>> {
        self.holder()
            .map(|holder| holder.read().unwrap_or_else(std::sync::PoisonError::into_inner))
    }

    /// Assign `value`, initialising the cell if needed
    ///
    /// ## Arguments
    /// * 'value' - The value to store
    pub fn set(&self, value: T) {
        if let Some(holder) = self.holder() {
            *holder
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = value;
            return;
        }

        let boxed = Box::into_raw(Box::new(RwLock::new(value)));
        if let Err(winner) = self.slot.compare_exchange(
            ptr::null_mut(),
            boxed,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            // A concurrent initialiser won; the assignment still takes effect by
            // overwriting through the winner's holder
            let reclaimed = unsafe { Box::from_raw(boxed) }
                .into_inner()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *unsafe { &*winner }
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = reclaimed;
        }
    }

    /// Write access to an initialised cell
    pub fn write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        self.holder()
            .map(|holder| holder.write().unwrap_or_else(std::sync::PoisonError::into_inner))
    }
}

impl<T: Clone> LazyCell<T> {
    /// Clone the value out of an initialised cell
    #[must_use]
    pub fn get_cloned(&self) -> Option<T> {
        self.get().map(|guard| guard.clone())
    }
}

impl<T> Default for LazyCell<T> {
    fn default() -> Self {
        LazyCell::new()
    }
}

impl<T> Drop for LazyCell<T> {
    fn drop(&mut self) {
        let ptr = *self.slot.get_mut();
        if !ptr.is_null() {
            drop(unsafe { Box::from_raw(ptr) });
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for LazyCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(guard) => f.debug_tuple("LazyCell").field(&*guard).finish(),
            None => f.write_str("LazyCell(<uninit>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
        Arc,
    };
    use std::thread;

    #[test]
    fn initialises_once() {
        let cell: LazyCell<u32> = LazyCell::new();
        assert!(!cell.is_initialized());
        assert!(cell.get().is_none());

        assert_eq!(*cell.get_or_init(|| 42), 42);
        assert!(cell.is_initialized());

        // Second observer reuses the cached value
        assert_eq!(*cell.get_or_init(|| 99), 42);
    }

    #[test]
    fn freely_mutable_after_init() {
        let cell = LazyCell::with_value("first".to_string());
        cell.set("second".to_string());
        assert_eq!(cell.get_cloned().as_deref(), Some("second"));

        *cell.write().unwrap() = "third".to_string();
        assert_eq!(*cell.get_or_init(|| unreachable!()), "third");
    }

    #[test]
    fn set_on_empty_cell_initialises() {
        let cell: LazyCell<u32> = LazyCell::new();
        cell.set(7);
        assert_eq!(*cell.get_or_init(|| 0), 7);
    }

    #[test]
    fn racing_initialisers_agree() {
        let cell = Arc::new(LazyCell::<usize>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cell = Arc::clone(&cell);
                let runs = Arc::clone(&runs);
                thread::spawn(move || {
                    let value = *cell.get_or_init(|| {
                        runs.fetch_add(1, AtomicOrdering::SeqCst);
                        i
                    });
                    value
                })
            })
            .collect();

        let values: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Losers discarded their computed value and adopted the winner's
        let winner = values[0];
        assert!(values.iter().all(|v| *v == winner));
        assert_eq!(*cell.get_or_init(|| unreachable!()), winner);
    }
}
