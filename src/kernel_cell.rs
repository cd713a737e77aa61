use core::cell::{Ref, RefCell, RefMut};

use critical_section::{CriticalSection, Mutex};

/// Holds the single kernel instance.
///
/// Thread context reaches it through `with`/`with_mut`, which mask interrupts
/// for the duration of the closure. The tick handler already runs masked and
/// uses the `_cs` variants with its own token.
pub(crate) struct KernelCell<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> KernelCell<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(inner)),
        }
    }

    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(Ref<T>) -> R,
    {
        critical_section::with(|cs| self.with_cs(cs, f))
    }

    pub fn with_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(RefMut<T>) -> R,
    {
        critical_section::with(|cs| self.with_mut_cs(cs, f))
    }

    pub fn with_cs<F, R>(&self, cs: CriticalSection<'_>, f: F) -> R
    where
        F: FnOnce(Ref<T>) -> R,
    {
        f(self.inner.borrow(cs).borrow())
    }

    pub fn with_mut_cs<F, R>(&self, cs: CriticalSection<'_>, f: F) -> R
    where
        F: FnOnce(RefMut<T>) -> R,
    {
        f(self.inner.borrow(cs).borrow_mut())
    }
}
