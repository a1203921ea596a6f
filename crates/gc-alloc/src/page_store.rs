//! Page lifecycle for one size class.
//!
//! Every page of a store sits on exactly one of four stacks:
//!
//! - `ready`: swept, has free cells, can be handed to a mutator.
//! - `used`: currently handed out (or full); not touched until the next GC.
//! - `unswept`: waiting for the sweeper.
//! - `empty`: swept with no live cells; reused or destroyed.
//!
//! Mutators only pop `ready` and `empty`. Only the sweeper pops `unswept`.
//! Pages are destroyed while mutators are paused ([`PageStore::prepare_for_gc`])
//! or by the sweeper for pages only it can reach, so no `try_pop` can
//! observe an unmapped page.

use std::fmt;
use std::ptr::NonNull;

use crate::allocation_size::AllocationSize;
use crate::atomic_stack::AtomicStack;
use crate::finalizer_queue::FinalizerQueue;
use crate::gc_handle::GcHandle;
use crate::page::Page;
use crate::sweep::SweepTraits;

/// The four page stacks of one size class.
pub struct PageStore<P: Page> {
    empty: AtomicStack<P>,
    ready: AtomicStack<P>,
    used: AtomicStack<P>,
    unswept: AtomicStack<P>,
}

impl<P: Page> PageStore<P> {
    /// Create a store with no pages.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            empty: AtomicStack::new(),
            ready: AtomicStack::new(),
            used: AtomicStack::new(),
            unswept: AtomicStack::new(),
        }
    }

    /// A page to allocate from: a swept one with free cells, else an empty
    /// one, else a new one of `size`. The page is recorded as used.
    pub fn get_page(&self, size: AllocationSize) -> NonNull<P> {
        if let Some(page) = self.ready.try_pop().or_else(|| self.empty.try_pop()) {
            self.used.push(page);
            return page;
        }
        self.new_page(size)
    }

    /// A freshly created page of `size`, recorded as used.
    pub fn new_page(&self, size: AllocationSize) -> NonNull<P> {
        let page = P::create(size);
        self.used.push(page);
        page
    }

    /// Queue every page for sweeping and release empty pages.
    ///
    /// Must run while no mutator holds or requests a page of this store.
    pub fn prepare_for_gc(&self) {
        self.unswept.transfer_all_from(&self.ready);
        self.unswept.transfer_all_from(&self.used);
        for page in self.empty.drain() {
            // SAFETY: mutators are paused, so nobody can reach the page.
            unsafe { P::destroy(page) };
        }
    }

    /// Sweep every unswept page with `T`, returning pages with survivors to
    /// `ready` and the rest to `empty`.
    ///
    /// # Safety
    ///
    /// Every allocated cell must hold what `T` expects. Only one thread may
    /// sweep this store at a time.
    pub unsafe fn sweep<T: SweepTraits>(
        &self,
        gc_handle: &GcHandle,
        finalizer_queue: &mut FinalizerQueue,
    ) {
        let mut scope = T::current_sweep_scope(gc_handle);
        while let Some(mut page) = self.unswept.try_pop() {
            // SAFETY: popping `unswept` hands us the page exclusively.
            if unsafe { page.as_mut().sweep::<T>(&mut scope, finalizer_queue) } {
                self.ready.push(page);
            } else {
                self.empty.push(page);
            }
        }
    }

    /// Sweep every unswept page with `T`, returning pages with survivors to
    /// `used` and destroying the rest right away.
    ///
    /// Meant for stores whose pages are never reused.
    ///
    /// # Safety
    ///
    /// As for [`PageStore::sweep`].
    pub unsafe fn sweep_and_free<T: SweepTraits>(
        &self,
        gc_handle: &GcHandle,
        finalizer_queue: &mut FinalizerQueue,
    ) {
        let mut scope = T::current_sweep_scope(gc_handle);
        while let Some(mut page) = self.unswept.try_pop() {
            // SAFETY: popping `unswept` hands us the page exclusively.
            if unsafe { page.as_mut().sweep::<T>(&mut scope, finalizer_queue) } {
                self.used.push(page);
            } else {
                // SAFETY: mutators never pop `unswept`, so we were the only
                // thread able to reach the page.
                unsafe { P::destroy(page) };
            }
        }
    }

    /// Call `f` with every page of the store.
    ///
    /// Must run while no other thread pushes or pops pages of this store.
    pub fn for_each_page(&self, mut f: impl FnMut(&P)) {
        let mut pages = Vec::new();
        for stack in [&self.empty, &self.ready, &self.used, &self.unswept] {
            pages.clear();
            pages.extend(stack.drain());
            for &page in pages.iter().rev() {
                // SAFETY: the page stays mapped; we hold it off-stack briefly.
                f(unsafe { page.as_ref() });
                stack.push(page);
            }
        }
    }

    /// Destroy every page, live cells included.
    ///
    /// Must run while no other thread uses this store or its cells.
    pub fn clear_for_tests(&self) {
        for stack in [&self.empty, &self.ready, &self.used, &self.unswept] {
            for page in stack.drain() {
                // SAFETY: exclusive access per the contract above.
                unsafe { P::destroy(page) };
            }
        }
    }
}

impl<P: Page> Default for PageStore<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Page> Drop for PageStore<P> {
    fn drop(&mut self) {
        self.clear_for_tests();
    }
}

impl<P: Page> fmt::Debug for PageStore<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageStore")
            .field("kind", &P::KIND)
            .field("empty", &self.empty)
            .field("ready", &self.ready)
            .field("used", &self.used)
            .field("unswept", &self.unswept)
            .finish()
    }
}
