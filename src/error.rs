use std::alloc::Layout;

use thiserror::Error;

/// An [`Allocator`][crate::Allocator] could not provide memory for a control block.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("failed to allocate a control block of {} bytes (align {})", .layout.size(), .layout.align())]
pub struct AllocError {
    layout: Layout,
}

impl AllocError {
    /// Creates an error for a failed request of `layout`.
    pub fn new(layout: Layout) -> Self {
        AllocError { layout }
    }

    /// The layout that could not be allocated.
    pub fn layout(&self) -> Layout {
        self.layout
    }
}

/// Failure of a fallible in-place construction such as
/// [`try_allocate_shared_with`][crate::try_allocate_shared_with].
///
/// Whichever step failed, the block storage has already been returned to its allocator.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConstructError<E> {
    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error("value construction failed: {0}")]
    Init(E),
}
