//! Leaf-level primitives the rest of the engine builds on: aligned
//! allocation, the on/off latch, the counted semaphore, and the ordered
//! shared-state cell.

mod aligned_buffer;
mod latch;
mod semaphore;
mod state_cell;

pub use aligned_buffer::{is_aligned, AlignedBuffer};
pub use latch::OnOffLatch;
pub use semaphore::Semaphore;
pub use state_cell::StateCell;
