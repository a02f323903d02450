//! Demand-paged virtual memory for simulated user processes.
//!
//! Every process sees the same fixed-size region of virtual pages. Pages are
//! brought into a small pool of physical frames on first touch, evicted with
//! the clock algorithm when frames run out, and kept on a swap device while
//! they are not resident. Faults are resolved by a pool of pager threads.

pub mod clock;
pub mod config;
pub mod error;
pub mod fault;
pub mod frame_table;
pub mod page_table;
mod pager;
pub mod process;
pub mod stats;
pub mod swap;
pub mod vm;

pub use config::{VmConfig, MAX_PAGERS, MAX_PROCESSES};
pub use error::{Result, VmError};
pub use frame_table::{FrameOwner, FrameTableEntry};
pub use page_table::{PageTableEntry, Residency};
pub use process::Process;
pub use stats::VmStats;
pub use vm::PagingSystem;

/// Process identifier as handed out by the process layer.
pub type Pid = usize;
