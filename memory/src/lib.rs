//! Physical memory and the address-translation gateway that sits in front of it.
//!
//! The paging engine only ever reaches frame contents through an [`Mmu`]. The
//! [`SimulatedMmu`] here keeps a single set of virtual page mappings (the
//! context of whichever process is currently installed), per-frame access bits,
//! and raises [`MmuError::Fault`] when a user access lands on an unmapped page.

mod mmu;
mod physical;

pub use mmu::{AccessBits, Mmu, MmuError, Protection, SimulatedMmu, DEFAULT_REGION_BASE};
pub use physical::PhysicalMemory;
