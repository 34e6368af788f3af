//! Post-register-allocation lowering of register permutations.
//!
//! A register allocator that assigns registers to an already-scheduled graph
//! leaves behind *Perm* nodes: synthetic instructions denoting that several
//! live values swap registers simultaneously at one program point.  This
//! crate rewrites each Perm into real operations (register copies and binary
//! swaps) without disturbing the schedule, the liveness or the allocation
//! around it, and provides the companion pre-allocation pass that
//! materialises copies for must-be-different register constraints.
//!
//! The graph kernel lives in [ir], the target description in [registers],
//! and the passes in [lower].

pub mod error;
pub mod ir;
pub mod liveness;
pub mod lower;
pub mod registers;
pub mod ssa;

pub use error::IrError;
pub use ir::{Block, Context, Function, Instruction, Mode, Value};
pub use liveness::Liveness;
pub use lower::{assure_constraints, lower_nodes_after_ra, push_through_perm};
pub use registers::{RegClass, RegRequirement, Register, RegisterFile};
