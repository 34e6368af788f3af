use thiserror::Error;

/// Errors raised by the lowering passes.
///
/// Every variant is a violated invariant of the input graph, i.e. a
/// programmer error upstream; there is no recovery.  The embedded string
/// names the offending node.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrError {
    #[error("no register assigned to node {0}")]
    MissingRegister(String),

    #[error("node {0} has no register class")]
    MissingRegisterClass(String),

    #[error("perm node {0} is not scheduled or has no schedule predecessor")]
    UnscheduledPerm(String),

    #[error("perm node {0} has {1} inputs but {2} result projections")]
    PermArityMismatch(String, usize, usize),

    #[error("register pairs of perm node {0} do not describe a permutation")]
    BrokenPermutation(String),
}
