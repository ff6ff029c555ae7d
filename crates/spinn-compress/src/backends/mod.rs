//! Transport backends
//!
//! Hardware transports live with the machine layer. This crate ships the
//! software backend, a virtual machine used by tests and the CLI.

pub mod software;

pub use software::VirtualMachine;
