//! The Signer pipeline: pure algorithms for
//! `create_action`, `sign_action`, `process_action`, `internalize_action`,
//! `acquire_direct_certificate`, and `prove_certificate`. These functions
//! hold no long-lived state of their own — the Wallet façade owns the
//! pending-sign-action TTL cache and the BEEF accumulator and threads them
//! through as plain arguments.

pub mod certificates;
pub mod internalize;
pub mod pipeline;

pub use certificates::{
    acquire_direct_certificate, prove_certificate, AcquireDirectCertificateArgs, NewCertificateField,
    RevealedField,
};
pub use internalize::{InsertionRemittance, InternalizeActionArgs, InternalizeOutputArgs, PaymentRemittance};
pub use pipeline::{
    compute_action_flags, create_action, process_action, sign_action, ActionFlags,
    CreateActionArgs, CreateActionInput, CreateActionOutputSpec, CreateActionResult,
    ProcessActionOutcome, SignActionResult,
};
