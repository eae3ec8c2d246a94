#![forbid(unsafe_code)]

//! Opaque-ciphertext capability layer.
//!
//! Encrypted amounts are handled as [`Ciphertext`] tokens that carry no
//! arithmetic of their own; every operation goes through an [`MpcRuntime`].
//! Deployments without an MPC network use [`ClearMpc`], which keeps the
//! plaintext slots in process memory but preserves the handle discipline, so
//! consumers cannot tell the backends apart.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Opaque reference to an encrypted value. The inner id is only meaningful
/// to the runtime that issued it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ciphertext(u64);

impl Ciphertext {
    fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MpcError {
    #[error("unknown ciphertext handle {0}")]
    UnknownHandle(u64),
    #[error("homomorphic subtraction would underflow")]
    ArithmeticUnderflow,
    #[error("homomorphic division by zero")]
    DivisionByZero,
}

/// Capability surface for computing on encrypted values.
///
/// Only the data owner may observe plaintext: `decrypt` reveals the value to
/// the caller, `compare_ge` reveals a single boolean and nothing else.
pub trait MpcRuntime: Send + Sync {
    fn encrypt(&self, plain: u64) -> Ciphertext;
    fn decrypt(&self, handle: &Ciphertext) -> Result<u64, MpcError>;
    fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, MpcError>;
    fn add_plain(&self, a: &Ciphertext, b: u64) -> Result<Ciphertext, MpcError>;
    fn sub(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, MpcError>;
    fn mul_plain(&self, a: &Ciphertext, b: u64) -> Result<Ciphertext, MpcError>;
    fn div_plain(&self, a: &Ciphertext, b: u64) -> Result<Ciphertext, MpcError>;
    /// Reveals only whether `a >= b`.
    fn compare_ge(&self, a: &Ciphertext, b: &Ciphertext) -> Result<bool, MpcError>;
}

/// In-process backend. Handle ids are never reused, so stale handles fail
/// with `UnknownHandle` instead of aliasing another slot.
#[derive(Default)]
pub struct ClearMpc {
    next_id: AtomicU64,
    slots: Mutex<HashMap<u64, u64>>,
}

impl ClearMpc {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&self, handle: &Ciphertext) -> Result<u64, MpcError> {
        self.slots
            .lock()
            .expect("mpc slot lock poisoned")
            .get(&handle.id())
            .copied()
            .ok_or(MpcError::UnknownHandle(handle.id()))
    }

    fn store(&self, value: u64) -> Ciphertext {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots
            .lock()
            .expect("mpc slot lock poisoned")
            .insert(id, value);
        Ciphertext(id)
    }
}

impl MpcRuntime for ClearMpc {
    fn encrypt(&self, plain: u64) -> Ciphertext {
        self.store(plain)
    }

    fn decrypt(&self, handle: &Ciphertext) -> Result<u64, MpcError> {
        self.load(handle)
    }

    fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, MpcError> {
        let sum = self.load(a)?.saturating_add(self.load(b)?);
        Ok(self.store(sum))
    }

    fn add_plain(&self, a: &Ciphertext, b: u64) -> Result<Ciphertext, MpcError> {
        let sum = self.load(a)?.saturating_add(b);
        Ok(self.store(sum))
    }

    fn sub(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, MpcError> {
        let lhs = self.load(a)?;
        let rhs = self.load(b)?;
        let diff = lhs.checked_sub(rhs).ok_or(MpcError::ArithmeticUnderflow)?;
        Ok(self.store(diff))
    }

    fn mul_plain(&self, a: &Ciphertext, b: u64) -> Result<Ciphertext, MpcError> {
        let product = self.load(a)?.saturating_mul(b);
        Ok(self.store(product))
    }

    fn div_plain(&self, a: &Ciphertext, b: u64) -> Result<Ciphertext, MpcError> {
        if b == 0 {
            return Err(MpcError::DivisionByZero);
        }
        let quotient = self.load(a)? / b;
        Ok(self.store(quotient))
    }

    fn compare_ge(&self, a: &Ciphertext, b: &Ciphertext) -> Result<bool, MpcError> {
        Ok(self.load(a)? >= self.load(b)?)
    }
}
