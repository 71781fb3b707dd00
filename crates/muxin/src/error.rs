// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for composition, mutation and dispatch operations.

use crate::registry::{CallDiscipline, MessageId, MixinId};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by muxin operations.
///
/// Grouped by the phase that produces them: configuration errors are fatal
/// setup mistakes and surface at registration time, mutation errors leave the
/// object untouched, dispatch errors report a send that the object's current
/// type cannot serve, and copy errors report a whole-object copy that was
/// refused (never a partial copy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// A mixin was re-registered under the same name with a different shape
    /// (size, alignment or bound Rust type).
    IncompatibleMixin(String),
    /// A message was re-registered under the same name with a different
    /// call discipline.
    IncompatibleMessage(String),
    /// Mixin id not present in the registry.
    UnknownMixin(MixinId),
    /// Message id not present in the registry.
    UnknownMessage(MessageId),
    /// A message binding was rejected (duplicate binding on one mixin, or a
    /// handler kind that does not match the message's call discipline).
    InvalidBinding(String),
    /// The mutation rule set failed to reach a fixpoint within the pass
    /// bound. Symptom of contradictory rules, e.g. a mixin that is both
    /// mandatory and deprecated.
    RuleConflict {
        /// Number of full rule passes executed before giving up.
        passes: u32,
    },
    /// An operation paired objects or templates from different domains,
    /// whose ids are not interchangeable.
    DomainMismatch,

    // ========================================================================
    // Mutation Errors
    // ========================================================================
    /// A mutation would add a mixin that has no default-construct operation.
    MissingDefaultConstruct(String),
    /// A mutation would relocate a mixin that has neither a move-construct
    /// nor a copy-construct operation.
    NotMovable(String),
    /// The allocator could not provide memory.
    AllocationFailed {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    // ========================================================================
    // Dispatch Errors
    // ========================================================================
    /// Unicast or chain send against a type with no implementer (and, for
    /// chains, no fallback).
    UnsupportedMessage(String),
    /// The send surface does not match the message's registered discipline
    /// (e.g. `send_unicast` for a multicast message).
    DisciplineMismatch {
        /// Message name.
        message: String,
        /// The discipline the message was registered with.
        expected: CallDiscipline,
    },
    /// The argument value passed to a send does not downcast to the type the
    /// handler was bound with.
    BadArgumentType {
        /// Type name the handler expects.
        expected: &'static str,
    },
    /// A handler's result does not downcast to the type requested by the
    /// caller.
    BadResultType {
        /// Type name the caller requested.
        expected: &'static str,
    },

    // ========================================================================
    // Copy Errors
    // ========================================================================
    /// Whole-object copy refused: a mixin has no copy-construct operation.
    NotCopyable(String),
    /// Whole-object copy refused: a mixin present on both sides has no
    /// copy-assign operation.
    NotCopyAssignable(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Configuration
            Error::IncompatibleMixin(name) => {
                write!(f, "Mixin '{}' re-registered with an incompatible shape", name)
            }
            Error::IncompatibleMessage(name) => {
                write!(f, "Message '{}' re-registered with an incompatible discipline", name)
            }
            Error::UnknownMixin(id) => write!(f, "Unknown mixin id {}", id),
            Error::UnknownMessage(id) => write!(f, "Unknown message id {}", id),
            Error::InvalidBinding(msg) => write!(f, "Invalid message binding: {}", msg),
            Error::RuleConflict { passes } => write!(
                f,
                "Mutation rules did not converge after {} passes (contradictory rules?)",
                passes
            ),
            Error::DomainMismatch => {
                write!(f, "Operation paired objects or templates from different domains")
            }
            // Mutation
            Error::MissingDefaultConstruct(name) => {
                write!(f, "Mixin '{}' has no default-construct operation", name)
            }
            Error::NotMovable(name) => {
                write!(f, "Mixin '{}' cannot be relocated (no move or copy operation)", name)
            }
            Error::AllocationFailed { size, align } => {
                write!(f, "Allocation failed ({} bytes, align {})", size, align)
            }
            // Dispatch
            Error::UnsupportedMessage(name) => {
                write!(f, "Message '{}' is not implemented by this object's type", name)
            }
            Error::DisciplineMismatch { message, expected } => write!(
                f,
                "Message '{}' is registered as {:?}, sent through the wrong surface",
                message, expected
            ),
            Error::BadArgumentType { expected } => {
                write!(f, "Message argument is not a '{}'", expected)
            }
            Error::BadResultType { expected } => {
                write!(f, "Message result is not a '{}'", expected)
            }
            // Copy
            Error::NotCopyable(name) => {
                write!(f, "Mixin '{}' has no copy-construct operation", name)
            }
            Error::NotCopyAssignable(name) => {
                write!(f, "Mixin '{}' has no copy-assign operation", name)
            }
        }
    }
}

impl std::error::Error for Error {}
