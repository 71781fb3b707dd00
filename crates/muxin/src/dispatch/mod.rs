// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message dispatch over an object's precomputed call tables.
//!
//! Every send walks the composed type's table for the message, so cost is
//! independent of how the type was reached. The three surfaces mirror the
//! three call disciplines:
//!
//! ```text
//! send_unicast     highest-priority implementer, or the fallback
//! send_multicast   every implementer in table order, results collected
//! send_chain       implementers as a cooperative chain via Next
//! ```
//!
//! Arguments and results cross the erased handler boundary as `dyn Any`;
//! a mismatch against the types a handler was bound with is reported as
//! [`Error::BadArgumentType`] / [`Error::BadResultType`], never silently
//! coerced.

use std::any::Any;
use std::sync::Arc;

use crate::compose::CallEntry;
use crate::error::{Error, Result};
use crate::object::Object;
use crate::registry::{CallDiscipline, FallbackFn, Handler, MessageId};

/// Continuation handed to priority-chain handlers.
///
/// Calling [`Next::call`] runs the rest of the chain (ending at the
/// message's fallback, if any) and yields its result; dropping the
/// continuation short-circuits the chain at the current handler.
pub struct Next<'a> {
    entries: &'a [CallEntry],
    slots: *const *mut u8,
    fallback: Option<&'a Arc<FallbackFn>>,
    message: &'a str,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        entries: &'a [CallEntry],
        slots: *const *mut u8,
        fallback: Option<&'a Arc<FallbackFn>>,
        message: &'a str,
    ) -> Self {
        Self {
            entries,
            slots,
            fallback,
            message,
        }
    }

    /// True when at least one implementer (or the fallback) remains.
    pub fn exists(&self) -> bool {
        !self.entries.is_empty() || self.fallback.is_some()
    }

    /// Delegates to the remainder of the chain with the given arguments.
    ///
    /// Past the last implementer the message's fallback runs; without one,
    /// delegation fails with [`Error::UnsupportedMessage`].
    pub fn call<A: Any, R: Any>(self, args: &mut A) -> Result<R> {
        downcast_result(self.invoke(args)?)
    }

    pub(crate) fn invoke(self, args: &mut dyn Any) -> Result<Box<dyn Any>> {
        match self.entries.split_first() {
            Some((entry, rest)) => {
                // Safety: the entry's slot index is valid for the object this
                // table was taken from, and the instance is live for the
                // duration of the send.
                let data = unsafe { *self.slots.add(entry.slot) };
                let next = Next::new(rest, self.slots, self.fallback, self.message);
                match &entry.handler {
                    Handler::Chain(f) => f(data, args, next),
                    // A plain handler ends the chain; binding validation
                    // keeps these off chain messages.
                    Handler::Plain(f) => f(data, args),
                }
            }
            None => match self.fallback {
                Some(f) => f(args),
                None => Err(Error::UnsupportedMessage(self.message.to_string())),
            },
        }
    }
}

fn downcast_result<R: Any>(out: Box<dyn Any>) -> Result<R> {
    out.downcast::<R>().map(|b| *b).map_err(|_| Error::BadResultType {
        expected: std::any::type_name::<R>(),
    })
}

impl Object {
    /// Sends a unicast message: the single highest-priority implementer
    /// runs; with none, the message's fallback; with neither,
    /// [`Error::UnsupportedMessage`].
    pub fn send_unicast<A: Any, R: Any>(&mut self, message: MessageId, args: &mut A) -> Result<R> {
        let desc = self.domain().message_info(message)?;
        if desc.discipline() != CallDiscipline::Unicast {
            return Err(Error::DisciplineMismatch {
                message: desc.name().to_string(),
                expected: desc.discipline(),
            });
        }
        let ty = Arc::clone(self.type_of());
        match ty.table(message).and_then(|t| t.entries.first()) {
            Some(entry) => {
                let data = self.slot_data(entry.slot);
                match &entry.handler {
                    Handler::Plain(f) => downcast_result(f(data, args as &mut dyn Any)?),
                    Handler::Chain(_) => Err(Error::InvalidBinding(format!(
                        "chain handler bound to unicast message '{}'",
                        desc.name()
                    ))),
                }
            }
            None => match &desc.fallback {
                Some(f) => downcast_result(f(args as &mut dyn Any)?),
                None => Err(Error::UnsupportedMessage(desc.name().to_string())),
            },
        }
    }

    /// Sends a multicast message to every implementer in priority order,
    /// collecting the results in call order. No implementer is not an
    /// error: the result is empty.
    pub fn send_multicast<A: Any, R: Any>(
        &mut self,
        message: MessageId,
        args: &mut A,
    ) -> Result<Vec<R>> {
        let desc = self.domain().message_info(message)?;
        if desc.discipline() != CallDiscipline::Multicast {
            return Err(Error::DisciplineMismatch {
                message: desc.name().to_string(),
                expected: desc.discipline(),
            });
        }
        let ty = Arc::clone(self.type_of());
        let Some(table) = ty.table(message) else {
            return Ok(Vec::new());
        };
        let mut results = Vec::with_capacity(table.entries.len());
        for entry in table.entries.iter() {
            let data = self.slot_data(entry.slot);
            match &entry.handler {
                Handler::Plain(f) => results.push(downcast_result(f(data, args as &mut dyn Any)?)?),
                Handler::Chain(_) => {
                    return Err(Error::InvalidBinding(format!(
                        "chain handler bound to multicast message '{}'",
                        desc.name()
                    )))
                }
            }
        }
        Ok(results)
    }

    /// Sends a priority-chain message: the highest-priority implementer
    /// runs first and decides, through its [`Next`] continuation, whether
    /// the rest of the chain runs.
    ///
    /// Delegation past the last implementer reaches the fallback; an empty
    /// chain with no fallback is [`Error::UnsupportedMessage`].
    pub fn send_chain<A: Any, R: Any>(&mut self, message: MessageId, args: &mut A) -> Result<R> {
        let desc = self.domain().message_info(message)?;
        if desc.discipline() != CallDiscipline::PriorityChain {
            return Err(Error::DisciplineMismatch {
                message: desc.name().to_string(),
                expected: desc.discipline(),
            });
        }
        let ty = Arc::clone(self.type_of());
        let entries = ty.table(message).map(|t| &t.entries[..]).unwrap_or(&[]);
        let next = Next::new(entries, self.slot_table(), desc.fallback.as_ref(), desc.name());
        downcast_result(next.invoke(args as &mut dyn Any)?)
    }
}
