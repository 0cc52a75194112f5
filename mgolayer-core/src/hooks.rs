//! Lifecycle hooks.
//!
//! Application types react to operations by implementing one or more capability traits
//! ([`BeforeInsert`], [`AfterUpdate`], ...) and exposing them through the [`Hooks`] trait.
//! The dispatcher asks a payload for the capability matching the current [`HookPhase`] and
//! invokes it when present. A payload that does not implement a capability is skipped
//! silently.
//!
//! Replace operations run the update capabilities: [`HookPhase::BeforeReplace`] invokes
//! [`BeforeUpdate`] and [`HookPhase::AfterReplace`] invokes [`AfterUpdate`].
//!
//! # Examples
//!
//! ```ignore
//! use mgolayer::prelude::*;
//!
//! #[derive(Serialize, Deserialize, Hooks)]
//! #[hooks(before_insert)]
//! struct User {
//!     name: String,
//! }
//!
//! impl BeforeInsert for User {
//!     fn before_insert(&mut self, _ctx: &Context) -> MgoResult<()> {
//!         self.name = self.name.trim().to_owned();
//!         Ok(())
//!     }
//! }
//! ```

use std::fmt;

use bson::Document;
use tracing::trace;

use crate::{context::Context, error::MgoResult};

/// The point in an operation's lifecycle at which hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeQuery,
    AfterQuery,
    BeforeRemove,
    AfterRemove,
    BeforeUpsert,
    AfterUpsert,
    BeforeReplace,
    AfterReplace,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookPhase::BeforeInsert => "beforeInsert",
            HookPhase::AfterInsert => "afterInsert",
            HookPhase::BeforeUpdate => "beforeUpdate",
            HookPhase::AfterUpdate => "afterUpdate",
            HookPhase::BeforeQuery => "beforeQuery",
            HookPhase::AfterQuery => "afterQuery",
            HookPhase::BeforeRemove => "beforeRemove",
            HookPhase::AfterRemove => "afterRemove",
            HookPhase::BeforeUpsert => "beforeUpsert",
            HookPhase::AfterUpsert => "afterUpsert",
            HookPhase::BeforeReplace => "beforeReplace",
            HookPhase::AfterReplace => "afterReplace",
        };
        f.write_str(name)
    }
}

pub trait BeforeInsert {
    fn before_insert(&mut self, ctx: &Context) -> MgoResult<()>;
}

pub trait AfterInsert {
    fn after_insert(&mut self, ctx: &Context) -> MgoResult<()>;
}

/// Runs before update and replace operations.
pub trait BeforeUpdate {
    fn before_update(&mut self, ctx: &Context) -> MgoResult<()>;
}

/// Runs after update and replace operations.
pub trait AfterUpdate {
    fn after_update(&mut self, ctx: &Context) -> MgoResult<()>;
}

pub trait BeforeQuery {
    fn before_query(&mut self, ctx: &Context) -> MgoResult<()>;
}

pub trait AfterQuery {
    fn after_query(&mut self, ctx: &Context) -> MgoResult<()>;
}

pub trait BeforeRemove {
    fn before_remove(&mut self, ctx: &Context) -> MgoResult<()>;
}

pub trait AfterRemove {
    fn after_remove(&mut self, ctx: &Context) -> MgoResult<()>;
}

pub trait BeforeUpsert {
    fn before_upsert(&mut self, ctx: &Context) -> MgoResult<()>;
}

pub trait AfterUpsert {
    fn after_upsert(&mut self, ctx: &Context) -> MgoResult<()>;
}

/// A value that can take part in hook dispatch.
///
/// Every accessor defaults to `None`, meaning the capability is absent. Implement the
/// capability trait and override its accessor to opt in, or use `#[derive(Hooks)]` which
/// writes the accessors for the capabilities listed in `#[hooks(...)]`.
///
/// Collections override [`Hooks::hook_elements`] instead; dispatch then visits each element.
pub trait Hooks: Send {
    fn as_before_insert(&mut self) -> Option<&mut dyn BeforeInsert> {
        None
    }

    fn as_after_insert(&mut self) -> Option<&mut dyn AfterInsert> {
        None
    }

    fn as_before_update(&mut self) -> Option<&mut dyn BeforeUpdate> {
        None
    }

    fn as_after_update(&mut self) -> Option<&mut dyn AfterUpdate> {
        None
    }

    fn as_before_query(&mut self) -> Option<&mut dyn BeforeQuery> {
        None
    }

    fn as_after_query(&mut self) -> Option<&mut dyn AfterQuery> {
        None
    }

    fn as_before_remove(&mut self) -> Option<&mut dyn BeforeRemove> {
        None
    }

    fn as_after_remove(&mut self) -> Option<&mut dyn AfterRemove> {
        None
    }

    fn as_before_upsert(&mut self) -> Option<&mut dyn BeforeUpsert> {
        None
    }

    fn as_after_upsert(&mut self) -> Option<&mut dyn AfterUpsert> {
        None
    }

    /// The elements of a collection payload, in iteration order.
    fn hook_elements(&mut self) -> Option<Vec<&mut dyn Hooks>> {
        None
    }
}

impl<T: Hooks> Hooks for Vec<T> {
    fn hook_elements(&mut self) -> Option<Vec<&mut dyn Hooks>> {
        Some(self.iter_mut().map(|item| item as &mut dyn Hooks).collect())
    }
}

impl<T: Hooks, const N: usize> Hooks for [T; N] {
    fn hook_elements(&mut self) -> Option<Vec<&mut dyn Hooks>> {
        Some(self.iter_mut().map(|item| item as &mut dyn Hooks).collect())
    }
}

impl Hooks for Document {}

impl Hooks for () {}

/// Runs the hooks for `phase` on `payload`.
///
/// A collection payload is dispatched once per element, in order, stopping at the first
/// failure. Any other payload is dispatched once.
///
/// # Errors
///
/// Returns the first error raised by a hook.
pub fn dispatch(ctx: &Context, payload: &mut dyn Hooks, phase: HookPhase) -> MgoResult<()> {
    if let Some(elements) = payload.hook_elements() {
        trace!(%phase, count = elements.len(), "dispatching hooks over collection");
        for element in elements {
            dispatch_one(ctx, element, phase)?;
        }
        return Ok(());
    }

    dispatch_one(ctx, payload, phase)
}

fn dispatch_one(ctx: &Context, payload: &mut dyn Hooks, phase: HookPhase) -> MgoResult<()> {
    match phase {
        HookPhase::BeforeInsert => match payload.as_before_insert() {
            Some(hook) => hook.before_insert(ctx),
            None => Ok(()),
        },
        HookPhase::AfterInsert => match payload.as_after_insert() {
            Some(hook) => hook.after_insert(ctx),
            None => Ok(()),
        },
        HookPhase::BeforeUpdate | HookPhase::BeforeReplace => match payload.as_before_update() {
            Some(hook) => hook.before_update(ctx),
            None => Ok(()),
        },
        HookPhase::AfterUpdate | HookPhase::AfterReplace => match payload.as_after_update() {
            Some(hook) => hook.after_update(ctx),
            None => Ok(()),
        },
        HookPhase::BeforeQuery => match payload.as_before_query() {
            Some(hook) => hook.before_query(ctx),
            None => Ok(()),
        },
        HookPhase::AfterQuery => match payload.as_after_query() {
            Some(hook) => hook.after_query(ctx),
            None => Ok(()),
        },
        HookPhase::BeforeRemove => match payload.as_before_remove() {
            Some(hook) => hook.before_remove(ctx),
            None => Ok(()),
        },
        HookPhase::AfterRemove => match payload.as_after_remove() {
            Some(hook) => hook.after_remove(ctx),
            None => Ok(()),
        },
        HookPhase::BeforeUpsert => match payload.as_before_upsert() {
            Some(hook) => hook.before_upsert(ctx),
            None => Ok(()),
        },
        HookPhase::AfterUpsert => match payload.as_after_upsert() {
            Some(hook) => hook.after_upsert(ctx),
            None => Ok(()),
        },
    }
}
