//! Per-operation options and their resolution.
//!
//! Every collection operation accepts at most one options value (`Option<XxxOptions>`). An
//! options value layers two optional things over the defaults:
//!
//! - driver settings for the call (`InsertSettings`, `UpdateSettings`, ...), which replace the
//!   defaults wholesale when present;
//! - an alternate hook payload, which receives the lifecycle hooks instead of the document
//!   being written. This lets a validation or view type observe the operation while the real
//!   document is persisted.
//!
//! [`resolve`] folds an optional options value into a [`Resolved`] pair of effective settings
//! and hook target.
//!
//! For operations that carry a document (insert, upsert, replace), hooks run on the alternate
//! payload when one is given and on the document otherwise. Filter-only operations (query,
//! update, remove) have no document to fall back on, so their hooks run only when an alternate
//! payload is supplied.

use crate::{
    context::Context,
    driver::{
        AggregateSettings, DeleteSettings, InsertSettings, ReplaceSettings, SessionSettings,
        TransactionSettings, UpdateSettings,
    },
    error::MgoResult,
    hooks::{HookPhase, Hooks, dispatch},
};

/// Options for [`Collection::insert_one`](crate::collection::Collection::insert_one).
#[derive(Default)]
pub struct InsertOneOptions<'h> {
    pub insert_hook: Option<&'h mut dyn Hooks>,
    pub insert_one_options: Option<InsertSettings>,
}

/// Options for [`Collection::insert_many`](crate::collection::Collection::insert_many).
#[derive(Default)]
pub struct InsertManyOptions<'h> {
    pub insert_hook: Option<&'h mut dyn Hooks>,
    pub insert_many_options: Option<InsertSettings>,
}

/// Options for the update family of collection operations.
#[derive(Default)]
pub struct UpdateOptions<'h> {
    pub update_hook: Option<&'h mut dyn Hooks>,
    pub update_options: Option<UpdateSettings>,
}

/// Options for [`Collection::replace_one`](crate::collection::Collection::replace_one).
#[derive(Default)]
pub struct ReplaceOptions<'h> {
    pub update_hook: Option<&'h mut dyn Hooks>,
    pub replace_options: Option<ReplaceSettings>,
}

/// Options for [`Collection::upsert`](crate::collection::Collection::upsert).
///
/// `upsert` is always forced on, whatever `replace_options` says.
#[derive(Default)]
pub struct UpsertOptions<'h> {
    pub upsert_hook: Option<&'h mut dyn Hooks>,
    pub replace_options: Option<ReplaceSettings>,
}

/// Options for the remove family of collection operations.
#[derive(Default)]
pub struct RemoveOptions<'h> {
    pub remove_hook: Option<&'h mut dyn Hooks>,
    pub delete_options: Option<DeleteSettings>,
}

/// Options for [`Collection::find`](crate::collection::Collection::find).
#[derive(Default)]
pub struct FindOptions<'h> {
    pub query_hook: Option<&'h mut dyn Hooks>,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    pub aggregate_options: Option<AggregateSettings>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub session_options: Option<SessionSettings>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    pub transaction_options: Option<TransactionSettings>,
}

/// An options value that can be split into its settings and hook layers.
pub trait LayeredOptions<'h> {
    type Settings: Default;

    fn into_layers(self) -> (Option<Self::Settings>, Option<&'h mut dyn Hooks>);
}

/// Effective settings and hook override for one call.
pub struct Resolved<'h, S> {
    pub settings: S,
    pub hook: Option<&'h mut dyn Hooks>,
}

impl<'h, S> Resolved<'h, S> {
    /// Runs `phase` on the alternate hook payload, if one was supplied.
    pub fn dispatch(&mut self, ctx: &Context, phase: HookPhase) -> MgoResult<()> {
        match self.hook.as_deref_mut() {
            Some(hook) => dispatch(ctx, hook, phase),
            None => Ok(()),
        }
    }

    /// Runs `phase` on the alternate hook payload, or on `payload` when none was supplied.
    pub fn dispatch_with(
        &mut self,
        ctx: &Context,
        payload: &mut dyn Hooks,
        phase: HookPhase,
    ) -> MgoResult<()> {
        match self.hook.as_deref_mut() {
            Some(hook) => dispatch(ctx, hook, phase),
            None => dispatch(ctx, payload, phase),
        }
    }
}

/// Resolves the effective settings and hook override from an optional caller override.
///
/// An absent override, or absent settings within it, fall back to `Default`.
pub fn resolve<'h, O>(options: Option<O>) -> Resolved<'h, O::Settings>
where
    O: LayeredOptions<'h>,
{
    let (settings, hook) = match options {
        Some(options) => options.into_layers(),
        None => (None, None),
    };

    Resolved {
        settings: settings.unwrap_or_default(),
        hook,
    }
}

/// Like [`resolve`], with `upsert` forced on.
pub fn resolve_upsert<'h>(options: Option<UpsertOptions<'h>>) -> Resolved<'h, ReplaceSettings> {
    let mut resolved = resolve(options);
    resolved.settings.upsert = Some(true);
    resolved
}

impl<'h> LayeredOptions<'h> for InsertOneOptions<'h> {
    type Settings = InsertSettings;

    fn into_layers(self) -> (Option<InsertSettings>, Option<&'h mut dyn Hooks>) {
        (self.insert_one_options, self.insert_hook)
    }
}

impl<'h> LayeredOptions<'h> for InsertManyOptions<'h> {
    type Settings = InsertSettings;

    fn into_layers(self) -> (Option<InsertSettings>, Option<&'h mut dyn Hooks>) {
        (self.insert_many_options, self.insert_hook)
    }
}

impl<'h> LayeredOptions<'h> for UpdateOptions<'h> {
    type Settings = UpdateSettings;

    fn into_layers(self) -> (Option<UpdateSettings>, Option<&'h mut dyn Hooks>) {
        (self.update_options, self.update_hook)
    }
}

impl<'h> LayeredOptions<'h> for ReplaceOptions<'h> {
    type Settings = ReplaceSettings;

    fn into_layers(self) -> (Option<ReplaceSettings>, Option<&'h mut dyn Hooks>) {
        (self.replace_options, self.update_hook)
    }
}

impl<'h> LayeredOptions<'h> for UpsertOptions<'h> {
    type Settings = ReplaceSettings;

    fn into_layers(self) -> (Option<ReplaceSettings>, Option<&'h mut dyn Hooks>) {
        (self.replace_options, self.upsert_hook)
    }
}

impl<'h> LayeredOptions<'h> for RemoveOptions<'h> {
    type Settings = DeleteSettings;

    fn into_layers(self) -> (Option<DeleteSettings>, Option<&'h mut dyn Hooks>) {
        (self.delete_options, self.remove_hook)
    }
}

impl<'h> LayeredOptions<'h> for FindOptions<'h> {
    type Settings = ();

    fn into_layers(self) -> (Option<()>, Option<&'h mut dyn Hooks>) {
        (None, self.query_hook)
    }
}

impl<'h> LayeredOptions<'h> for AggregateOptions {
    type Settings = AggregateSettings;

    fn into_layers(self) -> (Option<AggregateSettings>, Option<&'h mut dyn Hooks>) {
        (self.aggregate_options, None)
    }
}

impl<'h> LayeredOptions<'h> for SessionOptions {
    type Settings = SessionSettings;

    fn into_layers(self) -> (Option<SessionSettings>, Option<&'h mut dyn Hooks>) {
        (self.session_options, None)
    }
}

impl<'h> LayeredOptions<'h> for TransactionOptions {
    type Settings = TransactionSettings;

    fn into_layers(self) -> (Option<TransactionSettings>, Option<&'h mut dyn Hooks>) {
        (self.transaction_options, None)
    }
}

#[cfg(test)]
mod tests {
    use bson::Bson;

    use super::*;
    use crate::hooks::BeforeInsert;

    #[derive(Default)]
    struct Counter(usize);

    impl BeforeInsert for Counter {
        fn before_insert(&mut self, _ctx: &Context) -> MgoResult<()> {
            self.0 += 1;
            Ok(())
        }
    }

    impl Hooks for Counter {
        fn as_before_insert(&mut self) -> Option<&mut dyn BeforeInsert> {
            Some(self)
        }
    }

    #[test]
    fn absent_override_yields_defaults() {
        let resolved = resolve::<UpdateOptions>(None);
        assert_eq!(resolved.settings, UpdateSettings::default());
        assert!(resolved.hook.is_none());
    }

    #[test]
    fn override_settings_replace_defaults() {
        let resolved = resolve(Some(UpdateOptions {
            update_options: Some(UpdateSettings {
                upsert: Some(true),
                hint: Some(Bson::String("name_1".into())),
                ..Default::default()
            }),
            ..Default::default()
        }));

        assert_eq!(resolved.settings.upsert, Some(true));
        assert_eq!(resolved.settings.hint, Some(Bson::String("name_1".into())));
    }

    #[test]
    fn upsert_is_forced_even_when_disabled() {
        let resolved = resolve_upsert(Some(UpsertOptions {
            replace_options: Some(ReplaceSettings {
                upsert: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }));
        assert_eq!(resolved.settings.upsert, Some(true));

        assert_eq!(resolve_upsert(None).settings.upsert, Some(true));
    }

    #[test]
    fn alternate_payload_receives_hooks_instead_of_document() {
        let ctx = Context::background();
        let mut alternate = Counter::default();
        let mut document = Counter::default();

        {
            let mut resolved = resolve(Some(InsertOneOptions {
                insert_hook: Some(&mut alternate),
                ..Default::default()
            }));
            resolved
                .dispatch_with(&ctx, &mut document, HookPhase::BeforeInsert)
                .unwrap();
        }

        assert_eq!(alternate.0, 1);
        assert_eq!(document.0, 0);
    }

    #[test]
    fn document_receives_hooks_without_alternate() {
        let ctx = Context::background();
        let mut document = Counter::default();

        let mut resolved = resolve::<InsertOneOptions>(None);
        resolved
            .dispatch_with(&ctx, &mut document, HookPhase::BeforeInsert)
            .unwrap();
        resolved.dispatch(&ctx, HookPhase::BeforeInsert).unwrap();

        assert_eq!(document.0, 1);
    }
}
