//! Translation of layer configuration and settings into `mongodb` options.

use std::time::Duration;

use bson::Bson;
use mongodb::options::{
    AggregateOptions, AuthMechanism, ClientOptions, CountOptions, Credential as MongoCredential,
    DeleteOptions, FindOneOptions, FindOptions, Hint, InsertManyOptions, InsertOneOptions,
    ReadPreference, ReadPreferenceOptions, ReplaceOptions, SelectionCriteria, UpdateOptions,
};

use mgolayer_core::{
    config::{Config, ReadMode, ReadPref, ResolvedCredential},
    driver::{
        AggregateSettings, CountSettings, DeleteSettings, FindSettings, InsertSettings,
        ReplaceSettings, UpdateSettings,
    },
    error::{MgoError, MgoResult},
};

/// Builds client options from `config`.
///
/// The URI is parsed first; explicit `config` fields then override what it specifies.
///
/// # Errors
///
/// Returns [`MgoError::Initialization`] if the URI or the authentication mechanism cannot be
/// parsed, and the credential validation errors of
/// [`Credential::resolve`](mgolayer_core::config::Credential::resolve).
pub async fn client_options(config: &Config) -> MgoResult<ClientOptions> {
    let mut options = ClientOptions::parse(&config.uri)
        .await
        .map_err(|e| MgoError::Initialization(e.to_string()))?;

    options.connect_timeout = Some(config.connect_timeout().unwrap_or(Duration::ZERO));
    options.max_pool_size = Some(config.max_pool_size());
    options.min_pool_size = Some(config.min_pool_size());
    options.selection_criteria = Some(SelectionCriteria::ReadPreference(read_preference(
        &config.read_preference(),
    )));

    if let Some(auth) = &config.auth {
        let resolved = auth.resolve()?;
        if resolved.username.is_some() || resolved.mechanism.is_some() {
            options.credential = Some(credential(resolved)?);
        }
    }

    Ok(options)
}

fn credential(resolved: ResolvedCredential) -> MgoResult<MongoCredential> {
    let mechanism = resolved
        .mechanism
        .map(|name| name.parse::<AuthMechanism>())
        .transpose()
        .map_err(|e| MgoError::Initialization(e.to_string()))?;

    Ok(MongoCredential::builder()
        .username(resolved.username)
        .password(
            resolved
                .password
                .or_else(|| resolved.password_set.then(String::new)),
        )
        .source(resolved.source)
        .mechanism(mechanism)
        .build())
}

pub(crate) fn read_preference(pref: &ReadPref) -> ReadPreference {
    let options = pref
        .max_staleness()
        .map(|staleness| ReadPreferenceOptions::builder().max_staleness(staleness).build());

    match pref.mode {
        ReadMode::Primary => ReadPreference::Primary,
        ReadMode::PrimaryPreferred => ReadPreference::PrimaryPreferred { options },
        ReadMode::Secondary => ReadPreference::Secondary { options },
        ReadMode::SecondaryPreferred => ReadPreference::SecondaryPreferred { options },
        ReadMode::Nearest => ReadPreference::Nearest { options },
    }
}

pub(crate) fn hint(value: Option<Bson>) -> Option<Hint> {
    match value? {
        Bson::Document(keys) => Some(Hint::Keys(keys)),
        Bson::String(name) => Some(Hint::Name(name)),
        _ => None,
    }
}

pub(crate) fn find_options(settings: FindSettings) -> FindOptions {
    let mut options = FindOptions::default();
    options.sort = settings.sort;
    options.projection = settings.projection;
    options.skip = settings.skip;
    options.limit = settings.limit;
    options.hint = hint(settings.hint);
    options
}

pub(crate) fn find_one_options(settings: FindSettings) -> FindOneOptions {
    let mut options = FindOneOptions::default();
    options.sort = settings.sort;
    options.projection = settings.projection;
    options.skip = settings.skip;
    options.hint = hint(settings.hint);
    options
}

pub(crate) fn count_options(settings: CountSettings) -> CountOptions {
    let mut options = CountOptions::default();
    options.skip = settings.skip;
    options.limit = settings.limit;
    options
}

pub(crate) fn insert_one_options(settings: InsertSettings) -> InsertOneOptions {
    let mut options = InsertOneOptions::default();
    options.bypass_document_validation = settings.bypass_document_validation;
    options
}

pub(crate) fn insert_many_options(settings: InsertSettings) -> InsertManyOptions {
    let mut options = InsertManyOptions::default();
    options.ordered = settings.ordered;
    options.bypass_document_validation = settings.bypass_document_validation;
    options
}

pub(crate) fn update_options(settings: UpdateSettings) -> UpdateOptions {
    let mut options = UpdateOptions::default();
    options.upsert = settings.upsert;
    options.bypass_document_validation = settings.bypass_document_validation;
    options.array_filters = settings.array_filters;
    options.hint = hint(settings.hint);
    options
}

pub(crate) fn replace_options(settings: ReplaceSettings) -> ReplaceOptions {
    let mut options = ReplaceOptions::default();
    options.upsert = settings.upsert;
    options.bypass_document_validation = settings.bypass_document_validation;
    options.hint = hint(settings.hint);
    options
}

pub(crate) fn delete_options(settings: DeleteSettings) -> DeleteOptions {
    let mut options = DeleteOptions::default();
    options.hint = hint(settings.hint);
    options
}

pub(crate) fn aggregate_options(settings: AggregateSettings) -> AggregateOptions {
    let mut options = AggregateOptions::default();
    options.allow_disk_use = settings.allow_disk_use;
    options.batch_size = settings.batch_size;
    options
}
