#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use mgolayer::{
    memory::{InMemoryDriver, InMemoryDriverBuilder},
    model::nil_object_id,
    prelude::*,
};

pub type MemClient = Client<InMemoryDriver>;

pub const URI: &str = "mem://test";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn connect_with(builder: InMemoryDriverBuilder) -> MemClient {
    init_tracing();
    let driver = builder.build().await.unwrap();
    Client::connect(driver, Config::new(URI), Default::default())
        .await
        .unwrap()
}

pub async fn connect() -> MemClient {
    connect_with(InMemoryDriver::builder()).await
}

/// A model that stamps its own identifier and creation time on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Model, Hooks)]
#[model(collection = "users")]
#[hooks(before_insert)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "createdAt")]
    pub created_at: bson::DateTime,
    pub name: String,
    pub age: i32,
}

impl User {
    pub fn new(name: &str, age: i32) -> Self {
        Self {
            id: nil_object_id(),
            created_at: bson::DateTime::from_millis(0),
            name: name.to_string(),
            age,
        }
    }
}

impl BeforeInsert for User {
    fn before_insert(&mut self, _ctx: &Context) -> MgoResult<()> {
        self.id = new_object_id();
        self.created_at = bson::DateTime::now();
        Ok(())
    }
}

/// Records every hook phase it sees, optionally failing one of them.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub events: Arc<Mutex<Vec<&'static str>>>,
    pub fail_on: Option<&'static str>,
}

impl Recorder {
    pub fn failing_on(phase: &'static str) -> Self {
        Self {
            fail_on: Some(phase),
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, phase: &'static str) -> MgoResult<()> {
        self.events.lock().unwrap().push(phase);
        if self.fail_on == Some(phase) {
            return Err(MgoError::Hook(format!("{phase} rejected")));
        }
        Ok(())
    }
}

macro_rules! record_phase {
    ($($capability:ident :: $method:ident => $phase:literal),* $(,)?) => {
        $(
            impl $capability for Recorder {
                fn $method(&mut self, _ctx: &Context) -> MgoResult<()> {
                    self.record($phase)
                }
            }
        )*
    };
}

record_phase! {
    BeforeInsert::before_insert => "beforeInsert",
    AfterInsert::after_insert => "afterInsert",
    BeforeUpdate::before_update => "beforeUpdate",
    AfterUpdate::after_update => "afterUpdate",
    BeforeQuery::before_query => "beforeQuery",
    AfterQuery::after_query => "afterQuery",
    BeforeRemove::before_remove => "beforeRemove",
    AfterRemove::after_remove => "afterRemove",
    BeforeUpsert::before_upsert => "beforeUpsert",
    AfterUpsert::after_upsert => "afterUpsert",
}

impl Hooks for Recorder {
    fn as_before_insert(&mut self) -> Option<&mut dyn BeforeInsert> {
        Some(self)
    }
    fn as_after_insert(&mut self) -> Option<&mut dyn AfterInsert> {
        Some(self)
    }
    fn as_before_update(&mut self) -> Option<&mut dyn BeforeUpdate> {
        Some(self)
    }
    fn as_after_update(&mut self) -> Option<&mut dyn AfterUpdate> {
        Some(self)
    }
    fn as_before_query(&mut self) -> Option<&mut dyn BeforeQuery> {
        Some(self)
    }
    fn as_after_query(&mut self) -> Option<&mut dyn AfterQuery> {
        Some(self)
    }
    fn as_before_remove(&mut self) -> Option<&mut dyn BeforeRemove> {
        Some(self)
    }
    fn as_after_remove(&mut self) -> Option<&mut dyn AfterRemove> {
        Some(self)
    }
    fn as_before_upsert(&mut self) -> Option<&mut dyn BeforeUpsert> {
        Some(self)
    }
    fn as_after_upsert(&mut self) -> Option<&mut dyn AfterUpsert> {
        Some(self)
    }
}

pub async fn seed_people(users: &Collection<InMemoryDriver>) {
    let ctx = Context::background();
    let mut people = vec![
        doc! { "_id": 1, "name": "Ann", "age": 31, "team": "blue" },
        doc! { "_id": 2, "name": "Bob", "age": 25, "team": "red" },
        doc! { "_id": 3, "name": "Cid", "age": 40, "team": "blue" },
        doc! { "_id": 4, "name": "Dee", "age": 25, "team": "green" },
    ];
    users.insert_many(&ctx, &mut people, None).await.unwrap();
}
