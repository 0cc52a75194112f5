mod common;

use std::collections::BTreeSet;

use mgolayer::{driver::AggregateSettings, prelude::*};

use common::{Recorder, connect, seed_people};

#[derive(Debug, PartialEq, Deserialize)]
struct Person {
    #[serde(rename = "_id")]
    id: i32,
    name: String,
    age: i32,
}

#[derive(Debug, PartialEq, Deserialize)]
struct NameOnly {
    name: String,
}

fn names(people: &[Person]) -> Vec<&str> {
    people.iter().map(|person| person.name.as_str()).collect()
}

#[tokio::test]
async fn sort_skip_and_limit() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;
    let ctx = Context::background();

    let oldest_first: Vec<Person> = users
        .find(&ctx, doc! {}, None)
        .sort(["-age", "name"])
        .all()
        .await
        .unwrap();
    assert_eq!(names(&oldest_first), vec!["Cid", "Ann", "Bob", "Dee"]);

    let page: Vec<Person> = users
        .find(&ctx, doc! {}, None)
        .sort(["age", "-name"])
        .skip(1)
        .limit(2)
        .all()
        .await
        .unwrap();
    assert_eq!(names(&page), vec!["Bob", "Ann"]);
}

#[tokio::test]
async fn one_honors_sort_and_skip() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;
    let ctx = Context::background();

    let second_youngest: Person = users
        .find(&ctx, doc! {}, None)
        .sort(["age", "name"])
        .skip(1)
        .one()
        .await
        .unwrap();
    assert_eq!(second_youngest.name, "Dee");

    let err = users
        .find(&ctx, doc! { "name": "Zed" }, None)
        .one::<Person>()
        .await
        .unwrap_err();
    assert!(matches!(err, MgoError::NoSuchDocuments));
}

#[tokio::test]
async fn select_projects_fields() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;
    let ctx = Context::background();

    let projected: Document = users
        .find(&ctx, doc! { "_id": 3 }, None)
        .select(doc! { "name": 1, "_id": 0 })
        .one()
        .await
        .unwrap();
    assert_eq!(projected, doc! { "name": "Cid" });

    let slim: Vec<NameOnly> = users
        .find(&ctx, doc! { "team": "blue" }, None)
        .sort(["name"])
        .select(doc! { "name": 1 })
        .all()
        .await
        .unwrap();
    assert_eq!(
        slim,
        vec![
            NameOnly { name: "Ann".into() },
            NameOnly { name: "Cid".into() }
        ]
    );
}

#[tokio::test]
async fn count_and_exists() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;
    let ctx = Context::background();

    assert_eq!(
        users
            .find(&ctx, doc! { "age": { "$gte": 30 } }, None)
            .count()
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        users
            .find(&ctx, doc! {}, None)
            .skip(1)
            .limit(2)
            .count()
            .await
            .unwrap(),
        2
    );
    assert!(
        users
            .find(&ctx, doc! { "team": "red" }, None)
            .exists()
            .await
            .unwrap()
    );
    assert!(
        !users
            .find(&ctx, doc! { "team": "pink" }, None)
            .exists()
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn query_hooks_wrap_reads() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;
    let ctx = Context::background();

    let mut recorder = Recorder::default();
    let _: Vec<Person> = users
        .find(
            &ctx,
            doc! {},
            Some(FindOptions {
                query_hook: Some(&mut recorder),
            }),
        )
        .all()
        .await
        .unwrap();
    assert_eq!(recorder.events(), vec!["beforeQuery", "afterQuery"]);

    let mut rejecting = Recorder::failing_on("beforeQuery");
    let err = users
        .find(
            &ctx,
            doc! {},
            Some(FindOptions {
                query_hook: Some(&mut rejecting),
            }),
        )
        .one::<Person>()
        .await
        .unwrap_err();
    assert!(matches!(err, MgoError::Hook(_)));
    assert_eq!(rejecting.events(), vec!["beforeQuery"]);
}

#[tokio::test]
async fn distinct_into_sequences() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;
    let ctx = Context::background();

    let mut ages: Vec<i32> = users
        .find(&ctx, doc! {}, None)
        .distinct("age")
        .await
        .unwrap();
    ages.sort();
    assert_eq!(ages, vec![25, 31, 40]);

    let teams: BTreeSet<String> = users
        .find(&ctx, doc! { "age": { "$lt": 35 } }, None)
        .distinct("team")
        .await
        .unwrap();
    assert_eq!(
        teams.into_iter().collect::<Vec<_>>(),
        vec!["blue", "green", "red"]
    );
}

#[tokio::test]
async fn distinct_rejects_non_sequence_destination() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;

    let err = users
        .find(&Context::background(), doc! {}, None)
        .distinct::<i32>("age")
        .await
        .unwrap_err();
    assert!(matches!(err, MgoError::QueryNotSlicePointer));
}

#[tokio::test]
async fn distinct_reports_element_mismatch() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;

    let err = users
        .find(&Context::background(), doc! {}, None)
        .distinct::<Vec<i32>>("name")
        .await
        .unwrap_err();
    assert!(matches!(err, MgoError::QueryResultTypeInconsistent));
}

#[tokio::test]
async fn cursor_iterates_and_closes() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;
    let ctx = Context::background();

    let mut cursor = users
        .find(&ctx, doc! { "team": "blue" }, None)
        .sort(["name"])
        .cursor()
        .await;

    let mut seen = Vec::new();
    while let Some(person) = cursor.next::<Person>().await {
        seen.push(person.name);
    }
    assert!(cursor.err().is_none());
    assert_eq!(seen, vec!["Ann", "Cid"]);

    cursor.close().await.unwrap();
    cursor.close().await.unwrap();
    assert!(cursor.next::<Person>().await.is_none());
}

#[tokio::test]
async fn cursor_keeps_open_failure() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;

    let mut cursor = users
        .find(
            &Context::background(),
            doc! { "age": { "$bogus": 1 } },
            None,
        )
        .cursor()
        .await;

    assert!(cursor.next::<Person>().await.is_none());
    assert!(matches!(cursor.err(), Some(MgoError::Driver(_))));
    assert!(cursor.close().await.is_err());
}

#[tokio::test]
async fn cursor_reports_decode_failure() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;

    let mut cursor = users
        .find(&Context::background(), doc! {}, None)
        .cursor()
        .await;

    assert!(cursor.next::<NameOnly>().await.is_some());
    assert!(cursor.next::<Vec<i32>>().await.is_none());
    assert!(matches!(cursor.err(), Some(MgoError::Serialization(_))));
}

#[tokio::test]
async fn apply_updates_and_returns_requested_image() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;
    let ctx = Context::background();

    let before: Option<Person> = users
        .find(&ctx, doc! { "name": "Bob" }, None)
        .apply(Change {
            update: doc! { "$inc": { "age": 1 } },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(before.map(|p| p.age), Some(25));

    let after: Option<Person> = users
        .find(&ctx, doc! { "name": "Bob" }, None)
        .apply(Change {
            update: doc! { "$inc": { "age": 1 } },
            return_new: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(after.map(|p| p.age), Some(27));
}

#[tokio::test]
async fn apply_follows_sort_order() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;

    let removed: Option<Person> = users
        .find(&Context::background(), doc! { "team": "blue" }, None)
        .sort(["-age"])
        .apply(Change {
            remove: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(removed.map(|p| p.name), Some("Cid".to_string()));
    assert_eq!(
        users
            .find(&Context::background(), doc! {}, None)
            .count()
            .await
            .unwrap(),
        3
    );
}

#[tokio::test]
async fn apply_replace_keeps_identifier() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;
    let ctx = Context::background();

    let replaced: Option<Document> = users
        .find(&ctx, doc! { "_id": 4 }, None)
        .apply(Change {
            update: doc! { "name": "Dee", "age": 26 },
            replace: true,
            return_new: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(replaced, Some(doc! { "_id": 4, "name": "Dee", "age": 26 }));
}

#[tokio::test]
async fn apply_without_match() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;
    let ctx = Context::background();

    let err = users
        .find(&ctx, doc! { "name": "Zed" }, None)
        .apply::<Person>(Change {
            update: doc! { "$set": { "age": 1 } },
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MgoError::NoSuchDocuments));

    // An upsert asking for the pre-image inserts and reports nothing.
    let silent: Option<Document> = users
        .find(&ctx, doc! { "_id": 9, "name": "Zed" }, None)
        .apply(Change {
            update: doc! { "name": "Zed", "age": 1 },
            replace: true,
            upsert: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(silent.is_none());

    let created: Option<Person> = users
        .find(&ctx, doc! { "_id": 10, "name": "Eve" }, None)
        .apply(Change {
            update: doc! { "$set": { "age": 22 } },
            upsert: true,
            return_new: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(
        created,
        Some(Person {
            id: 10,
            name: "Eve".into(),
            age: 22
        })
    );
    assert_eq!(users.find(&ctx, doc! {}, None).count().await.unwrap(), 6);
}

#[tokio::test]
async fn aggregate_pipelines() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;
    let ctx = Context::background();

    let young: Vec<NameOnly> = users
        .aggregate(
            &ctx,
            vec![
                doc! { "$match": { "age": { "$lt": 35 } } },
                doc! { "$sort": { "name": -1 } },
                doc! { "$project": { "name": 1, "_id": 0 } },
            ],
            Some(AggregateOptions {
                aggregate_options: Some(AggregateSettings {
                    allow_disk_use: Some(true),
                    ..Default::default()
                }),
            }),
        )
        .all()
        .await
        .unwrap();
    assert_eq!(
        young.iter().map(|n| n.name.as_str()).collect::<Vec<_>>(),
        vec!["Dee", "Bob", "Ann"]
    );

    let counted: Document = users
        .aggregate(
            &ctx,
            vec![
                doc! { "$match": { "team": "blue" } },
                doc! { "$count": "total" },
            ],
            None,
        )
        .one()
        .await
        .unwrap();
    assert_eq!(counted.get_i32("total").unwrap(), 2);

    let err = users
        .aggregate(&ctx, vec![doc! { "$match": { "team": "none" } }], None)
        .one::<Document>()
        .await
        .unwrap_err();
    assert!(matches!(err, MgoError::NoSuchDocuments));
}
