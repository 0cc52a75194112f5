mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use mgolayer::{driver::TransactionSettings, memory::InMemoryDriver, prelude::*};

use common::{connect, connect_with, seed_people};

#[tokio::test]
async fn committed_writes_are_visible() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    let ctx = Context::background();

    let inserted = client
        .do_transaction(
            &ctx,
            |txn| {
                let users = users.clone();
                async move {
                    users
                        .insert_one(&txn, &mut doc! { "name": "Ann" }, None)
                        .await?;
                    users
                        .insert_one(&txn, &mut doc! { "name": "Bob" }, None)
                        .await?;
                    Ok::<_, MgoError>(2)
                }
            },
            Some(TransactionOptions {
                transaction_options: Some(TransactionSettings::default()),
            }),
        )
        .await
        .unwrap();

    assert_eq!(inserted, 2);
    assert_eq!(users.find(&ctx, doc! {}, None).count().await.unwrap(), 2);
}

#[tokio::test]
async fn retry_sentinel_reruns_the_callback() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    let ctx = Context::background();
    let attempts = Arc::new(AtomicUsize::new(0));

    let outcome = client
        .do_transaction(
            &ctx,
            |txn| {
                let users = users.clone();
                let attempts = attempts.clone();
                async move {
                    users
                        .insert_one(&txn, &mut doc! { "name": "Ann" }, None)
                        .await?;
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(MgoError::TransactionRetry);
                    }
                    Ok::<_, MgoError>("done")
                }
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome, "done");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    // The first attempt was rolled back.
    assert_eq!(users.find(&ctx, doc! {}, None).count().await.unwrap(), 1);
}

#[tokio::test]
async fn callback_error_rolls_back() {
    let client = connect().await;
    let users = client.database("app").collection("users");
    seed_people(&users).await;
    let ctx = Context::background();

    let err = client
        .do_transaction(
            &ctx,
            |txn| {
                let users = users.clone();
                async move {
                    users.remove_all(&txn, doc! {}, None).await?;
                    users
                        .insert_one(&txn, &mut doc! { "_id": 99 }, None)
                        .await?;
                    Err::<(), _>(MgoError::Hook("validation failed".into()))
                }
            },
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MgoError::Hook(_)));
    assert_eq!(users.find(&ctx, doc! {}, None).count().await.unwrap(), 4);
    assert!(
        !users
            .find(&ctx, doc! { "_id": 99 }, None)
            .exists()
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn old_servers_refuse_transactions() {
    let client = connect_with(InMemoryDriver::builder().server_version("3.6.8")).await;
    let calls = Arc::new(AtomicUsize::new(0));

    let err = client
        .do_transaction(
            &Context::background(),
            |_txn| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, MgoError>(())
                }
            },
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MgoError::TransactionNotSupported));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_server_version_refuses_transactions() {
    let client = connect_with(InMemoryDriver::builder().without_server_version()).await;

    let err = client
        .do_transaction(&Context::background(), |_txn| async { Ok::<_, MgoError>(()) }, None)
        .await
        .unwrap_err();

    assert!(matches!(err, MgoError::TransactionNotSupported));
}

#[tokio::test]
async fn explicit_session_runs_transactions() {
    let client = connect_with(InMemoryDriver::builder().server_version("4.0.0")).await;
    let users = client.database("app").collection("users");
    let ctx = Context::background();

    let session = client.session(None).await.unwrap();
    assert!(!session.in_transaction());

    session
        .start_transaction(
            &ctx,
            |txn| {
                let users = users.clone();
                async move {
                    assert!(txn.session().is_some());
                    users
                        .insert_one(&txn, &mut doc! { "name": "Ann" }, None)
                        .await?;
                    Ok::<_, MgoError>(())
                }
            },
            None,
        )
        .await
        .unwrap();
    assert!(!session.in_transaction());
    session.end_session().await.unwrap();

    assert_eq!(users.find(&ctx, doc! {}, None).count().await.unwrap(), 1);
}
