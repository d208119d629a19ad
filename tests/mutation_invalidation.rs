use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use refetch::{query_key, MutationOptions, MutationStatus, QueryClient, QueryError};

async fn settled(mut done: impl FnMut() -> bool) {
    for _ in 0..100_000 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("never settled");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn successful_mutation_refetches_invalidated_queries() {
    tokio::task::LocalSet::new()
        .run_until(async {
            let client = QueryClient::new();
            let key = query_key!["todos"];
            let fetches = Rc::new(Cell::new(0u32));

            let todos = client.query(
                key.clone(),
                {
                    let fetches = fetches.clone();
                    move |_key| {
                        fetches.set(fetches.get() + 1);
                        let version = fetches.get();
                        async move { Ok::<_, QueryError>(vec![format!("todo-{version}")]) }
                    }
                },
                client.query_options(),
            );
            settled(|| todos.is_success()).await;
            assert_eq!(fetches.get(), 1);

            let add_todo = client.mutation(
                |title: String| async move { Ok::<_, QueryError>(title) },
                MutationOptions::default().invalidates(vec![key.clone()]),
            );

            add_todo.mutate("buy milk".to_string());
            settled(|| add_todo.status() == MutationStatus::Success).await;
            assert_eq!(add_todo.data(), Some("buy milk".to_string()));

            settled(|| fetches.get() == 2).await;
            assert_eq!(todos.data(), Some(vec!["todo-2".to_string()]));
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn mutation_status_transitions() {
    tokio::task::LocalSet::new()
        .run_until(async {
            let client = QueryClient::new();

            let slow = client.mutation(
                |n: u32| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, QueryError>(n * 2)
                },
                MutationOptions::default(),
            );

            assert_eq!(slow.status(), MutationStatus::Idle);
            slow.mutate(21);
            assert!(slow.is_pending());
            settled(|| slow.status() == MutationStatus::Success).await;
            assert_eq!(slow.data(), Some(42));
            assert_eq!(slow.error(), None);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failed_mutation_reports_the_error_and_invalidates_nothing() {
    tokio::task::LocalSet::new()
        .run_until(async {
            let client = QueryClient::new();
            let key = query_key!["account"];
            client.set_query_data(key.clone(), 100u32);

            let errors = Rc::new(Cell::new(0u32));
            let withdraw = client.mutation(
                |_amount: u32| async move {
                    Err::<u32, _>(QueryError::http(422, "insufficient funds"))
                },
                MutationOptions::default()
                    .invalidates(vec![key.clone()])
                    .on_error({
                        let errors = errors.clone();
                        move |_| errors.set(errors.get() + 1)
                    }),
            );

            withdraw.mutate(500);
            settled(|| withdraw.status() == MutationStatus::Error).await;

            assert_eq!(
                withdraw.error(),
                Some(QueryError::http(422, "insufficient funds"))
            );
            assert_eq!(errors.get(), 1);
            assert!(
                !client.is_stale::<u32>(&key),
                "failed mutations leave the cache alone"
            );
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn mutate_async_returns_the_outcome() {
    tokio::task::LocalSet::new()
        .run_until(async {
            let client = QueryClient::new();
            let key = query_key!["counter"];
            client.set_query_data(key.clone(), 0u32);

            let bump = client.mutation(
                |by: u32| async move { Ok::<_, QueryError>(by) },
                MutationOptions::default().invalidates(vec![key.clone()]),
            );

            let result = bump.mutate_async(3).await;
            assert_eq!(result, Ok(3));
            assert_eq!(bump.status(), MutationStatus::Success);
            assert!(client.is_stale::<u32>(&key), "success invalidated the key");
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn overlapping_calls_surface_the_latest_only() {
    tokio::task::LocalSet::new()
        .run_until(async {
            let client = QueryClient::new();

            let echo = client.mutation(
                |(delay_ms, value): (u64, u32)| async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    Ok::<_, QueryError>(value)
                },
                MutationOptions::default(),
            );

            echo.mutate((100, 1));
            tokio::time::sleep(Duration::from_millis(10)).await;
            echo.mutate((10, 2));

            settled(|| echo.status() == MutationStatus::Success).await;
            assert_eq!(echo.data(), Some(2));

            // The slow first call settles later but is superseded.
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(echo.data(), Some(2));
            assert_eq!(echo.status(), MutationStatus::Success);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn reset_returns_the_handle_to_idle() {
    tokio::task::LocalSet::new()
        .run_until(async {
            let client = QueryClient::new();

            let noop = client.mutation(
                |n: u32| async move { Ok::<_, QueryError>(n) },
                MutationOptions::default(),
            );

            let _ = noop.mutate_async(5).await;
            assert_eq!(noop.status(), MutationStatus::Success);
            assert_eq!(noop.data(), Some(5));

            noop.reset();
            assert_eq!(noop.status(), MutationStatus::Idle);
            assert_eq!(noop.data(), None);
            assert_eq!(noop.error(), None);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn success_callback_runs_after_invalidation() {
    tokio::task::LocalSet::new()
        .run_until(async {
            let client = QueryClient::new();
            let key = query_key!["ordering"];
            client.set_query_data(key.clone(), 1u32);

            let stale_at_callback = Rc::new(Cell::new(false));
            let mutation = client.mutation(
                |n: u32| async move { Ok::<_, QueryError>(n) },
                MutationOptions::default()
                    .invalidates(vec![key.clone()])
                    .on_success({
                        let client = client.clone();
                        let key = key.clone();
                        let stale_at_callback = stale_at_callback.clone();
                        move |_| stale_at_callback.set(client.is_stale::<u32>(&key))
                    }),
            );

            let _ = mutation.mutate_async(2).await;
            assert!(
                stale_at_callback.get(),
                "invalidations run before on_success"
            );
        })
        .await;
}
