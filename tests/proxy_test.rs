mod common;

use scoped_unit_of_work::{
    ExecutionContext, FactoryRegistry, PersistenceError, PersistenceUnitFactory, SessionOptions,
    UnitOfWorkProxyFactory, UnitOfWorkSpec,
};
use std::sync::Arc;
use std::time::Duration;

use common::{Behavior, Call, SpyFactory, Widget, WidgetRepository};

#[derive(Debug, thiserror::Error)]
enum ServiceError {
    #[error("widget service failed")]
    Boom,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

fn single_unit(factory: Arc<SpyFactory>) -> (UnitOfWorkProxyFactory, WidgetRepository) {
    common::init_tracing();
    let proxies =
        UnitOfWorkProxyFactory::new("default", factory).expect("Failed to build proxy factory");
    let shared = proxies
        .registry()
        .shared_handle("default")
        .expect("Shared handle should exist");
    (proxies, WidgetRepository::new(shared))
}

#[tokio::test]
async fn test_read_only_transactional_success_commits_once() {
    let factory = SpyFactory::new();
    let (proxies, repository) = single_unit(factory.clone());
    let service = proxies
        .create(repository)
        .declare("create", UnitOfWorkSpec::new().read_only(true));

    let widget = Widget::new("gear", 3);
    service
        .invoke("create", |repo, cx| async move { repo.create(&cx, &widget).await })
        .await
        .expect("Unit of work should succeed");

    assert_eq!(
        factory.calls(),
        vec![
            Call::CreateHandle,
            Call::Configure(SessionOptions {
                read_only: true,
                ..Default::default()
            }),
            Call::Begin,
            Call::Execute("persist"),
            Call::Commit,
            Call::Close,
        ]
    );
}

#[tokio::test]
async fn test_failure_rolls_back_and_returns_method_error() {
    let factory = SpyFactory::new();
    let (proxies, repository) = single_unit(factory.clone());
    let service = proxies
        .create(repository)
        .declare("create", UnitOfWorkSpec::new());

    let widget = Widget::new("sprocket", 1);
    let result: Result<(), ServiceError> = service
        .invoke("create", |repo, cx| async move {
            repo.create(&cx, &widget).await?;
            Err(ServiceError::Boom)
        })
        .await;

    assert!(matches!(result, Err(ServiceError::Boom)));
    assert_eq!(factory.count(&Call::Begin), 1);
    assert_eq!(factory.count(&Call::Commit), 0);
    assert_eq!(factory.count(&Call::Rollback), 1);
    assert_eq!(factory.calls().last(), Some(&Call::Close));
}

#[tokio::test]
async fn test_non_transactional_unit_never_touches_transactions() {
    let factory = SpyFactory::new();
    let (proxies, repository) = single_unit(factory.clone());
    let service = proxies
        .create(repository)
        .declare("find", UnitOfWorkSpec::new().transactional(false));

    let id = Widget::new("bolt", 9).id;
    let found = service
        .invoke("find", |repo, cx| async move { repo.find_by_id(&cx, id).await })
        .await
        .expect("Read should succeed");
    assert!(found.is_none());

    let result: Result<(), ServiceError> = service
        .invoke("find", |_repo, _cx| async move { Err(ServiceError::Boom) })
        .await;
    assert!(matches!(result, Err(ServiceError::Boom)));

    assert_eq!(factory.count(&Call::Begin), 0);
    assert_eq!(factory.count(&Call::Commit), 0);
    assert_eq!(factory.count(&Call::Rollback), 0);
    assert_eq!(factory.count(&Call::Close), 2);
}

#[tokio::test]
async fn test_mutation_outside_transaction_is_refused() {
    let factory = SpyFactory::new();
    let (proxies, repository) = single_unit(factory.clone());
    let service = proxies
        .create(repository)
        .declare("create", UnitOfWorkSpec::new().transactional(false));

    let widget = Widget::new("washer", 4);
    let result = service
        .invoke("create", |repo, cx| async move { repo.create(&cx, &widget).await })
        .await;

    assert!(matches!(
        result,
        Err(PersistenceError::TransactionRequired { operation: "persist" })
    ));
    assert_eq!(factory.executed(), 0);
}

#[tokio::test]
async fn test_named_unit_never_touches_default() {
    let default = SpyFactory::new();
    let reports = SpyFactory::new();
    let registry = Arc::new(FactoryRegistry::new());
    registry.register("default", default.clone()).unwrap();
    let shared = registry.register("reports", reports.clone()).unwrap();

    let proxies = UnitOfWorkProxyFactory::from_registry(registry);
    let service = proxies
        .create(WidgetRepository::new(shared))
        .declare("report", UnitOfWorkSpec::for_unit("reports").read_only(true));

    let id = Widget::new("nut", 2).id;
    service
        .invoke("report", |repo, cx| async move { repo.find_by_id(&cx, id).await })
        .await
        .expect("Report should succeed");

    assert!(default.calls().is_empty(), "Default unit must not be touched");
    assert_eq!(reports.count(&Call::Begin), 1);
    assert_eq!(reports.count(&Call::Commit), 1);
    assert_eq!(reports.count(&Call::Execute("find")), 1);
}

#[tokio::test]
async fn test_default_name_resolves_to_sole_factory() {
    let factory = SpyFactory::new();
    let registry = Arc::new(FactoryRegistry::new());
    let shared = registry.register("main", factory.clone()).unwrap();
    let service = UnitOfWorkProxyFactory::from_registry(registry)
        .create(WidgetRepository::new(shared))
        .declare("find", UnitOfWorkSpec::new());

    let id = Widget::new("pin", 1).id;
    service
        .invoke("find", |repo, cx| async move { repo.find_by_id(&cx, id).await })
        .await
        .expect("Sole factory should be used");

    assert_eq!(factory.count(&Call::CreateHandle), 1);
    assert_eq!(factory.count(&Call::Commit), 1);
}

#[tokio::test]
async fn test_default_name_is_ambiguous_with_several_factories() {
    let main = SpyFactory::new();
    let replica = SpyFactory::new();
    let registry = Arc::new(FactoryRegistry::new());
    let shared = registry.register("main", main.clone()).unwrap();
    registry.register("replica", replica.clone()).unwrap();
    let service = UnitOfWorkProxyFactory::from_registry(registry)
        .create(WidgetRepository::new(shared))
        .declare("find", UnitOfWorkSpec::new());

    let mut called = false;
    let result = service
        .invoke("find", |_repo, _cx| {
            called = true;
            async move { Ok::<_, PersistenceError>(()) }
        })
        .await;

    assert!(matches!(
        result,
        Err(PersistenceError::UnregisteredUnit(name)) if name == "default"
    ));
    assert!(!called, "Method must not run without its unit of work");
    assert!(main.calls().is_empty());
    assert!(replica.calls().is_empty());
}

#[tokio::test]
async fn test_undeclared_method_runs_without_unit_of_work() {
    let factory = SpyFactory::new();
    let (proxies, repository) = single_unit(factory.clone());
    let service = proxies.create(repository);

    let id = Widget::new("rivet", 5).id;
    let result = service
        .invoke("find", |repo, cx| async move { repo.find_by_id(&cx, id).await })
        .await;

    assert!(matches!(result, Err(PersistenceError::NoHandleBound { .. })));
    assert!(factory.calls().is_empty());
}

#[tokio::test]
async fn test_handle_released_before_invoke_returns() {
    let factory = SpyFactory::new();
    let (proxies, repository) = single_unit(factory.clone());
    let service = proxies
        .create(repository)
        .declare("create", UnitOfWorkSpec::new());
    let cx = Arc::new(ExecutionContext::new());

    let widget = Widget::new("spring", 7);
    service
        .invoke_in(cx.clone(), "create", |repo, cx| async move {
            repo.create(&cx, &widget).await
        })
        .await
        .unwrap();

    assert!(!cx.has_binding(factory.id()));
    assert!(cx.is_empty());
    assert!(factory.last_handle().unwrap().is_closed());
}

#[tokio::test]
async fn test_commit_failure_rolls_back_and_fails_the_call() {
    let factory = SpyFactory::with_behavior(Behavior {
        fail_commit: true,
        ..Default::default()
    });
    let (proxies, repository) = single_unit(factory.clone());
    let service = proxies
        .create(repository)
        .declare("create", UnitOfWorkSpec::new());

    let widget = Widget::new("cog", 8);
    let result = service
        .invoke("create", |repo, cx| async move { repo.create(&cx, &widget).await })
        .await;

    match result {
        Err(PersistenceError::CommitFailed(reason)) => assert_eq!(reason, "constraint violated"),
        other => panic!("Unexpected result: {other:?}"),
    }
    assert_eq!(
        factory.calls()[3..],
        [Call::Execute("persist"), Call::Commit, Call::Rollback, Call::Close]
    );
}

#[tokio::test]
async fn test_cancelled_call_releases_handle() {
    let factory = SpyFactory::new();
    let (proxies, repository) = single_unit(factory.clone());
    let service = proxies
        .create(repository)
        .declare("slow", UnitOfWorkSpec::new());
    let cx = Arc::new(ExecutionContext::new());

    let result = tokio::time::timeout(
        Duration::from_millis(50),
        service.invoke_in(cx.clone(), "slow", |_repo, _cx| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, PersistenceError>(())
        }),
    )
    .await;

    assert!(result.is_err(), "Call should have timed out");
    assert!(!cx.has_binding(factory.id()));
    assert!(cx.is_empty());
    assert!(factory.last_handle().unwrap().is_closed());
    assert_eq!(factory.count(&Call::Commit), 0);
    assert_eq!(factory.calls().last(), Some(&Call::Close));
}
