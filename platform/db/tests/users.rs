use std::time::Duration;

use migration::{Migrator, MigratorTrait};
use platform_authz::{PolicyEngine, roles, tokens};
use platform_db::{
    DatabaseSettings, DbError, DbPool, NewUser, UserPatch, UserStatus, connect, create_user,
    delete_user, find_user, find_user_by_email, grant_permission, list_users, load_identity,
    revoke_permission, set_active, set_department, set_role, update_user,
};

async fn setup() -> DbPool {
    let settings = DatabaseSettings::new("sqlite::memory:").with_max_connections(1);
    let pool = connect(&settings).await.unwrap();
    Migrator::up(&pool, None).await.unwrap();
    pool
}

fn new_user(email: &str) -> NewUser {
    NewUser {
        name: "Test User".into(),
        email: email.into(),
        ..NewUser::default()
    }
}

#[tokio::test]
async fn create_applies_defaults() {
    let pool = setup().await;
    let user = create_user(&pool, new_user("a@example.com")).await.unwrap();
    assert_eq!(user.role, roles::CUSTOMER);
    assert_eq!(user.department, "Core");
    assert_eq!(user.status, "pending");
    assert!(user.active);
    assert!(user.permissions.is_empty());

    let found = find_user(&pool, user.id).await.unwrap().unwrap();
    assert_eq!(found, user);
    let by_email = find_user_by_email(&pool, "a@example.com").await.unwrap();
    assert_eq!(by_email.map(|u| u.id), Some(user.id));
}

#[tokio::test]
async fn duplicate_email_conflicts() {
    let pool = setup().await;
    create_user(&pool, new_user("dup@example.com")).await.unwrap();
    let err = create_user(&pool, new_user("dup@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Conflict(_)), "got {err:?}");
}

#[tokio::test]
async fn list_is_newest_first() {
    let pool = setup().await;
    let first = create_user(&pool, new_user("first@example.com")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = create_user(&pool, new_user("second@example.com")).await.unwrap();
    grant_permission(&pool, first.id, tokens::VIEW_HR).await.unwrap();

    let listed = list_users(&pool).await.unwrap();
    let ids: Vec<_> = listed.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
    assert_eq!(listed[1].permissions, vec![tokens::VIEW_HR.to_string()]);
}

#[tokio::test]
async fn patch_updates_only_given_fields() {
    let pool = setup().await;
    let user = create_user(&pool, new_user("p@example.com")).await.unwrap();
    let patched = update_user(
        &pool,
        user.id,
        UserPatch {
            phone: Some("+63 900 000 0000".into()),
            status: Some(UserStatus::Active),
            ..UserPatch::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(patched.name, user.name);
    assert_eq!(patched.email, user.email);
    assert_eq!(patched.phone.as_deref(), Some("+63 900 000 0000"));
    assert_eq!(patched.status, "active");
}

#[tokio::test]
async fn role_and_grants_drive_identity() {
    let pool = setup().await;
    let engine = PolicyEngine::default();
    let user = create_user(&pool, new_user("r@example.com")).await.unwrap();

    let identity = load_identity(&pool, user.id).await.unwrap().unwrap();
    assert!(!engine.is_allowed(Some(&identity), tokens::VIEW_FINANCIALS));

    set_role(&pool, user.id, roles::FINANCE_MANAGER).await.unwrap();
    let identity = load_identity(&pool, user.id).await.unwrap().unwrap();
    assert!(engine.is_allowed(Some(&identity), tokens::MANAGE_FINANCIALS));
    assert!(!engine.is_allowed(Some(&identity), tokens::VIEW_HR));

    grant_permission(&pool, user.id, tokens::VIEW_HR).await.unwrap();
    let again = grant_permission(&pool, user.id, tokens::VIEW_HR).await.unwrap();
    assert_eq!(again.permissions, vec![tokens::VIEW_HR.to_string()]);
    let identity = load_identity(&pool, user.id).await.unwrap().unwrap();
    assert!(engine.is_allowed(Some(&identity), tokens::VIEW_HR));

    // revoking an explicit grant never touches role-derived tokens
    revoke_permission(&pool, user.id, tokens::VIEW_HR).await.unwrap();
    revoke_permission(&pool, user.id, tokens::VIEW_FINANCIALS)
        .await
        .unwrap();
    let identity = load_identity(&pool, user.id).await.unwrap().unwrap();
    assert!(!engine.is_allowed(Some(&identity), tokens::VIEW_HR));
    assert!(engine.is_allowed(Some(&identity), tokens::VIEW_FINANCIALS));
}

#[tokio::test]
async fn department_change_is_persisted() {
    let pool = setup().await;
    let user = create_user(&pool, new_user("d@example.com")).await.unwrap();
    let moved = set_department(&pool, user.id, "Logistics").await.unwrap();
    assert_eq!(moved.department, "Logistics");
    assert_eq!(
        find_user(&pool, user.id).await.unwrap().unwrap().department,
        "Logistics"
    );
}

#[tokio::test]
async fn deactivated_users_have_no_identity() {
    let pool = setup().await;
    let user = create_user(&pool, new_user("x@example.com")).await.unwrap();

    let suspended = set_active(&pool, user.id, false).await.unwrap();
    assert!(!suspended.active);
    assert_eq!(suspended.status, "suspended");
    assert!(load_identity(&pool, user.id).await.unwrap().is_none());

    let restored = set_active(&pool, user.id, true).await.unwrap();
    assert_eq!(restored.status, "active");
    assert!(load_identity(&pool, user.id).await.unwrap().is_some());
}

#[tokio::test]
async fn delete_is_hard_removal() {
    let pool = setup().await;
    let user = create_user(&pool, new_user("del@example.com")).await.unwrap();
    grant_permission(&pool, user.id, tokens::EDIT_CORE).await.unwrap();

    delete_user(&pool, user.id).await.unwrap();
    assert!(find_user(&pool, user.id).await.unwrap().is_none());
    assert!(load_identity(&pool, user.id).await.unwrap().is_none());
    assert!(matches!(
        delete_user(&pool, user.id).await,
        Err(DbError::NotFound)
    ));

    // the email can be reused once the row is gone
    let again = create_user(&pool, new_user("del@example.com")).await.unwrap();
    assert!(again.permissions.is_empty());
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let pool = setup().await;
    let id = uuid::Uuid::new_v4();
    assert!(matches!(
        set_role(&pool, id, roles::ADMIN).await,
        Err(DbError::NotFound)
    ));
    assert!(matches!(
        grant_permission(&pool, id, tokens::VIEW_HR).await,
        Err(DbError::NotFound)
    ));
    assert!(load_identity(&pool, id).await.unwrap().is_none());
}
