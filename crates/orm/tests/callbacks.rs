mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use strata_orm::{
    CallbackKind, FindOptions, ModelDef, ModelError, ModelObserver, ModelResult, ObservedEvent, Orm, Value,
};

use common::orm_with;

const SCHEMA: [&str; 2] = [
    "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name VARCHAR(255))",
    "CREATE TABLE posts (id INTEGER PRIMARY KEY AUTOINCREMENT, user_id INTEGER, title VARCHAR(255))",
];

#[derive(Clone, Default)]
struct EventTracker(Arc<Mutex<Vec<String>>>);

impl EventTracker {
    fn track(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl ModelObserver for EventTracker {
    fn on_event(&self, event: &ObservedEvent<'_>) -> ModelResult<()> {
        match event.relation {
            Some(relation) => self.track(format!("{}:{}:{}", event.model, event.kind, relation)),
            None => self.track(format!("{}:{}", event.model, event.kind)),
        }
        Ok(())
    }
}

fn title_of(record: &strata_orm::Record) -> String {
    record.read("title").to_text().unwrap_or_default()
}

#[tokio::test]
async fn test_find_callbacks_run_for_finders_and_sql() {
    let orm = orm_with(&SCHEMA).await;
    let before = Arc::new(AtomicUsize::new(0));
    let after = Arc::new(AtomicUsize::new(0));
    let (b, a) = (before.clone(), after.clone());
    orm.define(
        ModelDef::new("User")
            .before_find(move |_| {
                b.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .callback(CallbackKind::AfterFind, move |_| {
                a.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
    )
    .unwrap();
    let users = orm.model("User").await.unwrap();
    for name in ["ann", "bob", "cid"] {
        users.create(vec![("name", name)]).await.unwrap();
    }
    assert_eq!(before.load(Ordering::SeqCst), 0);

    assert_eq!(users.all(FindOptions::default()).await.unwrap().len(), 3);
    assert_eq!(before.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 3);

    users.find_by_sql("SELECT * FROM users WHERE name <> ?", &[Value::from("ann")])
        .await
        .unwrap();
    assert_eq!(before.load(Ordering::SeqCst), 2);
    assert_eq!(after.load(Ordering::SeqCst), 5);

    // counts do not load records
    users.count(FindOptions::default()).await.unwrap();
    assert_eq!(before.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failing_before_find_aborts_the_query() {
    let orm = orm_with(&SCHEMA).await;
    orm.define(ModelDef::new("User").before_find(|model| {
        Err(ModelError::Query(format!("{} is locked", model.class_name())))
    }))
    .unwrap();
    let users = orm.model("User").await.unwrap();
    users.create(vec![("name", "ann")]).await.unwrap();

    let err = users.first(FindOptions::default()).await.unwrap_err();
    assert!(matches!(err, ModelError::Query(message) if message == "User is locked"));
}

async fn tracked_blog(tracker: &EventTracker) -> Orm {
    let orm = orm_with(&SCHEMA).await;
    let log = tracker.clone();
    let guard = tracker.clone();
    let removed = tracker.clone();
    orm.define(
        ModelDef::new("User")
            .has_many("posts")
            .association_callback(CallbackKind::BeforeAdd, "posts", move |_, post| {
                if title_of(post) == "banned" {
                    return Err(ModelError::Relationship("banned title".into()));
                }
                guard.track(format!("before_add {}", title_of(post)));
                Ok(())
            })
            .association_callback(CallbackKind::AfterAdd, "posts", move |owner, post| {
                log.track(format!("after_add {} to {}", title_of(post), owner.read("name")));
                Ok(())
            })
            .association_callback(CallbackKind::BeforeRemove, "posts", {
                let removed = removed.clone();
                move |_, post| {
                    removed.track(format!("before_remove {}", title_of(post)));
                    Ok(())
                }
            })
            .association_callback(CallbackKind::AfterRemove, "posts", move |_, post| {
                removed.track(format!("after_remove {}", title_of(post)));
                Ok(())
            }),
    )
    .unwrap();
    orm.define(ModelDef::new("Post").belongs_to("user")).unwrap();
    orm
}

#[tokio::test]
async fn test_association_callbacks_wrap_push_and_remove() {
    let tracker = EventTracker::default();
    let orm = tracked_blog(&tracker).await;
    let users = orm.model("User").await.unwrap();
    let posts = orm.model("Post").await.unwrap();

    let mut user = users.create(vec![("name", "ann")]).await.unwrap();
    let first = posts.new_record(vec![("title", "first")]).unwrap();
    let second = posts.new_record(vec![("title", "second")]).unwrap();
    assert!(user.push_association("posts", vec![first, second]).await.unwrap());
    assert_eq!(
        tracker.take(),
        vec![
            "before_add first",
            "after_add first to ann",
            "before_add second",
            "after_add second to ann",
        ]
    );

    let mine = user
        .find_association("posts", "all", FindOptions::default())
        .await
        .unwrap()
        .many();
    user.delete_association("posts", &mine[..1]).await.unwrap();
    user.destroy_association("posts", mine[1..].to_vec()).await.unwrap();
    assert_eq!(
        tracker.take(),
        vec![
            "before_remove first",
            "after_remove first",
            "before_remove second",
            "after_remove second",
        ]
    );
    assert_eq!(posts.count(FindOptions::default()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_failing_before_add_stops_the_push() {
    let tracker = EventTracker::default();
    let orm = tracked_blog(&tracker).await;
    let users = orm.model("User").await.unwrap();
    let posts = orm.model("Post").await.unwrap();

    let mut user = users.create(vec![("name", "ann")]).await.unwrap();
    let banned = posts.new_record(vec![("title", "banned")]).unwrap();
    let err = user.push_association("posts", vec![banned]).await.unwrap_err();
    assert!(matches!(err, ModelError::Relationship(_)));
    assert_eq!(posts.count(FindOptions::default()).await.unwrap(), 0);
    assert!(tracker.take().is_empty());
}

#[tokio::test]
async fn test_observer_sees_lifecycle_events() {
    let tracker = EventTracker::default();
    let orm = orm_with(&SCHEMA).await;
    orm.define(ModelDef::new("User").has_many("posts").add_observer(tracker.clone()))
        .unwrap();
    orm.define(ModelDef::new("Post")).unwrap();
    let users = orm.model("User").await.unwrap();
    let posts = orm.model("Post").await.unwrap();

    let mut user = users.create(vec![("name", "ann")]).await.unwrap();
    assert_eq!(
        tracker.take(),
        vec![
            "User:before_validation",
            "User:before_save",
            "User:before_create",
            "User:after_create",
            "User:after_save",
        ]
    );

    users.find(user.id()).await.unwrap();
    assert_eq!(tracker.take(), vec!["User:before_find", "User:after_find"]);

    let post = posts.new_record(vec![("title", "hello")]).unwrap();
    user.push_association("posts", vec![post]).await.unwrap();
    assert_eq!(
        tracker.take(),
        vec!["User:before_add:posts", "User:after_add:posts"]
    );

    user.destroy().await.unwrap();
    assert_eq!(tracker.take(), vec!["User:before_delete", "User:after_delete"]);
}
