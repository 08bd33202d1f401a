mod common;

use std::collections::HashSet;

use strata_orm::{Arg, Dependent, FindOptions, IncludeTree, ModelDef, Orm, RelationDescriptor, Value};

use common::orm_with;

async fn blog() -> Orm {
    let orm = orm_with(&[
        "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name VARCHAR(255))",
        "CREATE TABLE profiles (id INTEGER PRIMARY KEY AUTOINCREMENT, user_id INTEGER, bio TEXT)",
        "CREATE TABLE posts (id INTEGER PRIMARY KEY AUTOINCREMENT, user_id INTEGER, title VARCHAR(255), score INTEGER)",
        "CREATE TABLE comments (id INTEGER PRIMARY KEY AUTOINCREMENT, post_id INTEGER, body TEXT)",
        "CREATE TABLE tags (id INTEGER PRIMARY KEY AUTOINCREMENT, name VARCHAR(255))",
        "CREATE TABLE tags_users (user_id INTEGER, tag_id INTEGER)",
    ])
    .await;
    orm.define(
        ModelDef::new("User")
            .has_one("profile")
            .relation(RelationDescriptor::has_many("posts").with_dependent(Dependent::Destroy))
            .relation(RelationDescriptor::has_many("comments").with_through("posts"))
            .has_and_belongs_to_many("tags"),
    )
    .unwrap();
    orm.define(ModelDef::new("Profile").belongs_to("user")).unwrap();
    orm.define(ModelDef::new("Post").belongs_to("user").has_many("comments"))
        .unwrap();
    orm.define(ModelDef::new("Comment").belongs_to("post")).unwrap();
    orm.define(ModelDef::new("Tag")).unwrap();
    orm
}

async fn join_rows(orm: &Orm) -> i64 {
    orm.connection(None)
        .await
        .unwrap()
        .select_value("SELECT COUNT(*) FROM tags_users", &[])
        .await
        .unwrap()
        .as_i64()
        .unwrap()
}

#[tokio::test]
async fn test_has_many_finds_children() {
    let orm = blog().await;
    let users = orm.model("User").await.unwrap();
    let posts = orm.model("Post").await.unwrap();

    let mut user = users.create(vec![("name", "ann")]).await.unwrap();
    for title in ["one", "two"] {
        posts
            .create(vec![("user_id", user.id()), ("title", Value::from(title))])
            .await
            .unwrap();
    }
    posts.create(vec![("title", "orphan")]).await.unwrap();

    let found = user.call("find_posts", vec![Arg::from("all")]).await.unwrap();
    assert_eq!(found.into_records().len(), 2);

    let eager = users
        .find_with("all", FindOptions::new().include("posts"))
        .await
        .unwrap()
        .many();
    assert_eq!(eager.len(), 1);
    assert_eq!(eager[0].association("posts").unwrap().len(), 2);

    assert_eq!(user.count_association("posts", FindOptions::default()).await.unwrap(), 2);
    assert_eq!(user.association_ids("posts").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_eager_fan_out_for_zero_one_and_many_children() {
    let orm = blog().await;
    let users = orm.model("User").await.unwrap();
    let posts = orm.model("Post").await.unwrap();

    let mut expected = Vec::new();
    for (name, count) in [("none", 0), ("single", 1), ("many", 3)] {
        let user = users.create(vec![("name", name)]).await.unwrap();
        for n in 0..count {
            posts
                .create(vec![
                    ("user_id", user.id()),
                    ("title", Value::from(format!("{}-{}", name, n))),
                ])
                .await
                .unwrap();
        }
        expected.push((user.id(), count));
    }

    let loaded = users
        .all(FindOptions::new().include("posts").order("users.id, posts.id"))
        .await
        .unwrap();
    assert_eq!(loaded.len(), 3);

    for (user, (id, count)) in loaded.iter().zip(&expected) {
        assert_eq!(&user.id(), id);
        let children = user.association("posts").unwrap().records();
        assert_eq!(children.len(), *count);

        let ids: HashSet<String> = children.iter().map(|p| p.id().key()).collect();
        assert_eq!(ids.len(), *count);
        for (n, post) in children.iter().enumerate() {
            assert_eq!(post.read("user_id"), *id);
            let title = format!("{}-{}", user.read("name"), n);
            assert_eq!(post.read("title"), Value::from(title));
        }
    }
}

#[tokio::test]
async fn test_sibling_and_nested_includes_do_not_multiply() {
    let orm = blog().await;
    let users = orm.model("User").await.unwrap();
    let posts = orm.model("Post").await.unwrap();
    let comments = orm.model("Comment").await.unwrap();
    let tags = orm.model("Tag").await.unwrap();

    let mut user = users.create(vec![("name", "ann")]).await.unwrap();
    for title in ["a", "b"] {
        let post = posts
            .create(vec![("user_id", user.id()), ("title", Value::from(title))])
            .await
            .unwrap();
        for body in ["x", "y"] {
            comments
                .create(vec![("post_id", post.id()), ("body", Value::from(body))])
                .await
                .unwrap();
        }
    }
    let mut new_tags = Vec::new();
    for name in ["red", "green", "blue"] {
        new_tags.push(tags.create(vec![("name", name)]).await.unwrap());
    }
    user.push_association("tags", new_tags).await.unwrap();

    let include = IncludeTree::new().nest("posts", "comments").add("tags");
    let loaded = users
        .find_with(user.id(), FindOptions::new().include(include).order("users.id, posts.id, comments.id"))
        .await
        .unwrap()
        .one()
        .unwrap();

    let loaded_posts = loaded.association("posts").unwrap().records();
    assert_eq!(loaded_posts.len(), 2);
    for post in loaded_posts {
        assert_eq!(post.association("comments").unwrap().len(), 2);
    }
    assert_eq!(loaded.association("tags").unwrap().len(), 3);
}

#[tokio::test]
async fn test_eager_singular_relations() {
    let orm = blog().await;
    let users = orm.model("User").await.unwrap();
    let profiles = orm.model("Profile").await.unwrap();
    let posts = orm.model("Post").await.unwrap();

    let with_profile = users.create(vec![("name", "ann")]).await.unwrap();
    users.create(vec![("name", "bob")]).await.unwrap();
    profiles
        .create(vec![("user_id", with_profile.id()), ("bio", Value::from("hello"))])
        .await
        .unwrap();
    posts
        .create(vec![("user_id", with_profile.id()), ("title", Value::from("p"))])
        .await
        .unwrap();

    let loaded = users
        .all(FindOptions::new().include("profile").order("users.id"))
        .await
        .unwrap();
    let bio = loaded[0].association("profile").unwrap().one().unwrap().read("bio");
    assert_eq!(bio, Value::from("hello"));
    assert!(loaded[1].association("profile").unwrap().one().is_none());

    let post = posts
        .first(FindOptions::new().include("user"))
        .await
        .unwrap()
        .unwrap();
    let author = post.association("user").unwrap().one().unwrap();
    assert_eq!(author.read("name"), Value::from("ann"));
}

#[tokio::test]
async fn test_habtm_push_and_destroy_touch_only_join_rows() {
    let orm = blog().await;
    let users = orm.model("User").await.unwrap();
    let tags = orm.model("Tag").await.unwrap();

    let mut user = users.create(vec![("name", "ann")]).await.unwrap();
    let summer = tags.create(vec![("name", "summer")]).await.unwrap();
    let winter = tags.create(vec![("name", "winter")]).await.unwrap();

    user.push_association("tags", vec![summer, winter]).await.unwrap();
    assert_eq!(join_rows(&orm).await, 2);

    let linked = user
        .find_association("tags", "all", FindOptions::default())
        .await
        .unwrap()
        .many();
    assert_eq!(linked.len(), 2);

    let removed = user.destroy_association("tags", linked).await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(join_rows(&orm).await, 0);
    assert_eq!(tags.count(FindOptions::default()).await.unwrap(), 2);
}

#[tokio::test]
async fn test_pending_associations_saved_with_owner() {
    let orm = blog().await;
    let users = orm.model("User").await.unwrap();
    let tags = orm.model("Tag").await.unwrap();

    let mut user = users.new_record(vec![("name", "ann")]).unwrap();
    user.build_association("profile", vec![("bio", "hi")]).await.unwrap();
    user.build_association("posts", vec![("title", "first")]).await.unwrap();
    let tag = tags.new_record(vec![("name", "fresh")]).unwrap();
    user.push_association("tags", vec![tag]).await.unwrap();
    assert_eq!(join_rows(&orm).await, 0);

    assert!(user.save().await.unwrap());

    let mut reloaded = users.find(user.id()).await.unwrap();
    let profile = reloaded.load_association("profile").await.unwrap().one().cloned().unwrap();
    assert_eq!(profile.read("bio"), Value::from("hi"));
    assert_eq!(reloaded.load_association("posts").await.unwrap().len(), 1);
    assert_eq!(reloaded.load_association("tags").await.unwrap().len(), 1);
    assert_eq!(join_rows(&orm).await, 1);
}

#[tokio::test]
async fn test_destroy_runs_dependent_strategy() {
    let orm = blog().await;
    let users = orm.model("User").await.unwrap();
    let posts = orm.model("Post").await.unwrap();

    let mut user = users.create(vec![("name", "ann")]).await.unwrap();
    let other = users.create(vec![("name", "bob")]).await.unwrap();
    for owner in [user.id(), user.id(), other.id()] {
        posts.create(vec![("user_id", owner)]).await.unwrap();
    }

    assert!(user.destroy().await.unwrap());
    assert_eq!(posts.count(FindOptions::default()).await.unwrap(), 1);
    assert!(!users.exists(user.id()).await.unwrap());
}

#[tokio::test]
async fn test_through_association() {
    let orm = blog().await;
    let users = orm.model("User").await.unwrap();
    let posts = orm.model("Post").await.unwrap();
    let comments = orm.model("Comment").await.unwrap();

    let user = users.create(vec![("name", "ann")]).await.unwrap();
    let stranger = users.create(vec![("name", "bob")]).await.unwrap();
    for (owner, count) in [(user.id(), 3), (stranger.id(), 1)] {
        let post = posts.create(vec![("user_id", owner)]).await.unwrap();
        for _ in 0..count {
            comments.create(vec![("post_id", post.id())]).await.unwrap();
        }
    }

    let found = user
        .find_association("comments", "all", FindOptions::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 3);
    assert_eq!(user.count_association("comments", FindOptions::default()).await.unwrap(), 3);

    let eager = users
        .find_with(user.id(), FindOptions::new().include("comments"))
        .await
        .unwrap()
        .one()
        .unwrap();
    assert_eq!(eager.association("comments").unwrap().len(), 3);
}

#[tokio::test]
async fn test_belongs_to_reassignment_and_delete() {
    let orm = blog().await;
    let users = orm.model("User").await.unwrap();
    let posts = orm.model("Post").await.unwrap();

    let ann = users.create(vec![("name", "ann")]).await.unwrap();
    let bob = users.create(vec![("name", "bob")]).await.unwrap();
    let mut post = posts.create(vec![("user_id", ann.id())]).await.unwrap();

    post.replace_association("user", vec![bob.clone()]).await.unwrap();
    assert!(post.save().await.unwrap());
    let author = posts
        .find(post.id())
        .await
        .unwrap()
        .find_first_association("user", FindOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(author.id(), bob.id());

    let mut bob = bob;
    let mine = bob
        .find_association("posts", "all", FindOptions::default())
        .await
        .unwrap()
        .many();
    assert_eq!(bob.delete_association("posts", &mine).await.unwrap(), 1);
    assert!(posts.find(post.id()).await.unwrap().read("user_id").is_null());
}

async fn gallery() -> Orm {
    let orm = orm_with(&[
        "CREATE TABLE photos (id INTEGER PRIMARY KEY AUTOINCREMENT, title VARCHAR(255))",
        "CREATE TABLE articles (id INTEGER PRIMARY KEY AUTOINCREMENT, title VARCHAR(255))",
        "CREATE TABLE comments (id INTEGER PRIMARY KEY AUTOINCREMENT, \
         commentable_id INTEGER, commentable_type VARCHAR(255), body TEXT)",
    ])
    .await;
    orm.define(ModelDef::new("Photo").relation(RelationDescriptor::has_many("comments").with_as("commentable")))
        .unwrap();
    orm.define(ModelDef::new("Article").relation(RelationDescriptor::has_many("comments").with_as("commentable")))
        .unwrap();
    orm.define(ModelDef::new("Comment").relation(RelationDescriptor::belongs_to("commentable").polymorphic()))
        .unwrap();
    orm
}

#[tokio::test]
async fn test_polymorphic_has_many_matches_owner_type() {
    let orm = gallery().await;
    let photos = orm.model("Photo").await.unwrap();
    let articles = orm.model("Article").await.unwrap();
    let comments = orm.model("Comment").await.unwrap();

    let mut photo = photos.create(vec![("title", "sunset")]).await.unwrap();
    let article = articles.create(vec![("title", "news")]).await.unwrap();
    // both owners have id 1; only the type column tells their comments apart
    assert_eq!(photo.id(), article.id());

    photo.create_association("comments", vec![("body", "nice")]).await.unwrap();
    photo.create_association("comments", vec![("body", "wow")]).await.unwrap();
    comments
        .create(vec![
            ("commentable_id", article.id()),
            ("commentable_type", Value::from("Article")),
            ("body", Value::from("old news")),
        ])
        .await
        .unwrap();

    let stamped = comments
        .count(FindOptions::new().conditions(strata_orm::Conditions::equals(vec![(
            "commentable_type",
            Value::from("Photo"),
        )])))
        .await
        .unwrap();
    assert_eq!(stamped, 2);

    let lazy = photo
        .find_association("comments", "all", FindOptions::default())
        .await
        .unwrap();
    assert_eq!(lazy.len(), 2);
    assert_eq!(article.count_association("comments", FindOptions::default()).await.unwrap(), 1);

    let eager = photos
        .find_with(photo.id(), FindOptions::new().include("comments").order("photos.id, comments.id"))
        .await
        .unwrap()
        .one()
        .unwrap();
    let bodies: Vec<Value> = eager
        .association("comments")
        .unwrap()
        .records()
        .iter()
        .map(|c| c.read("body"))
        .collect();
    assert_eq!(bodies, vec![Value::from("nice"), Value::from("wow")]);
}

#[tokio::test]
async fn test_polymorphic_belongs_to_resolves_type_column() {
    let orm = gallery().await;
    let photos = orm.model("Photo").await.unwrap();
    let articles = orm.model("Article").await.unwrap();
    let comments = orm.model("Comment").await.unwrap();

    let photo = photos.create(vec![("title", "sunset")]).await.unwrap();
    let article = articles.create(vec![("title", "news")]).await.unwrap();
    let on_photo = comments
        .create(vec![
            ("commentable_id", photo.id()),
            ("commentable_type", Value::from("Photo")),
        ])
        .await
        .unwrap();
    let on_article = comments
        .create(vec![
            ("commentable_id", article.id()),
            ("commentable_type", Value::from("Article")),
        ])
        .await
        .unwrap();

    let parent = on_photo
        .find_first_association("commentable", FindOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parent.class_name(), "Photo");
    assert_eq!(parent.read("title"), Value::from("sunset"));

    let parent = on_article
        .find_first_association("commentable", FindOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parent.class_name(), "Article");
    assert_eq!(parent.read("title"), Value::from("news"));

    let mut detached = comments.create(vec![("body", "loose")]).await.unwrap();
    assert!(detached
        .find_first_association("commentable", FindOptions::default())
        .await
        .unwrap()
        .is_none());
    detached.replace_association("commentable", vec![article.clone()]).await.unwrap();
    assert_eq!(detached.read("commentable_type"), Value::from("Article"));
    assert_eq!(detached.read("commentable_id"), article.id());
}

#[tokio::test]
async fn test_push_keeps_invalid_child_out() {
    let orm = orm_with(&[
        "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name VARCHAR(255))",
        "CREATE TABLE posts (id INTEGER PRIMARY KEY AUTOINCREMENT, user_id INTEGER, title VARCHAR(255))",
    ])
    .await;
    orm.define(ModelDef::new("User").has_many("posts")).unwrap();
    orm.define(ModelDef::new("Post").validates_presence_of("title")).unwrap();
    let users = orm.model("User").await.unwrap();
    let posts = orm.model("Post").await.unwrap();

    let mut user = users.create(vec![("name", "ann")]).await.unwrap();
    user.load_association("posts").await.unwrap();
    let valid = posts.new_record(vec![("title", "kept")]).unwrap();
    let invalid = posts.new_record(vec![("title", "")]).unwrap();

    assert!(!user.push_association("posts", vec![valid, invalid]).await.unwrap());
    assert_eq!(posts.count(FindOptions::default()).await.unwrap(), 1);
    assert_eq!(user.association("posts").unwrap().len(), 1);
    assert!(!user.get_validation_errors_on("posts").is_empty());
    assert!(!user.get_validation_errors_on("posts.title").is_empty());

    let created = user
        .create_association("posts", vec![("title", "")])
        .await
        .unwrap();
    assert!(created.is_new_record());
    assert!(!created.get_validation_errors_on("title").is_empty());
    assert_eq!(posts.count(FindOptions::default()).await.unwrap(), 1);
}
