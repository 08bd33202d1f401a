//! Eager loading through joins
//!
//! `find` with an `include` option runs a single SELECT: the planner turns
//! the include tree into aliased LEFT OUTER JOINs and the reconstructor
//! folds the flat rows back into records with their associations filled.

pub(crate) mod planner;
pub(crate) mod reconstruct;

use crate::error::ModelResult;
use crate::model::{Model, Record};
use crate::query::{IncludeTree, QueryBuilder, QueryOptions};

pub(crate) use planner::EagerPlan;

/// Plan the joins for `include` on `model`
pub(crate) async fn plan(model: &Model, include: &IncludeTree) -> ModelResult<EagerPlan> {
    let nodes = planner::collect(model, include).await?;
    Ok(planner::build(model, model.table_name(), &nodes))
}

/// Run a find whose options carry an include tree.
///
/// Rows of one root record must be contiguous in the result. Without an
/// ORDER BY that guarantees it, a root split across rows comes back twice.
pub(crate) async fn find_with_includes(model: &Model, options: QueryOptions) -> ModelResult<Vec<Record>> {
    let nodes = planner::collect(model, &options.include).await?;
    let plan = planner::build(model, &options.from, &nodes);
    tracing::debug!(
        model = %model.class_name(),
        aliases = plan.includes.len(),
        "Eager loading"
    );

    let statement = QueryBuilder::with_head(plan.select.clone(), plan.from.clone(), plan.values.clone())
        .where_options(&options)
        .where_ids(&model.qualified_key(), &options.ids)
        .build(&options, model.connection().adapter());
    let rows = model.connection().run(&statement).await?.into_rows();
    Ok(reconstruct::records(&plan, rows, options.readonly))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, DatabaseConfigs, Environment};
    use crate::model::ModelDef;
    use crate::orm::Orm;
    use crate::relationships::RelationDescriptor;

    async fn orm() -> Orm {
        let configs = DatabaseConfigs::new().with(Environment::Testing, None, DatabaseConfig::sqlite(":memory:"));
        let orm = Orm::from_configs(Environment::Testing, configs);
        let conn = orm.connection(None).await.unwrap();
        for sql in [
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, manager_id INTEGER)",
            "CREATE TABLE posts (id INTEGER PRIMARY KEY AUTOINCREMENT, user_id INTEGER, title TEXT)",
            "CREATE TABLE tags (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)",
            "CREATE TABLE posts_tags (post_id INTEGER, tag_id INTEGER)",
        ] {
            conn.query(sql, &[]).await.unwrap();
        }
        orm.define(
            ModelDef::new("User")
                .has_many("posts")
                .relation(RelationDescriptor::belongs_to("manager").with_class_name("User")),
        )
        .unwrap();
        orm.define(ModelDef::new("Post").belongs_to("user").has_and_belongs_to_many("tags"))
            .unwrap();
        orm.define(ModelDef::new("Tag")).unwrap();
        orm
    }

    #[tokio::test]
    async fn test_plan_aliases_and_joins() {
        let orm = orm().await;
        let users = orm.model("User").await.unwrap();
        let include = IncludeTree::new().add("manager").nest("posts", IncludeTree::parse("tags"));
        let plan = plan(&users, &include).await.unwrap();

        let aliases: Vec<&str> = plan.includes.iter().map(|i| i.alias.as_str()).collect();
        assert_eq!(aliases, vec!["users", "users2", "posts", "tags"]);
        assert_eq!(
            plan.from,
            "users LEFT OUTER JOIN users users2 ON users.manager_id = users2.id \
             LEFT OUTER JOIN posts ON posts.user_id = users.id \
             LEFT OUTER JOIN posts_tags ON posts_tags.post_id = posts.id \
             LEFT OUTER JOIN tags ON tags.id = posts_tags.tag_id"
        );
        assert!(plan.select.starts_with("users.id AS users_id, users.name AS users_name"));
        assert!(plan.select.contains("users2.name AS users2_name"));
        assert!(!plan.select.contains("posts_tags."));
        assert_eq!(plan.column_at(0), Some((0, "id")));
        let users2 = plan.select.split(", ").position(|f| f == "users2.manager_id AS users2_manager_id");
        assert_eq!(users2.and_then(|p| plan.column_at(p)), Some((1, "manager_id")));
        assert_eq!(plan.columns.len(), plan.select.split(", ").count());
    }

    #[tokio::test]
    async fn test_colliding_field_names_map_by_position() {
        let configs = DatabaseConfigs::new().with(Environment::Testing, None, DatabaseConfig::sqlite(":memory:"));
        let orm = Orm::from_configs(Environment::Testing, configs);
        let conn = orm.connection(None).await.unwrap();
        for sql in [
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, settings_theme TEXT)",
            "CREATE TABLE users_settings (id INTEGER PRIMARY KEY AUTOINCREMENT, user_id INTEGER, theme TEXT)",
            "INSERT INTO users (settings_theme) VALUES ('dark')",
            "INSERT INTO users_settings (user_id, theme) VALUES (1, 'light')",
        ] {
            conn.query(sql, &[]).await.unwrap();
        }
        orm.define(ModelDef::new("User").relation(RelationDescriptor::has_one("settings").with_class_name("UsersSetting")))
            .unwrap();
        orm.define(ModelDef::new("UsersSetting").table("users_settings"))
            .unwrap();
        let users = orm.model("User").await.unwrap();

        // users.settings_theme and users_settings.theme are both selected
        // as users_settings_theme
        let user = users
            .find_with(1, crate::query::FindOptions::new().include("settings"))
            .await
            .unwrap()
            .one()
            .unwrap();
        assert_eq!(user.read("settings_theme"), crate::value::Value::from("dark"));
        let settings = user.association("settings").unwrap().one().unwrap();
        assert_eq!(settings.read("theme"), crate::value::Value::from("light"));
        assert_eq!(settings.read("user_id"), crate::value::Value::Integer(1));
    }

    #[tokio::test]
    async fn test_polymorphic_belongs_to_needs_class() {
        let orm = orm().await;
        orm.define(ModelDef::new("Comment").relation(RelationDescriptor::belongs_to("commentable").polymorphic()))
            .unwrap();
        let conn = orm.connection(None).await.unwrap();
        conn.query(
            "CREATE TABLE comments (id INTEGER PRIMARY KEY, commentable_id INTEGER, commentable_type TEXT)",
            &[],
        )
        .await
        .unwrap();
        let comments = orm.model("Comment").await.unwrap();
        let err = plan(&comments, &IncludeTree::parse("commentable")).await.unwrap_err();
        assert!(matches!(err, crate::error::ModelError::Relationship(_)));
    }
}
