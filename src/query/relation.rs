//! Many-to-many navigation from a saved entity. Writes go to the join table;
//! back-references are read-only.

use super::builder::QueryBuilder;
use super::descriptor::{DeleteDescriptor, Predicate};
use super::entity::Entity;
use crate::error::AppError;
use crate::resolver::{JoinEndpoint, JoinFragment, RelationFact, RelationPath, TableFact};
use crate::schema::{FieldValue, JoinSide, ModelId, StorageClass};
use crate::store::{Store, Value};
use std::sync::Arc;

pub struct Relation<'a> {
    owner: &'a Entity,
    fact: &'a RelationFact,
}

fn endpoint_eq(table: &str, endpoint: &JoinEndpoint, id: i64) -> Predicate {
    Predicate {
        alias: table.to_string(),
        column: endpoint.column.clone(),
        storage: StorageClass::Integer,
        value: Value::Integer(id),
        negated: false,
    }
}

impl<'a> Relation<'a> {
    pub(crate) fn new(owner: &'a Entity, fact: &'a RelationFact) -> Self {
        Relation { owner, fact }
    }

    pub fn name(&self) -> &str {
        &self.fact.name
    }

    pub fn target_table(&self) -> &str {
        &self.fact.target_table
    }

    fn join(&self) -> Result<(&'a JoinFragment, JoinSide), AppError> {
        let fact: &'a RelationFact = self.fact;
        match &fact.path {
            RelationPath::Join { side, fragment } => Ok((fragment.as_ref(), *side)),
            RelationPath::Reverse(_) => Err(AppError::ReadOnlyRelation(self.fact.name.clone())),
        }
    }

    fn table_for(&self, model: ModelId, name: &str) -> Result<Arc<TableFact>, AppError> {
        self.owner
            .mapping()
            .table_for(model)
            .cloned()
            .ok_or_else(|| AppError::UnknownModel(name.to_string()))
    }

    fn check_target(&self, target: &Entity) -> Result<(), AppError> {
        if target.table().model == self.fact.target {
            return Ok(());
        }
        Err(AppError::WrongTarget {
            expected: self
                .owner
                .mapping()
                .table_for(self.fact.target)
                .map(|t| t.model_name.clone())
                .unwrap_or_else(|| self.fact.target_table.clone()),
            found: target.model_name().to_string(),
        })
    }

    /// Link `target`. Returns false if the pair was already linked.
    pub async fn add(&self, store: &dyn Store, target: &Entity) -> Result<bool, AppError> {
        let (fragment, side) = self.join()?;
        self.check_target(target)?;
        let owner = self.owner.require_id()?;
        let other = target.require_id()?;
        let join_table = self.table_for(fragment.join_model, &fragment.join_table)?;
        let near = fragment.endpoint(side);
        let far = fragment.endpoint(side.opposite());

        let existing = QueryBuilder::new(Arc::clone(self.owner.mapping()), Arc::clone(&join_table))
            .filter(&near.column, FieldValue::Reference(owner))
            .filter(&far.column, FieldValue::Reference(other))
            .first(store)
            .await?;
        if existing.is_some() {
            return Ok(false);
        }
        store
            .insert(
                &join_table,
                &[
                    (near.column.clone(), Value::Integer(owner)),
                    (far.column.clone(), Value::Integer(other)),
                ],
            )
            .await?;
        tracing::debug!(relation = %self.fact.name, owner, target = other, "linked");
        Ok(true)
    }

    /// Unlink `target`. Returns the number of join rows removed.
    pub async fn remove(&self, store: &dyn Store, target: &Entity) -> Result<u64, AppError> {
        let (fragment, side) = self.join()?;
        self.check_target(target)?;
        let owner = self.owner.require_id()?;
        let other = target.require_id()?;
        let removed = store
            .delete(&DeleteDescriptor {
                table: fragment.join_table.clone(),
                conditions: vec![
                    endpoint_eq(&fragment.join_table, fragment.endpoint(side), owner),
                    endpoint_eq(&fragment.join_table, fragment.endpoint(side.opposite()), other),
                ],
            })
            .await?;
        Ok(removed)
    }

    /// Unlink everything. Returns the number of join rows removed.
    pub async fn clear(&self, store: &dyn Store) -> Result<u64, AppError> {
        let (fragment, side) = self.join()?;
        let owner = self.owner.require_id()?;
        let removed = store
            .delete(&DeleteDescriptor {
                table: fragment.join_table.clone(),
                conditions: vec![endpoint_eq(&fragment.join_table, fragment.endpoint(side), owner)],
            })
            .await?;
        Ok(removed)
    }

    /// The related entities, ordered by identity.
    pub async fn fetch(&self, store: &dyn Store) -> Result<Vec<Entity>, AppError> {
        let owner = self.owner.require_id()?;
        let mapping = self.owner.mapping();
        let target = self.table_for(self.fact.target, &self.fact.target_table)?;

        let (fragment, side) = match &self.fact.path {
            RelationPath::Reverse(r) => {
                return QueryBuilder::new(Arc::clone(mapping), target)
                    .filter(&r.fk_column, FieldValue::Reference(owner))
                    .all(store)
                    .await;
            }
            RelationPath::Join { side, fragment } => (fragment, *side),
        };

        let join_table = self.table_for(fragment.join_model, &fragment.join_table)?;
        let far = fragment.endpoint(side.opposite());
        let links = QueryBuilder::new(Arc::clone(mapping), join_table)
            .filter(&fragment.endpoint(side).column, FieldValue::Reference(owner))
            .all(store)
            .await?;
        let ids: Vec<i64> = links
            .iter()
            .filter_map(|link| match link.get(&far.column) {
                Some(FieldValue::Reference(id)) => Some(*id),
                _ => None,
            })
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let identity = target.identity().name.clone();
        let mut query = QueryBuilder::new(Arc::clone(mapping), target);
        for id in ids {
            query = query.filter(&identity, FieldValue::Integer(id)).or();
        }
        query.all(store).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Mapping;
    use crate::store::MemoryStore;
    use crate::testing::blog_mapping;

    async fn setup() -> (Arc<Mapping>, MemoryStore) {
        let (schema, mapping) = blog_mapping();
        let store = MemoryStore::new();
        let plan = crate::migration::plan(&schema, &mapping).unwrap();
        crate::migration::apply_migrations(&store, &plan).await.unwrap();
        (Arc::new(mapping), store)
    }

    async fn saved(mapping: &Arc<Mapping>, store: &MemoryStore, model: &str, field: &str, value: &str) -> Entity {
        let mut e = mapping.entity(model).unwrap();
        e.set(field, value).unwrap();
        e.save(store).await.unwrap();
        e
    }

    #[tokio::test]
    async fn add_is_idempotent_and_fetch_sees_both_sides() {
        let (mapping, store) = setup().await;
        let user = saved(&mapping, &store, "blog.user", "name", "ada").await;
        let mut post = mapping.entity("blog.post").unwrap();
        post.set_reference("author", &user).unwrap();
        post.save(&store).await.unwrap();
        let rust = saved(&mapping, &store, "blog.tag", "label", "rust").await;
        let go = saved(&mapping, &store, "blog.tag", "label", "go").await;

        let tags = post.relation("tags").unwrap();
        assert!(tags.add(&store, &rust).await.unwrap());
        assert!(!tags.add(&store, &rust).await.unwrap());
        assert!(tags.add(&store, &go).await.unwrap());
        assert_eq!(store.row_count("blog_post_tag").await.unwrap(), 2);

        let labels: Vec<_> = tags.fetch(&store).await.unwrap().iter().map(|t| t.get("label").cloned()).collect();
        assert_eq!(
            labels,
            [Some(FieldValue::Text("rust".into())), Some(FieldValue::Text("go".into()))]
        );

        let posts = rust.relation("posts").unwrap().fetch(&store).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id(), post.id());

        assert_eq!(tags.remove(&store, &rust).await.unwrap(), 1);
        assert_eq!(tags.clear(&store).await.unwrap(), 1);
        assert!(tags.fetch(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsaved_endpoints_abort_before_any_query() {
        let (mapping, store) = setup().await;
        let user = saved(&mapping, &store, "blog.user", "name", "ada").await;
        let mut post = mapping.entity("blog.post").unwrap();
        post.set_reference("author", &user).unwrap();
        post.save(&store).await.unwrap();
        let unsaved = mapping.entity("blog.tag").unwrap();
        let err = post.relation("tags").unwrap().add(&store, &unsaved).await.unwrap_err();
        assert!(matches!(err, AppError::PersistenceRequired(_)));
        assert_eq!(store.row_count("blog_post_tag").await.unwrap(), 0);

        let err = post.relation("tags").unwrap().add(&store, &user).await.unwrap_err();
        assert!(matches!(err, AppError::WrongTarget { .. }));
    }

    #[tokio::test]
    async fn back_references_are_read_only() {
        let (mapping, store) = setup().await;
        let user = saved(&mapping, &store, "blog.user", "name", "ada").await;
        let mut post = mapping.entity("blog.post").unwrap();
        post.set_reference("author", &user).unwrap();
        post.save(&store).await.unwrap();

        let posts = user.relation("posts").unwrap();
        assert!(matches!(posts.add(&store, &post).await, Err(AppError::ReadOnlyRelation(_))));
        let fetched = posts.fetch(&store).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].get("author"), Some(&FieldValue::Reference(user.id().unwrap())));
    }
}
