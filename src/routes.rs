//! Route table: a numeric code and a collection/item path per routed model,
//! plus an axum router that dispatches matched requests.

use crate::error::SchemaError;
use crate::schema::{ModelId, ModelKind, Schema};
use axum::extract::Path;
use axum::http::Method;
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;

/// Appended to a collection path to form its item path.
pub const ITEM_WILDCARD: &str = "/#";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    Collection,
    Item,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    #[serde(skip)]
    pub model: ModelId,
    pub model_name: String,
    pub collection_code: u32,
    pub item_code: u32,
    pub collection_path: String,
    pub item_path: String,
}

impl RouteEntry {
    pub fn code(&self, kind: RouteKind) -> u32 {
        match kind {
            RouteKind::Collection => self.collection_code,
            RouteKind::Item => self.item_code,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RouteMatch {
    pub model_name: String,
    pub code: u32,
    pub kind: RouteKind,
    /// Row identity for item paths with a concrete id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RouteTable {
    routes: Vec<RouteEntry>,
    #[serde(skip)]
    by_code: HashMap<u32, (usize, RouteKind)>,
    #[serde(skip)]
    by_path: HashMap<String, usize>,
}

/// "blog.Post" -> "blog__post".
pub fn collection_path(model_name: &str) -> String {
    model_name.replace('.', "__").to_lowercase()
}

impl RouteTable {
    /// Every model that is neither a join model nor key-value, in declaration order,
    /// gets codes `100 * i` and `100 * i + 1` for its 1-based position `i`.
    /// Two models whose flattened paths coincide are rejected.
    pub fn build(schema: &Schema) -> Result<RouteTable, SchemaError> {
        let mut table = RouteTable::default();
        let routed = schema
            .models()
            .iter()
            .filter(|m| matches!(m.kind, ModelKind::Table));
        for (i, model) in routed.enumerate() {
            let base = 100 * (i as u32 + 1);
            let path = collection_path(&model.name);
            let entry = RouteEntry {
                model: model.id,
                model_name: model.name.clone(),
                collection_code: base,
                item_code: base + 1,
                item_path: format!("{}{}", path, ITEM_WILDCARD),
                collection_path: path,
            };
            if let Some(first) = table.by_path.get(&entry.collection_path) {
                return Err(SchemaError::DuplicateRoute {
                    path: entry.collection_path,
                    first: table.routes[*first].model_name.clone(),
                    second: entry.model_name,
                });
            }
            let index = table.routes.len();
            table.by_code.insert(entry.collection_code, (index, RouteKind::Collection));
            table.by_code.insert(entry.item_code, (index, RouteKind::Item));
            table.by_path.insert(entry.collection_path.clone(), index);
            table.routes.push(entry);
        }
        tracing::debug!(routes = table.routes.len(), "route table built");
        Ok(table)
    }

    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    pub fn for_model(&self, model_name: &str) -> Option<&RouteEntry> {
        self.routes.iter().find(|r| r.model_name == model_name)
    }

    pub fn by_code(&self, code: u32) -> Option<(&RouteEntry, RouteKind)> {
        self.by_code.get(&code).map(|(i, kind)| (&self.routes[*i], *kind))
    }

    /// Match "<collection>", "<collection>/<id>" or the "<collection>/#" pattern itself.
    pub fn resolve(&self, path: &str) -> Option<RouteMatch> {
        let path = path.trim_matches('/');
        let (collection, rest) = match path.split_once('/') {
            Some((c, r)) => (c, Some(r)),
            None => (path, None),
        };
        let entry = &self.routes[*self.by_path.get(collection)?];
        let (kind, id) = match rest {
            None => (RouteKind::Collection, None),
            Some("#") => (RouteKind::Item, None),
            Some(id) => (RouteKind::Item, Some(id.parse::<i64>().ok()?)),
        };
        Some(RouteMatch {
            model_name: entry.model_name.clone(),
            code: entry.code(kind),
            kind,
            id,
        })
    }
}

/// Mount `/<collection>` and `/<collection>/:id` for every route. Matched requests go
/// to `dispatch`; an item path with a non-numeric id is rejected by the extractor.
pub fn dispatch_router<F, Fut>(table: &RouteTable, dispatch: F) -> Router
where
    F: Fn(Method, RouteMatch) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    let mut router = Router::new();
    for entry in table.routes() {
        let collection = RouteMatch {
            model_name: entry.model_name.clone(),
            code: entry.collection_code,
            kind: RouteKind::Collection,
            id: None,
        };
        let item = RouteMatch {
            code: entry.item_code,
            kind: RouteKind::Item,
            ..collection.clone()
        };
        let on_collection = dispatch.clone();
        let on_item = dispatch.clone();
        router = router
            .route(
                &format!("/{}", entry.collection_path),
                any(move |method: Method| {
                    let matched = collection.clone();
                    async move { on_collection(method, matched).await }
                }),
            )
            .route(
                &format!("/{}/:id", entry.collection_path),
                any(move |method: Method, Path(id): Path<i64>| {
                    let matched = RouteMatch {
                        id: Some(id),
                        ..item.clone()
                    };
                    async move { on_item(method, matched).await }
                }),
            );
    }
    router
}
