//! Shared fixtures for unit tests.

use crate::config::{build_schema, MappingOptions};
use crate::resolver::{resolve, Mapping};
use crate::schema::Schema;
use serde_json::{json, Value};

/// Users, posts, tags (v2 through an explicit join), comments, self-referential
/// friends (v3, synthesized join) and a key-value settings model.
pub fn blog_document() -> Value {
    json!({
        "models": [
            { "name": "blog.user", "fields": [
                { "name": "name", "id": 1, "type": "string", "multiplicity": "required" },
                { "name": "email", "id": 2, "type": "string", "unique": true, "version": 2 },
                { "name": "friends", "id": 0, "type": "blog.user", "multiplicity": "repeated", "version": 3 }
            ] },
            { "name": "blog.post", "fields": [
                { "name": "author", "id": 1, "type": { "ref": "blog.user" },
                  "multiplicity": "required", "related_name": "posts" },
                { "name": "title", "id": 2, "type": "string", "default": "untitled" },
                { "name": "tags", "id": 0, "type": { "ref": "blog.tag" }, "multiplicity": "repeated",
                  "through": "blog.post_tag", "related_name": "posts", "version": 2 },
                { "name": "publishedAt", "id": 3, "type": "timestamp", "version": 3 },
                { "name": "pinned", "id": 4, "type": "bool", "version": 3 }
            ] },
            { "name": "blog.tag", "version": 2, "fields": [
                { "name": "label", "id": 1, "type": "string", "multiplicity": "required", "unique": true }
            ] },
            { "name": "blog.post_tag", "kind": "join", "version": 2,
              "source_field": "post", "dest_field": "tag", "fields": [
                { "name": "post", "id": 1, "type": "blog.post", "multiplicity": "required" },
                { "name": "tag", "id": 2, "type": "blog.tag", "multiplicity": "required" }
            ] },
            { "name": "blog.comment", "fields": [
                { "name": "post", "id": 1, "type": "blog.post", "multiplicity": "required" },
                { "name": "body", "id": 2, "type": "string" }
            ] },
            { "name": "app.settings", "kind": "key_value", "fields": [
                { "name": "theme", "id": 1, "type": "string", "default": "dark" },
                { "name": "fontSize", "id": 2, "type": "int32" }
            ] }
        ]
    })
}

pub fn blog_schema() -> Schema {
    build_schema(&serde_json::from_value(blog_document()).expect("fixture document")).expect("fixture schema")
}

pub fn blog_mapping() -> (Schema, Mapping) {
    let schema = blog_schema();
    let mapping = resolve(&schema, &MappingOptions::default()).expect("fixture mapping");
    (schema, mapping)
}
