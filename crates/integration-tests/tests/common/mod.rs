//! Shared fixtures for the black-box suite: a fresh in-memory catalog
//! wired to a `PostService`, plus small builders for posts and editors.

use std::sync::Arc;

use domains::models::{Editor, Rating};
use services::{CreatePost, PostService};
use storage_adapters::MemoryCatalog;

pub fn setup() -> (Arc<MemoryCatalog>, PostService) {
    let store = Arc::new(MemoryCatalog::new());
    let service = PostService::new(store.clone());
    (store, service)
}

pub fn editor(name: &str) -> Editor {
    Editor {
        user_id: name.bytes().map(i64::from).sum(),
        name: name.to_string(),
        ip: "10.0.0.1".to_string(),
    }
}

pub fn post_input(tags: &str, md5: &str) -> CreatePost {
    CreatePost {
        tag_string: tags.to_string(),
        rating: Rating::Safe,
        source: String::new(),
        md5: md5.to_string(),
        width: 800,
        height: 600,
        parent_id: None,
    }
}

pub fn sized_input(tags: &str, md5: &str, width: i64, height: i64) -> CreatePost {
    CreatePost {
        width,
        height,
        ..post_input(tags, md5)
    }
}
