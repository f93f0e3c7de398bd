//! Tag-string reconciliation against a live catalog: merge semantics,
//! registry count maintenance, and version arithmetic.

mod common;

use common::{editor, post_input, setup};
use domains::ports::CatalogStore;

#[tokio::test]
async fn edit_applies_diff_and_moves_registry_counts() {
    let (store, service) = setup();
    let author = editor("alice");
    let post = service
        .create_post(post_input("aaa bbb", "m1"), &author)
        .await
        .unwrap();
    assert_eq!(store.tag("aaa").await.unwrap().unwrap().post_count, 1);

    let saved = service
        .save_tag_edit(post.id, "aaa bbb", "aaa ccc", &author)
        .await
        .unwrap();

    assert_eq!(saved.tag_string, "aaa ccc");
    assert_eq!(saved.tag_count, 2);
    assert_eq!(store.tag("aaa").await.unwrap().unwrap().post_count, 1);
    assert_eq!(store.tag("bbb").await.unwrap().unwrap().post_count, 0);
    assert_eq!(store.tag("ccc").await.unwrap().unwrap().post_count, 1);
}

#[tokio::test]
async fn concurrent_edits_from_the_same_baseline_both_survive() {
    let (_store, service) = setup();
    let author = editor("alice");
    let rival = editor("bob");
    let post = service
        .create_post(post_input("aaa bbb ccc", "m1"), &author)
        .await
        .unwrap();

    // Both editors loaded "aaa bbb ccc". Alice adds ddd; Bob swaps ccc
    // for eee. Neither sees the other's save.
    service
        .save_tag_edit(post.id, "aaa bbb ccc", "aaa bbb ccc ddd", &author)
        .await
        .unwrap();
    let merged = service
        .save_tag_edit(post.id, "aaa bbb ccc", "aaa bbb eee", &rival)
        .await
        .unwrap();

    assert_eq!(merged.tag_string, "aaa bbb ddd eee");
}

#[tokio::test]
async fn independent_edits_commute() {
    let (_store, service) = setup();
    let author = editor("alice");
    let rival = editor("bob");

    let first = service
        .create_post(post_input("aaa bbb ccc", "m1"), &author)
        .await
        .unwrap();
    let second = service
        .create_post(post_input("aaa bbb ccc", "m2"), &author)
        .await
        .unwrap();

    // Same two edits, opposite application order.
    service
        .save_tag_edit(first.id, "aaa bbb ccc", "aaa bbb ccc ddd", &author)
        .await
        .unwrap();
    let one = service
        .save_tag_edit(first.id, "aaa bbb ccc", "aaa bbb eee", &rival)
        .await
        .unwrap();

    service
        .save_tag_edit(second.id, "aaa bbb ccc", "aaa bbb eee", &rival)
        .await
        .unwrap();
    let two = service
        .save_tag_edit(second.id, "aaa bbb ccc", "aaa bbb ccc ddd", &author)
        .await
        .unwrap();

    assert_eq!(one.tag_string, two.tag_string);
    assert_eq!(one.tag_string, "aaa bbb ddd eee");
}

#[tokio::test]
async fn unchanged_edit_is_a_no_op_but_still_versions() {
    let (store, service) = setup();
    let author = editor("alice");
    let post = service
        .create_post(post_input("aaa bbb", "m1"), &author)
        .await
        .unwrap();
    assert_eq!(store.versions_of(post.id).await.unwrap().len(), 1);

    let saved = service
        .save_tag_edit(post.id, "aaa bbb", "aaa bbb", &author)
        .await
        .unwrap();

    assert_eq!(saved.tag_string, "aaa bbb");
    assert_eq!(store.tag("aaa").await.unwrap().unwrap().post_count, 1);
    assert_eq!(store.versions_of(post.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn empty_desired_string_strips_every_tag() {
    let (store, service) = setup();
    let author = editor("alice");
    let post = service
        .create_post(post_input("aaa bbb", "m1"), &author)
        .await
        .unwrap();

    let saved = service
        .save_tag_edit(post.id, "aaa bbb", "", &author)
        .await
        .unwrap();

    assert_eq!(saved.tag_string, "");
    assert_eq!(saved.tag_count, 0);
    assert_eq!(store.tag("aaa").await.unwrap().unwrap().post_count, 0);
    assert_eq!(store.tag("bbb").await.unwrap().unwrap().post_count, 0);
}

#[tokio::test]
async fn tag_string_is_rendered_in_sorted_order() {
    let (_store, service) = setup();
    let author = editor("alice");
    let post = service
        .create_post(post_input("zzz mmm aaa", "m1"), &author)
        .await
        .unwrap();
    assert_eq!(post.tag_string, "aaa mmm zzz");
}

#[tokio::test]
async fn rating_metatag_in_an_edit_string_sets_the_rating() {
    let (_store, service) = setup();
    let author = editor("alice");
    let post = service
        .create_post(post_input("aaa", "m1"), &author)
        .await
        .unwrap();

    let saved = service
        .save_tag_edit(post.id, "aaa", "aaa rating:e", &author)
        .await
        .unwrap();

    assert_eq!(saved.rating, domains::models::Rating::Explicit);
    // The metatag never leaks into the tag set.
    assert_eq!(saved.tag_string, "aaa");
}

#[tokio::test]
async fn pool_and_fav_metatags_apply_as_side_effects() {
    let (_store, service) = setup();
    let author = editor("alice");
    let post = service
        .create_post(post_input("aaa", "m1"), &author)
        .await
        .unwrap();

    let saved = service
        .save_tag_edit(post.id, "aaa", "aaa pool:favorites_of_mine fav:me", &author)
        .await
        .unwrap();

    assert_eq!(saved.pool_string, "pool:favorites_of_mine");
    assert_eq!(saved.fav_string, "fav:alice");
    assert_eq!(saved.tag_string, "aaa");
}

#[tokio::test]
async fn every_save_appends_exactly_one_version() {
    let (store, service) = setup();
    let author = editor("alice");
    let post = service
        .create_post(post_input("aaa", "m1"), &author)
        .await
        .unwrap();

    for (step, desired) in ["aaa bbb", "bbb", "bbb ccc"].iter().enumerate() {
        let before = store.versions_of(post.id).await.unwrap().len();
        let current = store.post(post.id).await.unwrap().unwrap();
        service
            .save_tag_edit(post.id, &current.tag_string, desired, &author)
            .await
            .unwrap();
        let after = store.versions_of(post.id).await.unwrap().len();
        assert_eq!(after, before + 1, "save #{} must add one version", step + 1);
    }

    let versions = store.versions_of(post.id).await.unwrap();
    let numbers: Vec<i64> = versions.iter().map(|v| v.number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
}
