//! Query compilation and execution end to end: AND semantics, negation,
//! wildcards, metatag filters, status defaults, and orderings.

mod common;

use common::{editor, post_input, setup, sized_input};
use domains::error::{CatalogError, QueryParseError};
use domains::models::Rating;
use domains::query::Page;
use services::CreatePost;

fn page() -> Page {
    Page::new(1, 100)
}

#[tokio::test]
async fn and_semantics_with_negation() {
    let (_store, service) = setup();
    let author = editor("alice");
    service
        .create_post(post_input("aaa bbb", "m1"), &author)
        .await
        .unwrap();
    let wanted = service
        .create_post(post_input("aaa ccc", "m2"), &author)
        .await
        .unwrap();
    service
        .create_post(post_input("bbb ccc", "m3"), &author)
        .await
        .unwrap();

    let hits = service.search("aaa -bbb", page()).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, wanted.id);
}

#[tokio::test]
async fn wildcards_match_globs() {
    let (_store, service) = setup();
    let author = editor("alice");
    service
        .create_post(post_input("apple", "m1"), &author)
        .await
        .unwrap();
    service
        .create_post(post_input("apricot", "m2"), &author)
        .await
        .unwrap();
    service
        .create_post(post_input("banana", "m3"), &author)
        .await
        .unwrap();

    let hits = service.search("ap*", page()).await.unwrap();
    assert_eq!(hits.len(), 2);
    let hits = service.search("*ana*", page()).await.unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn id_comparisons_filter_numerically() {
    let (_store, service) = setup();
    let author = editor("alice");
    for n in 0..6 {
        service
            .create_post(post_input("ttt", &format!("m{n}")), &author)
            .await
            .unwrap();
    }

    let hits = service.search("id:>5", page()).await.unwrap();
    assert!(hits.iter().all(|post| post.id > 5));
    assert_eq!(hits.len(), 1);

    let hits = service.search("id:3", page()).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, 3);
}

#[tokio::test]
async fn malformed_id_comparison_is_a_parse_error() {
    let (_store, service) = setup();
    let err = service.search("id:>abc", page()).await.unwrap_err();
    assert!(matches!(
        err,
        CatalogError::Query(QueryParseError::InvalidNumber(_))
    ));
}

#[tokio::test]
async fn deleted_posts_hide_unless_asked_for() {
    let (_store, service) = setup();
    let author = editor("alice");
    let keep = service
        .create_post(post_input("sss", "m1"), &author)
        .await
        .unwrap();
    let doomed = service
        .create_post(post_input("sss", "m2"), &author)
        .await
        .unwrap();
    service.delete(doomed.id, &author).await.unwrap();

    let hits = service.search("", page()).await.unwrap();
    assert_eq!(hits.iter().map(|p| p.id).collect::<Vec<_>>(), vec![keep.id]);

    let hits = service.search("status:deleted", page()).await.unwrap();
    assert_eq!(
        hits.iter().map(|p| p.id).collect::<Vec<_>>(),
        vec![doomed.id]
    );

    let hits = service.search("status:any", page()).await.unwrap();
    assert_eq!(hits.len(), 2);
}

#[tokio::test]
async fn rating_filters_match_and_invert() {
    let (_store, service) = setup();
    let author = editor("alice");
    service
        .create_post(post_input("rrr", "m1"), &author)
        .await
        .unwrap();
    let explicit = service
        .create_post(
            CreatePost {
                rating: Rating::Explicit,
                ..post_input("rrr", "m2")
            },
            &author,
        )
        .await
        .unwrap();

    let hits = service.search("rating:e", page()).await.unwrap();
    assert_eq!(
        hits.iter().map(|p| p.id).collect::<Vec<_>>(),
        vec![explicit.id]
    );

    let hits = service.search("rrr -rating:e", page()).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_ne!(hits[0].id, explicit.id);
}

#[tokio::test]
async fn uploader_md5_and_source_filters() {
    let (_store, service) = setup();
    let alice = editor("alice");
    let bob = editor("bob");
    let by_alice = service
        .create_post(
            CreatePost {
                source: "https://example.com/art/1".to_string(),
                ..post_input("uuu", "feedface")
            },
            &alice,
        )
        .await
        .unwrap();
    let by_bob = service
        .create_post(post_input("uuu", "deadbeef"), &bob)
        .await
        .unwrap();

    let hits = service.search("uploader:alice", page()).await.unwrap();
    assert_eq!(
        hits.iter().map(|p| p.id).collect::<Vec<_>>(),
        vec![by_alice.id]
    );

    let hits = service
        .search("md5:deadbeef,cafebabe", page())
        .await
        .unwrap();
    assert_eq!(
        hits.iter().map(|p| p.id).collect::<Vec<_>>(),
        vec![by_bob.id]
    );

    let hits = service.search("source:example.com", page()).await.unwrap();
    assert_eq!(
        hits.iter().map(|p| p.id).collect::<Vec<_>>(),
        vec![by_alice.id]
    );
}

#[tokio::test]
async fn favorite_and_pool_membership_filters() {
    let (_store, service) = setup();
    let alice = editor("alice");
    let post = service
        .create_post(post_input("fff", "m1"), &alice)
        .await
        .unwrap();
    service
        .create_post(post_input("fff", "m2"), &alice)
        .await
        .unwrap();
    service
        .save_tag_edit(post.id, "fff", "fff fav:me pool:showcase", &alice)
        .await
        .unwrap();

    let hits = service.search("fav:alice", page()).await.unwrap();
    assert_eq!(hits.iter().map(|p| p.id).collect::<Vec<_>>(), vec![post.id]);

    let hits = service.search("pool:showcase", page()).await.unwrap();
    assert_eq!(hits.iter().map(|p| p.id).collect::<Vec<_>>(), vec![post.id]);
}

#[tokio::test]
async fn default_order_is_newest_first() {
    let (_store, service) = setup();
    let author = editor("alice");
    for n in 0..3 {
        service
            .create_post(post_input("ooo", &format!("m{n}")), &author)
            .await
            .unwrap();
    }
    let hits = service.search("ooo", page()).await.unwrap();
    let ids: Vec<i64> = hits.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![3, 2, 1]);

    let hits = service.search("ooo order:id_asc", page()).await.unwrap();
    let ids: Vec<i64> = hits.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn mpixels_orders_by_resolution() {
    let (_store, service) = setup();
    let author = editor("alice");
    let small = service
        .create_post(sized_input("ppp", "m1", 50, 50), &author)
        .await
        .unwrap();
    let large = service
        .create_post(sized_input("ppp", "m2", 400, 400), &author)
        .await
        .unwrap();
    let medium = service
        .create_post(sized_input("ppp", "m3", 100, 100), &author)
        .await
        .unwrap();

    let hits = service.search("ppp order:mpixels", page()).await.unwrap();
    let ids: Vec<i64> = hits.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![large.id, medium.id, small.id]);
}

#[tokio::test]
async fn landscape_and_portrait_order_by_aspect_ratio() {
    let (_store, service) = setup();
    let author = editor("alice");
    let wide = service
        .create_post(sized_input("qqq", "m1", 200, 100), &author)
        .await
        .unwrap();
    let square = service
        .create_post(sized_input("qqq", "m2", 100, 100), &author)
        .await
        .unwrap();
    let tall = service
        .create_post(sized_input("qqq", "m3", 100, 200), &author)
        .await
        .unwrap();

    let hits = service.search("qqq order:landscape", page()).await.unwrap();
    let ids: Vec<i64> = hits.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![wide.id, square.id, tall.id]);

    let hits = service.search("qqq order:portrait", page()).await.unwrap();
    let ids: Vec<i64> = hits.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![tall.id, square.id, wide.id]);
}

#[tokio::test]
async fn only_the_last_order_token_wins() {
    let (_store, service) = setup();
    let author = editor("alice");
    let small = service
        .create_post(sized_input("www", "m1", 50, 50), &author)
        .await
        .unwrap();
    let large = service
        .create_post(sized_input("www", "m2", 400, 400), &author)
        .await
        .unwrap();

    let hits = service
        .search("www order:mpixels order:id_asc", page())
        .await
        .unwrap();
    let ids: Vec<i64> = hits.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![small.id, large.id]);
}

#[tokio::test]
async fn pagination_is_restartable() {
    let (_store, service) = setup();
    let author = editor("alice");
    for n in 0..5 {
        service
            .create_post(post_input("nnn", &format!("m{n}")), &author)
            .await
            .unwrap();
    }

    let first: Vec<i64> = service
        .search("nnn", Page::new(1, 2))
        .await
        .unwrap()
        .iter()
        .map(|p| p.id)
        .collect();
    let second: Vec<i64> = service
        .search("nnn", Page::new(2, 2))
        .await
        .unwrap()
        .iter()
        .map(|p| p.id)
        .collect();
    let third: Vec<i64> = service
        .search("nnn", Page::new(3, 2))
        .await
        .unwrap()
        .iter()
        .map(|p| p.id)
        .collect();

    assert_eq!(first, vec![5, 4]);
    assert_eq!(second, vec![3, 2]);
    assert_eq!(third, vec![1]);
}

#[tokio::test]
async fn unrecognized_metatag_prefixes_search_as_plain_tags() {
    let (_store, service) = setup();
    let author = editor("alice");
    let tagged = service
        .create_post(post_input("artist:someone vvv", "m1"), &author)
        .await
        .unwrap();
    service
        .create_post(post_input("vvv", "m2"), &author)
        .await
        .unwrap();

    let hits = service.search("artist:someone", page()).await.unwrap();
    assert_eq!(
        hits.iter().map(|p| p.id).collect::<Vec<_>>(),
        vec![tagged.id]
    );
}
