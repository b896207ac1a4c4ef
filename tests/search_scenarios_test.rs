mod helpers;

use helpers::{test_engine, write_note_file};
use mnemon::memory::types::{MatchType, SearchRequest};

#[tokio::test]
async fn deploy_steps_note_is_found_by_paraphrase() {
    let (engine, _provider, _tmp) = test_engine();
    engine
        .write_note(
            "Deploy Steps",
            "1. run the test suite\n2. tag the release\n3. push to the registry",
            &["ops".into(), "release".into()],
        )
        .await
        .unwrap();
    write_note_file(&engine, "unrelated.md", "# Groceries\n\nmilk and eggs\n");
    engine.full_sync().await.unwrap();

    let results = engine.search("how do I deploy a release").await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].entry.title.as_deref(), Some("Deploy Steps"));
    assert!(!results[0].highlights.is_empty());
}

#[tokio::test]
async fn deleted_note_becomes_unsearchable() {
    let (engine, _provider, _tmp) = test_engine();
    let path = engine
        .write_note(
            "Deploy Steps",
            "always run smoke tests before deploy",
            &["ops".into(), "release".into()],
        )
        .await
        .unwrap();

    let results = engine.search("smoke test").await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].entry.title.as_deref(), Some("Deploy Steps"));

    std::fs::remove_file(&path).unwrap();
    engine.full_sync().await.unwrap();
    let results = engine.search("smoke test").await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn both_channel_hit_is_hybrid_and_outranks_single_channel() {
    let (engine, _provider, _tmp) = test_engine();
    write_note_file(
        &engine,
        "both.md",
        "# Caching\n\nthe redis cache eviction policy and ttl settings\n",
    );
    write_note_file(&engine, "other.md", "# Logging\n\nstructured log output formats\n");
    engine.full_sync().await.unwrap();

    let mut request = SearchRequest::new("redis cache eviction");
    request.vector_weight = 0.5;
    request.keyword_weight = 0.5;
    let results = engine.search_with(&request).await.unwrap();

    let top = &results[0];
    assert_eq!(top.entry.source_key, "note:both.md");
    assert_eq!(top.match_type, MatchType::Hybrid);
    let vector_part = top.vector_score.unwrap() * 0.5;
    let keyword_part = top.keyword_score.unwrap() * 0.5;
    assert!(top.score >= vector_part);
    assert!(top.score >= keyword_part);
    assert!((top.score - (vector_part + keyword_part)).abs() < 1e-9);
}

#[tokio::test]
async fn identical_content_scores_near_one_on_vector_channel() {
    let (engine, _provider, _tmp) = test_engine();
    let text = "exact duplicate body used verbatim as the query";
    write_note_file(&engine, "dup.md", &format!("# Dup\n\n{text}\n"));
    engine.full_sync().await.unwrap();

    let mut request = SearchRequest::new(text);
    request.vector_weight = 1.0;
    request.keyword_weight = 0.0;
    let results = engine.search_with(&request).await.unwrap();
    assert!(!results.is_empty());
    let vector = results[0].vector_score.unwrap();
    assert!(vector > 0.99, "vector score was {vector}");
}

#[tokio::test]
async fn min_score_boundary_is_inclusive() {
    let (engine, _provider, _tmp) = test_engine();
    write_note_file(&engine, "a.md", "# Target\n\nsome searchable body text\n");
    engine.full_sync().await.unwrap();

    let mut request = SearchRequest::new("searchable body");
    let results = engine.search_with(&request).await.unwrap();
    assert!(!results.is_empty());
    let score = results[0].score;

    request.min_score = score;
    assert_eq!(engine.search_with(&request).await.unwrap().len(), 1);

    request.min_score = score + 1e-6;
    assert!(engine.search_with(&request).await.unwrap().is_empty());
}

#[tokio::test]
async fn tag_filter_applies_before_truncation() {
    let (engine, _provider, _tmp) = test_engine();
    // many untagged decoys that match the query, one tagged target
    for i in 0..10 {
        write_note_file(
            &engine,
            &format!("decoy{i}.md"),
            &format!("# Decoy {i}\n\ndatabase migration notes copy {i}\n"),
        );
    }
    write_note_file(
        &engine,
        "target.md",
        "# Target\n\ntags: migrations\n\ndatabase migration notes, the tagged one\n",
    );
    engine.full_sync().await.unwrap();

    let mut request = SearchRequest::new("database migration notes");
    request.limit = 2;
    request.tags = Some(vec!["migrations".into()]);
    let results = engine.search_with(&request).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entry.source_key, "note:target.md");
}

#[tokio::test]
async fn empty_index_returns_no_results() {
    let (engine, _provider, _tmp) = test_engine();
    let results = engine.search("anything").await.unwrap();
    assert!(results.is_empty());
}
