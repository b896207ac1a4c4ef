mod helpers;

use helpers::{engine_at, test_engine, write_note_file, write_skill_file};

#[tokio::test]
async fn repeated_sync_never_reembeds_unchanged_content() {
    let (engine, provider, _tmp) = test_engine();
    write_note_file(&engine, "a.md", "# Alpha\n\nthe first note body\n");
    write_note_file(&engine, "b.md", "# Beta\n\nthe second note body\n");
    write_skill_file(&engine, "deploy.md", "# Deploying\n\nrun the release script\n");

    let report = engine.full_sync().await.unwrap();
    assert_eq!(report.added, 3);
    let calls_after_first = provider.embed_calls();
    assert!(calls_after_first >= 3);

    for _ in 0..3 {
        let report = engine.full_sync().await.unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(report.updated, 0);
        assert_eq!(report.unchanged, 3);
    }
    assert_eq!(provider.embed_calls(), calls_after_first);
    assert_eq!(engine.store().stats().unwrap().total_entries, 3);
}

#[tokio::test]
async fn edited_note_reembeds_once() {
    let (engine, provider, _tmp) = test_engine();
    write_note_file(&engine, "a.md", "# Alpha\n\noriginal body\n");
    engine.full_sync().await.unwrap();
    let baseline = provider.embed_calls();

    write_note_file(&engine, "a.md", "# Alpha\n\nrewritten body with more detail\n");
    let report = engine.full_sync().await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(provider.embed_calls(), baseline + 1);

    engine.full_sync().await.unwrap();
    assert_eq!(provider.embed_calls(), baseline + 1);
}

#[tokio::test]
async fn provider_change_reembeds_on_next_sync() {
    let tmp = tempfile::TempDir::new().unwrap();

    let (engine, _provider) = engine_at(tmp.path(), 64);
    write_note_file(&engine, "a.md", "# Alpha\n\nstable body\n");
    let log = engine.sessions();
    log.create("s1", None, None, None).await.unwrap();
    log.end("s1", Some("done".into())).await.unwrap();
    engine.full_sync().await.unwrap();
    drop(engine);

    // reopening in a different embedding space drops the cached vectors
    let (engine, provider) = engine_at(tmp.path(), 32);
    let note = engine.store().get_by_source("note:a.md").unwrap().unwrap();
    assert!(note.embedding.is_none());

    let report = engine.full_sync().await.unwrap();
    assert_eq!(report.updated, 2);
    assert_eq!(report.unchanged, 0);
    assert!(provider.embed_calls() >= 2);
    for key in ["note:a.md", "session:s1"] {
        let entry = engine.store().get_by_source(key).unwrap().unwrap();
        assert_eq!(entry.embedding.unwrap().len(), 32);
    }

    // once re-embedded, the hash skip applies again
    let report = engine.full_sync().await.unwrap();
    assert_eq!(report.updated, 0);
    assert_eq!(report.unchanged, 2);
}

#[tokio::test]
async fn deleted_file_removes_only_its_entry() {
    let (engine, _provider, _tmp) = test_engine();
    write_note_file(&engine, "keep.md", "# Keep\n\nthis one stays\n");
    write_note_file(&engine, "gone.md", "# Gone\n\nthis one goes\n");
    write_skill_file(&engine, "skill.md", "# Skill\n\nuntouched skill\n");
    engine.full_sync().await.unwrap();
    assert_eq!(engine.store().stats().unwrap().total_entries, 3);

    std::fs::remove_file(engine.config().notes_dir().join("gone.md")).unwrap();
    let report = engine.full_sync().await.unwrap();
    assert_eq!(report.removed, 1);

    let stats = engine.store().stats().unwrap();
    assert_eq!(stats.total_entries, 2);
    assert!(engine.store().get_by_source("note:keep.md").unwrap().is_some());
    assert!(engine.store().get_by_source("note:gone.md").unwrap().is_none());
    assert!(engine.store().get_by_source("skill:skill.md").unwrap().is_some());
}

#[tokio::test]
async fn odd_directory_entries_do_not_abort_the_batch() {
    let (engine, _provider, _tmp) = test_engine();
    write_note_file(&engine, "good.md", "# Good\n\nreadable\n");
    // a directory named like a note must not be treated as one
    std::fs::create_dir_all(engine.config().notes_dir().join("bad.md")).unwrap();

    let report = engine.full_sync().await.unwrap();
    assert_eq!(report.added, 1);
    assert!(engine.store().get_by_source("note:good.md").unwrap().is_some());
}
