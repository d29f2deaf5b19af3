mod common;

use common::{archive_token, plaque, Harness};
use plaque_daemon::reconcile::Reconciler;
use plaque_proto::cache::CacheStore;
use plaque_proto::config::PathsConfig;
use plaque_proto::error::ViewerError;
use plaque_proto::model::ViewerState;

fn reconciler(h: &Harness) -> Reconciler {
    Reconciler::new(
        CacheStore::from_paths(&PathsConfig::rooted_at(h.root())),
        h.remote.clone(),
    )
}

#[tokio::test]
async fn unchanged_remote_never_rewrites_cache() {
    let h = Harness::new();
    let p = plaque("p1", "w1", &["t1", "t2"]);
    let t1 = archive_token("t1", "s1");
    let t2 = archive_token("t2", "s2");
    h.remote.put_plaque(p.clone());
    h.remote.put_meta(t1.clone());
    h.remote.put_meta(t2.clone());
    // the harness writes compact json; anything the cache rewrites is pretty-printed
    h.cache_plaque(&p);
    h.cache_meta(&t1);
    h.cache_meta(&t2);

    let files = [
        h.root().join("plaque.json"),
        h.root().join("metadata/t1.json"),
        h.root().join("metadata/t2.json"),
    ];
    let before: Vec<Vec<u8>> = files.iter().map(|f| std::fs::read(f).unwrap()).collect();

    let rec = reconciler(&h);
    for _ in 0..2 {
        let loaded = rec.load_plaque().await.unwrap();
        assert_eq!(loaded, p);
        let metas = rec.load_token_metas(&loaded).await.unwrap();
        assert_eq!(metas, vec![t1.clone(), t2.clone()]);
    }

    let after: Vec<Vec<u8>> = files.iter().map(|f| std::fs::read(f).unwrap()).collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn remote_wins_over_divergent_cache() {
    let h = Harness::new();
    let mut local_plaque = plaque("p1", "", &["t1"]);
    local_plaque.name = "old name".into();
    let remote_plaque = plaque("p1", "w1", &["t1"]);
    let mut local_meta = archive_token("t1", "s1");
    local_meta.description = "stale".into();
    let remote_meta = archive_token("t1", "s1-v2");

    h.cache_plaque(&local_plaque);
    h.cache_meta(&local_meta);
    h.remote.put_plaque(remote_plaque.clone());
    h.remote.put_meta(remote_meta.clone());

    let rec = reconciler(&h);
    let loaded = rec.load_plaque().await.unwrap();
    assert_eq!(loaded, remote_plaque);
    let metas = rec.load_token_metas(&loaded).await.unwrap();
    assert_eq!(metas, vec![remote_meta.clone()]);

    let cache = rec.cache();
    assert_eq!(cache.read_plaque().await.unwrap(), remote_plaque);
    assert_eq!(cache.read_token_meta("t1").await.unwrap(), remote_meta);
}

#[tokio::test]
async fn offline_remote_returns_cached_documents() {
    let h = Harness::new();
    let p = plaque("p1", "w1", &["t1", "t2", "t3"]);
    let t3 = archive_token("t3", "s3");
    let t1 = archive_token("t1", "s1");
    h.cache_plaque(&p);
    h.cache_meta(&t3);
    h.cache_meta(&t1);
    h.remote.set_offline(true);

    let rec = reconciler(&h);
    let loaded = rec.load_plaque().await.unwrap();
    assert_eq!(loaded, p);
    // t2 was never cached and is skipped
    let metas = rec.load_token_metas(&loaded).await.unwrap();
    assert_eq!(metas, vec![t1, t3]);
}

#[tokio::test]
async fn first_boot_creates_plaque_remotely() {
    let h = Harness::new();
    let rec = reconciler(&h);

    let created = rec.load_plaque().await.unwrap();
    assert_eq!(created.document_id, "plaque-1");
    assert_eq!(rec.cache().read_plaque().await.unwrap(), created);

    // second boot reads the cached identity instead of creating another
    let again = rec.load_plaque().await.unwrap();
    assert_eq!(again.document_id, "plaque-1");
    assert_eq!(h.remote.created.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn first_boot_offline_cannot_bootstrap() {
    let h = Harness::new();
    h.remote.set_offline(true);
    let rec = reconciler(&h);
    assert!(matches!(
        rec.load_plaque().await,
        Err(ViewerError::Bootstrap(_))
    ));
}

#[tokio::test]
async fn offline_viewer_with_cache_is_not_in_error() {
    let h = Harness::new();
    let p = plaque("p1", "w1", &["t1"]);
    h.cache_plaque(&p);
    h.cache_meta(&archive_token("t1", "s1"));
    h.put_media_file("s1.mp4");
    h.remote.set_offline(true);

    let viewer = h.viewer(true);
    viewer.startup().await.unwrap();

    let state = viewer.get_viewer_state().await;
    assert_eq!(state.state, ViewerState::Display);
    assert_eq!(state.active_token_meta.unwrap().document_id, "t1");
    assert_eq!(h.player.last_playlist(), vec![h.media_entry("s1.mp4")]);
}
