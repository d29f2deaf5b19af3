mod common;

use common::{archive_token, eventually, plaque, wait_for_state, Harness};
use plaque_proto::model::ViewerState;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Claimed plaque `p1` showing `t1`, with `t1`..`t3` available remotely.
fn gallery() -> Harness {
    let h = Harness::new();
    let p = plaque("p1", "w1", &["t1"]);
    h.cache_plaque(&p);
    h.remote.put_plaque(p);
    for (id, media) in [("t1", "s1"), ("t2", "s2"), ("t3", "s3")] {
        h.remote.put_meta(archive_token(id, media));
        h.media.put_archive(&format!("{}.mp4", media), media.as_bytes());
    }
    h
}

async fn listening(h: &Harness) -> bool {
    let remote = h.remote.clone();
    eventually(|| {
        let remote = remote.clone();
        async move { remote.listen_calls.load(Ordering::SeqCst) > 0 }
    })
    .await
}

#[tokio::test]
async fn change_after_grace_runs_a_new_cycle() {
    let h = gallery();
    let viewer = h.viewer(false);
    let task = {
        let viewer = viewer.clone();
        tokio::spawn(async move { viewer.startup().await })
    };
    assert!(listening(&h).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // the snapshot delivered on subscribe was ignored: logo + first playlist only
    assert_eq!(h.player.playlists().len(), 2);

    h.remote.push_plaque(plaque("p1", "w1", &["t3", "t1"])).await;

    let player = h.player.clone();
    let expected = vec![h.media_entry("s3.mp4"), h.media_entry("s1.mp4")];
    assert!(
        eventually(|| {
            let player = player.clone();
            let expected = expected.clone();
            async move { player.last_playlist() == expected }
        })
        .await
    );
    assert!(wait_for_state(&viewer, ViewerState::Display).await);
    let cached: plaque_proto::model::Plaque =
        serde_json::from_slice(&std::fs::read(h.root().join("plaque.json")).unwrap()).unwrap();
    assert_eq!(cached.token_meta_id_list, vec!["t3", "t1"]);

    viewer.cancellation_token().cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn failed_cycle_shows_error_and_is_retried() {
    let h = gallery();
    h.remote.put_meta(archive_token("t4", "s4"));
    let viewer = h.viewer(false);
    let task = {
        let viewer = viewer.clone();
        tokio::spawn(async move { viewer.startup().await })
    };
    assert!(listening(&h).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // s4 is not in the archive yet
    h.remote.push_plaque(plaque("p1", "w1", &["t4"])).await;
    assert!(wait_for_state(&viewer, ViewerState::Error).await);

    h.media.put_archive("s4.mp4", b"s4");
    assert!(wait_for_state(&viewer, ViewerState::Display).await);
    assert_eq!(h.player.last_playlist(), vec![h.media_entry("s4.mp4")]);

    viewer.cancellation_token().cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn subscription_failure_is_retried_until_it_works() {
    let h = gallery();
    h.remote.listen_fails.store(true, Ordering::SeqCst);
    let viewer = h.viewer(false);
    let task = {
        let viewer = viewer.clone();
        tokio::spawn(async move { viewer.startup().await })
    };

    assert!(wait_for_state(&viewer, ViewerState::Error).await);
    let remote = h.remote.clone();
    assert!(
        eventually(|| {
            let remote = remote.clone();
            async move { remote.listen_calls.load(Ordering::SeqCst) >= 3 }
        })
        .await
    );

    h.remote.listen_fails.store(false, Ordering::SeqCst);
    assert!(wait_for_state(&viewer, ViewerState::Display).await);

    // and the re-established subscription delivers changes
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.remote.push_plaque(plaque("p1", "w1", &["t2"])).await;
    let player = h.player.clone();
    let expected = vec![h.media_entry("s2.mp4")];
    assert!(
        eventually(|| {
            let player = player.clone();
            let expected = expected.clone();
            async move { player.last_playlist() == expected }
        })
        .await
    );

    viewer.cancellation_token().cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn ended_subscription_is_re_established() {
    let h = gallery();
    let viewer = h.viewer(false);
    let task = {
        let viewer = viewer.clone();
        tokio::spawn(async move { viewer.startup().await })
    };
    assert!(listening(&h).await);

    h.remote.drop_subscriptions();
    let remote = h.remote.clone();
    assert!(
        eventually(|| {
            let remote = remote.clone();
            async move { remote.listen_calls.load(Ordering::SeqCst) >= 2 }
        })
        .await
    );

    viewer.cancellation_token().cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn burst_of_changes_settles_on_the_newest() {
    let h = gallery();
    let viewer = h.viewer(false);
    let task = {
        let viewer = viewer.clone();
        tokio::spawn(async move { viewer.startup().await })
    };
    assert!(listening(&h).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    h.remote.push_plaque(plaque("p1", "w1", &["t2"])).await;
    h.remote.push_plaque(plaque("p1", "w1", &["t3"])).await;
    h.remote.push_plaque(plaque("p1", "w1", &["t2", "t3"])).await;

    let player = h.player.clone();
    let expected = vec![h.media_entry("s2.mp4"), h.media_entry("s3.mp4")];
    assert!(
        eventually(|| {
            let player = player.clone();
            let expected = expected.clone();
            async move { player.last_playlist() == expected }
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.player.last_playlist(), expected);
    assert!(wait_for_state(&viewer, ViewerState::Display).await);

    viewer.cancellation_token().cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn retries_of_a_failed_cycle_keep_reporting_error() {
    let h = gallery();
    h.remote.put_meta(archive_token("t4", "s4"));
    let viewer = h.viewer(false);
    let task = {
        let viewer = viewer.clone();
        tokio::spawn(async move { viewer.startup().await })
    };
    assert!(listening(&h).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // s4 never reaches the archive
    h.remote.push_plaque(plaque("p1", "w1", &["t4"])).await;
    assert!(wait_for_state(&viewer, ViewerState::Error).await);

    let mut seen = Vec::new();
    for _ in 0..40 {
        seen.push(viewer.get_viewer_state().await.state);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // fixed 20ms retries: several attempts ran while sampling
    assert!(h.media.archive_hits().iter().filter(|n| *n == "s4.mp4").count() >= 3);
    assert!(seen.iter().all(|s| *s == ViewerState::Error), "{:?}", seen);

    viewer.cancellation_token().cancel();
    task.await.unwrap().unwrap();
}
