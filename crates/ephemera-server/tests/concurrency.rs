use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use ephemera_server::store::{MemoryStore, RedbStore, SharedStore};
use ephemera_server::{Engine, EngineError, NewSecret};

fn memory() -> (SharedStore, Option<tempfile::TempDir>) {
    (Arc::new(MemoryStore::new()), None)
}

fn redb() -> (SharedStore, Option<tempfile::TempDir>) {
    let dir = tempfile::tempdir().unwrap();
    let store = RedbStore::open(&dir.path().join("race.db")).unwrap();
    (Arc::new(store), Some(dir))
}

/// Fire `readers` simultaneous reads at one handle; return how many succeeded.
fn race(engine: &Engine, id: &str, readers: usize) -> usize {
    let barrier = Barrier::new(readers);
    let served = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..readers {
            s.spawn(|| {
                barrier.wait();
                match engine.read(id) {
                    Ok(secret) => {
                        assert_eq!(secret.payload(), b"abc");
                        served.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(EngineError::NotFound) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
            });
        }
    });

    served.load(Ordering::SeqCst)
}

fn view_once_has_single_winner(open: fn() -> (SharedStore, Option<tempfile::TempDir>)) {
    let (store, _dir) = open();
    let engine = Engine::new(store);
    for _ in 0..20 {
        let id = engine
            .create(NewSecret::new("abc", "xyz").with_max_views(1))
            .unwrap();
        assert_eq!(race(&engine, &id, 2), 1);
        assert!(!engine.store().contains(&id).unwrap());
    }
}

fn n_views_served_exactly_n_times(open: fn() -> (SharedStore, Option<tempfile::TempDir>)) {
    let (store, _dir) = open();
    let engine = Engine::new(store);
    let id = engine
        .create(NewSecret::new("abc", "xyz").with_max_views(7))
        .unwrap();
    assert_eq!(race(&engine, &id, 32), 7);
    assert!(!engine.store().contains(&id).unwrap());
    assert!(matches!(engine.read(&id), Err(EngineError::NotFound)));
}

#[test]
fn memory_view_once_has_single_winner() {
    view_once_has_single_winner(memory);
}

#[test]
fn redb_view_once_has_single_winner() {
    view_once_has_single_winner(redb);
}

#[test]
fn memory_n_views_served_exactly_n_times() {
    n_views_served_exactly_n_times(memory);
}

#[test]
fn redb_n_views_served_exactly_n_times() {
    n_views_served_exactly_n_times(redb);
}

#[test]
fn independent_handles_do_not_interfere() {
    let (store, _dir) = memory();
    let engine = Engine::new(store);
    let ids: Vec<String> = (0..8)
        .map(|_| {
            engine
                .create(NewSecret::new("abc", "xyz").with_max_views(3))
                .unwrap()
        })
        .collect();

    let total = AtomicUsize::new(0);
    thread::scope(|s| {
        for id in &ids {
            let engine = &engine;
            let total = &total;
            s.spawn(move || {
                for _ in 0..5 {
                    if engine.read(id).is_ok() {
                        total.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    });

    assert_eq!(total.load(Ordering::SeqCst), 8 * 3);
    assert!(engine.store().is_empty().unwrap());
}
