use geostore::prelude::*;
use geostore::{AOFFile, StoreCommand, SyncPolicy};
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::TempDir;

fn square(x: f64, y: f64, size: f64) -> Geometry {
    Geometry::Polygon(
        Polygon::from_coords(&[[x, y], [x + size, y], [x + size, y + size], [x, y + size]])
            .unwrap(),
    )
}

#[test]
fn test_store_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store.aof");

    let (area, kept, moved, dropped) = {
        let store = GeoStore::open(&path).unwrap();
        let area = store.insert("box", square(0.0, 0.0, 1.0), None).unwrap();
        let kept = store
            .insert("kept", Geometry::Point(Point::new(0.5, 0.5)), None)
            .unwrap();
        let moved = store
            .insert("moved", Geometry::Point(Point::new(0.2, 0.2)), None)
            .unwrap();
        let dropped = store
            .insert("dropped", Geometry::Point(Point::new(0.7, 0.7)), None)
            .unwrap();

        store
            .replace(
                moved,
                Geometry::Point(Point::new(5.0, 5.0)),
                "moved",
                Some("relocated".to_string()),
            )
            .unwrap();
        store.remove(dropped).unwrap();
        store.close().unwrap();
        (area, kept, moved, dropped)
    };

    let initial_size = std::fs::metadata(&path).unwrap().len();
    assert!(initial_size > 0, "AOF file should have been written");

    let store = GeoStore::open(&path).unwrap();
    assert_eq!(store.len().unwrap(), 3);
    assert!(store.get(dropped).is_err());
    assert_eq!(
        store.get(moved).unwrap().description.as_deref(),
        Some("relocated")
    );

    let inside: Vec<RecordId> = store
        .query_contained_in(area)
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(inside, vec![kept]);

    // Ids are not reused after a reopen.
    let next = store
        .insert("next", Geometry::Point(Point::new(1.0, 1.0)), None)
        .unwrap();
    assert_eq!(next, dropped + 1);
}

#[test]
fn test_compaction_shrinks_and_preserves() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("compact.aof");

    let store = GeoStore::open(&path).unwrap();
    let mut ids = Vec::new();
    for i in 0..100 {
        ids.push(
            store
                .insert(
                    format!("p{}", i),
                    Geometry::Point(Point::new(i as f64 * 0.1, 0.0)),
                    None,
                )
                .unwrap(),
        );
    }
    for id in &ids[..90] {
        store.remove(*id).unwrap();
    }

    let before = store.stats().unwrap().aof_size;
    store.compact().unwrap();
    let after = store.stats().unwrap().aof_size;
    assert!(after < before, "compaction should shrink the log");

    // Writes after a compaction land in the rewritten file.
    let late = store
        .insert("late", Geometry::Point(Point::new(50.0, 50.0)), None)
        .unwrap();
    drop(store);

    let store = GeoStore::open(&path).unwrap();
    assert_eq!(store.len().unwrap(), 11);
    for id in &ids[90..] {
        assert!(store.get(*id).is_ok());
    }
    assert_eq!(store.get(late).unwrap().name, "late");
    assert!(!temp_dir.path().join("compact.aof.rewrite").exists());

    let next = store
        .insert("after", Geometry::Point(Point::new(0.0, 0.0)), None)
        .unwrap();
    assert_eq!(next, late + 1);
}

#[test]
fn test_truncated_tail_is_recovered() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("torn.aof");

    {
        let store = GeoStore::open(&path).unwrap();
        for i in 0..5 {
            store
                .insert(format!("p{}", i), Geometry::Point(Point::new(i as f64, 1.0)), None)
                .unwrap();
        }
        store.close().unwrap();
    }
    let intact = std::fs::metadata(&path).unwrap().len();

    // A frame header promising more bytes than were written.
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0, 0, 0, 64, 1, 2, 3]).unwrap();
    drop(file);

    let store = GeoStore::open(&path).unwrap();
    assert_eq!(store.len().unwrap(), 5);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), intact);

    let id = store
        .insert("after", Geometry::Point(Point::new(9.0, 9.0)), None)
        .unwrap();
    drop(store);

    let store = GeoStore::open(&path).unwrap();
    assert_eq!(store.len().unwrap(), 6);
    assert_eq!(store.get(id).unwrap().name, "after");
}

#[test]
fn test_sync_policy_always() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("always.aof");

    let config = Config::default().with_sync_policy(SyncPolicy::Always);
    let store = GeoStore::open_with_config(&path, config).unwrap();
    store.insert("a", square(1.0, 1.0, 2.0), None).unwrap();

    // Every append is already on disk without an explicit sync.
    let size = std::fs::metadata(&path).unwrap().len();
    assert_eq!(size, store.stats().unwrap().aof_size);
    assert!(size > 0);
}

#[test]
fn test_builder_with_aof_path() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("built.aof");

    let store = StoreBuilder::new().aof_path(&path).build().unwrap();
    let id = store
        .insert("hq", Geometry::Point(Point::from_lat_lon(48.1, 11.6)), None)
        .unwrap();
    store.close().unwrap();
    assert!(matches!(store.get(id), Err(GeoStoreError::StoreClosed)));

    let reopened = StoreBuilder::new().aof_path(&path).build().unwrap();
    assert_eq!(reopened.get(id).unwrap().name, "hq");
}

#[test]
fn test_aof_file_frames() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("raw.aof");

    let commands = vec![
        StoreCommand::Watermark { next_id: 7 },
        StoreCommand::Insert {
            id: 7,
            name: "p".to_string(),
            description: None,
            geometry: Geometry::Point(Point::new(1.0, 2.0)),
        },
        StoreCommand::Remove { id: 7 },
    ];

    {
        let mut aof = AOFFile::open(&path).unwrap();
        for command in &commands {
            aof.append(command).unwrap();
        }
        aof.flush().unwrap();
    }

    let mut aof = AOFFile::open(&path).unwrap();
    assert_eq!(aof.replay().unwrap(), commands);

    let store = GeoStore::open(&path).unwrap();
    assert!(store.is_empty().unwrap());
    let id = store
        .insert("fresh", Geometry::Point(Point::new(0.0, 0.0)), None)
        .unwrap();
    assert_eq!(id, 8);
}
