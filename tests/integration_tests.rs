use geostore::service::{CreateArea, CreateLocation, GeoService, LocationFilter, Proximity};
use geostore::{
    BoundingBox, ErrorKind, GeoStore, GeoStoreError, Geometry, GeometryKind, Point, Polygon,
    RecordId,
};

fn square(x: f64, y: f64, size: f64) -> Geometry {
    Geometry::Polygon(
        Polygon::from_coords(&[[x, y], [x, y + size], [x + size, y + size], [x + size, y]])
            .unwrap(),
    )
}

fn ids<T, F: Fn(&T) -> RecordId>(items: &[T], id: F) -> Vec<RecordId> {
    items.iter().map(id).collect()
}

#[test]
fn test_basic_operations() {
    let store = GeoStore::memory().unwrap();

    let id = store
        .insert("depot", Geometry::Point(Point::new(13.4, 52.5)), None)
        .unwrap();
    let record = store.get(id).unwrap();
    assert_eq!(record.name, "depot");
    assert_eq!(record.kind(), GeometryKind::Point);

    let removed = store.remove(id).unwrap();
    assert_eq!(removed.id, id);
    assert!(matches!(store.get(id), Err(GeoStoreError::NotFound(_))));
    assert!(matches!(store.remove(id), Err(GeoStoreError::NotFound(_))));
}

#[test]
fn test_replace_round_trip() {
    let store = GeoStore::memory().unwrap();
    let id = store.insert("zone", square(0.0, 0.0, 1.0), None).unwrap();

    let geometry = square(10.0, 10.0, 3.0);
    store
        .replace(id, geometry.clone(), "zone-2", Some("moved".to_string()))
        .unwrap();

    let record = store.get(id).unwrap();
    assert_eq!(record.geometry, geometry);
    assert_eq!(record.name, "zone-2");
    assert_eq!(record.description.as_deref(), Some("moved"));
    assert_eq!(store.indexed_bbox(id).unwrap(), Some(geometry.bounding_box()));
    assert!(
        !store
            .candidates(&BoundingBox::new(0.0, 0.0, 1.0, 1.0))
            .unwrap()
            .contains(&id)
    );
}

#[test]
fn test_contained_is_subset_of_candidates() {
    let store = GeoStore::memory().unwrap();
    let triangle = Geometry::Polygon(
        Polygon::from_coords(&[[0.0, 0.0], [10.0, 0.0], [0.0, 10.0]]).unwrap(),
    );
    let area = store.insert("triangle", triangle.clone(), None).unwrap();

    for i in 0..12 {
        for j in 0..12 {
            store
                .insert(
                    format!("p{}-{}", i, j),
                    Geometry::Point(Point::new(i as f64, j as f64)),
                    None,
                )
                .unwrap();
        }
    }

    let candidates = store.candidates(&triangle.bounding_box()).unwrap();
    let contained = store.query_contained_in(area).unwrap();
    assert!(contained.iter().all(|r| candidates.contains(&r.id)));

    // Lattice points with i + j <= 10, hypotenuse included.
    assert_eq!(contained.len(), 66);
    assert!(contained.len() < candidates.len());
}

#[test]
fn test_error_kinds() {
    let store = GeoStore::memory().unwrap();
    let err = store.get(404).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = store
        .query_within_radius(&Point::new(0.0, 0.0), 0.0)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = Polygon::from_coords(&[[0.0, 0.0], [1.0, 1.0]]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_service_location_lifecycle() {
    let service = GeoService::memory().unwrap();
    let created = service
        .create_location(&CreateLocation {
            name: "Office".to_string(),
            latitude: 40.7128,
            longitude: -74.006,
        })
        .unwrap();

    assert_eq!(service.get_location(created.id).unwrap(), created);

    let updated = service
        .update_location(
            created.id,
            &CreateLocation {
                name: "New office".to_string(),
                latitude: 40.75,
                longitude: -73.99,
            },
        )
        .unwrap();
    assert_eq!(updated.name, "New office");
    assert_eq!((updated.latitude, updated.longitude), (40.75, -73.99));

    assert!(matches!(
        service.update_location(999, &CreateLocation {
            name: "x".to_string(),
            latitude: 0.0,
            longitude: 0.0,
        }),
        Err(GeoStoreError::NotFound(999))
    ));

    service.delete_location(created.id).unwrap();
    assert!(service.get_location(created.id).is_err());
}

#[test]
fn test_service_spatial_calls() {
    let service = GeoService::memory().unwrap();

    let park = service
        .create_area(&CreateArea {
            name: "Park".to_string(),
            description: Some("Green".to_string()),
            coordinates: vec![vec![
                [-73.98, 40.76],
                [-73.95, 40.76],
                [-73.95, 40.80],
                [-73.98, 40.80],
                [-73.98, 40.76],
            ]],
        })
        .unwrap();
    let overlapping = service
        .create_area(&CreateArea {
            name: "Overlap".to_string(),
            description: None,
            coordinates: vec![vec![[-73.96, 40.79], [-73.90, 40.79], [-73.90, 40.85]]],
        })
        .unwrap();
    service
        .create_area(&CreateArea {
            name: "Far".to_string(),
            description: None,
            coordinates: vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]],
        })
        .unwrap();

    let inside = service
        .create_location(&CreateLocation {
            name: "Lake".to_string(),
            latitude: 40.78,
            longitude: -73.965,
        })
        .unwrap();
    let museum = service
        .create_location(&CreateLocation {
            name: "Museum".to_string(),
            latitude: 40.7614,
            longitude: -73.9776,
        })
        .unwrap();
    let distant = service
        .create_location(&CreateLocation {
            name: "Harbor".to_string(),
            latitude: 40.70,
            longitude: -74.02,
        })
        .unwrap();

    // The museum sits just inside the park's southern edge.
    let in_park = service.locations_in_area(park.id).unwrap();
    assert_eq!(ids(&in_park, |l| l.id), vec![inside.id, museum.id]);

    let check = service.contains(park.id, 40.78, -73.965).unwrap();
    assert!(check.contains);
    assert_eq!(check.area_name, "Park");
    assert_eq!(check.point.latitude, 40.78);
    assert!(!service.contains(park.id, 40.70, -74.02).unwrap().contains);
    assert!(matches!(
        service.contains(inside.id, 40.78, -73.965),
        Err(GeoStoreError::NotFound(_))
    ));

    let intersecting = service.intersecting_areas(park.id).unwrap();
    assert_eq!(ids(&intersecting, |a| a.id), vec![overlapping.id]);

    let nearby = service.nearby(40.78, -73.965, 3.0).unwrap();
    assert_eq!(ids(&nearby, |l| l.id), vec![inside.id, museum.id]);
    let wide = service.nearby(40.78, -73.965, 20.0).unwrap();
    assert_eq!(wide.len(), 3);
    assert_eq!(wide.last().unwrap().id, distant.id);

    let d = service.distance(40.78, -73.965, 40.70, -74.02).unwrap();
    let expected = Point::from_lat_lon(40.78, -73.965).distance_to(&Point::from_lat_lon(40.70, -74.02));
    assert_eq!(d.distance_meters, expected);
    assert!(matches!(
        service.distance(91.0, 0.0, 0.0, 0.0),
        Err(GeoStoreError::OutOfRange(_))
    ));
}

#[test]
fn test_service_location_filters() {
    let service = GeoService::memory().unwrap();
    let area = service
        .create_area(&CreateArea {
            name: "Box".to_string(),
            description: None,
            coordinates: vec![vec![[0.0, 0.0], [0.1, 0.0], [0.1, 0.1], [0.0, 0.1]]],
        })
        .unwrap();

    let mut created = Vec::new();
    for (name, lat, lon) in [
        ("a", 0.05, 0.05),
        ("b", 0.05, 0.09),
        ("c", 0.05, 0.2),
        ("d", 0.3, 0.3),
    ] {
        created.push(
            service
                .create_location(&CreateLocation {
                    name: name.to_string(),
                    latitude: lat,
                    longitude: lon,
                })
                .unwrap()
                .id,
        );
    }

    let all = service.list_locations(&LocationFilter::default()).unwrap();
    assert_eq!(ids(&all, |l| l.id), created);

    let in_area = service
        .list_locations(&LocationFilter {
            area_id: Some(area.id),
            near: None,
        })
        .unwrap();
    assert_eq!(ids(&in_area, |l| l.id), vec![created[0], created[1]]);

    // 7 km around (0.05, 0.15): c at ~5.6 km, b at ~6.7 km, a at ~11 km
    let near = Proximity {
        latitude: 0.05,
        longitude: 0.15,
        radius_km: 7.0,
    };
    let close = service
        .list_locations(&LocationFilter {
            area_id: None,
            near: Some(near),
        })
        .unwrap();
    assert_eq!(ids(&close, |l| l.id), vec![created[2], created[1]]);

    let both = service
        .list_locations(&LocationFilter {
            area_id: Some(area.id),
            near: Some(near),
        })
        .unwrap();
    assert_eq!(ids(&both, |l| l.id), vec![created[1]]);

    assert!(matches!(
        service.list_locations(&LocationFilter {
            area_id: Some(created[0]),
            near: None,
        }),
        Err(GeoStoreError::NotFound(_))
    ));
}

#[test]
fn test_area_update_reindexes() {
    let service = GeoService::memory().unwrap();
    let area = service
        .create_area(&CreateArea {
            name: "A".to_string(),
            description: None,
            coordinates: vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]],
        })
        .unwrap();
    let loc = service
        .create_location(&CreateLocation {
            name: "inside".to_string(),
            latitude: 0.5,
            longitude: 0.5,
        })
        .unwrap();
    assert_eq!(service.locations_in_area(area.id).unwrap().len(), 1);

    let moved = service
        .update_area(
            area.id,
            &CreateArea {
                name: "A'".to_string(),
                description: Some("moved".to_string()),
                coordinates: vec![vec![[5.0, 5.0], [6.0, 5.0], [6.0, 6.0], [5.0, 6.0]]],
            },
        )
        .unwrap();
    assert_eq!(moved.description.as_deref(), Some("moved"));
    assert!(service.locations_in_area(area.id).unwrap().is_empty());
    assert!(!service.contains(area.id, 0.5, 0.5).unwrap().contains);
    assert!(service.get_location(loc.id).is_ok());
}

#[test]
fn test_responses_serialize() {
    let service = GeoService::memory().unwrap();
    let location = service
        .create_location(&CreateLocation {
            name: "p".to_string(),
            latitude: 1.5,
            longitude: 2.5,
        })
        .unwrap();

    let json = serde_json::to_value(&location).unwrap();
    assert_eq!(json["latitude"], 1.5);
    assert_eq!(json["longitude"], 2.5);

    let request: CreateArea = serde_json::from_str(
        r#"{"name": "a", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]}"#,
    )
    .unwrap();
    assert!(request.description.is_none());
    let area = service.create_area(&request).unwrap();
    let json = serde_json::to_value(&area).unwrap();
    assert_eq!(json["name"], "a");
    assert!(json["description"].is_null());
}
