use geostore::service::{CreateArea, CreateLocation, GeoService, LocationFilter, Proximity};
use geostore::{GeometryKind, StoreBuilder};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("GeoStore demo (v{})", geostore::VERSION);

    let store = match std::env::args().nth(1) {
        Some(path) => StoreBuilder::new().aof_path(path).build()?,
        None => StoreBuilder::new().in_memory().build()?,
    };
    let service = GeoService::new(store);

    // Locations
    println!("\nLocations:");
    let cities = [
        ("Brandenburg Gate", 52.5163, 13.3777),
        ("Alexanderplatz", 52.5219, 13.4132),
        ("Checkpoint Charlie", 52.5075, 13.3904),
        ("Potsdam", 52.3906, 13.0645),
    ];
    for (name, latitude, longitude) in cities {
        let created = service.create_location(&CreateLocation {
            name: name.to_string(),
            latitude,
            longitude,
        })?;
        println!(
            "  #{} {} ({:.4}, {:.4})",
            created.id, created.name, created.latitude, created.longitude
        );
    }

    // Areas, rings in [longitude, latitude]
    println!("\nAreas:");
    let mitte = service.create_area(&CreateArea {
        name: "Mitte".to_string(),
        description: Some("Central district".to_string()),
        coordinates: vec![vec![
            [13.36, 52.50],
            [13.42, 52.50],
            [13.42, 52.53],
            [13.36, 52.53],
            [13.36, 52.50],
        ]],
    })?;
    let east = service.create_area(&CreateArea {
        name: "East".to_string(),
        description: None,
        coordinates: vec![vec![[13.40, 52.51], [13.48, 52.51], [13.48, 52.55], [13.40, 52.55]]],
    })?;
    println!("  #{} {}", mitte.id, mitte.name);
    println!("  #{} {}", east.id, east.name);

    // Spatial queries
    println!("\nLocations in {}:", mitte.name);
    for location in service.locations_in_area(mitte.id)? {
        println!("  {}", location.name);
    }

    let distance = service.distance(52.5163, 13.3777, 52.3906, 13.0645)?;
    println!(
        "\nBrandenburg Gate to Potsdam: {:.1} km",
        distance.distance_meters / 1000.0
    );

    println!("\nWithin 2 km of the Brandenburg Gate:");
    for location in service.nearby(52.5163, 13.3777, 2.0)? {
        println!("  {}", location.name);
    }

    let check = service.contains(mitte.id, 52.5219, 13.4132)?;
    println!(
        "\n{} contains ({}, {}): {}",
        check.area_name, check.point.latitude, check.point.longitude, check.contains
    );

    println!("\nAreas intersecting {}:", mitte.name);
    for area in service.intersecting_areas(mitte.id)? {
        println!("  {}", area.name);
    }

    let filter = LocationFilter {
        area_id: Some(mitte.id),
        near: Some(Proximity {
            latitude: 52.52,
            longitude: 13.40,
            radius_km: 1.5,
        }),
    };
    println!("\nIn {} and within 1.5 km of (52.52, 13.40):", mitte.name);
    for location in service.list_locations(&filter)? {
        println!("  {}", location.name);
    }

    let stats = service.store().stats()?;
    println!(
        "\nStats: {} locations, {} areas, {} inserts, AOF {} bytes",
        stats.location_count, stats.area_count, stats.insert_count, stats.aof_size
    );
    println!(
        "Points listed: {}",
        service.store().list_kind(GeometryKind::Point)?.len()
    );

    service.store().close()?;
    Ok(())
}
