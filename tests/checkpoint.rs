use harvester::product::Product;
use harvester::sink::ProductSink;

fn product(n: usize) -> Product {
    Product {
        url: format!("https://www.store.example/p/{n}/"),
        name: format!("Product number {n} with a long name"),
        sku: n.to_string(),
        ..Product::default()
    }
}

#[test]
fn snapshots_land_every_interval() {
    let dir = tempfile::tempdir().unwrap();
    let sink = ProductSink::create(dir.path(), 2).unwrap();
    let path = sink.checkpoint_path();

    sink.push(product(1)).unwrap();
    assert!(!path.exists(), "no snapshot before the interval fills");

    sink.push(product(2)).unwrap();
    assert!(path.exists());
    let saved: Vec<Product> =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved.len(), 2);

    sink.push(product(3)).unwrap();
    let saved: Vec<Product> =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved.len(), 2, "third product waits for the next interval");
}

#[test]
fn explicit_snapshot_flushes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let sink = ProductSink::create(dir.path(), 100).unwrap();
    sink.push(product(1)).unwrap();
    sink.push(product(2)).unwrap();
    sink.snapshot().unwrap();

    let saved: Vec<Product> =
        serde_json::from_str(&std::fs::read_to_string(sink.checkpoint_path()).unwrap()).unwrap();
    assert_eq!(saved.len(), 2);
}

#[test]
fn resume_reloads_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    {
        let sink = ProductSink::create(dir.path(), 1).unwrap();
        sink.push(product(1)).unwrap();
        sink.push(product(2)).unwrap();
    }

    let resumed = ProductSink::resume(dir.path(), 1).unwrap();
    assert_eq!(resumed.len(), 2);
    assert_eq!(resumed.products()[0].sku, "1");
}

#[test]
fn corrupt_checkpoints_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let sink = ProductSink::create(dir.path(), 1).unwrap();
    std::fs::write(sink.checkpoint_path(), "{ not json").unwrap();

    let resumed = ProductSink::resume(dir.path(), 1).unwrap();
    assert!(resumed.is_empty());
}

#[test]
fn fresh_sink_starts_empty_even_with_a_checkpoint_present() {
    let dir = tempfile::tempdir().unwrap();
    {
        let sink = ProductSink::create(dir.path(), 1).unwrap();
        sink.push(product(1)).unwrap();
    }
    let fresh = ProductSink::create(dir.path(), 1).unwrap();
    assert!(fresh.is_empty());
}

#[test]
fn no_temp_files_left_behind() {
    let dir = tempfile::tempdir().unwrap();
    let sink = ProductSink::create(dir.path(), 1).unwrap();
    sink.push(product(1)).unwrap();
    sink.snapshot().unwrap();

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}
