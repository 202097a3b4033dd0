use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use sqlagent::measures::{ConfigErrorKind, MeasureStore, load, resolve, write_index_cache};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{nanos}"))
}

fn measure_json(code: &str, aliases: &[&str]) -> Value {
    json!({
        "measure_code": code,
        "measure_name": format!("{code} measure"),
        "aliases": aliases,
        "info_type": code,
        "formula": "SUM(info_value)",
        "report_aspects": ["CREDIT"],
        "filters": [format!("info_type='{code}'"), format!("measure_code='{code}'")],
        "default_group_by": ["obligor_rdm_id"]
    })
}

fn write_measure(dir: &Path, file_name: &str, config: &Value) -> PathBuf {
    std::fs::create_dir_all(dir).expect("measures dir should be creatable");
    let path = dir.join(file_name);
    std::fs::write(
        &path,
        serde_json::to_vec_pretty(config).expect("config should serialize"),
    )
    .expect("measure config should be writable");
    path
}

fn fixture_measures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/measures")
}

#[test]
fn fixture_measures_load_with_aliases() {
    let index = load(&fixture_measures_dir()).expect("fixture measures should load");

    assert_eq!(index.len(), 3);
    assert_eq!(index.code_for("Current Exposure"), Some("CE"));
    assert_eq!(index.code_for("  exposure at default "), Some("EAD"));
    assert_eq!(index.code_for("lgd"), Some("LGD"));
}

#[test]
fn duplicate_code_across_files_fails_the_whole_load() {
    let dir = unique_temp_dir("sqlagent-measures-dup-code");
    write_measure(&dir, "a.json", &measure_json("CE", &["exposure"]));
    write_measure(&dir, "b.json", &measure_json("CE", &["current"]));

    let error = load(&dir).expect_err("duplicate code should fail");
    assert_eq!(error.kind, ConfigErrorKind::DuplicateCode);
    assert_eq!(error.path.as_deref(), Some(dir.join("b.json").as_path()));

    let error = MeasureStore::open(&dir).expect_err("store should not initialize");
    assert_eq!(error.kind, ConfigErrorKind::DuplicateCode);
}

#[test]
fn every_alias_resolves_to_its_owning_code() {
    let index = load(&fixture_measures_dir()).expect("fixture measures should load");

    for config in index.configs() {
        let aliases = config
            .aliases
            .iter()
            .chain([&config.code, &config.name])
            .map(|alias| alias.to_uppercase())
            .collect::<Vec<_>>();
        let resolution = resolve(&aliases, &index);
        assert!(resolution.is_complete(), "{:?}", resolution.unmatched);
        assert_eq!(resolution.matched.len(), 1);
        assert_eq!(resolution.matched[0].code, config.code);
    }
}

#[test]
fn alias_shared_by_two_measures_is_rejected() {
    let dir = unique_temp_dir("sqlagent-measures-dup-alias");
    write_measure(&dir, "CE.json", &measure_json("CE", &["Exposure"]));
    write_measure(&dir, "EAD.json", &measure_json("EAD", &[" exposure "]));

    let error = load(&dir).expect_err("colliding alias should fail");
    assert_eq!(error.kind, ConfigErrorKind::DuplicateAlias);
    assert!(error.detail.contains("exposure"), "{}", error.detail);
}

#[test]
fn malformed_file_names_the_offending_path() {
    let dir = unique_temp_dir("sqlagent-measures-malformed");
    write_measure(&dir, "CE.json", &measure_json("CE", &[]));
    let mut broken = measure_json("EAD", &[]);
    broken["formula"] = json!("info_value * 2");
    write_measure(&dir, "EAD.json", &broken);

    let error = load(&dir).expect_err("bad formula should fail");
    assert_eq!(error.kind, ConfigErrorKind::MalformedConfig);
    assert_eq!(error.path.as_deref(), Some(dir.join("EAD.json").as_path()));
}

#[test]
fn failed_refresh_keeps_the_previous_index() {
    let dir = unique_temp_dir("sqlagent-measures-refresh");
    write_measure(&dir, "CE.json", &measure_json("CE", &["exposure"]));
    let store = MeasureStore::open(&dir).expect("store should open");
    let before = store.snapshot();

    std::fs::write(dir.join("broken.json"), "{ not json").expect("broken file should write");
    store.refresh().expect_err("refresh should fail");

    let after = store.snapshot();
    assert!(Arc::ptr_eq(&before, &after), "active index must not change");
    assert_eq!(store.lookup("CE").expect("CE survives").code, "CE");
}

#[test]
fn add_config_publishes_new_measure_and_rolls_back_collisions() {
    let dir = unique_temp_dir("sqlagent-measures-add");
    let incoming = unique_temp_dir("sqlagent-measures-add-incoming");
    write_measure(&dir, "CE.json", &measure_json("CE", &["exposure"]));
    let store = MeasureStore::open(&dir).expect("store should open");

    let ead = write_measure(&incoming, "EAD.json", &measure_json("EAD", &["ead amount"]));
    let added = store.add_config(&ead).expect("EAD should be added");
    assert_eq!(added, dir.join("EAD.json"));
    assert_eq!(store.snapshot().code_for("ead amount"), Some("EAD"));

    let clash = write_measure(&incoming, "PE.json", &measure_json("PE", &["Exposure"]));
    let error = store.add_config(&clash).expect_err("alias clash should be refused");
    assert_eq!(error.kind, ConfigErrorKind::DuplicateAlias);
    assert!(!dir.join("PE.json").exists(), "rejected file must be removed");
    assert_eq!(store.snapshot().len(), 2);
}

#[test]
fn readers_keep_consistent_snapshots_during_refresh() {
    let dir = unique_temp_dir("sqlagent-measures-concurrent");
    write_measure(&dir, "CE.json", &measure_json("CE", &["exposure"]));
    let store = Arc::new(MeasureStore::open(&dir).expect("store should open"));

    let readers = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let index = store.snapshot();
                    let resolution = resolve(&["exposure"], &index);
                    assert_eq!(resolution.matched.len(), 1);
                    assert!(index.len() == 1 || index.len() == 2);
                }
            })
        })
        .collect::<Vec<_>>();

    write_measure(&dir, "EAD.json", &measure_json("EAD", &["ead amount"]));
    for _ in 0..20 {
        store.refresh().expect("refresh should succeed");
    }
    for reader in readers {
        reader.join().expect("reader thread should not panic");
    }
    assert_eq!(store.snapshot().len(), 2);
}

#[test]
fn index_cache_lists_every_alias() {
    let dir = unique_temp_dir("sqlagent-measures-cache");
    let index = load(&fixture_measures_dir()).expect("fixture measures should load");
    let cache = dir.join("measure_index.json");

    write_index_cache(&cache, &index, "2026-02-05T07:00:03.042Z").expect("cache should write");

    let written: Value =
        serde_json::from_slice(&std::fs::read(&cache).expect("cache should be readable"))
            .expect("cache should be JSON");
    assert_eq!(written["measure_count"], 3);
    assert_eq!(written["aliases"]["current exposure"], "CE");
    assert_eq!(written["generated_at_utc"], "2026-02-05T07:00:03.042Z");
}
