use std::path::Path;

use demopilot::{ActionKind, CommandKind, DemoScript, ScriptCatalog};

fn sample_path() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/storefront.yaml"))
}

#[test]
fn bundled_storefront_script_loads() {
    let script = DemoScript::load_from_file(sample_path()).expect("sample script is valid");

    assert_eq!(script.product_name(), "Example Storefront");
    assert_eq!(script.len(), 4);

    let features = script.step(1).unwrap();
    assert_eq!(features.action_kind(), ActionKind::Navigate);
    assert_eq!(
        features.narration(),
        "Here's Features - everything a shop needs out of the box"
    );

    let get_started = script.step(2).unwrap();
    assert_eq!(get_started.action_kind(), ActionKind::Click);
    assert_eq!(get_started.target(), "#get-started");
    assert_eq!(get_started.wait_seconds(), 4);

    assert_eq!(script.step(3).unwrap().wait_seconds(), 3);

    let sign_in = script.vocabulary().route(CommandKind::GoToSignIn).unwrap();
    assert_eq!(sign_in.target(), "https://example.com/account/login");
    assert!(sign_in.matches("can you login for me"));
}

#[test]
fn catalog_round_trips_through_json() {
    let dir = tempfile::tempdir().unwrap();
    let script = DemoScript::load_from_file(sample_path()).unwrap();
    let json_path = dir.path().join("storefront.json");
    script.save_to_file(&json_path).unwrap();

    let mut catalog = ScriptCatalog::new();
    let id = catalog.load_file(&json_path).unwrap();
    assert_eq!(id, "example_storefront");
    assert_eq!(catalog.get(&id).as_deref(), Some(&script));
}

#[test]
fn catalog_loads_every_script_in_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::copy(sample_path(), dir.path().join("storefront.yaml")).unwrap();
    std::fs::write(
        dir.path().join("tickets.json"),
        r#"{"product_name": "Acme Tickets", "base_url": "https://acme.test",
            "steps": [{"name": "Home", "target": "/home"}]}"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a script").unwrap();

    let mut catalog = ScriptCatalog::new();
    let ids = catalog.load_dir(dir.path()).unwrap();
    assert_eq!(ids, vec!["example_storefront", "acme_tickets"]);
    assert_eq!(catalog.list().len(), 2);

    assert!(catalog.load_dir(dir.path().join("missing")).is_err());
}
