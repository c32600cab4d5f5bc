//! Resolution integration tests
//!
//! Candidate order, relative and absolute identifiers, prefixes and the
//! main module.

mod common;

use common::Fixture;
use serde_json::json;
use spacey_modules::{
    Handler, Host, LoaderConfig, MemorySource, Module, ModuleError, ModuleLoader, Payload, Result,
};
use std::path::{Path, PathBuf};

fn paths(list: &[&str]) -> Vec<PathBuf> {
    list.iter().map(PathBuf::from).collect()
}

/// Loader over `/r1` and `/r2` with only `.a` and `.b` registered; both
/// handlers expose the location they were asked to load.
fn two_root_loader(files: &[&str]) -> ModuleLoader {
    let source = MemorySource::new();
    for file in files {
        source.insert(*file, "");
    }
    let config = LoaderConfig {
        bootstrap: false,
        ..LoaderConfig::isolated(paths(&["/r1", "/r2"])).with_base_dir("/")
    };
    let loader = ModuleLoader::new(config, Host::default().with_source(source)).unwrap();
    for ext in [".a", ".b"] {
        loader
            .register_extension(
                ext,
                Handler::load(|m: &Module| -> Result<Payload> {
                    Ok(Payload::Interface(json!(m.location())))
                }),
            )
            .unwrap();
    }
    loader
}

#[test]
fn test_search_order_is_deterministic() {
    let loader = two_root_loader(&[]);
    assert_eq!(
        loader.candidates("id", None).unwrap(),
        paths(&[
            "/r1/id.a",
            "/r1/id/index.a",
            "/r1/id.b",
            "/r1/id/index.b",
            "/r2/id.a",
            "/r2/id/index.a",
            "/r2/id.b",
            "/r2/id/index.b",
        ])
    );
}

#[test]
fn test_first_existing_candidate_wins() {
    let loader = two_root_loader(&["/r1/id/index.b", "/r2/id.a"]);
    assert_eq!(loader.resolve("id").unwrap(), "/r1/id/index.b");
    assert_eq!(loader.import("id").unwrap(), json!("/r1/id/index.b"));

    let loader = two_root_loader(&["/r1/id.b", "/r1/id/index.a"]);
    assert_eq!(loader.resolve("id").unwrap(), "/r1/id/index.a");
}

#[test]
fn test_relative_resolution_uses_requester_directory_only() {
    let fixture = Fixture::new(
        &["/lib"],
        &[
            ("/p/q.js", "import ./x as x"),
            ("/p/x.js", "export at \"p\""),
            ("/lib/x.js", "export at \"lib\""),
            ("/p/lonely.js", "try_import ./y as y"),
            ("/lib/y.js", "export at \"lib\""),
        ],
    );

    assert_eq!(
        fixture.loader.import("/p/q").unwrap(),
        json!({ "x": { "at": "p" } })
    );

    // ./y exists only under a global root, which relative ids never search
    let lonely = fixture.loader.import("/p/lonely").unwrap();
    assert_eq!(lonely["y"]["error"], json!("Cannot find module './y'"));

    let candidates = fixture
        .loader
        .candidates("./x", Some(Path::new("/p/q.ext")))
        .unwrap();
    assert!(candidates.iter().all(|c| c.starts_with("/p")));
    assert_eq!(candidates[0], PathBuf::from("/p/x.js"));
}

#[test]
fn test_top_level_relative_uses_base_dir() {
    let fixture = Fixture::new(&["/lib"], &[("/work/local.js", "export here true")]);
    assert_eq!(fixture.loader.import("./local").unwrap(), json!({ "here": true }));
    assert!(fixture.loader.import("local").unwrap_err().is_not_found());
}

#[test]
fn test_absolute_and_file_prefixed_identifiers() {
    let fixture = Fixture::new(&["/lib"], &[("/opt/tool/index.js", "export tool true")]);

    assert_eq!(fixture.loader.resolve("/opt/tool").unwrap(), "/opt/tool/index.js");
    assert_eq!(fixture.loader.resolve("file:///opt/tool").unwrap(), "/opt/tool/index.js");
    assert_eq!(fixture.loader.resolve("file:/opt/tool").unwrap(), "/opt/tool/index.js");
    assert_eq!(fixture.loader.import("/opt/tool").unwrap(), json!({ "tool": true }));
}

#[test]
fn test_parent_directory_segments() {
    let fixture = Fixture::new(
        &[],
        &[
            ("/app/src/main.js", "import ../shared/util as util"),
            ("/app/shared/util.js", "export ok true"),
        ],
    );
    assert_eq!(
        fixture.loader.import("/app/src/main").unwrap(),
        json!({ "util": { "ok": true } })
    );
    assert!(fixture.loader.cache().has("/app/shared/util.js"));
}

#[test]
fn test_failed_resolution_creates_no_cache_entry() {
    let fixture = Fixture::new(&["/lib"], &[]);

    let err = fixture.loader.import("nowhere").unwrap_err();
    assert!(matches!(err, ModuleError::ModuleNotFound(ref id) if id == "nowhere"));
    assert!(matches!(
        fixture.loader.import(""),
        Err(ModuleError::InvalidIdentifier(_))
    ));
    assert!(fixture.loader.cache().is_empty());
}

#[test]
fn test_resolve_from_module() {
    let fixture = Fixture::new(&["/lib"], &[("/lib/a.js", ""), ("/lib/sub/b.js", "")]);
    let a = fixture.loader.import_module("a").unwrap();
    assert_eq!(a.location(), "/lib/a.js");

    let require = fixture.loader.require();
    assert_eq!(require.resolve("sub/b").unwrap(), "/lib/sub/b.js");
    assert!(fixture.loader.cache().get("/lib/sub/b.js").is_none());
}

#[test]
fn test_module_metadata() {
    let fixture = Fixture::new(&["/lib"], &[("/lib/pkg/index.js", "export ok true")]);
    let module = fixture.loader.import_module("pkg").unwrap();

    assert_eq!(module.id(), "/lib/pkg/index");
    assert_eq!(module.filename(), "/lib/pkg/index.js");
    assert_eq!(module.dirname(), "/lib/pkg");
    assert_eq!(module.extension(), ".js");
    assert!(module.is_loaded());
    assert!(module.parent().is_none());
}

#[test]
fn test_run_main() {
    let fixture = Fixture::new(
        &["/lib"],
        &[("/work/app.js", "main as main\nexport ok true")],
    );
    assert!(fixture.loader.main().is_none());

    let main = fixture.loader.run_main("app.js").unwrap();
    assert_eq!(main.location(), "/work/app.js");
    assert_eq!(main.exports(), json!({ "main": "/work/app.js", "ok": true }));
    assert_eq!(fixture.loader.main().unwrap().location(), "/work/app.js");
}

#[test]
fn test_run_main_prefers_exact_file() {
    let fixture = Fixture::new(
        &["/lib"],
        &[
            ("/work/app.js", "export kind \"script\""),
            ("/work/app.json", r#"{ "kind": "data" }"#),
        ],
    );

    let main = fixture.loader.run_main("app.json").unwrap();
    assert_eq!(main.location(), "/work/app.json");
    assert_eq!(main.exports(), json!({ "kind": "data" }));
    assert_eq!(fixture.loader.main().unwrap().location(), "/work/app.json");
    assert_eq!(fixture.compiles("/work/app.js"), 0);

    // Without an exact match the extension is dropped and searched again
    let fixture = Fixture::new(&["/lib"], &[("/work/tool.json", r#"{ "ok": true }"#)]);
    let main = fixture.loader.run_main("tool.js").unwrap();
    assert_eq!(main.location(), "/work/tool.json");
}

#[test]
fn test_roots_can_be_added_at_runtime() {
    let fixture = Fixture::new(&["/lib"], &[("/vendor/dep.js", "export vendored true")]);
    assert!(fixture.loader.import("dep").is_err());

    fixture.loader.push_path("/vendor");
    assert_eq!(fixture.loader.paths(), paths(&["/lib", "/vendor"]));
    assert_eq!(
        fixture.loader.import("dep").unwrap(),
        json!({ "vendored": true })
    );
}
