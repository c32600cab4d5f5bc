//! Async loading integration tests
//!
//! Concurrent requests for one identity, async cycles, failure delivery
//! and settlement ordering.

mod common;

use common::Fixture;
use serde_json::json;
use spacey_modules::{ModuleError, ModuleState};
use tokio::sync::oneshot;

fn siblings() -> Fixture {
    Fixture::new(
        &["/lib"],
        &[
            ("/lib/s1.js", "import_async shared as shared\nexport s 1"),
            ("/lib/s2.js", "import_async shared as shared\nexport s 2"),
            ("/lib/shared.js", "export n 1"),
        ],
    )
}

#[tokio::test]
async fn test_siblings_share_one_load() {
    let fixture = siblings();

    let (s1, s2) = tokio::join!(
        fixture.loader.import_async("s1"),
        fixture.loader.import_async("s2")
    );
    assert_eq!(s1.unwrap(), json!({ "s": 1, "shared": { "n": 1 } }));
    assert_eq!(s2.unwrap(), json!({ "s": 2, "shared": { "n": 1 } }));
    assert_eq!(fixture.compiles("/lib/shared.js"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_siblings_share_one_load_across_threads() {
    let fixture = siblings();

    let (s1, s2) = tokio::join!(
        tokio::spawn(fixture.loader.import_async("s1")),
        tokio::spawn(fixture.loader.import_async("s2"))
    );
    assert_eq!(s1.unwrap().unwrap()["shared"], json!({ "n": 1 }));
    assert_eq!(s2.unwrap().unwrap()["shared"], json!({ "n": 1 }));
    assert_eq!(fixture.compiles("/lib/shared.js"), 1);
    assert_eq!(fixture.compiles("/lib/s1.js"), 1);
}

#[tokio::test]
async fn test_concurrent_callbacks_receive_same_interface() {
    let fixture = siblings();
    let require = fixture.loader.require();

    let (tx1, rx1) = oneshot::channel();
    let (tx2, rx2) = oneshot::channel();
    require
        .import_async("shared", move |result| {
            let _ = tx1.send(result);
        })
        .unwrap();
    require
        .import_async("shared", move |result| {
            let _ = tx2.send(result);
        })
        .unwrap();

    let first = rx1.await.unwrap().unwrap();
    let second = rx2.await.unwrap().unwrap();
    assert_eq!(first, json!({ "n": 1 }));
    assert_eq!(first, second);
    assert_eq!(fixture.compiles("/lib/shared.js"), 1);
    assert_eq!(fixture.loader.cache().keys(), vec!["/lib/shared.js"]);
}

#[tokio::test]
async fn test_sync_import_of_in_flight_module_does_not_lock_it() {
    let fixture = Fixture::new(
        &["/lib"],
        &[
            ("/lib/a.js", "import c as c"),
            ("/lib/c/index.js", r#"exports {"v": 1}"#),
        ],
    );

    let (c, a) = tokio::join!(
        fixture.loader.import_async("c"),
        fixture.loader.import_async("a")
    );
    assert_eq!(c.unwrap(), json!({ "v": 1 }));
    assert!(a.is_ok());
    assert_eq!(fixture.compiles("/lib/c/index.js"), 1);

    let cached = fixture.loader.cache().get("/lib/c/index.js").unwrap();
    assert_eq!(cached.state(), ModuleState::Settled);
    assert_eq!(fixture.loader.import("c").unwrap(), json!({ "v": 1 }));
}

#[tokio::test]
async fn test_async_cycle_settles() {
    let fixture = Fixture::new(
        &[],
        &[
            ("/lib/a.js", "export a 1\nimport_async ./b as b"),
            ("/lib/b.js", "export b 1\nimport_async ./a as a"),
        ],
    );

    assert_eq!(
        fixture.loader.import_async("/lib/a").await.unwrap(),
        json!({ "a": 1, "b": { "b": 1, "a": { "a": 1 } } })
    );
    for location in ["/lib/a.js", "/lib/b.js"] {
        let module = fixture.loader.cache().get(location).unwrap();
        assert_eq!(module.state(), ModuleState::Settled);
    }
}

#[tokio::test]
async fn test_async_child_failure_reaches_callback() {
    let fixture = Fixture::new(
        &["/lib"],
        &[
            ("/lib/p.js", "import_async ./bad as bad\nexport p true"),
            ("/lib/bad.js", "throw boom"),
        ],
    );

    assert_eq!(
        fixture.loader.import_async("p").await.unwrap(),
        json!({ "p": true, "bad": { "error": "Error: boom" } })
    );
    assert!(!fixture.loader.cache().has("/lib/bad.js"));
    assert_eq!(
        fixture.loader.cache().get("/lib/p.js").unwrap().state(),
        ModuleState::Settled
    );
}

#[tokio::test]
async fn test_parent_settles_after_async_children() {
    let fixture = Fixture::new(
        &["/lib"],
        &[
            ("/lib/p.js", "import_async ./c as c\nexport p true"),
            ("/lib/c.js", "export c true"),
        ],
    );

    // The synchronous import returns once the compile step has run
    let p = fixture.loader.import_module("p").unwrap();
    assert_eq!(p.state(), ModuleState::AwaitingChildren);
    assert!(p.is_loaded());
    assert_eq!(p.exports(), json!({ "p": true }));

    // Waiting on the same identity resolves after the child's callback
    assert_eq!(
        fixture.loader.import_async("p").await.unwrap(),
        json!({ "p": true, "c": { "c": true } })
    );
    assert_eq!(p.state(), ModuleState::Settled);
}

#[tokio::test]
async fn test_sync_parent_waits_for_async_grandchild() {
    let fixture = Fixture::new(
        &["/lib"],
        &[
            ("/lib/top.js", "import ./mid as mid"),
            ("/lib/mid.js", "import_async ./leaf as leaf"),
            ("/lib/leaf.js", "export leaf true"),
        ],
    );

    let top = fixture.loader.import_module("top").unwrap();
    assert_eq!(top.state(), ModuleState::AwaitingChildren);

    fixture.loader.import_async("top").await.unwrap();
    assert_eq!(top.state(), ModuleState::Settled);
    assert_eq!(
        fixture.loader.cache().get("/lib/mid.js").unwrap().exports(),
        json!({ "leaf": { "leaf": true } })
    );
}

#[test]
fn test_async_import_outside_runtime() {
    let fixture = Fixture::new(
        &["/lib"],
        &[
            ("/lib/p.js", "import_async ./c as c"),
            ("/lib/c.js", "export c true"),
        ],
    );

    let err = fixture.loader.import("p").unwrap_err();
    assert!(matches!(err, ModuleError::NoRuntime(ref id) if id == "./c"));
    assert!(fixture.loader.cache().is_empty());
}

#[tokio::test]
async fn test_import_with_callback() {
    let fixture = Fixture::new(&["/lib"], &[("/lib/data.json", r#"{ "k": "v" }"#)]);

    let (tx, rx) = oneshot::channel();
    fixture
        .loader
        .import_with_callback("data", move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    assert_eq!(rx.await.unwrap().unwrap(), json!({ "k": "v" }));

    let (tx, rx) = oneshot::channel();
    fixture
        .loader
        .import_with_callback("missing", move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    assert!(rx.await.unwrap().unwrap_err().is_not_found());
}
