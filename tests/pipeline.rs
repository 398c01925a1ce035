//! End-to-end pipeline tests: HTTP fixtures on one side, an in-memory
//! board on the other.

use mpyship::board::session::BoardSession;
use mpyship::board::testing::FakeBoard;
use mpyship::manifest::Manifest;
use mpyship::packager::{Packager, PackagerConfig};
use mpyship::ShipError;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn packager(index_url: &str, out_dir: &std::path::Path, overwrite: bool) -> Packager {
    Packager::new(
        PackagerConfig::new()
            .with_index_url(index_url)
            .with_output_dir(out_dir)
            .with_overwrite(overwrite),
    )
}

async fn mount_text(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

// ============================================================================
// Repository install
// ============================================================================

#[tokio::test]
async fn test_repository_package_installs_end_to_end() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_text(
        &server,
        "/modulino-mpy/package.json",
        format!(
            r#"{{"urls": [
                ["modulino/__init__.py", "{base}/modulino-mpy/src/__init__.py"],
                ["modulino/buttons.py", "{base}/modulino-mpy/src/buttons.py"]
            ]}}"#
        ),
    )
    .await;
    mount_text(&server, "/modulino-mpy/src/__init__.py", "VERSION = 1\n".to_string()).await;
    mount_text(
        &server,
        "/modulino-mpy/src/buttons.py",
        "class Buttons: pass\n".to_string(),
    )
    .await;

    let out = TempDir::new().unwrap();
    let mut board = FakeBoard::new();
    packager("https://index.invalid", out.path(), false)
        .package_and_install(
            &mut board,
            &format!("{base}/modulino-mpy"),
            None,
            None,
            None::<fn(u8)>,
        )
        .await
        .unwrap();

    // The archive carried the default-branch version in its name...
    assert!(board
        .statements
        .iter()
        .any(|s| s.contains("/modulino-mpy-latest.tar.gz")));
    // ...every package file landed under the library path...
    assert_eq!(
        board.file("/lib/modulino/__init__.py").unwrap(),
        b"VERSION = 1\n"
    );
    assert_eq!(
        board.file("/lib/modulino/buttons.py").unwrap(),
        b"class Buttons: pass\n"
    );
    // ...and the uploaded archive was cleaned off the board.
    assert!(board.file_paths().iter().all(|p| !p.ends_with(".tar.gz")));
    assert!(!board.is_open());
}

// ============================================================================
// Custom manifest
// ============================================================================

#[tokio::test]
async fn test_custom_manifest_overrides_root() {
    let server = MockServer::start().await;
    let base = server.uri();
    // A remote manifest fetch would be a bug; only file routes exist.
    Mock::given(method("GET"))
        .and(path("/modulino-mpy/package.json"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    mount_text(&server, "/src/modulino/__init__.py", "VERSION = 2\n".to_string()).await;
    mount_text(&server, "/src/modulino/buttons.py", "pass\n".to_string()).await;

    let custom = Manifest::parse(&format!(
        r#"{{"version": "1.0.0", "urls": [
            ["modulino/__init__.py", "{base}/src/modulino/__init__.py"],
            ["modulino/buttons.py", "{base}/src/modulino/buttons.py"]
        ]}}"#
    ))
    .unwrap();

    let out = TempDir::new().unwrap();
    let built = packager("https://index.invalid", out.path(), false)
        .package(&format!("{base}/modulino-mpy"), None, Some(custom), None)
        .await
        .unwrap();

    let name = built.archive_path.file_name().unwrap().to_string_lossy();
    assert!(name.contains("1.0.0"), "archive name {name} lacks version");
    assert_eq!(built.package_files.len(), 2);
}

// ============================================================================
// Index package with dependency
// ============================================================================

#[tokio::test]
async fn test_index_package_with_dependency() {
    let server = MockServer::start().await;
    let senml_hash = "aa11bb22";
    let onewire_hash = "cc33dd44";

    mount_text(
        &server,
        "/package/py/senml/latest.json",
        format!(
            r#"{{"version": "0.3.0",
                 "hashes": [["senml/__init__.py", "{senml_hash}"]],
                 "deps": [["onewire"]]}}"#
        ),
    )
    .await;
    mount_text(
        &server,
        "/package/py/onewire/latest.json",
        format!(r#"{{"version": "1.1.0", "hashes": [["onewire/__init__.py", "{onewire_hash}"]]}}"#),
    )
    .await;
    mount_text(
        &server,
        &format!("/file/aa/{senml_hash}"),
        "class Record: pass\n".to_string(),
    )
    .await;
    mount_text(
        &server,
        &format!("/file/cc/{onewire_hash}"),
        "class OneWire: pass\n".to_string(),
    )
    .await;

    let out = TempDir::new().unwrap();
    let mut board = FakeBoard::new();
    packager(&server.uri(), out.path(), false)
        .package_and_install(&mut board, "senml", None, None, None::<fn(u8)>)
        .await
        .unwrap();

    assert_eq!(
        board.file("/lib/senml/__init__.py").unwrap(),
        b"class Record: pass\n"
    );
    assert_eq!(
        board.file("/lib/onewire/__init__.py").unwrap(),
        b"class OneWire: pass\n"
    );
}

// ============================================================================
// CRC corruption recovery
// ============================================================================

#[tokio::test]
async fn test_corrupted_chunk_recovers_with_smaller_chunks() {
    let server = MockServer::start().await;
    let base = server.uri();
    let blob: String = "x = 'payload'\n".repeat(200);
    mount_text(
        &server,
        "/pkg/package.json",
        format!(r#"{{"urls": [["pkg/data.py", "{base}/pkg/data.py"]]}}"#),
    )
    .await;
    mount_text(&server, "/pkg/data.py", blob.clone()).await;

    let out = TempDir::new().unwrap();
    let mut board = FakeBoard::new().with_failing_crc_checks(1);
    packager("https://index.invalid", out.path(), false)
        .package_and_install(
            &mut board,
            &format!("{base}/pkg"),
            None,
            None,
            None::<fn(u8)>,
        )
        .await
        .unwrap();

    // The rejected chunk was retried (same offset, smaller size): there is
    // one more CRC round trip than committed chunks.
    let checks = board
        .statements
        .iter()
        .filter(|s| s.contains("validate_crc"))
        .count();
    let commits = board
        .statements
        .iter()
        .filter(|s| s.starts_with("w(d[:-4])"))
        .count();
    assert_eq!(checks, commits + 1);

    // All bytes arrived in order regardless.
    assert_eq!(board.file("/lib/pkg/data.py").unwrap(), blob.as_bytes());
}

// ============================================================================
// Overwrite handling
// ============================================================================

#[tokio::test]
async fn test_existing_package_folder_blocks_install() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_text(
        &server,
        "/pkg/package.json",
        format!(r#"{{"urls": [["modulino/__init__.py", "{base}/pkg/__init__.py"]]}}"#),
    )
    .await;
    mount_text(&server, "/pkg/__init__.py", "VERSION = 1\n".to_string()).await;

    let out = TempDir::new().unwrap();
    let mut board = FakeBoard::new();
    board.put_dir("/lib/modulino");

    let err = packager("https://index.invalid", out.path(), false)
        .package_and_install(
            &mut board,
            &format!("{base}/pkg"),
            None,
            None,
            None::<fn(u8)>,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ShipError::WouldOverwriteFolder(path) if path == "/lib/modulino"
    ));
    // The pipeline failed before any transfer was attempted.
    assert!(!board.statements.iter().any(|s| s.starts_with("f = open(")));
}

#[tokio::test]
async fn test_existing_package_folder_replaced_when_overwriting() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_text(
        &server,
        "/pkg/package.json",
        format!(r#"{{"urls": [["modulino/__init__.py", "{base}/pkg/__init__.py"]]}}"#),
    )
    .await;
    mount_text(&server, "/pkg/__init__.py", "VERSION = 2\n".to_string()).await;

    let out = TempDir::new().unwrap();
    let mut board = FakeBoard::new();
    board.put_file("/lib/modulino/stale.py", b"old");

    packager("https://index.invalid", out.path(), true)
        .package_and_install(
            &mut board,
            &format!("{base}/pkg"),
            None,
            None,
            None::<fn(u8)>,
        )
        .await
        .unwrap();

    // The old tree was removed with the recursive helper, then replaced.
    assert!(board
        .statements
        .iter()
        .any(|s| s.contains("remove_directory_recursive('/lib/modulino')")));
    assert!(board.file("/lib/modulino/stale.py").is_none());
    assert_eq!(
        board.file("/lib/modulino/__init__.py").unwrap(),
        b"VERSION = 2\n"
    );
}

// ============================================================================
// Direct file install
// ============================================================================

#[tokio::test]
async fn test_direct_file_installs_single_module() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_text(&server, "/blob/helper.py", "def help(): pass\n".to_string()).await;

    let out = TempDir::new().unwrap();
    let mut board = FakeBoard::new();
    packager("https://index.invalid", out.path(), false)
        .package_and_install(
            &mut board,
            &format!("{base}/blob/helper.py"),
            None,
            None,
            None::<fn(u8)>,
        )
        .await
        .unwrap();

    assert_eq!(
        board.file("/lib/helper.py").unwrap(),
        b"def help(): pass\n"
    );
}
