//! Terminal host tests, run against the offline services with scripted
//! input.

use docqa::chat::{chat_loop, ChatOptions};
use docqa::config::Config;
use docqa::services::Services;

fn notes_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("notes.txt");
    std::fs::write(
        &path,
        "Deploys run nightly at 2am. Rollbacks are manual and need an approver.",
    )
    .unwrap();
    path
}

#[tokio::test]
async fn prompts_for_file_and_departments() {
    let dir = tempfile::tempdir().unwrap();
    let path = notes_file(&dir);
    let services = Services::offline(Config::default());
    let input = format!("{}\nDevOps\nWhen do deploys run?\nexit\n", path.display());

    let mut out = Vec::new();
    chat_loop(&services, ChatOptions::default(), input.as_bytes(), &mut out)
        .await
        .unwrap();

    let printed = String::from_utf8(out).unwrap();
    assert!(printed.contains("Options: none, Data management, DevOps"));
    assert!(printed.contains("Deploys run nightly at 2am.\nSources: source_0"));
    assert!(printed.contains("--- source_0 ---"));
}

#[tokio::test]
async fn preset_file_and_departments_skip_prompts() {
    let dir = tempfile::tempdir().unwrap();
    let options = ChatOptions {
        file: Some(notes_file(&dir)),
        departments: Some(vec!["DevOps".to_string()]),
    };
    let services = Services::offline(Config::default());

    let mut out = Vec::new();
    chat_loop(&services, options, &b"When do deploys run?\n"[..], &mut out)
        .await
        .unwrap();

    let printed = String::from_utf8(out).unwrap();
    assert!(!printed.contains("File path"));
    assert!(!printed.contains("Options:"));
    assert!(printed.contains("Sources: source_0"));
}

#[tokio::test]
async fn unsupported_file_is_reported_and_prompted_again() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("photo.png");
    std::fs::write(&image, b"\x89PNG").unwrap();
    let services = Services::offline(Config::default());
    let input = format!("{}\n", image.display());

    let mut out = Vec::new();
    chat_loop(&services, ChatOptions::default(), input.as_bytes(), &mut out)
        .await
        .unwrap();

    let printed = String::from_utf8(out).unwrap();
    assert!(printed.contains("Unsupported file type"));
    assert_eq!(printed.matches("File path").count(), 2);
}
