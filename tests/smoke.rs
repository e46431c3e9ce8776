//! End-to-end smoke test: create an archive from a folder on disk, then
//! extract, update, and diff it through the job engine, checking the
//! counts and statuses that come back at each stage.

use std::fs;
use std::sync::Arc;

use chrono::NaiveDate;
use zipjob::archive::Archive;
use zipjob::deflate::Level;
use zipjob::job::{DecompressStatus, DiffStatus, Job, JobKind};

fn now() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn write_source_tree(root: &camino::Utf8Path) {
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("hi.txt"), b"hello there").unwrap();
    fs::write(root.join("sub/rip.txt"), b"rest in peace").unwrap();
    fs::write(root.join("sub/empty.bin"), b"").unwrap();
}

#[test]
fn create_then_extract_round_trips() {
    let _ = env_logger::builder().is_test(true).try_init();
    let tmp = tempfile::tempdir().unwrap();
    let root = camino::Utf8Path::from_path(tmp.path()).unwrap();
    let source_dir = root.join("source");
    let zip_path = root.join("out.zip");
    let extract_dir = root.join("extracted");

    fs::create_dir_all(&source_dir).unwrap();
    write_source_tree(&source_dir);

    let archive = Arc::new(Archive::create(zip_path.as_str(), Level::DEFAULT).unwrap());
    let mut create_job = Job::new(JobKind::Create, archive.clone());
    create_job.set_base_folder(source_dir.as_str());
    create_job.run();
    let create_outcome = create_job.join().unwrap();
    archive.close().unwrap();

    assert!(create_outcome
        .decompress_results
        .iter()
        .all(|r| matches!(r.status, DecompressStatus::Extracted | DecompressStatus::FolderCreated)));

    let reopened = Arc::new(Archive::open_read(zip_path.as_str(), None, false).unwrap());
    let totals = reopened.totals();
    assert_eq!(totals.files, 3);

    let mut extract_job = Job::new(JobKind::Extract, reopened.clone());
    extract_job.set_base_folder(extract_dir.as_str());
    extract_job.run();
    let extract_outcome = extract_job.join().unwrap();

    let extracted_count = extract_outcome
        .decompress_results
        .iter()
        .filter(|r| matches!(r.status, DecompressStatus::Extracted))
        .count();
    assert_eq!(extracted_count, 3);

    assert_eq!(
        fs::read(extract_dir.join("hi.txt")).unwrap(),
        b"hello there"
    );
    assert_eq!(
        fs::read(extract_dir.join("sub/rip.txt")).unwrap(),
        b"rest in peace"
    );
}

#[test]
fn extract_overwrites_even_when_already_matching() {
    let tmp = tempfile::tempdir().unwrap();
    let root = camino::Utf8Path::from_path(tmp.path()).unwrap();
    let source_dir = root.join("source");
    let zip_path = root.join("out.zip");
    let dest_dir = root.join("dest");

    fs::create_dir_all(&source_dir).unwrap();
    write_source_tree(&source_dir);

    let archive = Arc::new(Archive::create(zip_path.as_str(), Level::DEFAULT).unwrap());
    archive
        .add_file("hi.txt", &source_dir.join("hi.txt"), now())
        .unwrap();
    archive.close().unwrap();

    let reopened = Arc::new(Archive::open_read(zip_path.as_str(), None, false).unwrap());

    // Pre-populate the destination with content that already matches the
    // archive, so an update-style size-then-CRC check would short-circuit.
    fs::create_dir_all(&dest_dir).unwrap();
    fs::write(dest_dir.join("hi.txt"), b"hello there").unwrap();

    let mut extract_job = Job::new(JobKind::Extract, reopened);
    extract_job.set_base_folder(dest_dir.as_str());
    extract_job.run();
    let outcome = extract_job.join().unwrap();

    let hi_result = outcome
        .decompress_results
        .iter()
        .find(|r| r.filename == "hi.txt")
        .unwrap();
    assert_eq!(hi_result.status, DecompressStatus::Extracted);
}

#[test]
fn update_skips_files_already_matching() {
    let tmp = tempfile::tempdir().unwrap();
    let root = camino::Utf8Path::from_path(tmp.path()).unwrap();
    let source_dir = root.join("source");
    let zip_path = root.join("out.zip");
    let dest_dir = root.join("dest");

    fs::create_dir_all(&source_dir).unwrap();
    write_source_tree(&source_dir);

    let archive = Arc::new(Archive::create(zip_path.as_str(), Level::DEFAULT).unwrap());
    archive
        .add_file("hi.txt", &source_dir.join("hi.txt"), now())
        .unwrap();
    archive.close().unwrap();

    let reopened = Arc::new(Archive::open_read(zip_path.as_str(), None, false).unwrap());

    // First update populates the empty destination folder.
    let mut first = Job::new(JobKind::Update, reopened.clone());
    first.set_base_folder(dest_dir.as_str());
    first.run();
    let first_outcome = first.join().unwrap();
    assert!(first_outcome
        .decompress_results
        .iter()
        .any(|r| matches!(r.status, DecompressStatus::Extracted)));

    // Second update against the now-synced folder should find nothing to do.
    let mut second = Job::new(JobKind::Update, reopened);
    second.set_base_folder(dest_dir.as_str());
    second.run();
    let second_outcome = second.join().unwrap();
    assert!(second_outcome
        .decompress_results
        .iter()
        .all(|r| matches!(r.status, DecompressStatus::AlreadyUpToDate)));
}

#[test]
fn diff_reports_mismatches() {
    let tmp = tempfile::tempdir().unwrap();
    let root = camino::Utf8Path::from_path(tmp.path()).unwrap();
    let source_dir = root.join("source");
    let zip_path = root.join("out.zip");
    let dest_dir = root.join("dest");

    fs::create_dir_all(&source_dir).unwrap();
    write_source_tree(&source_dir);
    fs::create_dir_all(&dest_dir).unwrap();
    // Matches the archive's content for hi.txt...
    fs::write(dest_dir.join("hi.txt"), b"hello there").unwrap();
    // ...but this one differs, and this one is local-only.
    fs::write(dest_dir.join("only_local.txt"), b"not in the zip").unwrap();

    let archive = Arc::new(Archive::create(zip_path.as_str(), Level::DEFAULT).unwrap());
    archive
        .add_file("hi.txt", &source_dir.join("hi.txt"), now())
        .unwrap();
    archive
        .add_file("sub/rip.txt", &source_dir.join("sub/rip.txt"), now())
        .unwrap();
    archive.close().unwrap();

    let reopened = Arc::new(Archive::open_read(zip_path.as_str(), None, false).unwrap());
    let mut diff_job = Job::new(JobKind::Diff, reopened);
    diff_job.set_base_folder(dest_dir.as_str());
    diff_job.run();
    let outcome = diff_job.join().unwrap();

    let statuses: Vec<DiffStatus> = outcome.diff_results.iter().map(|r| r.status).collect();
    assert!(statuses.contains(&DiffStatus::FileMatch));
    assert!(statuses.contains(&DiffStatus::FilePackageOnly)); // sub/rip.txt missing locally
    assert!(statuses.contains(&DiffStatus::FilePathOnly)); // only_local.txt
}
