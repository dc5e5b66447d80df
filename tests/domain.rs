use std::str::FromStr;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use ngs_sync::classify::{Selector, select};
use ngs_sync::domain::{
    BucketName, Category, EntryKind, EntryStatus, LocalLayout, ManifestEntry, ProjectId,
    RemoteLocator, SampleId,
};
use ngs_sync::error::SyncError;

fn ica_entry(id: &str, name: &str, path: &str, kind: EntryKind) -> ManifestEntry {
    ManifestEntry::new(
        id,
        name,
        kind,
        1,
        RemoteLocator::Ica {
            project_id: ProjectId::from_str("proj-1").unwrap(),
            data_id: id.to_string(),
            path: path.to_string(),
        },
        Utf8PathBuf::from("/out").join(name),
    )
    .unwrap()
}

#[test]
fn fastq_selection_requires_prefix_kind_and_suffix() {
    let entries = vec![
        ica_entry("fil.1", "S1_R1.fastq.gz", "/run1/S1_R1.fastq.gz", EntryKind::File),
        ica_entry("fil.2", "S1_R2.FQ.GZ", "/run1/S1_R2.FQ.GZ", EntryKind::File),
        ica_entry("fil.3", "S1.bam", "/run1/S1.bam", EntryKind::File),
        ica_entry("fil.4", "S2_R1.fastq.gz", "/run2/S2_R1.fastq.gz", EntryKind::File),
        ica_entry("fol.5", "odd.fastq.gz", "/run1/odd.fastq.gz/", EntryKind::Folder),
        ica_entry("fil.6", "S3_R1.fastq", "/run1/S3_R1.fastq", EntryKind::File),
    ];

    let selected = select(entries, &Selector::fastq_under("/run1"));
    let ids = selected
        .iter()
        .map(ManifestEntry::identifier)
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["fil.1", "fil.2"]);
}

#[test]
fn selection_is_pure() {
    let entries = vec![
        ica_entry("fil.1", "S1_R1.fastq.gz", "/run1/S1_R1.fastq.gz", EntryKind::File),
        ica_entry("fil.2", "S1.cram", "/run1/S1.cram", EntryKind::File),
    ];
    let selector = Selector::Category(Category::Cram).or(Selector::Category(Category::Fastq));
    let first = select(entries.clone(), &selector);
    let second = select(entries, &selector);
    assert_eq!(first, second);
    assert!(first.iter().all(|entry| entry.status() == &EntryStatus::Pending));
}

#[test]
fn pattern_and_negation() {
    let entries = vec![
        ica_entry("fil.1", "S1_L001_R1.fastq.gz", "/run1/a", EntryKind::File),
        ica_entry("fil.2", "Undetermined_R1.fastq.gz", "/run1/b", EntryKind::File),
    ];
    let selector = Selector::name_pattern(r"_R1\.")
        .unwrap()
        .and(Selector::name_pattern("^Undetermined").unwrap().negate());
    let selected = select(entries, &selector);
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].identifier(), "fil.1");
}

#[test]
fn invalid_selectors() {
    assert_matches!(
        Selector::name_pattern("(unclosed"),
        Err(SyncError::InvalidSelector(_))
    );
    assert_matches!(
        Selector::name_suffix(Vec::<String>::new()),
        Err(SyncError::InvalidSelector(_))
    );
}

#[test]
fn layouts() {
    let flat = LocalLayout::Flat("/out".into());
    assert_eq!(
        flat.local_path(Category::Fastq, "S1_R1.fastq.gz", "S1_R1.fastq.gz"),
        "/out/S1_R1.fastq.gz"
    );
    let archive = LocalLayout::ByCategory("/archive".into());
    assert_eq!(
        archive.local_path(Category::Sv, "NA12878.sv.vcf.gz", "NA12878"),
        "/archive/sv/NA12878.sv.vcf.gz"
    );
}

#[test]
fn identifiers_validate() {
    assert!(ProjectId::from_str("3b1c-99_a").is_ok());
    assert_matches!(
        ProjectId::from_str("proj 1"),
        Err(SyncError::InvalidProjectId(_))
    );
    assert_matches!(SampleId::from_str(""), Err(SyncError::InvalidSampleId(_)));
    assert_matches!(
        BucketName::from_str("bad..bucket"),
        Err(SyncError::InvalidBucketName(_))
    );
}

#[test]
fn empty_name_is_rejected() {
    let result = ManifestEntry::new(
        "fil.1",
        "  ",
        EntryKind::File,
        0,
        RemoteLocator::Http {
            url: "https://example.org/x".to_string(),
        },
        "/out/x".into(),
    );
    assert_matches!(result, Err(SyncError::Manifest(_)));
}
