use std::fs::File;
use std::io::Write;
use std::path::Path;

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;

use kira_reference_sync::error::KiraError;
use kira_reference_sync::sifts::{FallbackAlignmentSource, SiftsSummary};

const FIXTURE: &str = "tests/fixtures/pdb_chain_uniprot.tsv";

#[test]
fn load_plain_table() {
    let summary = SiftsSummary::from_path(Path::new(FIXTURE), true).unwrap();
    assert!(summary.is_abbreviated());

    let chains = summary.longest_alignments("1A3N", &["A".to_string(), "C".to_string()]);
    assert_eq!(chains.len(), 2);
    assert!(chains.iter().all(|chain| chain.accession == "P69905"));
    assert_eq!(chains[1].chain_id, "C");
    assert_eq!(chains[0].aligned_length(), 141);

    let identifiers: Vec<String> = summary.identifiers().into_iter().collect();
    assert_eq!(identifiers, vec!["P00338", "P69905"]);
}

#[test]
fn load_gzipped_table() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("pdb_chain_uniprot.tsv.gz");
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    encoder
        .write_all(&std::fs::read(FIXTURE).unwrap())
        .unwrap();
    encoder.finish().unwrap();

    let summary = SiftsSummary::from_path(&path, false).unwrap();
    let chains = summary.longest_alignments("1i10", &["A".to_string()]);
    assert_eq!(chains.len(), 1);
    assert_eq!(chains[0].regions.len(), 2);
    assert_eq!(chains[0].aligned_length(), 342);
}

#[test]
fn unknown_chains_are_omitted() {
    let summary = SiftsSummary::from_path(Path::new(FIXTURE), true).unwrap();
    assert!(summary.longest_alignments("1A3N", &["Z".to_string()]).is_empty());
    assert!(summary.longest_alignments("9ZZZ", &["A".to_string()]).is_empty());
}

#[test]
fn short_rows_are_rejected() {
    let table = "1abc\tA\tP69905\t1\n";
    assert_matches!(
        SiftsSummary::from_reader(table.as_bytes(), true),
        Err(KiraError::Sifts(_))
    );
    let table = "1abc\tA\tP69905\tx\t10\t1\t10\t1\t10\n";
    assert_matches!(
        SiftsSummary::from_reader(table.as_bytes(), true),
        Err(KiraError::Sifts(_))
    );
}

#[test]
fn longer_accession_wins_per_chain() {
    let table = "2abc\tB\tQ11111\t1\t50\t1\t50\t1\t50\n\
2abc\tB\tQ22222\t1\t90\t1\t90\t1\t90\n\
2abc\tB\tQ00000\t1\t90\t1\t90\t1\t90\n";
    let summary = SiftsSummary::from_reader(table.as_bytes(), true).unwrap();
    let chains = summary.longest_alignments("2ABC", &["B".to_string()]);
    // Equal lengths resolve to the smaller accession.
    assert_eq!(chains[0].accession, "Q00000");
}
