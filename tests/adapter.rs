use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};

use kira_reference_sync::adapter::{
    ObjectFilter, ReferenceAnnotationAdapter, ReferenceSequenceAdapter,
};
use kira_reference_sync::domain::MatchRecord;
use kira_reference_sync::match_cache::MatchCache;
use kira_reference_sync::ontology::{AnnotationResources, EnzymeClassTree, GeneOntology};
use kira_reference_sync::reconcile::{ReconcileSettings, Reconciler};
use kira_reference_sync::sifts::{FallbackAlignmentSource, SiftsSummary};
use kira_reference_sync::uniprot::parse_search_results;

fn fixture_cache() -> MatchCache {
    let raw = fs::read_to_string("tests/fixtures/uniprot_search.json").unwrap();
    let value: Value = serde_json::from_str(&raw).unwrap();
    let requested = vec![
        "P69905".to_string(),
        "P01922".to_string(),
        "P00338".to_string(),
        "D3DQY3".to_string(),
    ];
    let batch = parse_search_results(&requested, &value);
    let mut cache = MatchCache::new();
    for (accession, record) in batch.matches {
        cache.insert_match(&accession, record);
    }
    for record in batch.records.into_values() {
        cache.insert_reference(record);
    }
    cache.insert_match("Q99999", MatchRecord::unmatched());
    cache
}

fn sequence_adapter(fallback: Option<Arc<dyn FallbackAlignmentSource>>) -> ReferenceSequenceAdapter {
    let reconciler = Reconciler::new(Arc::new(fixture_cache()), ReconcileSettings::default());
    ReferenceSequenceAdapter::new(reconciler, fallback)
}

fn resources() -> Arc<AnnotationResources> {
    let go = GeneOntology::parse(&fs::read("tests/fixtures/go-basic.obo").unwrap()).unwrap();
    let enzyme = EnzymeClassTree::parse(&fs::read("tests/fixtures/enzclass.txt").unwrap());
    Arc::new(AnnotationResources {
        go: Some(go),
        enzyme: Some(enzyme),
    })
}

fn fixture_entity(key: &str) -> Value {
    let raw = fs::read_to_string("tests/fixtures/entities.json").unwrap();
    let documents: Vec<Value> = serde_json::from_str(&raw).unwrap();
    documents
        .into_iter()
        .find(|document| document["rcsb_id"] == key)
        .unwrap()
}

#[test]
fn secondary_accession_is_rewritten_in_document() {
    let adapter = sequence_adapter(None);
    let result = adapter.filter(fixture_entity("1A3N_1"));
    assert!(result.ok);

    let document = result.document;
    assert_eq!(
        document["rcsb_polymer_entity_container_identifiers"]["reference_sequence_identifiers"],
        json!([{"database_name": "UniProt", "database_accession": "P69905", "provenance_source": "PDB"}])
    );
    assert_eq!(
        document["rcsb_polymer_entity_align"][0]["reference_database_accession"],
        json!("P69905")
    );
    // Untouched fields survive.
    assert_eq!(
        document["rcsb_polymer_entity_container_identifiers"]["auth_asym_ids"],
        json!(["A", "C"])
    );
    assert_eq!(
        document["rcsb_entity_source_organism"][0]["ncbi_taxonomy_id"],
        json!(9606)
    );
}

#[test]
fn unresolved_entity_uses_sifts_fallback() {
    let sifts = SiftsSummary::from_path(Path::new("tests/fixtures/pdb_chain_uniprot.tsv"), true)
        .unwrap();
    let adapter = sequence_adapter(Some(Arc::new(sifts)));
    let result = adapter.filter(fixture_entity("1I10_1"));
    assert!(result.ok);

    let references = &result.document["rcsb_polymer_entity_container_identifiers"]
        ["reference_sequence_identifiers"];
    // Every curator-asserted entry is replaced, including the GenBank one.
    assert_eq!(
        references,
        &json!([
            {"database_name": "UniProt", "database_accession": "P00338", "provenance_source": "SIFTS"}
        ])
    );
    assert_eq!(
        result.document["rcsb_polymer_entity_align"],
        json!([{
            "reference_database_name": "UniProt",
            "reference_database_accession": "P00338",
            "provenance_source": "SIFTS",
            "aligned_regions": [{"entity_beg_seq_id": 1, "ref_beg_seq_id": 2, "length": 331}]
        }])
    );
}

#[test]
fn degraded_entity_loses_reference_fields() {
    let adapter = sequence_adapter(None);
    let document = json!({
        "rcsb_id": "3XYZ_1",
        "rcsb_polymer_entity_container_identifiers": {
            "entry_id": "3XYZ",
            "reference_sequence_identifiers": [
                {"database_name": "UniProt", "database_accession": "Q99999", "provenance_source": "PDB"}
            ]
        },
        "rcsb_polymer_entity_align": [{
            "reference_database_name": "UniProt",
            "reference_database_accession": "Q99999",
            "provenance_source": "PDB",
            "aligned_regions": []
        }]
    });
    let result = adapter.filter(document);
    assert!(result.ok);
    assert_eq!(
        result.document,
        json!({
            "rcsb_id": "3XYZ_1",
            "rcsb_polymer_entity_container_identifiers": {"entry_id": "3XYZ"}
        })
    );
}

#[test]
fn malformed_document_is_returned_unchanged() {
    let adapter = sequence_adapter(None);
    let document = json!({
        "rcsb_id": "1A3N_1",
        "rcsb_polymer_entity_container_identifiers": {
            "reference_sequence_identifiers": {"database_accession": "P69905"}
        }
    });
    let result = adapter.filter(document.clone());
    assert!(!result.ok);
    assert_eq!(result.document, document);

    let without_key = json!({"name": "orphan"});
    let result = adapter.filter(without_key.clone());
    assert!(!result.ok);
    assert_eq!(result.document, without_key);
}

#[test]
fn annotations_are_merged_without_duplicates() {
    let adapter = ReferenceAnnotationAdapter::new(sequence_adapter(None), resources());
    let mut document = fixture_entity("1A3N_1");
    document["rcsb_polymer_entity_annotation"] = json!([
        {"type": "GO", "annotation_id": "GO:0020037", "name": "curated heme binding", "provenance_source": "PDB"}
    ]);

    let result = adapter.filter(document);
    assert!(result.ok);
    let annotations = result.document["rcsb_polymer_entity_annotation"]
        .as_array()
        .unwrap()
        .clone();
    let keys: Vec<(String, String)> = annotations
        .iter()
        .map(|a| {
            (
                a["type"].as_str().unwrap().to_string(),
                a["annotation_id"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        keys,
        vec![
            ("GO".to_string(), "GO:0020037".to_string()),
            ("GO".to_string(), "GO:0005344".to_string()),
            ("Pfam".to_string(), "PF00042".to_string()),
            ("InterPro".to_string(), "IPR000971".to_string()),
        ]
    );
    // The existing entry wins over the generated one.
    assert_eq!(annotations[0]["name"], json!("curated heme binding"));

    let oxygen = &annotations[1];
    assert_eq!(oxygen["name"], json!("oxygen carrier activity"));
    assert_eq!(oxygen["provenance_source"], json!("UniProt"));
    assert_eq!(oxygen["assignment_version"], json!("releases/2024-01-17"));
    assert_eq!(
        oxygen["annotation_lineage"],
        json!([
            {"id": "GO:0003674", "name": "molecular_function", "depth": 1},
            {"id": "GO:0005344", "name": "oxygen carrier activity", "depth": 2}
        ])
    );
    assert_eq!(annotations[2]["name"], json!("Globin"));
}

#[test]
fn enzyme_annotations_carry_class_lineage() {
    let adapter = ReferenceAnnotationAdapter::new(sequence_adapter(None), resources());
    let result = adapter.filter(fixture_entity("2XYZ_1"));
    assert!(result.ok);

    let annotations = result.document["rcsb_polymer_entity_annotation"]
        .as_array()
        .unwrap()
        .clone();
    // The obsolete GO term is skipped.
    assert!(annotations.iter().all(|a| a["annotation_id"] != "GO:0004459"));
    let ec = annotations
        .iter()
        .find(|a| a["type"] == "EC")
        .unwrap();
    assert_eq!(ec["annotation_id"], json!("1.1.1.27"));
    assert_eq!(
        ec["annotation_lineage"],
        json!([
            {"id": "1", "name": "Oxidoreductases", "depth": 1},
            {"id": "1.1", "name": "Acting on the CH-OH group of donors", "depth": 2},
            {"id": "1.1.1", "name": "With NAD(+) or NAD(P)(+) as acceptor", "depth": 3},
            {"id": "1.1.1.27", "name": null, "depth": 4}
        ])
    );
}

#[test]
fn annotation_without_ontologies_uses_record_terms() {
    let adapter = ReferenceAnnotationAdapter::new(
        sequence_adapter(None),
        Arc::new(AnnotationResources::default()),
    );
    let result = adapter.filter(fixture_entity("1A3N_1"));
    assert!(result.ok);
    let annotations = result.document["rcsb_polymer_entity_annotation"]
        .as_array()
        .unwrap()
        .clone();
    let heme = annotations
        .iter()
        .find(|a| a["annotation_id"] == "GO:0020037")
        .unwrap();
    assert_eq!(heme["name"], json!("heme binding"));
    assert!(heme.get("annotation_lineage").is_none());
    assert!(heme.get("assignment_version").is_none());
}

#[test]
fn isoform_annotations_come_from_base_record() {
    let mut cache = fixture_cache();
    cache.insert_match("P69905-2", MatchRecord::primary("P69905-2", Some(9606)));
    let reconciler = Reconciler::new(Arc::new(cache), ReconcileSettings::default());
    let adapter = ReferenceAnnotationAdapter::new(
        ReferenceSequenceAdapter::new(reconciler, None),
        Arc::new(AnnotationResources::default()),
    );

    let mut document = fixture_entity("1A3N_1");
    document["rcsb_polymer_entity_container_identifiers"]["reference_sequence_identifiers"][0]
        ["database_accession"] = json!("P69905-2");
    document["rcsb_polymer_entity_align"][0]["reference_database_accession"] = json!("P69905-2");

    let result = adapter.filter(document);
    assert!(result.ok);
    assert_eq!(
        result.document["rcsb_polymer_entity_container_identifiers"]
            ["reference_sequence_identifiers"][0]["database_accession"],
        json!("P69905-2")
    );
    let annotations = result.document["rcsb_polymer_entity_annotation"]
        .as_array()
        .unwrap();
    assert!(
        annotations
            .iter()
            .any(|a| a["annotation_id"] == "GO:0020037")
    );
}
