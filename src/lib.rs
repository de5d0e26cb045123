pub mod adapter;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod match_cache;
pub mod object_store;
pub mod ontology;
pub mod output;
pub mod reconcile;
pub mod sifts;
pub mod store;
pub mod transform;
pub mod uniprot;
pub mod worker;
