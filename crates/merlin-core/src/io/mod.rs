//! Readers and writers for the UAI file family.
//!
//! Covers the model format (`BAYES`/`MARKOV` headers), evidence and
//! virtual-evidence files, query files and the CSV-like training datasets
//! used by EM.

pub mod uai;
