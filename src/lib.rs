#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::op_ref
)]

//! Road network topology validation.
//!
//! Arcs are standardized, crossings are segmented into proper nodes, and the
//! corrected network is checked for construction, duplication and
//! connectivity defects. The meshblock path polygonizes the network into
//! closed faces and conflates them against a reference polygon layer.

pub mod arcs;
pub mod conflation;
pub mod connectivity;
pub mod construction;
pub mod duplication;
pub mod errors;
pub mod geojson_io;
pub mod meshblock;
pub mod report;
pub mod segmentation;
pub mod spatial_index;
pub mod standardize;
pub mod validation;

pub use errors::{Result, TopologyError};
