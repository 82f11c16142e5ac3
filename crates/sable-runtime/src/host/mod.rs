//! Host modules: native export tables importable by bare specifier.

pub mod crypto;
