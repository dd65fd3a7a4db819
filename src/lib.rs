//! QuotaGuard Library
//!
//! Client-side usage quota for a single sensitive action: signature-scoped
//! records, redundant persistence, integrity checks and an administrative
//! override channel. The `quotaguard` binary hosts it against file-backed
//! storage.

pub mod config;
pub mod quota;
