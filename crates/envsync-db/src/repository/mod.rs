//! # Repositories
//!
//! One repository per stored aggregate. Repositories are cheap handles over
//! the shared pool, obtained from [`Database`](crate::Database).

pub mod conflict;
pub mod operation;
