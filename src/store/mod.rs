//! Rule persistence — trait, migrations, and the libSQL backend.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlRuleStore;
pub use traits::RuleStore;
