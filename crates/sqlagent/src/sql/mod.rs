pub mod assembler;
pub mod validator;

pub use assembler::{AssembledQuery, AssemblyError, assemble};
pub use validator::{
    FORBIDDEN_KEYWORDS, SqlRejection, SqlRule, ValidatedSql, check_predicate, validate,
};
