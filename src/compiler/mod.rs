//! Statement Compiler
//!
//! Typed requests in, parameterized statements out. Nothing outside this
//! module assembles SQL text.

pub mod ident;
pub mod request;
pub mod statement;
pub mod statement_compiler;
pub mod value;

pub use ident::{Ident, QualifiedName};
pub use request::{
    ColumnDefinition, CreateTableRequest, DeleteRequest, DropTableRequest, FilterSpec, InsertRequest, ReadRequest,
    Row, UpdateRequest,
};
pub use statement::{BoundParam, Statement, StatementKind};
pub use statement_compiler::{CompilerLimits, InsertBatch, StatementCompiler};
pub use value::SqlValue;
