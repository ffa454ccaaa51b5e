pub mod config;
pub mod constraint;
pub mod corpus;
pub mod error;
pub mod expr;
pub mod oracle;
pub mod placeholder;
pub mod registry;
pub mod runtime;
pub mod search;
pub mod spec;
pub mod synth;
pub mod syntax;
pub mod types;
