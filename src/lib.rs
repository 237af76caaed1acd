#![allow(dead_code)] // dead code checker is broken

#[macro_use] extern crate pest_derive;
#[macro_use] extern crate log;
#[macro_use] extern crate lazy_static;

pub mod ast;
pub mod cfa;
pub mod name;
pub mod types;
pub mod formula;
pub mod smt;
pub mod parser;
pub mod ssa;
pub mod config;
pub mod error;
pub mod diag;
pub mod converter;
mod expressions;
mod pointers;
pub mod pathformula;
pub mod branching;
pub mod cache;

pub use crate::cache::{CacheStats, CachingManager};
pub use crate::config::FormulaOptions;
pub use crate::error::Error;
pub use crate::pathformula::{Manager, PathFormula, PathFormulaManager};
pub use crate::ssa::SSAMap;


pub fn init_logging() {
    if let Err(_) = std::env::var("RUST_LOG") {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::builder()
        .default_format_timestamp(false)
        .default_format_module_path(false)
        .init();
}
