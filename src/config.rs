use serde::{Serialize, Deserialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use crate::error::Error;
use crate::types::MachineModel;

lazy_static! {
    static ref ALLOCATION_FUNCTIONS: Vec<&'static str> = vec![
        "malloc", "calloc", "realloc", "alloca", "__builtin_alloca", "valloc",
    ];
    static ref NONDET_FUNCTIONS: Vec<&'static str> = vec![
        "__BLAST_NONDET", "rand",
    ];
    static ref NONDET_PREFIXES: Vec<&'static str> = vec![
        "__VERIFIER_nondet_", "nondet_",
    ];
    static ref VARIADIC_FUNCTIONS: Vec<&'static str> = vec![
        "printf", "fprintf", "sprintf", "snprintf", "scanf", "fscanf", "sscanf", "__assert_fail",
    ];
}

fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s|s.to_string()).collect()
}

fn yes() -> bool { true }
fn allocation_functions() -> Vec<String> { strings(&ALLOCATION_FUNCTIONS) }
fn nondet_functions() -> Vec<String> { strings(&NONDET_FUNCTIONS) }
fn nondet_function_prefixes() -> Vec<String> { strings(&NONDET_PREFIXES) }
fn variadic_functions() -> Vec<String> { strings(&VARIADIC_FUNCTIONS) }


#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormulaOptions {
    #[serde(default)]
    pub machine:                        MachineModel,
    #[serde(default)]
    pub initialize_all_variables:       bool,
    #[serde(default = "yes")]
    pub initialize_globals:             bool,
    #[serde(default = "yes")]
    pub handle_pointer_aliasing:        bool,
    #[serde(default)]
    pub handle_field_aliasing:          bool,
    #[serde(default = "allocation_functions")]
    pub memory_allocation_functions:    Vec<String>,
    #[serde(default = "nondet_functions")]
    pub nondet_functions:               Vec<String>,
    #[serde(default = "nondet_function_prefixes")]
    pub nondet_function_prefixes:       Vec<String>,
    #[serde(default = "variadic_functions")]
    pub variadic_functions:             Vec<String>,
    #[serde(default = "yes")]
    pub use_cache:                      bool,
}

impl Default for FormulaOptions {
    fn default() -> Self {
        Self {
            machine:                        MachineModel::default(),
            initialize_all_variables:       false,
            initialize_globals:             true,
            handle_pointer_aliasing:        true,
            handle_field_aliasing:          false,
            memory_allocation_functions:    allocation_functions(),
            nondet_functions:               nondet_functions(),
            nondet_function_prefixes:       nondet_function_prefixes(),
            variadic_functions:             variadic_functions(),
            use_cache:                      true,
        }
    }
}

impl FormulaOptions {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let mut f = File::open(path)?;
        let mut s = String::new();
        f.read_to_string(&mut s)?;
        let options = toml::from_str(&s)?;
        debug!("loaded options from {}", path.display());
        Ok(options)
    }

    pub fn is_allocation(&self, function: &str) -> bool {
        self.memory_allocation_functions.iter().any(|f| f == function)
    }

    pub fn is_nondet(&self, function: &str) -> bool {
        self.nondet_functions.iter().any(|f| f == function)
            || self.nondet_function_prefixes.iter().any(|p| function.starts_with(p.as_str()))
    }

    pub fn is_variadic(&self, function: &str) -> bool {
        self.variadic_functions.iter().any(|f| f == function)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let o : FormulaOptions = toml::from_str("").unwrap();
        assert_eq!(o, FormulaOptions::default());
        assert!(o.is_allocation("calloc"));
        assert!(o.is_nondet("__VERIFIER_nondet_int"));
        assert!(o.is_nondet("rand"));
        assert!(!o.is_nondet("random"));
        assert!(o.is_variadic("printf"));
    }

    #[test]
    fn overrides() {
        let o : FormulaOptions = toml::from_str(r#"
            machine = "linux32"
            initialize_all_variables = true
            nondet_functions = ["havoc"]
        "#).unwrap();
        assert_eq!(o.machine, MachineModel::Linux32);
        assert!(o.initialize_all_variables);
        assert!(o.is_nondet("havoc"));
        assert!(!o.is_nondet("rand"));
        assert!(o.is_nondet("nondet_bool"));
        assert!(o.handle_pointer_aliasing);
    }
}
