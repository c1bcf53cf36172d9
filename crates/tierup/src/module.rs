//! Module definitions and instances.

use rustc_hash::FxHashMap;

use crate::entry::EntryRef;
use crate::record::FunctionId;

/// A function as handed to the controller: an optional export name and its
/// baseline entry.
#[derive(Clone)]
pub struct FunctionDef {
    /// Export name
    pub name: Option<String>,
    /// Entry used until promotion
    pub baseline: EntryRef,
}

impl std::fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A set of functions instantiated together and torn down together.
#[derive(Debug, Clone)]
pub struct Module {
    /// Where the module came from, for diagnostics
    pub source_url: String,
    /// Functions in index order
    pub functions: Vec<FunctionDef>,
}

impl Module {
    /// Start building a module.
    pub fn builder(source_url: impl Into<String>) -> ModuleBuilder {
        ModuleBuilder {
            source_url: source_url.into(),
            functions: Vec::new(),
        }
    }
}

/// Builder for [`Module`].
#[derive(Debug)]
pub struct ModuleBuilder {
    source_url: String,
    functions: Vec<FunctionDef>,
}

impl ModuleBuilder {
    /// Add an exported function. Returns its index.
    pub fn add_function(&mut self, name: impl Into<String>, baseline: EntryRef) -> u32 {
        self.push(FunctionDef {
            name: Some(name.into()),
            baseline,
        })
    }

    /// Add a function without an export name. Returns its index.
    pub fn add_anonymous(&mut self, baseline: EntryRef) -> u32 {
        self.push(FunctionDef {
            name: None,
            baseline,
        })
    }

    fn push(&mut self, def: FunctionDef) -> u32 {
        let index = self.functions.len() as u32;
        self.functions.push(def);
        index
    }

    /// Finish the module.
    pub fn build(self) -> Module {
        Module {
            source_url: self.source_url,
            functions: self.functions,
        }
    }
}

/// Handle to an instantiated module.
#[derive(Debug, Clone)]
pub struct Instance {
    module_id: u64,
    source_url: String,
    functions: Vec<FunctionId>,
    exports: FxHashMap<String, FunctionId>,
}

impl Instance {
    pub(crate) fn new(module_id: u64, source_url: String) -> Self {
        Self {
            module_id,
            source_url,
            functions: Vec::new(),
            exports: FxHashMap::default(),
        }
    }

    pub(crate) fn push(&mut self, id: FunctionId, name: Option<&str>) {
        self.functions.push(id);
        if let Some(name) = name {
            // First definition wins on duplicate export names.
            self.exports.entry(name.to_string()).or_insert(id);
        }
    }

    /// Module id allocated at instantiation.
    pub fn module_id(&self) -> u64 {
        self.module_id
    }

    /// Source URL of the module.
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Identity of the function at `index`.
    pub fn function(&self, index: u32) -> Option<FunctionId> {
        self.functions.get(index as usize).copied()
    }

    /// Identities in index order.
    pub fn functions(&self) -> &[FunctionId] {
        &self.functions
    }

    /// Identity of an exported function.
    pub fn export(&self, name: &str) -> Option<FunctionId> {
        self.exports.get(name).copied()
    }
}
