//! Deferred-edge resolution.
//!
//! References that leave their own file (imports, cross-file calls, bases
//! defined elsewhere) are parked during the per-file commits and resolved
//! here once every module of the repository is known.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::graph::types::{EdgeKind, EntityKey, ExtractedCall, ExtractedImport, NodeKind, Relationship};
use crate::parser::SupportedLanguage;

/// What the resolver needs to remember about one committed file.
#[derive(Debug, Clone)]
pub struct FileIndex {
    pub file_path: PathBuf,
    pub language: SupportedLanguage,
    pub module: EntityKey,
    /// Dotted module path relative to the repository root.
    pub dotted_name: String,
    pub imports: Vec<ExtractedImport>,
    /// Functions and classes by qualified name within the file.
    pub definitions: HashMap<String, EntityKey>,
    /// Raw base expressions per class qualified name.
    pub bases: HashMap<String, Vec<String>>,
}

/// A reference whose target was not available while its file was committed.
#[derive(Debug, Clone)]
pub enum Deferred {
    Import {
        file: PathBuf,
        import: ExtractedImport,
    },
    Call {
        file: PathBuf,
        source: EntityKey,
        call: ExtractedCall,
        /// Enclosing class of the caller, for `self.`/`this.` receivers.
        class: Option<String>,
    },
    Inherit {
        file: PathBuf,
        source: EntityKey,
        base: String,
        line: usize,
    },
}

#[derive(Debug, Default)]
pub struct Resolution {
    pub relationships: Vec<Relationship>,
    pub unresolved: usize,
}

/// Repository-wide symbol table built from the committed files.
#[derive(Debug)]
pub struct SymbolTable {
    root: PathBuf,
    files: HashMap<PathBuf, FileIndex>,
    by_dotted: HashMap<String, Vec<PathBuf>>,
    by_name: HashMap<String, Vec<EntityKey>>,
}

/// Outcome of looking a name up through a file's imports.
enum ImportLookup<'a> {
    Found(&'a EntityKey),
    /// An import names it but the module is not part of the repository.
    External,
    NotImported,
}

const SELF_RECEIVERS: &[&str] = &["self", "cls", "this", "super()"];

impl SymbolTable {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            files: HashMap::new(),
            by_dotted: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    /// Register a file. Adding the same path again replaces its entry.
    pub fn add_file(&mut self, file: FileIndex) {
        let modules = self.by_dotted.entry(file.dotted_name.clone()).or_default();
        if !modules.contains(&file.file_path) {
            modules.push(file.file_path.clone());
        }
        for key in file.definitions.values() {
            let short = key
                .qualified_name
                .rsplit('.')
                .next()
                .unwrap_or(&key.qualified_name)
                .to_string();
            let named = self.by_name.entry(short).or_default();
            if !named.contains(key) {
                named.push(key.clone());
            }
        }
        self.files.insert(file.file_path.clone(), file);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Resolve every deferred reference. Unresolvable ones are counted.
    pub fn resolve(&self, deferred: &[Deferred]) -> Resolution {
        let mut resolution = Resolution::default();
        for item in deferred {
            let before = resolution.relationships.len();
            match item {
                Deferred::Import { file, import } => self.resolve_import(file, import, &mut resolution),
                Deferred::Call {
                    file,
                    source,
                    call,
                    class,
                } => {
                    if let Some(target) = self.resolve_call(file, call, class.as_deref()) {
                        resolution.relationships.push(Relationship {
                            source: source.clone(),
                            target: target.clone(),
                            kind: EdgeKind::Calls,
                            line: Some(call.line),
                        });
                    }
                }
                Deferred::Inherit {
                    file,
                    source,
                    base,
                    line,
                } => {
                    if let Some(target) = self.resolve_base(file, base) {
                        resolution.relationships.push(Relationship {
                            source: source.clone(),
                            target: target.clone(),
                            kind: EdgeKind::Inherits,
                            line: Some(*line),
                        });
                    }
                }
            }
            if resolution.relationships.len() == before {
                resolution.unresolved += 1;
                debug!(reference = ?describe(item), "unresolved reference");
            }
        }
        resolution
    }

    fn resolve_import(&self, file: &Path, import: &ExtractedImport, resolution: &mut Resolution) {
        let Some(importer) = self.files.get(file) else {
            return;
        };
        for target in self.import_targets(importer, import, true) {
            if target.file_path == importer.file_path {
                continue;
            }
            resolution.relationships.push(Relationship {
                source: importer.module.clone(),
                target: target.module.clone(),
                kind: EdgeKind::Imports,
                line: Some(import.line),
            });
        }
    }

    fn resolve_call(&self, file: &Path, call: &ExtractedCall, class: Option<&str>) -> Option<&EntityKey> {
        let importer = self.files.get(file)?;
        match call.receiver.as_deref() {
            Some(receiver) if SELF_RECEIVERS.contains(&receiver) => {
                // Methods inherited from a base defined in another file.
                if let Some(found) = class.and_then(|c| self.inherited_method(file, c, &call.callee)) {
                    return Some(found);
                }
            }
            Some(receiver) => match self.lookup_module_member(importer, receiver, &call.callee) {
                ImportLookup::Found(key) => return Some(key),
                ImportLookup::External => return None,
                ImportLookup::NotImported => {}
            },
            None => match self.lookup_imported_name(importer, &call.callee) {
                ImportLookup::Found(key) => return Some(key),
                ImportLookup::External => return None,
                ImportLookup::NotImported => {}
            },
        }
        self.nearest_by_name(importer, &call.callee, &[NodeKind::Function, NodeKind::Class])
    }

    fn resolve_base(&self, file: &Path, base: &str) -> Option<&EntityKey> {
        let importer = self.files.get(file)?;
        let (qualifier, name) = match base.rsplit_once('.') {
            Some((q, n)) => (Some(q), n),
            None => (None, base),
        };
        let lookup = match qualifier {
            Some(q) => self.lookup_module_member(importer, q, name),
            None => {
                if let Some(local) = importer.definitions.get(name) {
                    if local.kind == NodeKind::Class {
                        return Some(local);
                    }
                }
                self.lookup_imported_name(importer, name)
            }
        };
        match lookup {
            ImportLookup::Found(key) if key.kind == NodeKind::Class => Some(key),
            ImportLookup::External => None,
            _ => self.nearest_by_name(importer, name, &[NodeKind::Class]),
        }
    }

    /// `helper()` after `from module_b import helper`.
    fn lookup_imported_name(&self, importer: &FileIndex, name: &str) -> ImportLookup<'_> {
        let mut named_explicitly = false;
        for import in &importer.imports {
            let explicit = import.names.iter().any(|n| n == name);
            let wildcard = import.names.iter().any(|n| n == "*");
            if !explicit && !wildcard {
                continue;
            }
            named_explicitly |= explicit;
            for target in self.import_targets(importer, import, false) {
                if let Some(key) = target.definitions.get(name) {
                    return ImportLookup::Found(key);
                }
            }
        }
        if named_explicitly {
            ImportLookup::External
        } else {
            ImportLookup::NotImported
        }
    }

    /// `module_b.helper()` after `import module_b` / `import module_b as mb`
    /// / `from pkg import module_b`.
    fn lookup_module_member(&self, importer: &FileIndex, receiver: &str, name: &str) -> ImportLookup<'_> {
        let mut matched = false;
        for import in &importer.imports {
            let targets = if import.alias.as_deref() == Some(receiver)
                || (import.alias.is_none() && import.module == receiver)
            {
                self.import_targets(importer, import, false)
            } else if import.names.iter().any(|n| n == receiver) {
                let submodule = ExtractedImport {
                    module: join_module(&import.module, receiver),
                    names: Vec::new(),
                    alias: None,
                    level: import.level,
                    line: import.line,
                };
                self.import_targets(importer, &submodule, false)
            } else {
                continue;
            };
            matched = true;
            for target in targets {
                if let Some(key) = target.definitions.get(name) {
                    return ImportLookup::Found(key);
                }
            }
        }
        if matched {
            ImportLookup::External
        } else {
            ImportLookup::NotImported
        }
    }

    /// `self.method()` where `method` lives on a base class in another file.
    fn inherited_method(&self, file: &Path, class: &str, method: &str) -> Option<&EntityKey> {
        let mut pending: Vec<(PathBuf, String)> = vec![(file.to_path_buf(), class.to_string())];
        let mut seen: HashSet<(PathBuf, String)> = HashSet::new();
        while let Some((path, owner)) = pending.pop() {
            if !seen.insert((path.clone(), owner.clone())) {
                continue;
            }
            let Some(owner_file) = self.files.get(&path) else {
                continue;
            };
            if let Some(found) = owner_file.definitions.get(&format!("{owner}.{method}")) {
                return Some(found);
            }
            for base in owner_file.bases.get(&owner).into_iter().flatten() {
                if let Some(base_key) = self.resolve_base(&path, base) {
                    pending.push((base_key.file_path.clone(), base_key.qualified_name.clone()));
                }
            }
        }
        None
    }

    /// Repository-wide fallback: the definition named `name` closest to the
    /// referencing file (path distance, then path order).
    fn nearest_by_name(&self, from: &FileIndex, name: &str, kinds: &[NodeKind]) -> Option<&EntityKey> {
        self.by_name
            .get(name)?
            .iter()
            .filter(|key| kinds.contains(&key.kind))
            .filter(|key| {
                self.files
                    .get(&key.file_path)
                    .is_some_and(|f| f.language.same_ecosystem(&from.language))
            })
            .min_by(|a, b| {
                let da = path_distance(&from.file_path, &a.file_path);
                let db = path_distance(&from.file_path, &b.file_path);
                (da, &a.file_path, a.qualified_name.len(), &a.qualified_name).cmp(&(
                    db,
                    &b.file_path,
                    b.qualified_name.len(),
                    &b.qualified_name,
                ))
            })
    }

    /// Module files an import refers to. With `include_submodules`, names
    /// pulled from a package that are themselves modules count too.
    fn import_targets(&self, importer: &FileIndex, import: &ExtractedImport, include_submodules: bool) -> Vec<&FileIndex> {
        let mut targets: Vec<&FileIndex> = Vec::new();
        match importer.language {
            SupportedLanguage::Python => {
                let base = self.python_module(importer, &import.module, import.level);
                let module_found = base.is_some();
                push_unique(&mut targets, base);
                if include_submodules || !module_found {
                    for name in import.names.iter().filter(|n| n.as_str() != "*") {
                        let dotted = join_module(&import.module, name);
                        push_unique(&mut targets, self.python_module(importer, &dotted, import.level));
                    }
                }
            }
            _ => {
                if import.module.starts_with('.') {
                    let dir = importer.file_path.parent().unwrap_or(&self.root);
                    let candidate = normalize(&dir.join(&import.module));
                    push_unique(&mut targets, self.module_file(&candidate, importer.language));
                }
            }
        }
        targets
    }

    fn python_module(&self, importer: &FileIndex, module: &str, level: usize) -> Option<&FileIndex> {
        if level > 0 {
            let mut base = importer.file_path.parent()?.to_path_buf();
            for _ in 1..level {
                base = base.parent()?.to_path_buf();
            }
            if module.is_empty() {
                return None;
            }
            return self.module_file(&base.join(module.replace('.', "/")), importer.language);
        }
        if module.is_empty() {
            return None;
        }

        let relative = module.replace('.', "/");
        for dir in importer.file_path.ancestors().skip(1) {
            if !dir.starts_with(&self.root) {
                break;
            }
            if let Some(found) = self.module_file(&dir.join(&relative), importer.language) {
                return Some(found);
            }
        }

        // Unique dotted-suffix match (`utils` for `pkg.utils`).
        let suffix = format!(".{module}");
        let mut matches = self
            .by_dotted
            .iter()
            .filter(|(dotted, _)| dotted.as_str() == module || dotted.ends_with(&suffix))
            .flat_map(|(_, files)| files.iter());
        let first = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        self.files.get(first)
    }

    /// The indexed file for a module path without extension (or with one),
    /// falling back to the package entry file.
    fn module_file(&self, candidate: &Path, language: SupportedLanguage) -> Option<&FileIndex> {
        if let Some(found) = self.files.get(candidate) {
            return Some(found);
        }
        let entry = match language {
            SupportedLanguage::Python => "__init__",
            _ => "index",
        };
        for ext in language.module_extensions() {
            if let Some(found) = self.files.get(&with_suffix(candidate, ext)) {
                return Some(found);
            }
        }
        for ext in language.module_extensions() {
            if let Some(found) = self.files.get(&candidate.join(format!("{entry}.{ext}"))) {
                return Some(found);
            }
        }
        None
    }
}

fn describe(item: &Deferred) -> String {
    match item {
        Deferred::Import { file, import } => format!("import {} in {}", import.module, file.display()),
        Deferred::Call { file, call, .. } => format!("call {} in {}", call.callee, file.display()),
        Deferred::Inherit { file, base, .. } => format!("base {} in {}", base, file.display()),
    }
}

fn push_unique<'a>(targets: &mut Vec<&'a FileIndex>, target: Option<&'a FileIndex>) {
    if let Some(t) = target {
        if !targets.iter().any(|existing| existing.file_path == t.file_path) {
            targets.push(t);
        }
    }
}

fn join_module(module: &str, name: &str) -> String {
    if module.is_empty() {
        name.to_string()
    } else {
        format!("{module}.{name}")
    }
}

fn with_suffix(path: &Path, ext: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(".");
    raw.push(ext);
    PathBuf::from(raw)
}

/// Lexically resolve `.` and `..` components.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Number of directory hops between two files.
fn path_distance(a: &Path, b: &Path) -> usize {
    let da: Vec<Component<'_>> = a.parent().map(|p| p.components().collect()).unwrap_or_default();
    let db: Vec<Component<'_>> = b.parent().map(|p| p.components().collect()).unwrap_or_default();
    let common = da.iter().zip(db.iter()).take_while(|(x, y)| x == y).count();
    (da.len() - common) + (db.len() - common)
}
