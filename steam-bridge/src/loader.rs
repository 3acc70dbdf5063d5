//! Symbol table resolution for the native SDK.
//!
//! Opens the platform shared library with `libloading`, resolves a fixed list of
//! required exports up front and fails the whole load if any is missing. Feature
//! entry points are resolved lazily and cached for the lifetime of the handle.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};

use libloading::Library;

use crate::error::LoadError;

/// Platform file name of the SDK library.
pub fn library_file_name() -> &'static str {
    if cfg!(all(windows, target_pointer_width = "64")) {
        "steam_api64.dll"
    } else if cfg!(windows) {
        "steam_api.dll"
    } else if cfg!(target_os = "macos") {
        "libsteam_api.dylib"
    } else {
        "libsteam_api.so"
    }
}

/// Paths to try, in order.
///
/// - explicit file: used as is
/// - explicit directory: joined with [`library_file_name`]
/// - nothing: the executable's directory, then the working directory
pub fn candidate_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let file = library_file_name();
    match explicit {
        Some(path) if path.is_dir() => vec![path.join(file)],
        Some(path) => vec![path.to_path_buf()],
        None => {
            let mut paths = Vec::new();
            if let Some(dir) = std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
            {
                paths.push(dir.join(file));
            }
            if let Ok(cwd) = std::env::current_dir() {
                let path = cwd.join(file);
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
            paths
        }
    }
}

/// A required export and the signature the bridge will call it with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolSpec {
    pub name: &'static str,
    pub signature: &'static str,
}

impl SymbolSpec {
    pub const fn new(name: &'static str, signature: &'static str) -> Self {
        Self { name, signature }
    }
}

/// An optional version export, `extern "C" fn() -> u32`, and the minimum accepted value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCheck {
    pub symbol: String,
    pub minimum: u32,
}

/// The full contract a library must satisfy to load.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    pub required: Vec<SymbolSpec>,
    pub version: Option<VersionCheck>,
}

impl SymbolTable {
    pub fn new(required: impl IntoIterator<Item = SymbolSpec>) -> Self {
        Self {
            required: required.into_iter().collect(),
            version: None,
        }
    }

    pub fn with_version(mut self, symbol: impl Into<String>, minimum: u32) -> Self {
        self.version = Some(VersionCheck {
            symbol: symbol.into(),
            minimum,
        });
        self
    }
}

/// A resolved export. Immutable once created.
#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub name: String,
    pub signature: &'static str,
    address: *const c_void,
}

impl SymbolEntry {
    pub fn address(&self) -> *const c_void {
        self.address
    }
}

/// Compare a reported library version against the minimum.
pub fn check_version(found: u32, minimum: u32) -> Result<(), LoadError> {
    if found < minimum {
        Err(LoadError::UnsupportedVersion { found, minimum })
    } else {
        Ok(())
    }
}

/// The loaded library and every address resolved from it.
///
/// Field order matters: resolved addresses are dropped before the library.
pub struct LibraryHandle {
    path: PathBuf,
    symbols: HashMap<String, SymbolEntry>,
    optional: HashMap<String, Option<*const c_void>>,
    library: Library,
}

// Safety: the handle only hands out addresses; calling them is serialized by the
// bridge's native lock.
unsafe impl Send for LibraryHandle {}

impl LibraryHandle {
    /// Try each candidate in order, falling back to the bare file name so the
    /// OS loader's own search path is consulted.
    pub fn load(candidates: &[PathBuf], table: &SymbolTable) -> Result<Self, LoadError> {
        if let Some(path) = candidates.iter().find(|p| p.exists()) {
            tracing::debug!("loading native library from {}", path.display());
            return Self::open(path, table);
        }
        let bare = Path::new(library_file_name());
        match Self::open(bare, table) {
            Err(LoadError::OpenFailed { reason, .. }) => {
                tracing::debug!("system search for {} failed: {reason}", bare.display());
                let mut searched = candidates.to_vec();
                searched.push(bare.to_path_buf());
                Err(LoadError::NotFound { searched })
            }
            other => other,
        }
    }

    /// Open one path and resolve every required symbol.
    pub fn open(path: &Path, table: &SymbolTable) -> Result<Self, LoadError> {
        // Safety: loading runs the library's initializers; the SDK library is trusted.
        let library = unsafe { Library::new(path) }.map_err(|e| LoadError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut symbols = HashMap::with_capacity(table.required.len());
        for spec in &table.required {
            let address = lookup(&library, spec.name)
                .ok_or_else(|| LoadError::MissingSymbol(spec.name.to_string()))?;
            symbols.insert(
                spec.name.to_string(),
                SymbolEntry {
                    name: spec.name.to_string(),
                    signature: spec.signature,
                    address,
                },
            );
        }

        if let Some(check) = &table.version {
            let address = lookup(&library, &check.symbol)
                .ok_or_else(|| LoadError::MissingSymbol(check.symbol.clone()))?;
            // Safety: the version export is declared as `u32 (*)(void)`.
            let version: unsafe extern "C" fn() -> u32 = unsafe { std::mem::transmute(address) };
            let found = unsafe { version() };
            check_version(found, check.minimum)?;
            tracing::debug!("native library version {found} (minimum {})", check.minimum);
        }

        tracing::info!(
            "loaded {} ({} symbols resolved)",
            path.display(),
            symbols.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            symbols,
            optional: HashMap::new(),
            library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A required symbol resolved at load time.
    pub fn symbol(&self, name: &str) -> Option<&SymbolEntry> {
        self.symbols.get(name)
    }

    /// Resolve a non-required export, remembering hits and misses.
    pub fn optional(&mut self, name: &str) -> Option<*const c_void> {
        if let Some(entry) = self.symbols.get(name) {
            return Some(entry.address);
        }
        if let Some(cached) = self.optional.get(name) {
            return *cached;
        }
        let address = lookup(&self.library, name);
        if address.is_none() {
            tracing::warn!("native library has no export `{name}`");
        }
        self.optional.insert(name.to_string(), address);
        address
    }

    pub fn resolved_count(&self) -> usize {
        self.symbols.len()
    }
}

fn lookup(library: &Library, name: &str) -> Option<*const c_void> {
    // Safety: the symbol is only read as an address here; it is cast to its real
    // signature at the call site.
    let symbol = unsafe { library.get::<unsafe extern "C" fn()>(name.as_bytes()) }.ok()?;
    let address = *symbol as *const c_void;
    (!address.is_null()).then_some(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_file_is_used_verbatim() {
        let path = PathBuf::from("/opt/game/lib/custom_steam_api.so");
        assert_eq!(candidate_paths(Some(&path)), vec![path]);
    }

    #[test]
    fn explicit_directory_gets_platform_file_name() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            candidate_paths(Some(dir.path())),
            vec![dir.path().join(library_file_name())]
        );
    }

    #[test]
    fn default_candidates_include_working_directory() {
        let cwd = std::env::current_dir().unwrap();
        assert!(candidate_paths(None).contains(&cwd.join(library_file_name())));
    }

    #[test]
    fn missing_library_reports_search_list() {
        let dir = tempfile::tempdir().unwrap();
        let candidates = vec![dir.path().join(library_file_name())];
        match LibraryHandle::load(&candidates, &SymbolTable::default()) {
            Err(LoadError::NotFound { searched }) => {
                assert_eq!(searched[0], candidates[0]);
            }
            // A system-wide SDK install satisfies the bare-name fallback.
            Ok(_) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_library_file_fails_to_open() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a shared object").unwrap();
        let result = LibraryHandle::open(file.path(), &SymbolTable::default());
        assert!(matches!(result, Err(LoadError::OpenFailed { .. })));
    }

    #[test]
    fn first_existing_candidate_is_the_one_opened() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.so");
        let second = dir.path().join("second.so");
        std::fs::write(&first, b"not a shared object").unwrap();
        std::fs::write(&second, b"not a shared object either").unwrap();
        let candidates = vec![dir.path().join("absent.so"), first.clone(), second];
        match LibraryHandle::load(&candidates, &SymbolTable::default()) {
            Err(LoadError::OpenFailed { path, .. }) => assert_eq!(path, first),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("garbage file opened as a library"),
        }
    }

    #[test]
    fn version_below_minimum_is_rejected() {
        assert_eq!(check_version(161, 158), Ok(()));
        assert_eq!(check_version(158, 158), Ok(()));
        assert_eq!(
            check_version(157, 158),
            Err(LoadError::UnsupportedVersion {
                found: 157,
                minimum: 158
            })
        );
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn resolves_required_symbols_from_libc() {
        let table = SymbolTable::new([
            SymbolSpec::new("strlen", "size_t (*)(const char*)"),
            SymbolSpec::new("getpid", "pid_t (*)(void)"),
        ]);
        let mut handle = LibraryHandle::open(Path::new("libc.so.6"), &table).unwrap();
        assert_eq!(handle.resolved_count(), 2);
        assert!(!handle.symbol("strlen").unwrap().address().is_null());

        assert!(handle.optional("abs").is_some());
        assert!(handle.optional("definitely_not_exported_xyz").is_none());
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn missing_required_symbol_aborts_load() {
        let table = SymbolTable::new([
            SymbolSpec::new("strlen", "size_t (*)(const char*)"),
            SymbolSpec::new("SteamAPI_InitFlat", "int (*)(SteamErrMsg*)"),
        ]);
        let result = LibraryHandle::open(Path::new("libc.so.6"), &table);
        assert_eq!(
            result.err(),
            Some(LoadError::MissingSymbol("SteamAPI_InitFlat".to_string()))
        );
    }
}
