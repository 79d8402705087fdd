use std::path::{Path, PathBuf};

/// Locates the engine executable. `None` means no usable binary exists.
pub trait BinaryResolver: Send + Sync {
    fn resolve(&self) -> Option<PathBuf>;

    /// Human-readable list of the places consulted, for error messages.
    fn describe(&self) -> String;
}

/// Resolver that always returns a preconfigured answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedResolver {
    path: Option<PathBuf>,
}

impl FixedResolver {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn missing() -> Self {
        Self { path: None }
    }
}

impl BinaryResolver for FixedResolver {
    fn resolve(&self) -> Option<PathBuf> {
        self.path.clone()
    }

    fn describe(&self) -> String {
        match self.path.as_ref() {
            Some(path) => path.display().to_string(),
            None => "<none configured>".to_string(),
        }
    }
}

/// Resolves `binary_name` from an explicit override, bundled directories, then `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPathResolver {
    binary_name: String,
    override_path: Option<PathBuf>,
    candidate_dirs: Vec<PathBuf>,
    use_env_path: bool,
}

impl SearchPathResolver {
    pub fn new(binary_name: impl Into<String>) -> Self {
        Self {
            binary_name: binary_name.into(),
            override_path: None,
            candidate_dirs: Vec::new(),
            use_env_path: true,
        }
    }

    pub fn with_override(mut self, path: Option<PathBuf>) -> Self {
        self.override_path = path;
        self
    }

    pub fn with_candidate_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.candidate_dirs.push(dir.into());
        self
    }

    pub fn without_env_path(mut self) -> Self {
        self.use_env_path = false;
        self
    }

    fn env_path_dirs(&self) -> Vec<PathBuf> {
        if !self.use_env_path {
            return Vec::new();
        }
        std::env::var_os("PATH")
            .map(|raw| std::env::split_paths(&raw).collect())
            .unwrap_or_default()
    }
}

impl BinaryResolver for SearchPathResolver {
    fn resolve(&self) -> Option<PathBuf> {
        if let Some(path) = self.override_path.as_ref() {
            return is_executable_file(path).then(|| path.clone());
        }
        self.candidate_dirs
            .iter()
            .cloned()
            .chain(self.env_path_dirs())
            .map(|dir| dir.join(&self.binary_name))
            .find(|candidate| is_executable_file(candidate))
    }

    fn describe(&self) -> String {
        if let Some(path) = self.override_path.as_ref() {
            return path.display().to_string();
        }
        let mut places = self
            .candidate_dirs
            .iter()
            .map(|dir| dir.join(&self.binary_name).display().to_string())
            .collect::<Vec<_>>();
        if self.use_env_path {
            places.push(format!("$PATH/{}", self.binary_name));
        }
        places.join(", ")
    }
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}
