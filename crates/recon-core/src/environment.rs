//! Child-process environment for every pipeline stage.
//!
//! The environment is built once per run from the install root, the target
//! platform and a snapshot of the host environment, then handed to each
//! stage by reference.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const HOME_VARIABLE: &str = "GADGETRON_HOME";
pub const EXECUTABLE_PATH_VARIABLE: &str = "PATH";
pub const DEBUG_VARIABLE: &str = "ACE_DEBUG";
pub const PYTHON_PATH_VARIABLE: &str = "PYTHONPATH";

/// Library directories searched after the install root, in resolution order.
const SIBLING_LIBRARY_DIRS: [&str; 3] = ["lib", "../ismrmrd/lib", "../arma/lib"];
const THIRD_PARTY_LIBRARY_DIRS: [&str; 4] = [
    "/usr/local/cuda/lib64",
    "/usr/local/cula/lib64",
    "/opt/intel/mkl/lib/intel64",
    "/opt/intel/lib/intel64",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Unix,
    MacOs,
    Windows,
}

impl Platform {
    pub const fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Unix
        }
    }

    pub const fn library_path_variable(self) -> &'static str {
        match self {
            Self::Unix => "LD_LIBRARY_PATH",
            Self::MacOs => "DYLD_FALLBACK_LIBRARY_PATH",
            Self::Windows => "PATH",
        }
    }

    pub const fn path_list_separator(self) -> char {
        match self {
            Self::Windows => ';',
            Self::Unix | Self::MacOs => ':',
        }
    }

    pub const fn executable_suffix(self) -> &'static str {
        match self {
            Self::Windows => ".exe",
            Self::Unix | Self::MacOs => "",
        }
    }
}

/// Snapshot of the variables the builder may read from the calling process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostEnvironment {
    vars: BTreeMap<String, String>,
}

impl HostEnvironment {
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars_os()
                .map(|(key, value)| {
                    (
                        key.to_string_lossy().into_owned(),
                        value.to_string_lossy().into_owned(),
                    )
                })
                .collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Exact lookup first, then a case-insensitive one (`Path` vs `PATH`).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .or_else(|| {
                self.vars
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessEnvironment {
    platform: Platform,
    install_root: PathBuf,
    inherit_parent: bool,
    vars: BTreeMap<String, String>,
}

impl ProcessEnvironment {
    pub fn build(
        install_root: impl AsRef<Path>,
        platform: Platform,
        host: &HostEnvironment,
    ) -> Self {
        let install_root = install_root.as_ref().to_path_buf();
        let home = install_root.to_string_lossy().into_owned();
        let library_path_variable = platform.library_path_variable();

        let mut vars = BTreeMap::new();
        vars.insert(HOME_VARIABLE.to_string(), home.clone());
        if let Some(python_path) = host.get(PYTHON_PATH_VARIABLE) {
            vars.insert(PYTHON_PATH_VARIABLE.to_string(), python_path.to_string());
        }

        match platform {
            Platform::Windows => {
                let native_path = host.get("Path").unwrap_or_default().to_string();
                vars.insert(library_path_variable.to_string(), native_path.clone());
                vars.insert(EXECUTABLE_PATH_VARIABLE.to_string(), native_path);
            }
            Platform::Unix | Platform::MacOs => {
                vars.insert(
                    library_path_variable.to_string(),
                    unix_library_path(&home),
                );
                vars.insert(EXECUTABLE_PATH_VARIABLE.to_string(), format!("{home}/bin"));
            }
        }

        vars.insert(DEBUG_VARIABLE.to_string(), "1".to_string());

        Self {
            platform,
            install_root,
            inherit_parent: platform == Platform::Windows,
            vars,
        }
    }

    pub const fn library_path_variable(&self) -> &'static str {
        self.platform.library_path_variable()
    }

    /// Whether children also see the calling process's environment.
    pub const fn inherits_parent(&self) -> bool {
        self.inherit_parent
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn home(&self) -> &str {
        self.get(HOME_VARIABLE).unwrap_or_default()
    }

    pub fn executable_path(&self) -> &str {
        self.get(EXECUTABLE_PATH_VARIABLE).unwrap_or_default()
    }

    pub fn library_path(&self) -> &str {
        self.get(self.library_path_variable()).unwrap_or_default()
    }

    /// Resolves a bare program name against this environment's `PATH`.
    ///
    /// Falls back to the bare name so the spawn itself reports the failure.
    pub fn resolve_program(&self, program: &str) -> PathBuf {
        let candidate_name = format!("{}{}", program, self.platform.executable_suffix());
        self.executable_path()
            .split(self.platform.path_list_separator())
            .filter(|entry| !entry.is_empty())
            .map(|entry| Path::new(entry).join(&candidate_name))
            .find(|candidate| candidate.is_file())
            .unwrap_or_else(|| PathBuf::from(program))
    }

    pub fn apply_to(&self, command: &mut Command) {
        if !self.inherit_parent {
            command.env_clear();
        }
        command.envs(&self.vars);
    }
}

fn unix_library_path(home: &str) -> String {
    let mut library_path = String::new();
    for relative in SIBLING_LIBRARY_DIRS {
        library_path.push_str(home);
        library_path.push('/');
        library_path.push_str(relative);
        library_path.push(':');
    }
    for absolute in THIRD_PARTY_LIBRARY_DIRS {
        library_path.push_str(absolute);
        library_path.push(':');
    }
    library_path
}
