// src/container/mod.rs

//! Declarative isolation profiles for sandboxed builds
//!
//! An [`IsolationProfile`] describes what a sandboxed process may see:
//! which host paths are bound (read-only or read-write), which namespaces
//! are unshared, which environment variables survive and which
//! capabilities are dropped. Profiles are pure data; the
//! [`bubblewrap`] executor translates them into launcher arguments.
//!
//! Three templates exist:
//!
//! - **build**: broad read-only view of the host toolchain, no network,
//!   PID/IPC isolation
//! - **fetch**: network allowed, narrower filesystem view
//! - **minimal**: every namespace unshared, mapped to `nobody`, all
//!   capabilities dropped
//!
//! Templates are `&'static` and therefore immutable; clone one to customize
//! it for a particular build:
//!
//! ```ignore
//! let mut profile = IsolationProfile::build().clone();
//! profile.add_rw_bind("/var/cache/pacforge/hello");
//! profile.set_network(true);
//! ```

pub mod bubblewrap;

pub use bubblewrap::{BubblewrapExecutor, Sandbox, SandboxConfig, SandboxError};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Namespaces to unshare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Namespaces {
    pub user: bool,
    pub pid: bool,
    pub network: bool,
    pub ipc: bool,
    pub cgroup: bool,
}

/// uid/gid the sandboxed process runs as inside the user namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMap {
    pub uid: u32,
    pub gid: u32,
}

/// Environment handling for the sandboxed process
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvPolicy {
    /// Start from an empty environment
    pub clear: bool,
    /// Explicit values, applied after the pass-through variables
    pub set: Option<BTreeMap<String, String>>,
    /// Host variables copied into a cleared environment when present
    pub pass: Vec<String>,
}

/// A sandbox policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationProfile {
    pub name: String,
    pub ro_binds: Vec<PathBuf>,
    pub rw_binds: Vec<PathBuf>,
    pub dev_binds: Vec<PathBuf>,
    pub tmpfs: Vec<PathBuf>,
    /// Link path mapped to its target
    pub symlinks: BTreeMap<PathBuf, PathBuf>,
    pub namespaces: Namespaces,
    pub id_map: Option<IdMap>,
    /// Kill the sandbox when the launching process dies
    pub die_with_parent: bool,
    /// Detach from the controlling terminal
    pub new_session: bool,
    pub env: EnvPolicy,
    /// Capabilities to drop (`ALL` for everything)
    pub cap_drop: Vec<String>,
}

/// Symlinks for merged-/usr hosts
fn usr_merge_links() -> BTreeMap<PathBuf, PathBuf> {
    [
        ("/bin", "usr/bin"),
        ("/sbin", "usr/bin"),
        ("/lib", "usr/lib"),
        ("/lib64", "usr/lib"),
    ]
    .into_iter()
    .map(|(link, target)| (PathBuf::from(link), PathBuf::from(target)))
    .collect()
}

fn paths(list: &[&str]) -> Vec<PathBuf> {
    list.iter().map(PathBuf::from).collect()
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

static BUILD: LazyLock<IsolationProfile> = LazyLock::new(|| IsolationProfile {
    name: "build".to_string(),
    ro_binds: paths(&["/usr", "/etc", "/opt", "/srv", "/var/lib/pacman"]),
    rw_binds: Vec::new(),
    dev_binds: paths(&["/dev"]),
    tmpfs: paths(&["/tmp", "/run"]),
    symlinks: usr_merge_links(),
    namespaces: Namespaces {
        user: false,
        pid: true,
        network: true,
        ipc: true,
        cgroup: true,
    },
    id_map: None,
    die_with_parent: true,
    new_session: true,
    env: EnvPolicy {
        clear: true,
        set: Some(BTreeMap::from([("LC_ALL".to_string(), "C".to_string())])),
        pass: names(&["PATH", "HOME", "USER", "LANG", "TERM", "MAKEFLAGS", "PACKAGER"]),
    },
    cap_drop: Vec::new(),
});

static FETCH: LazyLock<IsolationProfile> = LazyLock::new(|| IsolationProfile {
    name: "fetch".to_string(),
    ro_binds: paths(&["/usr", "/etc/ssl", "/etc/ca-certificates", "/etc/resolv.conf", "/etc/hosts"]),
    rw_binds: Vec::new(),
    dev_binds: paths(&["/dev"]),
    tmpfs: paths(&["/tmp"]),
    symlinks: usr_merge_links(),
    namespaces: Namespaces {
        user: false,
        pid: true,
        network: false,
        ipc: true,
        cgroup: false,
    },
    id_map: None,
    die_with_parent: true,
    new_session: true,
    env: EnvPolicy {
        clear: true,
        set: None,
        pass: names(&[
            "PATH",
            "HOME",
            "LANG",
            "http_proxy",
            "https_proxy",
            "ftp_proxy",
            "no_proxy",
        ]),
    },
    cap_drop: Vec::new(),
});

static MINIMAL: LazyLock<IsolationProfile> = LazyLock::new(|| IsolationProfile {
    name: "minimal".to_string(),
    ro_binds: paths(&["/usr"]),
    rw_binds: Vec::new(),
    dev_binds: Vec::new(),
    tmpfs: paths(&["/tmp"]),
    symlinks: usr_merge_links(),
    namespaces: Namespaces {
        user: true,
        pid: true,
        network: true,
        ipc: true,
        cgroup: true,
    },
    id_map: Some(IdMap {
        uid: 65534,
        gid: 65534,
    }),
    die_with_parent: true,
    new_session: true,
    env: EnvPolicy {
        clear: true,
        set: None,
        pass: Vec::new(),
    },
    cap_drop: names(&["ALL"]),
});

impl IsolationProfile {
    /// Template for running the build toolchain
    pub fn build() -> &'static IsolationProfile {
        &BUILD
    }

    /// Template for downloading sources
    pub fn fetch() -> &'static IsolationProfile {
        &FETCH
    }

    /// Template with maximum isolation
    pub fn minimal() -> &'static IsolationProfile {
        &MINIMAL
    }

    /// Look a template up by name
    pub fn template(name: &str) -> Option<&'static IsolationProfile> {
        match name {
            "build" => Some(Self::build()),
            "fetch" => Some(Self::fetch()),
            "minimal" => Some(Self::minimal()),
            _ => None,
        }
    }

    pub fn add_ro_bind(&mut self, path: impl Into<PathBuf>) {
        self.ro_binds.push(path.into());
    }

    pub fn add_ro_binds<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.ro_binds.extend(paths.into_iter().map(Into::into));
    }

    pub fn add_rw_bind(&mut self, path: impl Into<PathBuf>) {
        self.rw_binds.push(path.into());
    }

    pub fn add_rw_binds<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.rw_binds.extend(paths.into_iter().map(Into::into));
    }

    /// Set one environment variable, creating the explicit map if needed
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env
            .set
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
    }

    /// Allow or deny network access
    pub fn set_network(&mut self, allowed: bool) {
        self.namespaces.network = !allowed;
    }

    pub fn network_allowed(&self) -> bool {
        !self.namespaces.network
    }
}
